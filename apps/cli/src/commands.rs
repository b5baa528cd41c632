//! CLI command implementations

use crate::output::{format_bytes, format_elapsed, print_output};
use crate::progress::DownloadBar;
use crate::{FetchArgs, OutputFormat};
use anyhow::{anyhow, Context, Result};
use console::style;
use mchex_core::{
    build_client, fetch_metadata, verify_file as check_local_file, ClientMetadata,
    DownloadContext, DownloadError, DownloadOptions, DownloadSnapshot, Downloader,
    FileVerification, HashAlgorithm, NamedDownloader,
};
use mchex_types::EngineSettings;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// Exit code reported when the user interrupts a download
const EXIT_CANCELLED: u8 = 130;
const EXIT_MISMATCH: u8 = 3;
const EXIT_MISSING: u8 = 5;

// ============================================================================
// Download Commands
// ============================================================================

pub async fn fetch(settings: &EngineSettings, args: FetchArgs, format: OutputFormat) -> Result<ExitCode> {
    let mut builder = Downloader::builder(args.url.as_str())
        .client(build_client(settings)?)
        .algorithm(args.algorithm);
    if let Some(size) = args.size {
        builder = builder.expected_size(size);
    }
    if let Some(digest) = args.digest {
        builder = builder.digest(args.algorithm, digest);
    }
    let downloader = builder.build()?;

    let target = args
        .out
        .unwrap_or_else(|| PathBuf::from(default_filename(downloader.url())));
    let options = DownloadOptions::default()
        .overwrite(args.overwrite)
        .no_warnings(args.no_warnings);

    let context = downloader.download(target, options);
    let result = run_download(&context, format).await;
    report(result, &context, format)
}

pub async fn fetch_artifact(
    settings: &EngineSettings,
    metadata: &str,
    dir: &Path,
    server: bool,
    overwrite: bool,
    format: OutputFormat,
) -> Result<ExitCode> {
    let client = build_client(settings)?;
    let version: ClientMetadata = match metadata_url(metadata) {
        Some(url) => fetch_metadata(&client, &url)
            .await
            .with_context(|| format!("Failed to fetch version metadata from {}", url))?,
        None => {
            let raw = tokio::fs::read_to_string(metadata)
                .await
                .with_context(|| format!("Failed to read {}", metadata))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Invalid version metadata in {}", metadata))?
        }
    };

    let (artifact, filename) = if server {
        let artifact = version
            .downloads
            .server
            .as_ref()
            .ok_or_else(|| anyhow!("Version {} has no server download", version.id))?;
        (artifact, format!("{}-server.jar", version.id))
    } else {
        (&version.downloads.client, format!("{}.jar", version.id))
    };

    let named = NamedDownloader::from_artifact(artifact, filename, Some(client))?
        .with_relative_path(Path::new("versions").join(&version.id));
    info!("Fetching {} for version {}", named.filename(), version.id);

    let context = named.download(dir, DownloadOptions::default().overwrite(overwrite));
    let result = run_download(&context, format).await;
    report(result, &context, format)
}

/// Metadata sources that name an http(s) URL rather than a local file
fn metadata_url(source: &str) -> Option<Url> {
    Url::parse(source)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
}

/// Drive a download to completion, drawing progress and handling Ctrl-C
async fn run_download(
    context: &DownloadContext,
    format: OutputFormat,
) -> Result<bool, DownloadError> {
    let bar = match format {
        OutputFormat::Human => Some(DownloadBar::new(&label(context.target()))),
        OutputFormat::Json => None,
    };

    drive(context, bar, tokio::signal::ctrl_c()).await
}

/// Wait for `context`, cancelling it once `interrupt` resolves with `Ok`
///
/// An `Err` from `interrupt` means no signal can arrive; the download then
/// simply runs to its end.
async fn drive<F>(
    context: &DownloadContext,
    mut bar: Option<DownloadBar>,
    interrupt: F,
) -> Result<bool, DownloadError>
where
    F: Future<Output = io::Result<()>>,
{
    context.start();
    let wait = context.wait();
    tokio::pin!(wait);
    tokio::pin!(interrupt);
    let mut listening = true;
    let mut ticker = tokio::time::interval(Duration::from_millis(100));

    let result = loop {
        tokio::select! {
            result = &mut wait => break result,
            signal = &mut interrupt, if listening => {
                listening = false;
                match signal {
                    Ok(()) => {
                        warn!("Interrupted, cancelling download");
                        context.cancel().await;
                        break context.wait().await;
                    }
                    Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
                }
            }
            _ = ticker.tick() => {
                if let Some(bar) = bar.as_mut() {
                    bar.update(context);
                }
            }
        }
    };

    if let Some(bar) = bar {
        bar.finish(context, &result);
    }
    result
}

fn report(
    result: Result<bool, DownloadError>,
    context: &DownloadContext,
    format: OutputFormat,
) -> Result<ExitCode> {
    let report = DownloadReport(context.snapshot());

    match result {
        Ok(true) => {
            print_output(&report, format)?;
            Ok(ExitCode::SUCCESS)
        }
        Ok(false) => {
            if let OutputFormat::Json = format {
                print_output(&report, format)?;
            }
            Ok(ExitCode::from(EXIT_CANCELLED))
        }
        Err(e) => {
            if let OutputFormat::Json = format {
                print_output(&report, format)?;
            }
            Err(e.into())
        }
    }
}

#[derive(Serialize)]
#[serde(transparent)]
struct DownloadReport(DownloadSnapshot);

impl fmt::Display for DownloadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = &self.0;
        write!(
            f,
            "{} Saved {} ({}",
            style("✓").green().bold(),
            style(snapshot.target.display()).cyan(),
            format_bytes(snapshot.bytes_transferred)
        )?;
        if let (Some(start), Some(end)) = (snapshot.started_at, snapshot.finished_at) {
            write!(f, " in {}", format_elapsed((end - start).num_seconds()))?;
        }
        write!(f, ")")
    }
}

/// File name used when no output path is given
fn default_filename(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.last())
        .filter(|name| !name.is_empty())
        .unwrap_or("download")
        .to_string()
}

fn label(target: &Path) -> String {
    target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| target.display().to_string())
}

// ============================================================================
// Verify Command
// ============================================================================

#[derive(Serialize)]
struct VerifyReport {
    path: PathBuf,
    exists: bool,
    algorithm: HashAlgorithm,
    size: Option<u64>,
    digest: Option<String>,
    size_ok: Option<bool>,
    digest_ok: Option<bool>,
}

impl VerifyReport {
    fn missing(path: &Path, algorithm: HashAlgorithm) -> Self {
        Self {
            path: path.to_path_buf(),
            exists: false,
            algorithm,
            size: None,
            digest: None,
            size_ok: None,
            digest_ok: None,
        }
    }

    fn passed(&self) -> bool {
        self.exists && self.size_ok != Some(false) && self.digest_ok != Some(false)
    }
}

impl From<FileVerification> for VerifyReport {
    fn from(checked: FileVerification) -> Self {
        Self {
            path: checked.path,
            exists: true,
            algorithm: checked.algorithm,
            size: Some(checked.size),
            digest: Some(checked.digest),
            size_ok: checked.size_ok,
            digest_ok: checked.digest_ok,
        }
    }
}

impl fmt::Display for VerifyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.exists {
            return write!(
                f,
                "{} {} does not exist",
                style("✗").red().bold(),
                self.path.display()
            );
        }

        let mark = |ok: Option<bool>| match ok {
            Some(true) => style("✓").green(),
            Some(false) => style("✗").red(),
            None => style("·").dim(),
        };

        writeln!(f, "{}", style(self.path.display()).bold())?;
        if let Some(size) = self.size {
            writeln!(f, "  {} Size: {} ({} bytes)", mark(self.size_ok), format_bytes(size), size)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "  {} {}: {}", mark(self.digest_ok), self.algorithm, digest)?;
        }
        Ok(())
    }
}

pub async fn verify_file(
    path: &Path,
    expected_size: Option<u64>,
    expected_digest: Option<&str>,
    algorithm: HashAlgorithm,
    format: OutputFormat,
) -> Result<ExitCode> {
    let report = check_file(path, expected_size, expected_digest, algorithm).await?;
    print_output(&report, format)?;

    Ok(if !report.exists {
        ExitCode::from(EXIT_MISSING)
    } else if !report.passed() {
        ExitCode::from(EXIT_MISMATCH)
    } else {
        ExitCode::SUCCESS
    })
}

async fn check_file(
    path: &Path,
    expected_size: Option<u64>,
    expected_digest: Option<&str>,
    algorithm: HashAlgorithm,
) -> Result<VerifyReport> {
    match check_local_file(path, expected_size, expected_digest, algorithm, false).await {
        Ok(checked) => Ok(checked.into()),
        Err(DownloadError::NotFound(_)) => Ok(VerifyReport::missing(path, algorithm)),
        Err(e) => Err(e).with_context(|| format!("Failed to verify {}", path.display())),
    }
}
