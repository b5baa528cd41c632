//! mchex CLI - verified file downloads
//!
//! Fetches files over HTTP, checks their size and digest before they are
//! written into place, and verifies files already on disk.

mod commands;
mod output;
mod progress;
mod settings;

use clap::{Args, Parser, Subcommand};
use console::style;
use mchex_core::{DownloadError, ErrorKind, HashAlgorithm};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// mchex - verified HTTP downloads
#[derive(Parser)]
#[command(name = "mchex")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Output format
    #[arg(long, global = true, default_value = "human")]
    output: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON file with HTTP client settings
    #[arg(long, global = true, env = "MCHEX_CONFIG")]
    config: Option<PathBuf>,

    /// User-Agent header sent with every request
    #[arg(long, global = true, env = "MCHEX_USER_AGENT")]
    user_agent: Option<String>,

    /// Connection timeout in seconds
    #[arg(long, global = true, env = "MCHEX_CONNECT_TIMEOUT")]
    connect_timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a file and verify it before writing it into place
    Fetch(FetchArgs),

    /// Download the client or server jar listed in a version metadata file
    Artifact {
        /// Path or http(s) URL of the version metadata JSON
        metadata: String,

        /// Base directory for downloads
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,

        /// Fetch the server jar instead of the client jar
        #[arg(long)]
        server: bool,

        /// Replace the jar if it already exists
        #[arg(long)]
        overwrite: bool,
    },

    /// Check a file on disk against an expected size and digest
    Verify {
        /// File to check
        path: PathBuf,

        /// Expected size in bytes
        #[arg(long)]
        size: Option<u64>,

        /// Expected digest as hex
        #[arg(long)]
        digest: Option<String>,

        /// Digest algorithm (md5, sha1, sha256)
        #[arg(short, long, default_value_t = HashAlgorithm::Md5)]
        algorithm: HashAlgorithm,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Args)]
struct FetchArgs {
    /// URL to download
    url: String,

    /// Output file path (defaults to the last URL segment)
    #[arg(short = 'O', long = "out")]
    out: Option<PathBuf>,

    /// Expected size in bytes
    #[arg(long)]
    size: Option<u64>,

    /// Expected digest as hex
    #[arg(long)]
    digest: Option<String>,

    /// Digest algorithm (md5, sha1, sha256)
    #[arg(short, long, default_value_t = HashAlgorithm::Md5)]
    algorithm: HashAlgorithm,

    /// Replace the destination if it already exists
    #[arg(long)]
    overwrite: bool,

    /// Do not warn when size or digest cannot be checked
    #[arg(long)]
    no_warnings: bool,
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "mchex=debug,mchex_core=debug"
    } else {
        "warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose),
        )
        .with(filter)
        .init();
}

/// Process exit code for a failed command
fn exit_code(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<DownloadError>().map(DownloadError::kind) {
        Some(ErrorKind::AlreadyExists) => 2,
        Some(ErrorKind::SizeMismatch | ErrorKind::DigestMismatch) => 3,
        Some(ErrorKind::Transport) => 4,
        Some(ErrorKind::Storage | ErrorKind::NotFound) => 5,
        Some(ErrorKind::Cancelled) => 130,
        _ => 1,
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let settings = settings::load(cli.config.as_deref(), cli.user_agent, cli.connect_timeout)?;

    match cli.command {
        Commands::Fetch(args) => commands::fetch(&settings, args, cli.output).await,

        Commands::Artifact {
            metadata,
            dir,
            server,
            overwrite,
        } => commands::fetch_artifact(&settings, &metadata, &dir, server, overwrite, cli.output).await,

        Commands::Verify {
            path,
            size,
            digest,
            algorithm,
        } => commands::verify_file(&path, size, digest.as_deref(), algorithm, cli.output).await,

        Commands::Completions { shell } => {
            use clap::CommandFactory;
            clap_complete::generate(shell, &mut Cli::command(), "mchex", &mut std::io::stdout());
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("{} {:#}", style("error:").red().bold(), error);
            ExitCode::from(exit_code(&error))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_fetch() {
        let cli = Cli::parse_from([
            "mchex",
            "fetch",
            "https://example.com/server.jar",
            "--size",
            "29",
            "--digest",
            "d53ce17d1015ae35c680abb82049bf0e5239c4ba",
            "-a",
            "sha1",
            "--overwrite",
        ]);

        match cli.command {
            Commands::Fetch(args) => {
                assert_eq!(args.size, Some(29));
                assert_eq!(args.algorithm, HashAlgorithm::Sha1);
                assert!(args.overwrite);
                assert!(!args.no_warnings);
                assert!(args.out.is_none());
            }
            _ => panic!("expected fetch"),
        }
    }

    #[test]
    fn test_parse_artifact_from_url() {
        let cli = Cli::parse_from([
            "mchex",
            "artifact",
            "https://piston-meta.mojang.com/v1/packages/abc/1.20.1.json",
            "--server",
        ]);

        match cli.command {
            Commands::Artifact { metadata, server, .. } => {
                assert!(metadata.starts_with("https://"));
                assert!(server);
            }
            _ => panic!("expected artifact"),
        }
    }

    #[test]
    fn test_exit_codes() {
        let mismatch = anyhow::Error::from(DownloadError::SizeMismatch {
            expected: 100,
            actual: 50,
        });
        assert_eq!(exit_code(&mismatch), 3);

        let exists = anyhow::Error::from(DownloadError::AlreadyExists(PathBuf::from("a")));
        assert_eq!(exit_code(&exists), 2);

        assert_eq!(exit_code(&anyhow::anyhow!("bad metadata")), 1);
    }
}
