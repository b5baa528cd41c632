//! HTTP client construction

use crate::error::DownloadError;
use mchex_types::{ClientMetadata, EngineSettings};
use reqwest::Client;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Build an HTTP client from engine settings
pub fn build_client(settings: &EngineSettings) -> Result<Client, DownloadError> {
    let mut builder = Client::builder()
        .user_agent(settings.user_agent.as_str())
        .connect_timeout(Duration::from_secs(settings.connect_timeout_secs));

    if let Some(secs) = settings.read_timeout_secs {
        builder = builder.read_timeout(Duration::from_secs(secs));
    }

    Ok(builder.build()?)
}

/// Fetch and decode a version metadata document
///
/// # Errors
/// Returns [`DownloadError::ServerError`] for a non-success status and
/// [`DownloadError::Network`] if the request or the JSON decoding fails.
pub async fn fetch_metadata(client: &Client, url: &Url) -> Result<ClientMetadata, DownloadError> {
    debug!("Fetching version metadata from {}", url);
    let response = client.get(url.clone()).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::ServerError {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    Ok(response.json::<ClientMetadata>().await?)
}

/// Process-wide client used by downloaders that were not given one
pub(crate) fn default_client() -> Client {
    static CLIENT: OnceLock<Client> = OnceLock::new();

    CLIENT
        .get_or_init(|| {
            build_client(&EngineSettings::default()).unwrap_or_else(|e| {
                tracing::warn!("Falling back to a bare HTTP client: {}", e);
                Client::new()
            })
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_client_with_custom_settings() {
        let settings = EngineSettings {
            user_agent: "mchex-test".to_string(),
            connect_timeout_secs: 1,
            read_timeout_secs: None,
        };
        assert!(build_client(&settings).is_ok());
    }

    #[tokio::test]
    async fn test_fetch_metadata() {
        let server = httpmock::MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(httpmock::Method::GET).path("/v1/1.20.1.json");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(
                        r#"{"id":"1.20.1","downloads":{"client":{"url":"http://example.invalid/client.jar","size":29,"sha1":"d53ce17d1015ae35c680abb82049bf0e5239c4ba"}}}"#,
                    );
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(httpmock::Method::GET).path("/v1/missing.json");
                then.status(404);
            })
            .await;

        let client = Client::new();
        let url = Url::parse(&server.url("/v1/1.20.1.json")).unwrap();
        let metadata = fetch_metadata(&client, &url).await.unwrap();
        assert_eq!(metadata.id, "1.20.1");
        assert_eq!(metadata.downloads.client.size, 29);
        assert!(metadata.downloads.server.is_none());

        let url = Url::parse(&server.url("/v1/missing.json")).unwrap();
        assert!(matches!(
            fetch_metadata(&client, &url).await,
            Err(DownloadError::ServerError { status: 404, .. })
        ));
    }
}
