use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::trace;
use url::Url;

use super::{NativeStatus, ResolveError, StatusResolver};
use crate::config::RepositoryProcessingConfig;

/// Resolves status by fetching a JSON status document over HTTP and reading
/// the native status at the configured JSON pointer.
#[derive(Clone, Debug)]
pub struct HttpStatusResolver {
    client: reqwest::Client,
}

impl Default for HttpStatusResolver {
    fn default() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl HttpStatusResolver {
    /// Uses a caller-configured HTTP client.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatusResolver for HttpStatusResolver {
    async fn resolve(
        &self,
        status_ref: &str,
        config: &RepositoryProcessingConfig,
    ) -> Result<NativeStatus, ResolveError> {
        let malformed = |message: String| ResolveError::Malformed {
            status_ref: status_ref.to_string(),
            message,
        };
        let unreachable = |message: String| ResolveError::Unreachable {
            status_ref: status_ref.to_string(),
            message,
        };

        let url = Url::parse(status_ref)
            .map_err(|err| malformed(format!("invalid status URL: {err}")))?;

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|err| unreachable(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(unreachable(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(malformed(format!("HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|err| unreachable(err.to_string()))?;
        trace!(status_ref, bytes = body.len(), "fetched status document");

        interpret_status_document(&body, config.status_pointer()).map_err(malformed)
    }
}

/// Extracts the native status from a JSON status document.
pub fn interpret_status_document(
    body: &str,
    pointer: &str,
) -> Result<NativeStatus, String> {
    let document: serde_json::Value = serde_json::from_str(body)
        .map_err(|err| format!("status document is not JSON: {err}"))?;
    let value = document
        .pointer(pointer)
        .ok_or_else(|| format!("status document has no value at {pointer}"))?;

    let native = match value {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        other => {
            return Err(format!(
                "status value at {pointer} is not a scalar: {other}"
            ));
        }
    };

    if native.is_empty() {
        return Err(format!("status value at {pointer} is blank"));
    }
    Ok(NativeStatus(native))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_nested_status() {
        let body = r#"{"deposit":{"state":{"term":"archived"}}}"#;
        let native =
            interpret_status_document(body, "/deposit/state/term").expect("status");
        assert_eq!(native.as_str(), "archived");
    }

    #[test]
    fn rejects_non_json_documents() {
        let err = interpret_status_document("<feed/>", "/status").unwrap_err();
        assert!(err.contains("not JSON"));
    }

    #[test]
    fn rejects_missing_and_blank_values() {
        assert!(interpret_status_document(r#"{"other":1}"#, "/status").is_err());
        assert!(interpret_status_document(r#"{"status":"  "}"#, "/status").is_err());
        assert!(interpret_status_document(r#"{"status":{}}"#, "/status").is_err());
    }

    #[tokio::test]
    async fn invalid_reference_is_malformed() {
        let resolver = HttpStatusResolver::default();
        let err = resolver
            .resolve("not a url", &RepositoryProcessingConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Malformed { .. }));
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let resolver = HttpStatusResolver::default();
        let err = resolver
            .resolve(
                &format!("http://{addr}/status"),
                &RepositoryProcessingConfig::default(),
            )
            .await
            .unwrap_err();
        assert!(err.is_transient(), "got {err}");
    }
}
