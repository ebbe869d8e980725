//! Shared HTTP plumbing for the issue tracker and code host clients.

use reqwest::{Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use tracing::debug;
use upkeep_core::RunContext;

use crate::error::{Result, ToolError};

/// HTTP client with the upkeep user agent. GitHub rejects requests without one.
pub(crate) fn client() -> Result<Client> {
    Ok(Client::builder()
        .user_agent(concat!("upkeep/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// `base` with `segments` appended, each one percent-encoded as a single
/// path segment (so `project/token` becomes `project%2Ftoken`).
pub(crate) fn endpoint(base: &str, segments: &[&str]) -> Result<Url> {
    let mut url = Url::parse(base).map_err(|e| ToolError::Parse(format!("invalid url {base}: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| ToolError::Parse(format!("url {base} cannot be a base")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Send `request` unless the run is cancelled first. Non-2xx responses are
/// errors carrying the status and body.
pub(crate) async fn send(ctx: &RunContext, request: RequestBuilder) -> Result<Response> {
    if ctx.is_cancelled() {
        return Err(ToolError::Cancelled);
    }
    let response = tokio::select! {
        biased;
        _ = ctx.cancelled() => return Err(ToolError::Cancelled),
        response = request.send() => response?,
    };
    let status = response.status();
    debug!(url = %response.url(), status = %status, "http response");
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ToolError::Http(format!("{status}: {}", body.trim())));
    }
    Ok(response)
}

pub(crate) async fn json<T: DeserializeOwned>(ctx: &RunContext, request: RequestBuilder) -> Result<T> {
    let response = send(ctx, request).await?;
    let body = response.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}

pub(crate) async fn bytes(ctx: &RunContext, request: RequestBuilder) -> Result<Vec<u8>> {
    let response = send(ctx, request).await?;
    Ok(response.bytes().await?.to_vec())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_encodes_segments() {
        let url = endpoint(
            "https://git.drupalcode.org/api/v4",
            &["projects", "project/token", "search"],
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://git.drupalcode.org/api/v4/projects/project%2Ftoken/search"
        );

        let url = endpoint("https://www.drupal.org/", &["api-d7", "node", "3412345.json"]).unwrap();
        assert_eq!(url.as_str(), "https://www.drupal.org/api-d7/node/3412345.json");
    }

    #[tokio::test]
    async fn test_error_status_carries_body() {
        let (base, _rx) = testing::serve_once(404, r#"{"message":"404 Project Not Found"}"#).await;
        let err = json::<serde_json::Value>(&RunContext::new(), client().unwrap().get(base))
            .await
            .unwrap_err();
        match err {
            ToolError::Http(message) => {
                assert!(message.starts_with("404"));
                assert!(message.contains("Project Not Found"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_context_sends_nothing() {
        let ctx = RunContext::new();
        ctx.cancel();
        let err = send(&ctx, client().unwrap().get("http://127.0.0.1:9"))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Cancelled));
    }
}
