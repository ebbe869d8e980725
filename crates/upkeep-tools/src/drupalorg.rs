//! drupal.org issue tracker client.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use upkeep_core::{Issue, IssueTracker, RunContext};

use crate::error::Result;
use crate::http;

pub const DRUPAL_ORG_URL: &str = "https://www.drupal.org";

#[derive(Debug, Default, Deserialize)]
struct ProjectRef {
    #[serde(default)]
    machine_name: String,
}

/// Node as returned by the `api-d7` endpoint.
#[derive(Debug, Deserialize)]
struct NodeResponse {
    nid: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    field_issue_status: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    field_project: ProjectRef,
}

impl From<NodeResponse> for Issue {
    fn from(node: NodeResponse) -> Self {
        Issue {
            id: node.nid,
            title: node.title,
            status: node.field_issue_status,
            url: node.url,
            project_machine_name: node.field_project.machine_name,
        }
    }
}

pub struct DrupalOrgClient {
    base_url: String,
    http: reqwest::Client,
}

impl DrupalOrgClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(DRUPAL_ORG_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into(),
            http: http::client()?,
        })
    }
}

#[async_trait]
impl IssueTracker for DrupalOrgClient {
    async fn get_issue(&self, ctx: &RunContext, id: &str) -> upkeep_core::Result<Issue> {
        let node_file = format!("{id}.json");
        let url = http::endpoint(&self.base_url, &["api-d7", "node", node_file.as_str()])?;
        debug!(issue = %id, "fetching issue");
        let node: NodeResponse = http::json(ctx, self.http.get(url)).await?;
        Ok(node.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::serve_once;

    #[tokio::test]
    async fn test_get_issue() {
        let (base, rx) = serve_once(
            200,
            r#"{
                "nid": "3412345",
                "title": "Token replacement fails for empty fields",
                "field_issue_status": "7",
                "url": "https://www.drupal.org/project/token/issues/3412345",
                "field_project": {"uri": "https://www.drupal.org/api-d7/node/1234", "id": "1234", "machine_name": "token"},
                "comment_count": "12"
            }"#,
        )
        .await;
        let client = DrupalOrgClient::with_base_url(base).unwrap();
        let issue = client.get_issue(&RunContext::new(), "3412345").await.unwrap();

        assert_eq!(issue.id, "3412345");
        assert_eq!(issue.project_machine_name, "token");
        assert!(issue.is_fixed());

        let request = rx.await.unwrap();
        assert!(request.head.starts_with("GET /api-d7/node/3412345.json "));
    }

    #[tokio::test]
    async fn test_missing_issue_is_an_error() {
        let (base, _rx) = serve_once(404, "[]").await;
        let client = DrupalOrgClient::with_base_url(base).unwrap();
        assert!(client.get_issue(&RunContext::new(), "1").await.is_err());
    }
}
