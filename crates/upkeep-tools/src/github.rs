//! GitHub pull requests for projects hosted on GitHub.

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use upkeep_core::{CodeHost, MergeRequest, RunContext};

use crate::error::{Result, ToolError};
use crate::http;

pub const GITHUB_API_URL: &str = "https://api.github.com";

const RAW_MEDIA_TYPE: &str = "application/vnd.github.raw+json";
const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";

#[derive(Debug, Deserialize)]
struct CreatedPullRequest {
    number: u64,
    html_url: String,
}

pub struct GitHubHost {
    base_url: String,
    owner: String,
    repo: String,
    token: String,
    http: reqwest::Client,
}

impl GitHubHost {
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            base_url: GITHUB_API_URL.to_string(),
            owner: owner.into(),
            repo: repo.into(),
            token: token.into(),
            http: http::client()?,
        })
    }

    /// Client for `https://github.com/<owner>/<repo>[.git]`.
    pub fn from_repository_url(repository_url: &str, token: impl Into<String>) -> Result<Self> {
        let url = Url::parse(repository_url)
            .map_err(|e| ToolError::Parse(format!("invalid repository url: {e}")))?;
        let mut segments = url.path().trim_matches('/').split('/');
        match (segments.next(), segments.next()) {
            (Some(owner), Some(repo)) if !owner.is_empty() && !repo.is_empty() => {
                Self::new(owner, repo.strip_suffix(".git").unwrap_or(repo), token)
            }
            _ => Err(ToolError::Parse(format!(
                "repository url {repository_url} does not name an owner and repository"
            ))),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn repo_url(&self, rest: &[&str]) -> Result<Url> {
        let mut segments = vec!["repos", self.owner.as_str(), self.repo.as_str()];
        segments.extend_from_slice(rest);
        http::endpoint(&self.base_url, &segments)
    }
}

#[async_trait]
impl CodeHost for GitHubHost {
    async fn create_merge_request(
        &self,
        ctx: &RunContext,
        title: &str,
        body: &str,
        source_branch: &str,
        target_branch: &str,
    ) -> upkeep_core::Result<MergeRequest> {
        let request = self
            .http
            .post(self.repo_url(&["pulls"])?)
            .bearer_auth(&self.token)
            .header(ACCEPT, JSON_MEDIA_TYPE)
            .json(&json!({
                "title": title,
                "body": body,
                "head": source_branch,
                "base": target_branch,
            }));
        let created: CreatedPullRequest = http::json(ctx, request).await?;
        Ok(MergeRequest {
            id: created.number,
            url: created.html_url,
        })
    }

    async fn download_file(
        &self,
        ctx: &RunContext,
        branch: &str,
        path: &str,
    ) -> upkeep_core::Result<Vec<u8>> {
        let mut rest = vec!["contents"];
        rest.extend(path.split('/').filter(|s| !s.is_empty()));
        let mut url = self.repo_url(&rest)?;
        url.query_pairs_mut().append_pair("ref", branch);
        let request = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .header(ACCEPT, RAW_MEDIA_TYPE);
        Ok(http::bytes(ctx, request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::serve_once;

    #[test]
    fn test_from_repository_url() {
        let host = GitHubHost::from_repository_url("https://github.com/acme/site.git", "t").unwrap();
        assert_eq!(host.owner, "acme");
        assert_eq!(host.repo, "site");
        assert!(GitHubHost::from_repository_url("https://github.com/acme", "t").is_err());
    }

    #[tokio::test]
    async fn test_create_pull_request() {
        let (base, rx) = serve_once(
            201,
            r#"{"id": 1, "number": 7, "html_url": "https://github.com/acme/site/pull/7", "state": "open"}"#,
        )
        .await;
        let host = GitHubHost::new("acme", "site", "s3cret")
            .unwrap()
            .with_base_url(base);
        let mr = host
            .create_merge_request(&RunContext::new(), "Update dependencies", "body", "upkeep-abc", "main")
            .await
            .unwrap();
        assert_eq!(mr.id, 7);
        assert_eq!(mr.url, "https://github.com/acme/site/pull/7");

        let request = rx.await.unwrap();
        let head = request.head.to_ascii_lowercase();
        assert!(head.starts_with("post /repos/acme/site/pulls "));
        assert!(head.contains("authorization: bearer s3cret"));
        assert!(head.contains("user-agent: upkeep/"));
        let sent: serde_json::Value = serde_json::from_str(&request.body).unwrap();
        assert_eq!(sent["head"], "upkeep-abc");
        assert_eq!(sent["base"], "main");
    }

    #[tokio::test]
    async fn test_download_file_requests_raw_content() {
        let (base, rx) = serve_once(200, r#"{"name": "acme/site"}"#).await;
        let host = GitHubHost::new("acme", "site", "s3cret")
            .unwrap()
            .with_base_url(base);
        let body = host
            .download_file(&RunContext::new(), "main", "composer.json")
            .await
            .unwrap();
        assert_eq!(body, br#"{"name": "acme/site"}"#.to_vec());

        let request = rx.await.unwrap();
        assert!(request
            .head
            .starts_with("GET /repos/acme/site/contents/composer.json?ref=main "));
    }
}
