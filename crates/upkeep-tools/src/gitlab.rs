//! GitLab REST clients: the upstream forge (git.drupalcode.org) and the
//! project's own code host when it lives on a GitLab instance.

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use upkeep_core::model::{CommitRef, UpstreamMergeRequest};
use upkeep_core::{CodeHost, MergeRequest, RunContext, UpstreamForge};

use crate::error::{Result, ToolError};
use crate::http;

pub const DRUPALCODE_API_URL: &str = "https://git.drupalcode.org/api/v4";

const TOKEN_HEADER: &str = "PRIVATE-TOKEN";

#[derive(Debug, Deserialize)]
struct ProjectResponse {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct CreatedMergeRequest {
    iid: u64,
    web_url: String,
}

/// Authenticated GitLab v4 API access shared by both clients.
struct Api {
    base_url: String,
    token: String,
    http: reqwest::Client,
}

impl Api {
    fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into(),
            token: token.into(),
            http: http::client()?,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        http::endpoint(&self.base_url, segments)
    }

    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        self.http.get(url).header(TOKEN_HEADER, &self.token)
    }

    fn post(&self, url: Url) -> reqwest::RequestBuilder {
        self.http.post(url).header(TOKEN_HEADER, &self.token)
    }
}

/// Upstream forge hosting the contributed projects and their issue forks.
pub struct GitLabForge {
    api: Api,
}

impl GitLabForge {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        Self::with_base_url(DRUPALCODE_API_URL, token)
    }

    pub fn with_base_url(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        Ok(Self {
            api: Api::new(base_url, token)?,
        })
    }
}

#[async_trait]
impl UpstreamForge for GitLabForge {
    async fn search_commits(
        &self,
        ctx: &RunContext,
        project: &str,
        query: &str,
        git_ref: &str,
    ) -> upkeep_core::Result<Vec<CommitRef>> {
        let mut url = self.api.url(&["projects", project, "search"])?;
        url.query_pairs_mut()
            .append_pair("scope", "commits")
            .append_pair("search", query)
            .append_pair("ref", git_ref);
        debug!(project = %project, query = %query, git_ref = %git_ref, "searching upstream commits");
        Ok(http::json(ctx, self.api.get(url)).await?)
    }

    async fn find_merge_requests_by_source_project(
        &self,
        ctx: &RunContext,
        target_project: &str,
        source_project: &str,
    ) -> upkeep_core::Result<Vec<UpstreamMergeRequest>> {
        let source: ProjectResponse =
            http::json(ctx, self.api.get(self.api.url(&["projects", source_project])?)).await?;

        let mut url = self.api.url(&["projects", target_project, "merge_requests"])?;
        url.query_pairs_mut()
            .append_pair("source_project_id", &source.id.to_string());
        debug!(target = %target_project, source = %source_project, source_id = source.id, "listing merge requests");
        Ok(http::json(ctx, self.api.get(url)).await?)
    }

    async fn download(&self, ctx: &RunContext, url: &str) -> upkeep_core::Result<Vec<u8>> {
        let url = Url::parse(url).map_err(|e| ToolError::Parse(format!("invalid url {url}: {e}")))?;
        Ok(http::bytes(ctx, self.api.http.get(url)).await?)
    }
}

/// Merge requests on a GitLab-hosted project.
pub struct GitLabHost {
    api: Api,
    project_path: String,
}

impl GitLabHost {
    /// `base_url` is the API root, e.g. `https://gitlab.com/api/v4`.
    pub fn new(
        base_url: impl Into<String>,
        project_path: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            api: Api::new(base_url, token)?,
            project_path: project_path.into(),
        })
    }

    /// Client for the project behind `repository_url`.
    pub fn from_repository_url(repository_url: &str, token: impl Into<String>) -> Result<Self> {
        let url = Url::parse(repository_url)
            .map_err(|e| ToolError::Parse(format!("invalid repository url: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| ToolError::Parse(format!("repository url {repository_url} has no host")))?;
        let base = match url.port() {
            Some(port) => format!("{}://{host}:{port}/api/v4", url.scheme()),
            None => format!("{}://{host}/api/v4", url.scheme()),
        };
        let path = url.path().trim_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path);
        Self::new(base, path, token)
    }

    pub fn project_path(&self) -> &str {
        &self.project_path
    }
}

#[async_trait]
impl CodeHost for GitLabHost {
    async fn create_merge_request(
        &self,
        ctx: &RunContext,
        title: &str,
        body: &str,
        source_branch: &str,
        target_branch: &str,
    ) -> upkeep_core::Result<MergeRequest> {
        let url = self
            .api
            .url(&["projects", self.project_path.as_str(), "merge_requests"])?;
        let request = self.api.post(url).json(&json!({
            "source_branch": source_branch,
            "target_branch": target_branch,
            "title": title,
            "description": body,
        }));
        let created: CreatedMergeRequest = http::json(ctx, request).await?;
        Ok(MergeRequest {
            id: created.iid,
            url: created.web_url,
        })
    }

    async fn download_file(
        &self,
        ctx: &RunContext,
        branch: &str,
        path: &str,
    ) -> upkeep_core::Result<Vec<u8>> {
        let mut url = self.api.url(&[
            "projects",
            self.project_path.as_str(),
            "repository",
            "files",
            path,
            "raw",
        ])?;
        url.query_pairs_mut().append_pair("ref", branch);
        Ok(http::bytes(ctx, self.api.get(url)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::serve_once;

    #[test]
    fn test_host_from_repository_url() {
        let host =
            GitLabHost::from_repository_url("https://gitlab.example.com/acme/web/site.git", "t")
                .unwrap();
        assert_eq!(host.project_path(), "acme/web/site");
        assert_eq!(host.api.base_url, "https://gitlab.example.com/api/v4");

        let host = GitLabHost::from_repository_url("http://localhost:8080/acme/site", "t").unwrap();
        assert_eq!(host.api.base_url, "http://localhost:8080/api/v4");
    }

    #[tokio::test]
    async fn test_create_merge_request() {
        let (base, rx) = serve_once(
            201,
            r#"{"id": 991, "iid": 42, "web_url": "https://gitlab.example.com/acme/site/-/merge_requests/42"}"#,
        )
        .await;
        let host = GitLabHost::new(base, "acme/site", "s3cret").unwrap();
        let mr = host
            .create_merge_request(&RunContext::new(), "Update dependencies", "body", "upkeep-abc", "main")
            .await
            .unwrap();
        assert_eq!(mr.id, 42);
        assert!(mr.url.ends_with("/merge_requests/42"));

        let request = rx.await.unwrap();
        assert!(request
            .head
            .starts_with("POST /projects/acme%2Fsite/merge_requests "));
        assert!(request.head.to_ascii_lowercase().contains("private-token: s3cret"));
        let sent: serde_json::Value = serde_json::from_str(&request.body).unwrap();
        assert_eq!(sent["source_branch"], "upkeep-abc");
        assert_eq!(sent["description"], "body");
    }

    #[tokio::test]
    async fn test_search_commits() {
        let (base, rx) = serve_once(
            200,
            r#"[{"id": "a1b2c3", "short_id": "a1b2c3", "title": "Issue #3412345 by someone: Fix tokens", "message": "..."}]"#,
        )
        .await;
        let forge = GitLabForge::with_base_url(base, "s3cret").unwrap();
        let commits = forge
            .search_commits(&RunContext::new(), "project/token", "3412345", "8.x-1.14")
            .await
            .unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].id, "a1b2c3");

        let request = rx.await.unwrap();
        assert!(request.head.starts_with(
            "GET /projects/project%2Ftoken/search?scope=commits&search=3412345&ref=8.x-1.14 "
        ));
    }
}
