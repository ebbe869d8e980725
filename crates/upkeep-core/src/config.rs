use serde::{Deserialize, Serialize};

use crate::error::{Result, UpkeepError};

/// Settings of one update run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub repository_url: String,
    /// Code host token used to clone, push and open the merge request.
    #[serde(default, skip_serializing)]
    pub token: String,
    /// Branch to update and to target with the merge request.
    pub branch: String,
    pub sites: Vec<String>,
    pub security: bool,
    pub skip_style_fix: bool,
    pub skip_deprecation_removal: bool,
    pub dry_run: bool,
    pub verbose: bool,
    /// Upstream forge token. Without it the patch reconciler never asks the
    /// upstream forge anything.
    #[serde(default, skip_serializing)]
    pub upstream_token: Option<String>,
    /// Overrides the per-site group size.
    pub site_parallelism: Option<usize>,
}

impl Config {
    pub fn new(repository_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            repository_url: repository_url.into(),
            token: token.into(),
            branch: "main".to_string(),
            sites: vec!["default".to_string()],
            security: false,
            skip_style_fix: false,
            skip_deprecation_removal: false,
            dry_run: false,
            verbose: false,
            upstream_token: None,
            site_parallelism: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.repository_url.trim().is_empty() {
            return Err(UpkeepError::Config("repository url is empty".to_string()));
        }
        if self.token.trim().is_empty() {
            return Err(UpkeepError::Config("access token is empty".to_string()));
        }
        if self.branch.trim().is_empty() {
            return Err(UpkeepError::Config("branch is empty".to_string()));
        }
        if self.sites.is_empty() || self.sites.iter().any(|s| s.trim().is_empty()) {
            return Err(UpkeepError::Config(
                "at least one non-empty site is required".to_string(),
            ));
        }
        if self.site_parallelism == Some(0) {
            return Err(UpkeepError::Config(
                "site parallelism must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Upstream token, treating an empty value as unset.
    pub fn upstream_token(&self) -> Option<&str> {
        self.upstream_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
    }
}
