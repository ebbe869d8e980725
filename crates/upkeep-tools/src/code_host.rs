use std::sync::Arc;

use upkeep_core::CodeHost;

use crate::error::Result;
use crate::github::GitHubHost;
use crate::gitlab::GitLabHost;

/// Code host client for `repository_url`: GitHub when the url names it,
/// GitLab otherwise.
pub fn code_host_for(repository_url: &str, token: &str) -> Result<Arc<dyn CodeHost>> {
    if repository_url.contains("github") {
        Ok(Arc::new(GitHubHost::from_repository_url(repository_url, token)?))
    } else {
        Ok(Arc::new(GitLabHost::from_repository_url(repository_url, token)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selects_host_by_url() {
        assert!(code_host_for("https://github.com/acme/site.git", "t").is_ok());
        assert!(code_host_for("https://gitlab.com/acme/site.git", "t").is_ok());
        assert!(code_host_for("https://git.example.org/acme/site.git", "t").is_ok());
        // GitHub urls must name owner and repository.
        assert!(code_host_for("https://github.com/acme", "t").is_err());
        assert!(code_host_for("not a url", "t").is_err());
    }
}
