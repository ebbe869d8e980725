//! Upkeep tools: the concrete collaborators behind the engine's traits
//!
//! - [`composer::ComposerCli`]: `PackageManager` over the composer binary
//! - [`drush::DrushCli`]: `SiteTool` over `composer exec -- drush`
//! - [`git::GitCli`] / [`git::GitWorktree`]: clone, stage, commit, push
//! - [`drupalorg::DrupalOrgClient`]: issue lookups on drupal.org
//! - [`gitlab::GitLabForge`]: upstream commit and merge request search
//! - [`gitlab::GitLabHost`] / [`github::GitHubHost`]: merge requests on the
//!   project's own code host, picked by [`code_host_for`]
//! - [`phpcs::PhpcsCli`] / [`rector::RectorCli`]: code quality tools

pub mod code_host;
pub mod composer;
pub mod drupalorg;
pub mod drush;
pub mod error;
pub mod git;
pub mod github;
pub mod gitlab;
mod http;
pub mod phpcs;
pub mod process;
pub mod rector;

pub use code_host::code_host_for;
pub use composer::ComposerCli;
pub use drupalorg::DrupalOrgClient;
pub use drush::DrushCli;
pub use error::{Result, ToolError};
pub use git::{GitCli, GitWorktree};
pub use github::GitHubHost;
pub use gitlab::{GitLabForge, GitLabHost};
pub use phpcs::PhpcsCli;
pub use process::{CommandOutput, ToolCommand};
pub use rector::RectorCli;
