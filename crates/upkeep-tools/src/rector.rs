//! Rector deprecation rewrites through `composer exec`.

use std::io::Write as _;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::debug;
use upkeep_core::{DeprecationRewriter, RewriteReport, RunContext};

use crate::error::{Result, ToolError};
use crate::process::ToolCommand;

const RECTOR_CONFIG: &str = include_str!("../scripts/rector.php");

/// Composer package providing the Drupal rector rules.
pub const RECTOR_PACKAGE: &str = "palantirnet/drupal-rector";

#[derive(Debug, Default, Deserialize)]
struct Totals {
    #[serde(default)]
    errors: u64,
}

#[derive(Debug, Deserialize)]
struct JsonReport {
    #[serde(default)]
    totals: Totals,
    #[serde(default)]
    changed_files: Vec<String>,
}

/// Parse `rector process --output-format=json` output. Debug lines printed
/// before the document are skipped.
pub fn parse_report(output: &str) -> Result<RewriteReport> {
    let start = output
        .find("\n{")
        .map(|i| i + 1)
        .or_else(|| output.starts_with('{').then_some(0))
        .ok_or_else(|| ToolError::Parse("rector printed no JSON report".to_string()))?;
    let raw: JsonReport = serde_json::from_str(output[start..].trim_end())?;
    Ok(RewriteReport {
        changed_files: raw.changed_files,
        errors: raw.totals.errors,
    })
}

pub struct RectorCli {
    composer: String,
    config: OnceCell<tempfile::TempPath>,
}

impl Default for RectorCli {
    fn default() -> Self {
        Self::new("composer")
    }
}

impl RectorCli {
    pub fn new(composer: impl Into<String>) -> Self {
        Self {
            composer: composer.into(),
            config: OnceCell::new(),
        }
    }

    async fn config_path(&self) -> Result<String> {
        let path = self
            .config
            .get_or_try_init(|| async {
                let mut file = tempfile::Builder::new()
                    .prefix("rector")
                    .suffix(".php")
                    .tempfile()?;
                file.write_all(RECTOR_CONFIG.as_bytes())?;
                Ok::<_, ToolError>(file.into_temp_path())
            })
            .await?;
        Ok(path.to_string_lossy().into_owned())
    }
}

#[async_trait]
impl DeprecationRewriter for RectorCli {
    fn package(&self) -> &str {
        RECTOR_PACKAGE
    }

    async fn run(
        &self,
        ctx: &RunContext,
        dir: &Path,
        paths: &[String],
    ) -> upkeep_core::Result<RewriteReport> {
        if paths.is_empty() {
            debug!("no custom code directories, nothing to rewrite");
            return Ok(RewriteReport::default());
        }
        let config = format!("--config={}", self.config_path().await?);
        let out = ToolCommand::new(&self.composer)
            .current_dir(dir)
            .args(["exec", "--", "rector", "process"])
            .arg(config)
            .args([
                "--no-progress-bar",
                "--no-diffs",
                "--debug",
                "--output-format=json",
            ])
            .args(paths.iter().cloned())
            .run(ctx)
            .await?;
        let report = parse_report(&out.stdout)?;
        debug!(changed = report.changed_files.len(), errors = report.errors, "rector finished");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_report_after_debug_output() {
        let output = "[file] web/modules/custom/foo/foo.module\n[rule] Drupal\\Rector\\Rector\\Deprecation\\EntityLoadRector\n{\n  \"totals\": {\"changed_files\": 1, \"errors\": 0},\n  \"file_diffs\": [],\n  \"changed_files\": [\"web/modules/custom/foo/foo.module\"]\n}\n";
        let report = parse_report(output).unwrap();
        assert_eq!(report.changed_files, vec!["web/modules/custom/foo/foo.module"]);
        assert_eq!(report.errors, 0);
    }

    #[test]
    fn test_parse_report_without_json() {
        assert!(parse_report("PHP Fatal error: out of memory").is_err());
        let report = parse_report(r#"{"totals": {"changed_files": 0, "errors": 2}}"#).unwrap();
        assert!(report.changed_files.is_empty());
        assert_eq!(report.errors, 2);
    }

    #[tokio::test]
    async fn test_empty_paths_skip_rector() {
        let rector = RectorCli::new("upkeep-no-such-composer");
        let report = rector
            .run(&RunContext::new(), Path::new("/tmp"), &[])
            .await
            .unwrap();
        assert_eq!(report, RewriteReport::default());
    }
}
