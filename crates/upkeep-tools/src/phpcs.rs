//! PHP_CodeSniffer (`phpcs` / `phpcbf`) through `composer exec`.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use upkeep_core::{RunContext, StyleFixer, StyleReport};

use crate::error::Result;
use crate::process::ToolCommand;

#[derive(Debug, Default, Deserialize)]
struct Totals {
    #[serde(default)]
    errors: u64,
    #[serde(default)]
    warnings: u64,
}

#[derive(Debug, Deserialize)]
struct Message {
    message: String,
    #[serde(default)]
    line: u64,
    #[serde(default, rename = "type")]
    kind: String,
}

#[derive(Debug, Default, Deserialize)]
struct FileReport {
    #[serde(default)]
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct JsonReport {
    #[serde(default)]
    totals: Totals,
    #[serde(default)]
    files: BTreeMap<String, FileReport>,
}

/// Relative to `dir` when the sniffer printed an absolute path.
fn display_path(dir: &Path, file: &str) -> String {
    Path::new(file)
        .strip_prefix(dir)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| file.to_string())
}

/// Parse `phpcs --report=json` output into a report of files with messages.
pub fn parse_report(dir: &Path, output: &str) -> Result<StyleReport> {
    let start = output.find('{').unwrap_or(0);
    let raw: JsonReport = serde_json::from_str(&output[start..])?;
    let files = raw
        .files
        .into_iter()
        .filter(|(_, report)| !report.messages.is_empty())
        .map(|(file, report)| {
            let messages = report
                .messages
                .into_iter()
                .map(|m| format!("Line {} ({}): {}", m.line, m.kind.to_lowercase(), m.message))
                .collect();
            (display_path(dir, &file), messages)
        })
        .collect();
    Ok(StyleReport {
        errors: raw.totals.errors,
        warnings: raw.totals.warnings,
        files,
    })
}

pub struct PhpcsCli {
    composer: String,
}

impl Default for PhpcsCli {
    fn default() -> Self {
        Self::new("composer")
    }
}

impl PhpcsCli {
    pub fn new(composer: impl Into<String>) -> Self {
        Self {
            composer: composer.into(),
        }
    }

    fn command(&self, dir: &Path, tool: &str) -> ToolCommand {
        ToolCommand::new(&self.composer)
            .current_dir(dir)
            .args(["exec", "--", tool])
    }
}

#[async_trait]
impl StyleFixer for PhpcsCli {
    async fn fix(&self, ctx: &RunContext, dir: &Path, paths: &[String]) -> upkeep_core::Result<()> {
        let command = self.command(dir, "phpcbf").args(paths.iter().cloned());
        let out = command.output(ctx).await?;
        // 1 means everything was fixed, 2 means some violations were left.
        match out.code {
            Some(0..=2) => {
                debug!(code = ?out.code, "phpcbf finished");
                Ok(())
            }
            _ => Err(command.failed(&out).into()),
        }
    }

    async fn check(
        &self,
        ctx: &RunContext,
        dir: &Path,
        paths: &[String],
    ) -> upkeep_core::Result<StyleReport> {
        let out = self
            .command(dir, "phpcs")
            .args([
                "--report=json",
                "-q",
                "--runtime-set",
                "ignore_errors_on_exit",
                "1",
                "--runtime-set",
                "ignore_warnings_on_exit",
                "1",
            ])
            .args(paths.iter().cloned())
            .run(ctx)
            .await?;
        Ok(parse_report(dir, &out.stdout)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_report() {
        let output = r#"{
            "totals": {"errors": 1, "warnings": 1, "fixable": 0},
            "files": {
                "/srv/site/web/modules/custom/foo/foo.module": {
                    "errors": 1,
                    "warnings": 1,
                    "messages": [
                        {"message": "Missing function doc comment", "source": "Drupal.Commenting.FunctionComment.Missing", "severity": 5, "fixable": false, "type": "ERROR", "line": 12, "column": 1},
                        {"message": "Line exceeds 80 characters", "source": "Drupal.Files.LineLength.TooLong", "severity": 5, "fixable": false, "type": "WARNING", "line": 40, "column": 81}
                    ]
                },
                "/srv/site/web/modules/custom/foo/foo.info.yml": {"errors": 0, "warnings": 0, "messages": []}
            }
        }"#;
        let report = parse_report(Path::new("/srv/site"), output).unwrap();
        assert_eq!(report.errors, 1);
        assert_eq!(report.warnings, 1);
        assert_eq!(report.files.len(), 1);
        let (file, messages) = &report.files[0];
        assert_eq!(file, "web/modules/custom/foo/foo.module");
        assert_eq!(messages[0], "Line 12 (error): Missing function doc comment");
    }

    #[test]
    fn test_parse_report_skips_leading_noise() {
        let output = "> phpcs\n{\"totals\": {\"errors\": 0, \"warnings\": 0}, \"files\": {}}";
        let report = parse_report(Path::new("/srv/site"), output).unwrap();
        assert_eq!(report, StyleReport::default());
    }
}
