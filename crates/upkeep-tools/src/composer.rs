//! Composer package manager adapter.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};
use upkeep_core::changes::parse_package_changes;
use upkeep_core::model::{Advisory, PackageChange};
use upkeep_core::{PackageManager, RunContext, UpdateRequest};

use crate::error::{Result, ToolError};
use crate::process::{CommandOutput, ToolCommand};

const WEB_ROOT_KEY: &str = "extra.drupal-scaffold.locations.web-root";
const CUSTOM_CODE_KINDS: [&str; 3] = ["modules", "themes", "profiles"];

/// Arguments of `composer update` for `request`.
pub fn update_args(request: &UpdateRequest) -> Vec<String> {
    let mut args: Vec<String> = [
        "update",
        "--no-interaction",
        "--no-progress",
        "--optimize-autoloader",
        "--with-all-dependencies",
        "--no-ansi",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.extend(request.packages.iter().cloned());
    args.extend(request.keep.iter().map(|k| format!("--with={k}")));
    if request.minimal_changes {
        args.push("--minimal-changes".to_string());
    }
    if request.dry_run {
        args.push("--dry-run".to_string());
    } else {
        args.push("--bump-after-update".to_string());
    }
    args
}

fn plugin_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^(\S+)\s+v?[\d\.]+\s+requires")
            .unwrap_or_else(|e| unreachable!("static regex: {e}"))
    })
}

/// Package names from `composer depends composer-plugin-api` output.
pub fn parse_plugins(output: &str) -> BTreeSet<String> {
    plugin_pattern()
        .captures_iter(output)
        .map(|c| c[1].trim().to_string())
        .collect()
}

/// Flatten `composer audit --format=json` output. Advisories are keyed by
/// package and hold either a list or a map of entries.
pub fn parse_audit(output: &str) -> Result<Vec<Advisory>> {
    let raw: Value = serde_json::from_str(output)?;
    let mut advisories = Vec::new();
    let Some(by_package) = raw.get("advisories").and_then(Value::as_object) else {
        return Ok(advisories);
    };
    for entries in by_package.values() {
        match entries {
            Value::Array(list) => {
                for entry in list {
                    advisories.push(serde_json::from_value(entry.clone())?);
                }
            }
            Value::Object(map) => {
                for entry in map.values() {
                    advisories.push(serde_json::from_value(entry.clone())?);
                }
            }
            _ => {}
        }
    }
    Ok(advisories)
}

/// Web root of the project in `dir`, read with the composer binary `program`.
pub(crate) async fn web_root(ctx: &RunContext, program: &str, dir: &Path) -> Result<String> {
    let out = ToolCommand::new(program)
        .current_dir(dir)
        .args(["config", WEB_ROOT_KEY])
        .run(ctx)
        .await?;
    Ok(out.trimmed().trim_end_matches('/').to_string())
}

/// Manifest of the scratch project used to test whether a patch applies.
fn scratch_manifest() -> Value {
    json!({
        "name": "upkeep/patch-test",
        "type": "project",
        "repositories": [
            {"type": "composer", "url": "https://packages.drupal.org/8"}
        ],
        "require": {"cweagans/composer-patches": "~1.0"},
        "config": {"allow-plugins": true},
        "extra": {
            "composer-exit-on-patch-failure": true,
            "patches-file": "composer.patches.json"
        }
    })
}

/// `composer` command line adapter.
pub struct ComposerCli {
    program: String,
    scratch: Mutex<Option<tempfile::TempDir>>,
}

impl Default for ComposerCli {
    fn default() -> Self {
        Self::new("composer")
    }
}

impl ComposerCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            scratch: Mutex::new(None),
        }
    }

    pub(crate) fn command(&self, dir: &Path) -> ToolCommand {
        ToolCommand::new(&self.program).current_dir(dir)
    }

    async fn run(&self, ctx: &RunContext, dir: &Path, args: &[&str]) -> Result<CommandOutput> {
        self.command(dir).args(args.iter().copied()).run(ctx).await
    }

    /// Web root relative to `dir`, e.g. `web`.
    pub async fn web_root(&self, ctx: &RunContext, dir: &Path) -> Result<String> {
        web_root(ctx, &self.program, dir).await
    }

    async fn scratch_dir(&self, scratch: &mut Option<tempfile::TempDir>) -> Result<PathBuf> {
        if let Some(dir) = scratch.as_ref() {
            return Ok(dir.path().to_path_buf());
        }
        let dir = tempfile::Builder::new().prefix("upkeep-patch-test").tempdir()?;
        tokio::fs::write(
            dir.path().join("composer.json"),
            serde_json::to_vec_pretty(&scratch_manifest())?,
        )
        .await?;
        let path = dir.path().to_path_buf();
        *scratch = Some(dir);
        Ok(path)
    }
}

#[async_trait]
impl PackageManager for ComposerCli {
    async fn install(&self, ctx: &RunContext, dir: &Path) -> upkeep_core::Result<()> {
        info!(dir = %dir.display(), "installing dependencies");
        self.run(
            ctx,
            dir,
            &["install", "--no-interaction", "--no-progress", "--optimize-autoloader"],
        )
        .await?;
        Ok(())
    }

    async fn update(
        &self,
        ctx: &RunContext,
        dir: &Path,
        request: &UpdateRequest,
    ) -> upkeep_core::Result<Vec<PackageChange>> {
        debug!(packages = ?request.packages, keep = ?request.keep, dry_run = request.dry_run, "updating dependencies");
        let out = self.command(dir).args(update_args(request)).run(ctx).await?;
        Ok(parse_package_changes(&out.combined()))
    }

    async fn check_patch_applies(
        &self,
        ctx: &RunContext,
        package: &str,
        version: &str,
        patch: &str,
    ) -> upkeep_core::Result<bool> {
        // One scratch project, so checks run one at a time.
        let mut scratch = self.scratch.lock().await;
        let dir = self.scratch_dir(&mut scratch).await?;

        let patches = json!({"patches": {package: {version: patch}}});
        tokio::fs::write(
            dir.join("composer.patches.json"),
            serde_json::to_vec_pretty(&patches)?,
        )
        .await
        .map_err(ToolError::from)?;

        let constraint = format!("{package}:{version}");
        let result = self
            .command(&dir)
            .args(["require", constraint.as_str(), "--with-all-dependencies", "--quiet"])
            .run(ctx)
            .await;
        match result {
            Ok(_) => Ok(true),
            Err(ToolError::CommandFailed { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn installed_plugins(
        &self,
        ctx: &RunContext,
        dir: &Path,
    ) -> upkeep_core::Result<BTreeSet<String>> {
        let out = self
            .run(ctx, dir, &["depends", "composer-plugin-api", "--locked"])
            .await?;
        Ok(parse_plugins(&out.stdout))
    }

    async fn audit(&self, ctx: &RunContext, dir: &Path) -> upkeep_core::Result<Vec<Advisory>> {
        // Exits non-zero whenever advisories exist; only the JSON matters.
        let out = self
            .command(dir)
            .args(["audit", "--format=json", "--locked", "--no-plugins"])
            .output(ctx)
            .await?;
        Ok(parse_audit(&out.stdout)?)
    }

    async fn lock_hash(&self, _ctx: &RunContext, dir: &Path) -> upkeep_core::Result<String> {
        let raw = tokio::fs::read(dir.join("composer.lock")).await?;
        let lock: Value = serde_json::from_slice(&raw)?;
        let hash = lock
            .get("content-hash")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::Parse("composer.lock has no content-hash".to_string()))?;
        Ok(hash.to_string())
    }

    async fn update_lock_hash(&self, ctx: &RunContext, dir: &Path) -> upkeep_core::Result<()> {
        self.run(ctx, dir, &["update", "--lock", "--no-install"]).await?;
        Ok(())
    }

    async fn get_config(
        &self,
        ctx: &RunContext,
        dir: &Path,
        key: &str,
    ) -> upkeep_core::Result<Option<Value>> {
        match self.run(ctx, dir, &["config", "--json", key]).await {
            Ok(out) => Ok(Some(serde_json::from_str(out.trimmed())?)),
            Err(ToolError::CommandFailed { output, .. }) => {
                debug!(key = %key, output = %output, "composer config key not readable");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn set_config(
        &self,
        ctx: &RunContext,
        dir: &Path,
        key: &str,
        value: &Value,
    ) -> upkeep_core::Result<()> {
        let encoded = serde_json::to_string(value)?;
        debug!(key = %key, "setting composer config");
        self.run(ctx, dir, &["config", "--json", key, encoded.as_str()])
            .await?;
        Ok(())
    }

    async fn is_installed(
        &self,
        ctx: &RunContext,
        dir: &Path,
        package: &str,
    ) -> upkeep_core::Result<bool> {
        match self
            .run(ctx, dir, &["show", "--locked", "--quiet", package])
            .await
        {
            Ok(_) => Ok(true),
            Err(ToolError::CommandFailed { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn diff(
        &self,
        ctx: &RunContext,
        dir: &Path,
        base_ref: &str,
        with_links: bool,
    ) -> upkeep_core::Result<String> {
        let mut args = vec!["diff", base_ref];
        if with_links {
            args.push("--with-links");
        }
        let out = self.run(ctx, dir, &args).await?;
        Ok(out.trimmed().to_string())
    }

    async fn normalize(&self, ctx: &RunContext, dir: &Path) -> upkeep_core::Result<()> {
        self.run(ctx, dir, &["normalize"]).await?;
        Ok(())
    }

    async fn require(
        &self,
        ctx: &RunContext,
        dir: &Path,
        package: &str,
        dev: bool,
    ) -> upkeep_core::Result<()> {
        let mut args = vec!["require", "--no-interaction"];
        if dev {
            args.push("--dev");
        }
        args.push(package);
        self.run(ctx, dir, &args).await?;
        Ok(())
    }

    async fn remove(
        &self,
        ctx: &RunContext,
        dir: &Path,
        package: &str,
        dev: bool,
    ) -> upkeep_core::Result<()> {
        let mut args = vec!["remove", "--no-interaction"];
        if dev {
            args.push("--dev");
        }
        args.push(package);
        self.run(ctx, dir, &args).await?;
        Ok(())
    }

    async fn custom_code_directories(
        &self,
        ctx: &RunContext,
        dir: &Path,
    ) -> upkeep_core::Result<Vec<String>> {
        let web_root = self.web_root(ctx, dir).await?;
        let mut found = Vec::new();
        for kind in CUSTOM_CODE_KINDS {
            let candidate = format!("{web_root}/{kind}/custom");
            if tokio::fs::try_exists(dir.join(&candidate))
                .await
                .unwrap_or(false)
            {
                found.push(candidate);
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_args_dry_run() {
        let args = update_args(&UpdateRequest {
            packages: vec!["drupal/token".to_string()],
            keep: vec!["drupal/ctools:4.0.3".to_string()],
            minimal_changes: true,
            dry_run: true,
        });
        assert_eq!(
            args,
            vec![
                "update",
                "--no-interaction",
                "--no-progress",
                "--optimize-autoloader",
                "--with-all-dependencies",
                "--no-ansi",
                "drupal/token",
                "--with=drupal/ctools:4.0.3",
                "--minimal-changes",
                "--dry-run",
            ]
        );
    }

    #[test]
    fn test_update_args_real_update_bumps() {
        let args = update_args(&UpdateRequest::default());
        assert_eq!(args.last().map(String::as_str), Some("--bump-after-update"));
        assert!(!args.contains(&"--minimal-changes".to_string()));
    }

    #[test]
    fn test_parse_plugins() {
        let output = "\
composer/installers                  v2.2.0  requires  composer-plugin-api (^1.0 || ^2.0)
cweagans/composer-patches            1.7.3   requires  composer-plugin-api (^1.0 || ^2.0)
drupal/core-composer-scaffold        10.2.4  requires  composer-plugin-api (^2)
";
        let plugins = parse_plugins(output);
        assert_eq!(plugins.len(), 3);
        assert!(plugins.contains("cweagans/composer-patches"));
    }

    #[test]
    fn test_parse_audit_flattens_lists_and_maps() {
        let output = r#"{
            "advisories": {
                "drupal/token": [
                    {"advisoryId": "SA-1", "packageName": "drupal/token", "cve": "CVE-1", "title": "Token"}
                ],
                "drupal/core": {
                    "3": {"advisoryId": "SA-2", "packageName": "drupal/core", "cve": "CVE-2", "severity": "high"}
                }
            },
            "abandoned": {}
        }"#;
        let mut advisories = parse_audit(output).unwrap();
        advisories.sort_by(|a, b| a.cve.cmp(&b.cve));
        assert_eq!(advisories.len(), 2);
        assert_eq!(advisories[0].package_name, "drupal/token");
        assert_eq!(advisories[1].severity, "high");
    }

    #[test]
    fn test_parse_audit_without_advisories() {
        assert!(parse_audit(r#"{"advisories": []}"#).unwrap().is_empty());
        assert!(parse_audit("{}").unwrap().is_empty());
        assert!(parse_audit("not json").is_err());
    }

    #[tokio::test]
    async fn test_lock_hash_reads_content_hash() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("composer.lock"),
            r#"{"content-hash": "d41d8cd98f00b204e9800998ecf8427e", "packages": []}"#,
        )
        .await
        .unwrap();
        let hash = ComposerCli::default()
            .lock_hash(&RunContext::new(), dir.path())
            .await
            .unwrap();
        assert_eq!(hash, "d41d8cd98f00b204e9800998ecf8427e");
    }
}
