//! Drush site tool adapter.
//!
//! Drush runs through `composer exec` so the project's own copy is used.
//! The target site is selected with the `SITE_NAME` environment variable.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use upkeep_core::model::SiteHooks;
use upkeep_core::{RunContext, SiteTool};

use crate::composer;
use crate::error::{Result, ToolError};
use crate::process::ToolCommand;

const CONFIG_RESAVE_SCRIPT: &str = include_str!("../scripts/config-resave.php");
const NO_PENDING_UPDATES: &str = "No database updates required";
const CONFIG_SYNC_EXPR: &str =
    r"print realpath(\Drupal\Core\Site\Settings::get('config_sync_directory'))";
const TRANSLATION_PATH_EXPR: &str =
    r"print realpath(\Drupal::config('locale.settings')->get('translation.path'))";

/// Pending update hooks from `updatedb-status --format=json`.
pub fn parse_update_hooks(output: &str) -> Result<SiteHooks> {
    if output.contains(NO_PENDING_UPDATES) || output.trim().is_empty() {
        return Ok(SiteHooks::new());
    }
    Ok(serde_json::from_str(output)?)
}

/// `path` relative to `dir`, as printed by drush.
pub fn relative_to(dir: &Path, path: &str) -> String {
    let prefix = dir.to_string_lossy();
    path.strip_prefix(prefix.as_ref())
        .unwrap_or(path)
        .trim_start_matches('/')
        .to_string()
}

/// Settings appended to a site's `settings.php` so it runs on a local
/// sqlite database.
pub fn database_settings(dir: &Path, site: &str, exclude_sqlite: bool) -> String {
    let parent = dir.parent().unwrap_or(dir);
    let database = parent.join(format!("{site}.sqlite"));
    let private = parent.join("private").join(site);

    let mut settings = format!(
        r#"
$databases['default']['default'] = [
  'database' => '{database}',
  'prefix' => '',
  'driver' => 'sqlite',
  'namespace' => 'Drupal\\sqlite\\Driver\\Database\\sqlite',
  'autoload' => 'core/modules/sqlite/src/Driver/Database/sqlite/',
];
$settings['skip_permissions_hardening'] = TRUE;
$settings['file_private_path'] = '{private}';
$settings['hash_salt'] = 'changeme';
"#,
        database = database.display(),
        private = private.display(),
    );
    if exclude_sqlite {
        settings.push_str(
            r#"
if (isset($settings['config_exclude_modules'])) {
  $settings['config_exclude_modules'][] = 'sqlite';
} else {
  $settings['config_exclude_modules'] = ['sqlite'];
}
"#,
        );
    }
    settings
}

/// Whether `core.extension.yml` content lists the sqlite module.
pub fn has_sqlite_module(core_extension: &str) -> bool {
    core_extension
        .lines()
        .any(|line| line.starts_with(' ') && line.trim() == "sqlite: 0")
}

/// Add `sqlite: 0` to the module list of `core.extension.yml` content.
/// Returns `None` when there is no module list.
pub fn add_sqlite_module(core_extension: &str) -> Option<String> {
    let mut out = String::with_capacity(core_extension.len() + 12);
    let mut inserted = false;
    for line in core_extension.lines() {
        out.push_str(line);
        out.push('\n');
        if !inserted && line.trim_end() == "module:" {
            out.push_str("  sqlite: 0\n");
            inserted = true;
        }
    }
    inserted.then_some(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ResolvedPath {
    ConfigSync,
    Translations,
}

/// `drush` adapter.
pub struct DrushCli {
    composer: String,
    resave_script: OnceCell<tempfile::TempPath>,
    paths: Mutex<HashMap<(PathBuf, String, ResolvedPath), String>>,
}

impl Default for DrushCli {
    fn default() -> Self {
        Self::new("composer")
    }
}

impl DrushCli {
    /// `composer` is the composer binary drush is executed through.
    pub fn new(composer: impl Into<String>) -> Self {
        Self {
            composer: composer.into(),
            resave_script: OnceCell::new(),
            paths: Mutex::new(HashMap::new()),
        }
    }

    fn command(&self, dir: &Path, site: &str) -> ToolCommand {
        ToolCommand::new(&self.composer)
            .current_dir(dir)
            .args(["exec", "--", "drush"])
            .env("SITE_NAME", site)
    }

    /// Run drush for `site` and return its combined, trimmed output.
    pub async fn exec(
        &self,
        ctx: &RunContext,
        dir: &Path,
        site: &str,
        args: &[&str],
    ) -> Result<String> {
        let command = self.command(dir, site).args(args.iter().copied());
        let out = command.output(ctx).await?;
        let combined = out.combined().trim_end_matches('\n').to_string();
        debug!(site = %site, args = ?args, output = %combined, "drush finished");
        if !out.success() {
            return Err(command.failed(&out));
        }
        Ok(combined)
    }

    async fn resolved_path(
        &self,
        ctx: &RunContext,
        dir: &Path,
        site: &str,
        kind: ResolvedPath,
        relative: bool,
    ) -> Result<String> {
        let key = (dir.to_path_buf(), site.to_string(), kind);
        let cached = self
            .paths
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned();
        let absolute = match cached {
            Some(path) => path,
            None => {
                let expr = match kind {
                    ResolvedPath::ConfigSync => CONFIG_SYNC_EXPR,
                    ResolvedPath::Translations => TRANSLATION_PATH_EXPR,
                };
                let path = self.exec(ctx, dir, site, &["ev", expr]).await?;
                self.paths
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(key, path.clone());
                path
            }
        };
        if relative {
            Ok(relative_to(dir, &absolute))
        } else {
            Ok(absolute)
        }
    }

    async fn resave_script(&self) -> Result<&Path> {
        let path = self
            .resave_script
            .get_or_try_init(|| async {
                let mut file = tempfile::Builder::new()
                    .prefix("config-resave")
                    .suffix(".php")
                    .tempfile()?;
                file.write_all(CONFIG_RESAVE_SCRIPT.as_bytes())?;
                Ok::<_, ToolError>(file.into_temp_path())
            })
            .await?;
        Ok(&**path)
    }

    async fn ensure_sqlite_module(&self, ctx: &RunContext, dir: &Path, site: &str) -> Result<bool> {
        let sync_dir = self
            .resolved_path(ctx, dir, site, ResolvedPath::ConfigSync, false)
            .await?;
        let path = Path::new(&sync_dir).join("core.extension.yml");
        let content = tokio::fs::read_to_string(&path).await?;
        if has_sqlite_module(&content) {
            return Ok(false);
        }
        let updated = add_sqlite_module(&content).ok_or_else(|| {
            ToolError::Parse(format!("{} has no module list", path.display()))
        })?;
        tokio::fs::write(&path, updated).await?;
        debug!(site = %site, path = %path.display(), "sqlite module added to core extension");
        Ok(true)
    }
}

#[async_trait]
impl SiteTool for DrushCli {
    async fn install_site(&self, ctx: &RunContext, dir: &Path, site: &str) -> upkeep_core::Result<()> {
        let subdir = format!("--sites-subdir={site}");
        self.exec(
            ctx,
            dir,
            site,
            &["--existing-config", "--yes", "site:install", subdir.as_str()],
        )
        .await?;
        Ok(())
    }

    async fn configure_database(
        &self,
        ctx: &RunContext,
        dir: &Path,
        site: &str,
    ) -> upkeep_core::Result<()> {
        let web_root = composer::web_root(ctx, &self.composer, dir).await?;
        let exclude_sqlite = match self.ensure_sqlite_module(ctx, dir, site).await {
            Ok(added) => added,
            Err(ToolError::Cancelled) => return Err(upkeep_core::UpkeepError::Cancelled),
            Err(err) => {
                warn!(site = %site, error = %err, "could not enable the sqlite module in exported configuration");
                true
            }
        };

        let settings_path = dir
            .join(&web_root)
            .join("sites")
            .join(site)
            .join("settings.php");
        debug!(site = %site, path = %settings_path.display(), "writing database settings");
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&settings_path)
            .await?;
        tokio::io::AsyncWriteExt::write_all(
            &mut file,
            database_settings(dir, site, exclude_sqlite).as_bytes(),
        )
        .await?;
        tokio::io::AsyncWriteExt::flush(&mut file).await?;
        Ok(())
    }

    async fn update_site(&self, ctx: &RunContext, dir: &Path, site: &str) -> upkeep_core::Result<()> {
        self.exec(ctx, dir, site, &["updatedb", "--yes"]).await?;
        Ok(())
    }

    async fn config_resave(&self, ctx: &RunContext, dir: &Path, site: &str) -> upkeep_core::Result<()> {
        let script = self.resave_script().await?.to_string_lossy().into_owned();
        self.exec(ctx, dir, site, &["php:script", script.as_str()])
            .await?;
        Ok(())
    }

    async fn export_configuration(
        &self,
        ctx: &RunContext,
        dir: &Path,
        site: &str,
    ) -> upkeep_core::Result<()> {
        self.exec(ctx, dir, site, &["config:export", "--yes"]).await?;
        Ok(())
    }

    async fn config_sync_dir(
        &self,
        ctx: &RunContext,
        dir: &Path,
        site: &str,
        relative: bool,
    ) -> upkeep_core::Result<String> {
        Ok(self
            .resolved_path(ctx, dir, site, ResolvedPath::ConfigSync, relative)
            .await?)
    }

    async fn is_module_enabled(
        &self,
        ctx: &RunContext,
        dir: &Path,
        site: &str,
        module: &str,
    ) -> upkeep_core::Result<bool> {
        let filter = format!("--filter={module}");
        let out = self
            .exec(
                ctx,
                dir,
                site,
                &["pm:list", "--status=enabled", "--field=name", filter.as_str()],
            )
            .await?;
        Ok(out.trim() == module)
    }

    async fn discover_upgrade_hooks(
        &self,
        ctx: &RunContext,
        dir: &Path,
        site: &str,
    ) -> upkeep_core::Result<SiteHooks> {
        let out = self
            .exec(ctx, dir, site, &["updatedb-status", "--format=json"])
            .await?;
        Ok(parse_update_hooks(&out)?)
    }

    async fn localize_translations(
        &self,
        ctx: &RunContext,
        dir: &Path,
        site: &str,
    ) -> upkeep_core::Result<()> {
        self.exec(ctx, dir, site, &["locale-deploy:localize-translations"])
            .await?;
        Ok(())
    }

    async fn translation_path(
        &self,
        ctx: &RunContext,
        dir: &Path,
        site: &str,
        relative: bool,
    ) -> upkeep_core::Result<String> {
        Ok(self
            .resolved_path(ctx, dir, site, ResolvedPath::Translations, relative)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use upkeep_core::model::HookId;

    #[test]
    fn test_parse_update_hooks() {
        let output = r#"{
            "locale_update_10300": {"module": "locale", "update_id": 10300, "description": "Add a column.", "type": "hook_update_n"},
            "system-post-fix": {"module": "system", "update_id": "fix", "description": "Post fix.", "type": "post-update"}
        }"#;
        let hooks = parse_update_hooks(output).unwrap();
        assert_eq!(hooks.len(), 2);
        assert_eq!(hooks["locale_update_10300"].update_id, HookId::Int(10300));

        assert!(parse_update_hooks(" [success] No database updates required.")
            .unwrap()
            .is_empty());
        assert!(parse_update_hooks("[error] boom").is_err());
    }

    #[test]
    fn test_relative_to_strips_project_dir() {
        let dir = Path::new("/tmp/clone/repo-1");
        assert_eq!(relative_to(dir, "/tmp/clone/repo-1/config/sync"), "config/sync");
        assert_eq!(relative_to(dir, "/elsewhere/files"), "elsewhere/files");
    }

    #[test]
    fn test_database_settings() {
        let settings = database_settings(Path::new("/tmp/clone/repo-1"), "default", false);
        assert!(settings.contains("'database' => '/tmp/clone/default.sqlite'"));
        assert!(settings.contains("$settings['file_private_path'] = '/tmp/clone/private/default';"));
        assert!(!settings.contains("config_exclude_modules"));

        let settings = database_settings(Path::new("/tmp/clone/repo-1"), "default", true);
        assert!(settings.contains("$settings['config_exclude_modules'] = ['sqlite'];"));
    }

    #[test]
    fn test_sqlite_module_edit() {
        let core = "_core:\n  default_config_hash: abc\nmodule:\n  block: 0\n  node: 0\nprofile: minimal\n";
        assert!(!has_sqlite_module(core));
        let updated = add_sqlite_module(core).unwrap();
        assert!(has_sqlite_module(&updated));
        assert!(updated.contains("module:\n  sqlite: 0\n  block: 0\n"));
        assert!(add_sqlite_module("profile: minimal\n").is_none());
    }

    #[tokio::test]
    async fn test_config_resave_script_is_materialized_once() {
        let drush = DrushCli::default();
        let first = drush.resave_script().await.unwrap().to_path_buf();
        let second = drush.resave_script().await.unwrap().to_path_buf();
        assert_eq!(first, second);
        let content = tokio::fs::read_to_string(&first).await.unwrap();
        assert_eq!(content, CONFIG_RESAVE_SCRIPT);
    }
}
