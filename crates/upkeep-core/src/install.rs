//! Background site installation.
//!
//! Sites need an installed database before their update procedure can run.
//! Installation works on a second clone and runs alongside cloning and the
//! dependency update of the main checkout; the orchestrator joins it right
//! before the per-site pipeline. A failed installation cancels the run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn, Instrument};

use crate::collaborators::{PackageManager, Repository, SiteTool};
use crate::context::RunContext;
use crate::error::{Result, UpkeepError};

/// Clones, installs packages and installs every site.
#[derive(Clone)]
pub struct SiteInstaller {
    repository: Arc<dyn Repository>,
    packages: Arc<dyn PackageManager>,
    sites: Arc<dyn SiteTool>,
    group_size: usize,
}

impl SiteInstaller {
    pub fn new(
        repository: Arc<dyn Repository>,
        packages: Arc<dyn PackageManager>,
        sites: Arc<dyn SiteTool>,
        group_size: usize,
    ) -> Self {
        Self {
            repository,
            packages,
            sites,
            group_size: group_size.max(1),
        }
    }

    /// Start installation in the background.
    pub fn spawn(
        &self,
        ctx: &RunContext,
        url: &str,
        branch: &str,
        site_list: Vec<String>,
    ) -> InstallHandle {
        let installer = self.clone();
        let ctx = ctx.clone();
        let url = url.to_string();
        let branch = branch.to_string();
        let span = tracing::info_span!("site_install");
        let handle = tokio::spawn(
            async move {
                let installed = installer.install(&ctx, &url, &branch, &site_list).await;
                if let Err(err) = &installed {
                    if !err.is_cancelled() {
                        warn!(error = %err, "site install failed, cancelling run");
                        ctx.cancel();
                    }
                }
                installed
            }
            .instrument(span),
        );
        InstallHandle {
            handle: Some(handle),
        }
    }

    async fn install(
        &self,
        ctx: &RunContext,
        url: &str,
        branch: &str,
        site_list: &[String],
    ) -> Result<PathBuf> {
        info!(repository = %url, branch = %branch, "cloning repository for site install");
        let checkout = self.repository.clone_repository(ctx, url, branch).await?;
        let path = checkout.path;

        info!("installing packages");
        self.packages.install(ctx, &path).await?;

        for group in site_list.chunks(self.group_size) {
            ctx.check()?;
            let results = futures::future::join_all(
                group.iter().map(|site| self.install_site(ctx, &path, site)),
            )
            .await;
            results.into_iter().collect::<Result<Vec<()>>>()?;
        }

        Ok(path)
    }

    async fn install_site(&self, ctx: &RunContext, path: &Path, site: &str) -> Result<()> {
        info!(site = %site, "installing site");
        let installed = async {
            self.sites.configure_database(ctx, path, site).await?;
            self.sites.install_site(ctx, path, site).await
        }
        .await;
        installed.map_err(|err| {
            if err.is_cancelled() {
                err
            } else {
                UpkeepError::SiteInstall {
                    site: site.to_string(),
                    reason: err.to_string(),
                }
            }
        })
    }
}

/// Handle to a running installation. Dropping it aborts the task.
pub struct InstallHandle {
    handle: Option<JoinHandle<Result<PathBuf>>>,
}

impl InstallHandle {
    /// Wait for installation; returns the install checkout path.
    pub async fn join(&mut self) -> Result<PathBuf> {
        match self.handle.take() {
            Some(handle) => handle.await?,
            None => Err(UpkeepError::Cancelled),
        }
    }

    /// The installation's own error, if it failed. Waits for a task that has
    /// not been joined yet, so call it only once the run is cancelled.
    pub async fn failure(&mut self) -> Option<UpkeepError> {
        match self.join().await {
            Err(err) if !err.is_cancelled() => Some(err),
            _ => None,
        }
    }
}

impl Drop for InstallHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
