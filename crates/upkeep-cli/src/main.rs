//! Upkeep - unattended dependency maintenance for Drupal projects
//!
//! `upkeep <repository-url> <token>` clones the repository, updates its
//! Composer dependencies, runs every site's database updates and opens a
//! merge request with the result.
//!
//! ## Modes
//!
//! - default: maintenance run updating every package
//! - `--security`: only packages with open security advisories

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use serde_json::json;
use tracing::{info, warn, Level};

use upkeep_core::addons::default_addons;
use upkeep_core::{
    Config, MaintenanceStrategy, Orchestrator, RunContext, RunOutcome, SecurityStrategy, Services,
    UpstreamForge, WorkflowStrategy,
};
use upkeep_tools::{
    code_host_for, ComposerCli, DrupalOrgClient, DrushCli, GitCli, GitLabForge, PhpcsCli,
    RectorCli,
};

#[derive(Parser, Debug)]
#[command(name = "upkeep")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Automated dependency updates for Drupal projects", long_about = None)]
struct Cli {
    /// Repository to update
    repository_url: String,

    /// Code host access token
    #[arg(env = "UPKEEP_TOKEN", hide_env_values = true)]
    token: String,

    /// Branch to update and target with the merge request
    #[arg(long, env = "UPKEEP_BRANCH", default_value = "main")]
    branch: String,

    /// Sites to update
    #[arg(long, env = "UPKEEP_SITES", value_delimiter = ',', default_value = "default")]
    sites: Vec<String>,

    /// Only update packages with security advisories
    #[arg(long, env = "UPKEEP_SECURITY")]
    security: bool,

    /// Skip automatic coding style fixes
    #[arg(long, env = "UPKEEP_SKIP_CBF")]
    skip_style_fix: bool,

    /// Skip automatic deprecation removal
    #[arg(long, env = "UPKEEP_SKIP_RECTOR")]
    skip_deprecation_removal: bool,

    /// Do everything except push and open the merge request
    #[arg(long, env = "UPKEEP_DRY_RUN")]
    dry_run: bool,

    /// Sites updated concurrently (default: available cores)
    #[arg(long, env = "UPKEEP_SITE_PARALLELISM")]
    site_parallelism: Option<usize>,

    /// Upstream forge token; enables fixed-issue and newer-patch lookups
    #[arg(long, env = "DRUPALCODE_ACCESS_TOKEN", hide_env_values = true)]
    upstream_token: Option<String>,

    /// Commit author name
    #[arg(long, env = "UPKEEP_GIT_NAME", default_value = "Upkeep")]
    git_name: String,

    /// Commit author email
    #[arg(long, env = "UPKEEP_GIT_EMAIL", default_value = "upkeep@localhost")]
    git_email: String,

    /// Composer binary
    #[arg(long, env = "UPKEEP_COMPOSER", default_value = "composer")]
    composer: String,

    /// Enable verbose output
    #[arg(short, long, env = "UPKEEP_VERBOSE")]
    verbose: bool,

    /// Emit JSON-formatted log lines and result
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn config(&self) -> Config {
        let mut config = Config::new(&self.repository_url, &self.token);
        config.branch = self.branch.clone();
        config.sites = self
            .sites
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        config.security = self.security;
        config.skip_style_fix = self.skip_style_fix;
        config.skip_deprecation_removal = self.skip_deprecation_removal;
        config.dry_run = self.dry_run;
        config.verbose = self.verbose;
        config.upstream_token = self.upstream_token.clone();
        config.site_parallelism = self.site_parallelism;
        config
    }
}

fn services(cli: &Cli, config: &Config) -> Result<Services> {
    let upstream: Option<Arc<dyn UpstreamForge>> = match config.upstream_token() {
        Some(token) => Some(Arc::new(
            GitLabForge::new(token).context("Failed to create upstream forge client")?,
        )),
        None => {
            info!("no upstream forge token, fixed-issue and newer-patch lookups are disabled");
            None
        }
    };
    Ok(Services {
        repository: Arc::new(
            GitCli::new(&config.token).with_author(&cli.git_name, &cli.git_email),
        ),
        packages: Arc::new(ComposerCli::new(&cli.composer)),
        sites: Arc::new(DrushCli::new(&cli.composer)),
        tracker: Arc::new(DrupalOrgClient::new().context("Failed to create drupal.org client")?),
        upstream,
        code_host: code_host_for(&config.repository_url, &config.token)
            .context("Failed to create code host client")?,
        style: Arc::new(PhpcsCli::new(&cli.composer)),
        rewriter: Arc::new(RectorCli::new(&cli.composer)),
    })
}

fn print_outcome(outcome: &RunOutcome, as_json: bool) {
    if as_json {
        let value = match outcome {
            RunOutcome::NoOp(reason) => json!({"outcome": outcome.label(), "reason": reason}),
            RunOutcome::BranchExists(branch) => {
                json!({"outcome": outcome.label(), "branch": branch})
            }
            RunOutcome::DryRun {
                branch,
                title,
                description,
            } => json!({
                "outcome": outcome.label(),
                "branch": branch,
                "title": title,
                "description": description,
            }),
            RunOutcome::MergeRequestCreated {
                branch,
                merge_request,
            } => json!({
                "outcome": outcome.label(),
                "branch": branch,
                "merge_request": merge_request,
            }),
        };
        println!("{value}");
        return;
    }

    match outcome {
        RunOutcome::NoOp(reason) => println!("Nothing to do: {reason}"),
        RunOutcome::BranchExists(branch) => {
            println!("Branch {branch} already exists, nothing pushed")
        }
        RunOutcome::DryRun {
            branch,
            title,
            description,
        } => {
            println!("Dry run on branch {branch}");
            println!();
            println!("# {title}");
            println!();
            println!("{description}");
        }
        RunOutcome::MergeRequestCreated {
            branch,
            merge_request,
        } => println!(
            "Merge request !{} created from {branch}: {}",
            merge_request.id, merge_request.url
        ),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    upkeep_core::init_tracing(cli.json, level);

    let config = cli.config();
    config.validate().context("Invalid configuration")?;
    let services = services(&cli, &config)?;

    let now = Utc::now();
    let strategy: Box<dyn WorkflowStrategy> = if config.security {
        Box::new(SecurityStrategy::new(Arc::clone(&services.packages), now))
    } else {
        Box::new(MaintenanceStrategy::new(now))
    };
    let addons = default_addons(&config, &services);

    let ctx = RunContext::new();
    let signal_ctx = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            signal_ctx.cancel();
        }
    });

    let mut orchestrator = Orchestrator::new(config, services, strategy, addons);
    let outcome = orchestrator
        .run(&ctx)
        .await
        .with_context(|| format!("Update of {} failed", cli.repository_url))?;

    print_outcome(&outcome, cli.json);
    Ok(())
}
