use std::collections::BTreeSet;
use std::sync::Arc;

use upkeep_core::addons::Translations;
use upkeep_core::fakes::{FakeSiteTool, FakeWorktree};
use upkeep_core::model::SiteHooks;
use upkeep_core::site_pipeline::SitePipeline;
use upkeep_core::{EventDispatcher, HookId, HookInfo, RunContext, SharedWorktree, UpkeepError};

fn sites(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn one_hook(module: &str, id: i64) -> SiteHooks {
    let mut hooks = SiteHooks::new();
    hooks.insert(
        format!("{module}_update_{id}"),
        HookInfo {
            module: module.to_string(),
            update_id: HookId::Int(id),
            description: "Update the schema".to_string(),
            kind: "hook_update_n".to_string(),
        },
    );
    hooks
}

#[tokio::test]
async fn every_site_commits_its_own_configuration() {
    let tool = Arc::new(FakeSiteTool::new());
    let worktree = FakeWorktree::new();
    let log = worktree.log();
    tool.export_into(log.clone());
    tool.set_hooks("alpha", one_hook("system", 10100));

    let pipeline = SitePipeline::new(tool.clone(), Arc::new(EventDispatcher::default()))
        .with_group_size(2);
    let hooks = pipeline
        .run(
            &RunContext::new(),
            std::path::Path::new("/tmp/project"),
            &SharedWorktree::new(Box::new(worktree)),
            &sites(&["alpha", "beta", "gamma"]),
        )
        .await
        .expect("pipeline");

    assert_eq!(hooks.keys().collect::<Vec<_>>(), vec!["alpha"]);

    let messages: BTreeSet<String> = log.commits().into_iter().map(|c| c.message).collect();
    assert_eq!(
        messages,
        BTreeSet::from([
            "Update configuration alpha".to_string(),
            "Update configuration beta".to_string(),
            "Update configuration gamma".to_string(),
        ])
    );
    for commit in log.commits() {
        let site = commit.message.trim_start_matches("Update configuration ");
        assert_eq!(commit.paths, vec![format!("config/{site}/system.site.yml")]);
    }
    assert_eq!(log.max_concurrent_mutations(), 1);

    assert_eq!(
        tool.calls_for("beta"),
        vec![
            "configure_database",
            "update_site",
            "config_resave",
            "export_configuration"
        ]
    );
}

#[tokio::test]
async fn failing_group_stops_later_groups() {
    let tool = Arc::new(FakeSiteTool::new());
    tool.fail_update("beta");

    let pipeline = SitePipeline::new(tool.clone(), Arc::new(EventDispatcher::default()))
        .with_group_size(2);
    let err = pipeline
        .run(
            &RunContext::new(),
            std::path::Path::new("/tmp/project"),
            &SharedWorktree::new(Box::new(FakeWorktree::new())),
            &sites(&["alpha", "beta", "gamma", "delta"]),
        )
        .await
        .expect_err("beta fails");

    match err {
        UpkeepError::SiteUpdate { site, reason } => {
            assert_eq!(site, "beta");
            assert!(reason.contains("updatedb failed"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(tool.calls_for("alpha").contains(&"export_configuration".to_string()));
    assert!(!tool.calls_for("beta").contains(&"export_configuration".to_string()));
    assert!(tool.calls_for("gamma").is_empty());
    assert!(tool.calls_for("delta").is_empty());
}

#[tokio::test]
async fn post_site_listeners_run_per_site() {
    let tool = Arc::new(FakeSiteTool::new());
    tool.enable_module("alpha", "locale_deploy");
    let worktree = FakeWorktree::new();
    let log = worktree.log();
    log.touch("translations/alpha/de.po");

    let dispatcher = Arc::new(EventDispatcher::new(vec![Box::new(Translations::new(
        tool.clone(),
    ))]));
    SitePipeline::new(tool.clone(), dispatcher)
        .with_group_size(1)
        .run(
            &RunContext::new(),
            std::path::Path::new("/tmp/project"),
            &SharedWorktree::new(Box::new(worktree)),
            &sites(&["alpha", "beta"]),
        )
        .await
        .expect("pipeline");

    assert!(tool.calls_for("alpha").contains(&"localize_translations".to_string()));
    assert!(!tool.calls_for("beta").contains(&"localize_translations".to_string()));
    let commits = log.commits();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].message, "Update translations");
}

#[tokio::test]
async fn cancelled_run_starts_no_site() {
    let tool = Arc::new(FakeSiteTool::new());
    let ctx = RunContext::new();
    ctx.cancel();

    let err = SitePipeline::new(tool.clone(), Arc::new(EventDispatcher::default()))
        .run(
            &ctx,
            std::path::Path::new("/tmp/project"),
            &SharedWorktree::new(Box::new(FakeWorktree::new())),
            &sites(&["alpha"]),
        )
        .await
        .expect_err("cancelled");
    assert!(err.is_cancelled());
    assert!(tool.calls_for("alpha").is_empty());
}
