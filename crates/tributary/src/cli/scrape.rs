//! `tributary scrape`: run a user's configs against a local directory tree.

use super::context::{runtime, CliContext};
use super::error::HelpfulError;
use super::output::{format_duration_ms, print_json, print_table_colored, status_color};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tributary::backlinks::BacklinkMaintainer;
use tributary::gate::EnvCredentials;
use tributary::reconcile::{ReconcileOptions, Reconciler, RemovalPolicy, ScrapeRunResult};
use tributary::remote::LocalDirProvider;

#[derive(Args, Debug)]
pub struct ScrapeArgs {
    #[arg(long)]
    pub user: String,

    /// Credential profile
    #[arg(long)]
    pub profile: Option<String>,

    /// Only run configs in this workspace
    #[arg(long)]
    pub workspace: Option<String>,

    /// Directory exposed as the remote tree; root ids are paths under it
    #[arg(long)]
    pub source: PathBuf,

    /// Override the configured removal policy
    #[arg(long)]
    pub removal: Option<RemovalPolicy>,

    /// Override the configured output root
    #[arg(long)]
    pub output: Option<PathBuf>,

    #[arg(long)]
    pub json: bool,
}

pub fn run(args: ScrapeArgs, ctx: &CliContext) -> anyhow::Result<()> {
    if !args.source.is_dir() {
        return Err(HelpfulError::path_not_found(&args.source).into());
    }
    runtime()?.block_on(run_async(args, ctx))
}

async fn run_async(args: ScrapeArgs, ctx: &CliContext) -> anyhow::Result<()> {
    let db = ctx.open_db().await?;

    let mut options = ReconcileOptions::from_config(&ctx.config);
    if let Some(policy) = args.removal {
        options.removal_policy = policy;
    }
    if args.output.is_some() {
        options.output_root = args.output.clone();
    }

    let remote = Arc::new(LocalDirProvider::new(&args.source));
    let credentials = Arc::new(EnvCredentials::new(ctx.config.credential_env.clone()));
    let mut reconciler = Reconciler::new(db.clone(), remote, credentials, options.clone());
    if let Some(root) = &options.output_root {
        let backlinks = BacklinkMaintainer::load(root.clone(), db.clone()).await?;
        reconciler = reconciler.with_backlinks(Arc::new(backlinks));
    }

    let cancel = reconciler.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping at the next item");
            cancel.cancel();
        }
    });

    let results = reconciler
        .scrape_for_user(&args.user, args.profile.as_deref(), args.workspace.as_deref())
        .await
        .map_err(|e| HelpfulError::from_library(e, &ctx.config.credential_env))?;

    if args.json {
        return print_json(&results);
    }
    print_results(&args.user, &results);
    Ok(())
}

fn print_results(user: &str, results: &[ScrapeRunResult]) {
    if results.is_empty() {
        println!("No enabled scrape configs for user '{user}'");
        return;
    }

    let rows = results
        .iter()
        .map(|r| {
            let c = &r.counts;
            vec![
                (format!("{}/{}", r.workspace, r.config_name), None),
                (r.status.to_string(), Some(status_color(r.status))),
                (format!("{} / {}", c.files_created, c.folders_created), None),
                (format!("{} / {}", c.files_updated, c.folders_updated), None),
                (format!("{} / {}", c.files_unchanged, c.folders_unchanged), None),
                (c.items_removed.to_string(), None),
                (c.documents_written.to_string(), None),
                (r.errors.len().to_string(), None),
                (format_duration_ms(r.duration_ms), None),
            ]
        })
        .collect();
    print_table_colored(
        &[
            "Config",
            "Status",
            "Created (files/folders)",
            "Updated",
            "Unchanged",
            "Removed",
            "Docs",
            "Errors",
            "Duration",
        ],
        rows,
    );

    for result in results {
        if result.truncated {
            println!(
                "{}: stopped at max_results; removal was skipped",
                result.config_name
            );
        } else if result.removal_skipped {
            println!("{}: enumeration incomplete; removal was skipped", result.config_name);
        }
        for error in &result.errors {
            println!(
                "  {} {} [{}]: {}",
                result.config_name, error.item_id, error.phase, error.message
            );
        }
    }
}
