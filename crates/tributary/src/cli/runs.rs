//! `tributary runs`: recent run history of one config.

use super::context::{runtime, CliContext};
use super::error::HelpfulError;
use super::output::{format_duration_ms, format_time, print_json, print_table_colored, status_color};
use clap::Args;

#[derive(Args, Debug)]
pub struct RunsArgs {
    #[arg(long)]
    pub user: String,

    #[arg(long, default_value = "default")]
    pub workspace: String,

    /// Config name
    #[arg(long)]
    pub name: String,

    #[arg(short = 'n', long, default_value = "10")]
    pub limit: u32,

    #[arg(long)]
    pub json: bool,
}

pub fn run(args: RunsArgs, ctx: &CliContext) -> anyhow::Result<()> {
    runtime()?.block_on(run_async(args, ctx))
}

async fn run_async(args: RunsArgs, ctx: &CliContext) -> anyhow::Result<()> {
    let db = ctx.open_db().await?;
    let config = db
        .configs_get_by_name(&args.user, &args.workspace, &args.name)
        .await?
        .ok_or_else(|| HelpfulError::config_not_found(&args.user, &args.workspace, &args.name))?;

    let runs = db.runs_list_for_config(&config.id, args.limit).await?;
    if args.json {
        return print_json(&runs);
    }
    if runs.is_empty() {
        println!("Config '{}' has not run yet", config.name);
        return Ok(());
    }

    let rows = runs
        .iter()
        .map(|r| {
            let c = &r.counts;
            vec![
                (r.run_id.short().to_string(), None),
                (format_time(r.started_at), None),
                (r.status.to_string(), Some(status_color(r.status))),
                (c.files_processed.to_string(), None),
                ((c.files_created + c.folders_created).to_string(), None),
                ((c.files_updated + c.folders_updated).to_string(), None),
                (c.items_removed.to_string(), None),
                (r.errors.len().to_string(), None),
                (format_duration_ms(r.duration_ms), None),
            ]
        })
        .collect();
    print_table_colored(
        &[
            "Run", "Started", "Status", "Files", "Created", "Updated", "Removed", "Errors",
            "Duration",
        ],
        rows,
    );
    Ok(())
}
