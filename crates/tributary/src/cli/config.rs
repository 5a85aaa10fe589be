//! `tributary config`: manage scrape configs and show effective settings.

use super::context::{runtime, CliContext};
use super::output::{format_time, print_json, print_table_colored, status_color};
use clap::{Args, Subcommand};
use comfy_table::Color;
use tributary::tributary_db::{ExtractionToggles, ScrapeConfigSpec};

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Create or update a scrape config
    Upsert(UpsertArgs),
    /// List a user's scrape configs
    List(ListArgs),
    /// Print the effective settings as TOML
    Show,
    /// Write a default config.toml if none exists
    Init,
}

#[derive(Args, Debug)]
pub struct UpsertArgs {
    #[arg(long)]
    pub user: String,

    #[arg(long, default_value = "default")]
    pub workspace: String,

    #[arg(long)]
    pub name: String,

    /// Root folder id (repeatable)
    #[arg(long = "root", required = true)]
    pub roots: Vec<String>,

    /// Only list the roots' direct children
    #[arg(long)]
    pub no_subfolders: bool,

    #[arg(long, default_value = "1000")]
    pub max_results: u32,

    /// Store the config but skip it during scrapes
    #[arg(long)]
    pub disabled: bool,

    #[arg(long)]
    pub no_permissions: bool,

    #[arg(long)]
    pub no_revisions: bool,

    #[arg(long)]
    pub no_content: bool,

    #[arg(long)]
    pub no_metadata: bool,

    #[arg(long)]
    pub thumbnails: bool,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[arg(long)]
    pub user: String,

    #[arg(long)]
    pub workspace: Option<String>,

    #[arg(long)]
    pub json: bool,
}

impl UpsertArgs {
    fn to_spec(&self) -> ScrapeConfigSpec {
        ScrapeConfigSpec {
            user_id: self.user.clone(),
            workspace: self.workspace.clone(),
            name: self.name.clone(),
            enabled: !self.disabled,
            root_folder_ids: self.roots.clone(),
            include_subfolders: !self.no_subfolders,
            max_results: self.max_results,
            extract: ExtractionToggles {
                permissions: !self.no_permissions,
                revisions: !self.no_revisions,
                content: !self.no_content,
                metadata: !self.no_metadata,
                thumbnail: self.thumbnails,
            },
        }
    }
}

pub fn run(command: ConfigCommand, ctx: &CliContext) -> anyhow::Result<()> {
    match command {
        ConfigCommand::Upsert(args) => runtime()?.block_on(upsert(args, ctx)),
        ConfigCommand::List(args) => runtime()?.block_on(list(args, ctx)),
        ConfigCommand::Show => {
            println!("# home: {}", ctx.home.display());
            println!("# config: {}", ctx.config_path.display());
            print!("{}", toml::to_string_pretty(&ctx.config)?);
            Ok(())
        }
        ConfigCommand::Init => {
            if ctx.config_path.exists() {
                println!("Config already exists: {}", ctx.config_path.display());
                return Ok(());
            }
            tributary::config::TributaryConfig::default().save(&ctx.config_path)?;
            println!("Wrote {}", ctx.config_path.display());
            Ok(())
        }
    }
}

async fn upsert(args: UpsertArgs, ctx: &CliContext) -> anyhow::Result<()> {
    let db = ctx.open_db().await?;
    let config = db.configs_upsert(&args.to_spec()).await?;

    if args.json {
        return print_json(&config);
    }
    println!(
        "Saved config '{}' ({}) in workspace '{}' with {} root(s)",
        config.name,
        config.id.short(),
        config.workspace,
        config.root_folder_ids.len()
    );
    Ok(())
}

async fn list(args: ListArgs, ctx: &CliContext) -> anyhow::Result<()> {
    let db = ctx.open_db().await?;
    let configs = db
        .configs_list_for_user(&args.user, args.workspace.as_deref())
        .await?;

    if args.json {
        return print_json(&configs);
    }
    if configs.is_empty() {
        println!("No scrape configs for user '{}'", args.user);
        return Ok(());
    }

    let rows = configs
        .iter()
        .map(|c| {
            let status = match c.last_sync_status {
                Some(status) => (status.to_string(), Some(status_color(status))),
                None => ("never".to_string(), Some(Color::Grey)),
            };
            vec![
                (c.workspace.clone(), None),
                (c.name.clone(), None),
                (if c.enabled { "yes" } else { "no" }.to_string(), None),
                (c.root_folder_ids.join(", "), None),
                (
                    c.last_sync_at.map(format_time).unwrap_or_else(|| "-".to_string()),
                    None,
                ),
                status,
            ]
        })
        .collect();
    print_table_colored(
        &["Workspace", "Name", "Enabled", "Roots", "Last Sync", "Status"],
        rows,
    );
    Ok(())
}
