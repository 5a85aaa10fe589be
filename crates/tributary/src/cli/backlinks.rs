//! `tributary backlinks`: query the reference graph over generated documents.

use super::context::{runtime, CliContext};
use super::output::print_json;
use clap::Args;
use std::path::PathBuf;
use tributary::backlinks::BacklinkMaintainer;

#[derive(Args, Debug)]
pub struct BacklinksArgs {
    /// Document or link target, e.g. `notes/ideas`
    pub target: String,

    /// Show what the document links to instead of what links to it
    #[arg(long)]
    pub outbound: bool,

    /// Re-index every document under the root before answering
    #[arg(long)]
    pub reindex: bool,

    /// Document root (defaults to output_root)
    #[arg(long)]
    pub root: Option<PathBuf>,

    #[arg(long)]
    pub json: bool,
}

pub fn run(args: BacklinksArgs, ctx: &CliContext) -> anyhow::Result<()> {
    let root = ctx.output_root(args.root.as_deref())?;
    runtime()?.block_on(async {
        let db = ctx.open_db().await?;
        let maintainer = BacklinkMaintainer::load(root.clone(), db).await?;

        if args.reindex {
            let mut poller = tributary::watch::DirectoryPoller::new(&root);
            for event in poller.scan() {
                maintainer.update_backlinks_from_content(&event.path).await?;
            }
        }

        let documents = if args.outbound {
            maintainer.outbound(&args.target).await
        } else {
            maintainer.backlinks(&args.target).await
        };

        if args.json {
            return print_json(&documents);
        }
        if documents.is_empty() {
            let what = if args.outbound { "outbound links" } else { "backlinks" };
            println!("No {what} for '{}'", args.target);
        }
        for document in documents {
            println!("{document}");
        }
        Ok(())
    })
}
