//! `tributary watch`: keep backlinks current while documents change.

use super::context::{runtime, CliContext};
use super::error::HelpfulError;
use clap::Args;
use std::path::PathBuf;
use tracing::info;
use tributary::backlinks::BacklinkMaintainer;
use tributary::cancel::CancelToken;
use tributary::watch::{run_watch, WatchOptions};

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Directory to watch (defaults to output_root)
    pub dir: Option<PathBuf>,

    /// Quiet period before a batch is applied, in milliseconds
    #[arg(long)]
    pub debounce_ms: Option<u64>,
}

pub fn run(args: WatchArgs, ctx: &CliContext) -> anyhow::Result<()> {
    let root = ctx.output_root(args.dir.as_deref())?;
    if !root.is_dir() {
        return Err(HelpfulError::path_not_found(&root).into());
    }

    let options = WatchOptions {
        poll_interval: ctx.config.poll_interval(),
        debounce: args
            .debounce_ms
            .map(std::time::Duration::from_millis)
            .unwrap_or_else(|| ctx.config.debounce()),
    };

    runtime()?.block_on(async {
        let db = ctx.open_db().await?;
        let maintainer = BacklinkMaintainer::load(root, db).await?;

        let cancel = CancelToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, draining pending changes");
                on_interrupt.cancel();
            }
        });

        println!("Watching {} (Ctrl-C to stop)", maintainer.root().display());
        let stats = run_watch(&maintainer, options, cancel).await?;
        println!(
            "Indexed {} document(s), removed {}, {} failure(s)",
            stats.documents_indexed, stats.documents_removed, stats.failures
        );
        Ok(())
    })
}
