//! `tributary provenance`: inspect how a generated document was produced.

use super::context::{runtime, CliContext};
use super::error::HelpfulError;
use super::output::{format_time, print_json, print_table};
use clap::{Args, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tributary::provenance::{ProvenanceTracker, Staleness};
use tributary::remote::{LocalDirProvider, RemoteTreeProvider};

#[derive(Subcommand, Debug)]
pub enum ProvenanceCommand {
    /// Show the provenance record of an output
    Show(ShowArgs),
    /// Check whether an output's sources have moved on
    Stale(StaleArgs),
    /// List outputs produced from a source id
    Outputs(OutputsArgs),
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Output path relative to the output root
    pub output: String,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct StaleArgs {
    pub output: String,

    /// Current token of a source, as ID=TOKEN (repeatable)
    #[arg(long = "token", value_parser = parse_token)]
    pub tokens: Vec<(String, String)>,

    /// Read current tokens from this directory tree instead
    #[arg(long)]
    pub source: Option<PathBuf>,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct OutputsArgs {
    pub source_id: String,
}

fn parse_token(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((id, token)) if !id.is_empty() => Ok((id.to_string(), token.to_string())),
        _ => Err(format!("expected ID=TOKEN, got '{s}'")),
    }
}

pub fn run(command: ProvenanceCommand, ctx: &CliContext) -> anyhow::Result<()> {
    runtime()?.block_on(async {
        let db = ctx.open_db().await?;
        let tracker = ProvenanceTracker::new(Arc::new(db));
        match command {
            ProvenanceCommand::Show(args) => show(args, &tracker).await,
            ProvenanceCommand::Stale(args) => stale(args, &tracker).await,
            ProvenanceCommand::Outputs(args) => {
                for output in tracker.outputs_for_source(&args.source_id).await? {
                    println!("{output}");
                }
                Ok(())
            }
        }
    })
}

fn untracked(output: &str) -> HelpfulError {
    HelpfulError::new(format!("No provenance recorded for {output}"))
        .with_context("Paths are relative to the output root, e.g. default/docs/Root/a.md")
        .with_suggestion("TRY: Run a scrape with output_root set to generate documents")
}

async fn show(args: ShowArgs, tracker: &ProvenanceTracker) -> anyhow::Result<()> {
    let record = tracker
        .get(&args.output)
        .await?
        .ok_or_else(|| untracked(&args.output))?;

    if args.json {
        return print_json(&record);
    }
    println!("Output:    {}", record.output_path);
    println!("Operation: {} ({})", record.operation, record.operation_id);
    println!("Tracked:   {}", format_time(record.tracked_at));
    print_table(
        &["Source", "Token"],
        record
            .sources
            .iter()
            .map(|(id, token)| vec![id.clone(), token.clone()])
            .collect(),
    );
    if !record.metadata.is_empty() {
        print_table(
            &["Key", "Value"],
            record
                .metadata
                .iter()
                .map(|(k, v)| vec![k.clone(), v.to_string()])
                .collect(),
        );
    }
    Ok(())
}

async fn stale(args: StaleArgs, tracker: &ProvenanceTracker) -> anyhow::Result<()> {
    let mut current: HashMap<String, String> = HashMap::new();

    if let Some(dir) = &args.source {
        let record = tracker
            .get(&args.output)
            .await?
            .ok_or_else(|| untracked(&args.output))?;
        let provider = LocalDirProvider::new(dir);
        for source_id in record.sources.keys() {
            // Missing sources stay out of the map and report as missing
            if let Ok(item) = provider.get_item(source_id).await {
                current.insert(source_id.clone(), item.version);
            }
        }
    }
    current.extend(args.tokens);

    let staleness = tracker.staleness(&args.output, &current).await?;
    if args.json {
        let value = match &staleness {
            Staleness::Untracked => serde_json::json!({ "state": "untracked" }),
            Staleness::Fresh => serde_json::json!({ "state": "fresh" }),
            Staleness::Stale { changed, missing } => serde_json::json!({
                "state": "stale",
                "changed": changed,
                "missing": missing,
            }),
        };
        return print_json(&value);
    }

    match staleness {
        Staleness::Untracked => println!("{}: untracked", args.output),
        Staleness::Fresh => println!("{}: fresh", args.output),
        Staleness::Stale { changed, missing } => {
            println!("{}: stale", args.output);
            for id in changed {
                println!("  changed  {id}");
            }
            for id in missing {
                println!("  missing  {id}");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_token() {
        assert_eq!(
            parse_token("notes/a.md=123-4").unwrap(),
            ("notes/a.md".to_string(), "123-4".to_string())
        );
        assert_eq!(parse_token("a==b").unwrap().1, "=b");
        assert!(parse_token("=x").is_err());
        assert!(parse_token("nothing").is_err());
    }
}
