//! `tributary sign`: add, refresh, inspect or strip a file's signature block.

use super::error::HelpfulError;
use clap::Args;
use std::path::PathBuf;
use tributary::signature::{generate_signature, insert_signature, parse_signature, remove_signature, Position};

#[derive(Args, Debug)]
pub struct SignArgs {
    pub file: PathBuf,

    /// Source id to record (defaults to the file name)
    #[arg(long)]
    pub source_id: Option<String>,

    /// Source kind label (defaults to the configured one)
    #[arg(long)]
    pub kind: Option<String>,

    /// start or end (defaults to the configured position)
    #[arg(long)]
    pub position: Option<Position>,

    /// Print the existing signature without changing the file
    #[arg(long, conflicts_with = "remove")]
    pub check: bool,

    /// Strip the signature block
    #[arg(long)]
    pub remove: bool,
}

pub fn run(args: SignArgs, ctx: &super::context::CliContext) -> anyhow::Result<()> {
    if !args.file.is_file() {
        return Err(HelpfulError::path_not_found(&args.file).into());
    }
    let content = std::fs::read_to_string(&args.file)
        .map_err(|e| HelpfulError::cannot_read_file(&args.file, &e.to_string()))?;

    if args.check {
        match parse_signature(&content)? {
            Some(sig) => println!(
                "source-id: {}\nsource-kind: {}\ngenerated-at: {}",
                sig.source_id,
                sig.source_kind,
                sig.generated_at.to_rfc3339()
            ),
            None => println!("{}: unsigned", args.file.display()),
        }
        return Ok(());
    }

    let updated = if args.remove {
        remove_signature(&content)?
    } else {
        let source_id = match &args.source_id {
            Some(id) => id.clone(),
            None => args
                .file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
        };
        let kind = args
            .kind
            .as_deref()
            .unwrap_or(&ctx.config.signature.source_kind);
        let position = args.position.unwrap_or(ctx.config.signature.position);
        insert_signature(&content, &generate_signature(&source_id, kind)?, position)?
    };

    if updated != content {
        std::fs::write(&args.file, updated)?;
    }
    println!(
        "{} {}",
        if args.remove { "Unsigned" } else { "Signed" },
        args.file.display()
    );
    Ok(())
}
