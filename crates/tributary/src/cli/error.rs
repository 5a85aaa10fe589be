//! Helpful error types for CLI commands
//!
//! Every error includes what went wrong, the situation it happened in, and
//! what to try next.

use std::fmt;
use std::path::Path;
use tributary::TributaryError;

#[derive(Debug)]
pub struct HelpfulError {
    pub message: String,
    pub context: Option<String>,
    pub suggestions: Vec<String>,
}

impl HelpfulError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            suggestions: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_suggestions(mut self, suggestions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.suggestions.extend(suggestions.into_iter().map(|s| s.into()));
        self
    }

    // === Common error constructors ===

    pub fn path_not_found(path: &Path) -> Self {
        Self::new(format!("Path not found: {}", path.display()))
            .with_context("The specified path does not exist on the filesystem")
            .with_suggestions([
                format!("TRY: Check that the path exists: ls -la {}", path.display()),
                "TRY: Check for typos in the path".to_string(),
            ])
    }

    pub fn cannot_read_file(path: &Path, reason: &str) -> Self {
        Self::new(format!("Cannot read file: {}", path.display()))
            .with_context(reason.to_string())
            .with_suggestions([
                format!("TRY: Check file permissions: ls -la {}", path.display()),
                "TRY: Signatures can only be added to UTF-8 text files".to_string(),
            ])
    }

    pub fn config_parse(path: &Path, details: &str) -> Self {
        Self::new(format!("Invalid config file: {}", path.display()))
            .with_context(details.to_string())
            .with_suggestions([
                "TRY: Show the effective settings: tributary config show".to_string(),
                format!("TRY: Move the file aside to fall back to defaults: mv {0} {0}.bak", path.display()),
            ])
    }

    pub fn database_open(path: &Path, details: &str) -> Self {
        Self::new("Failed to open database")
            .with_context(format!("Database: {}", path.display()))
            .with_suggestions([
                format!("Error: {}", details),
                "TRY: Check that the directory is writable".to_string(),
                "TRY: Ensure the database is not locked by another process".to_string(),
            ])
    }

    pub fn no_output_root() -> Self {
        Self::new("No output root configured")
            .with_context("Documents and backlinks live under `output_root`, which is not set")
            .with_suggestions([
                "TRY: Add `output_root = \"docs\"` to config.toml".to_string(),
                "TRY: Pass the directory explicitly where the command accepts one".to_string(),
            ])
    }

    pub fn config_not_found(user: &str, workspace: &str, name: &str) -> Self {
        Self::new(format!("Scrape config not found: {name}"))
            .with_context(format!("No config named '{name}' for user '{user}' in workspace '{workspace}'"))
            .with_suggestion(format!("TRY: List configs: tributary config list --user {user}"))
    }

    /// Map library errors onto actionable messages where one exists.
    pub fn from_library(err: TributaryError, credential_env: &str) -> anyhow::Error {
        match err {
            TributaryError::Configuration(message) if message.starts_with("no credential") => {
                Self::new("Remote credential missing")
                    .with_context(message)
                    .with_suggestions([
                        format!("TRY: export {credential_env}=<token>"),
                        format!("TRY: For a profile, export {credential_env}_<PROFILE>=<token>"),
                    ])
                    .into()
            }
            TributaryError::Configuration(message) => Self::new("Invalid scrape configuration")
                .with_context(message)
                .with_suggestion("TRY: Fix it with: tributary config upsert ...")
                .into(),
            other => other.into(),
        }
    }
}

impl fmt::Display for HelpfulError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ERROR: {}", self.message)?;

        if let Some(ctx) = &self.context {
            writeln!(f, "CONTEXT: {}", ctx)?;
        }

        if !self.suggestions.is_empty() {
            writeln!(f)?;
            for suggestion in &self.suggestions {
                writeln!(f, "  {}", suggestion)?;
            }
        }

        Ok(())
    }
}

impl std::error::Error for HelpfulError {}
