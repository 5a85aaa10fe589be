//! Origin signatures for generated documents.
//!
//! A signature is a block of HTML comments so it stays invisible in rendered
//! Markdown:
//!
//! ```text
//! <!-- tributary:signature:begin -->
//! <!-- source-id: 1AbC -->
//! <!-- source-kind: remote-drive -->
//! <!-- generated-at: 2025-03-01T09:30:00Z -->
//! <!-- tributary:signature:end -->
//! ```
//!
//! Inserting a signature where one already sits replaces it, so
//! re-signing a document is a fixed point apart from `generated-at`.

use crate::error::{Result, TributaryError};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const BEGIN_MARKER: &str = "<!-- tributary:signature:begin -->";
const END_MARKER: &str = "<!-- tributary:signature:end -->";
const SOURCE_ID_FIELD: &str = "source-id";
const SOURCE_KIND_FIELD: &str = "source-kind";
const GENERATED_AT_FIELD: &str = "generated-at";

/// Where the block goes in the document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Start,
    #[default]
    End,
}

impl std::str::FromStr for Position {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "start" => Ok(Self::Start),
            "end" => Ok(Self::End),
            other => Err(format!("unknown signature position '{other}' (expected start or end)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureBlock {
    pub source_id: String,
    pub source_kind: String,
    /// Whole seconds, UTC.
    pub generated_at: DateTime<Utc>,
}

/// Build a signature stamped with the current time.
pub fn generate_signature(source_id: &str, source_kind: &str) -> Result<SignatureBlock> {
    SignatureBlock::new(source_id, source_kind, Utc::now())
}

impl SignatureBlock {
    pub fn new(source_id: &str, source_kind: &str, at: DateTime<Utc>) -> Result<Self> {
        validate_field(SOURCE_ID_FIELD, source_id)?;
        validate_field(SOURCE_KIND_FIELD, source_kind)?;
        Ok(Self {
            source_id: source_id.trim().to_string(),
            source_kind: source_kind.trim().to_string(),
            generated_at: at.trunc_subsecs(0),
        })
    }

    /// Rendered block without a trailing newline.
    pub fn render(&self) -> String {
        [
            BEGIN_MARKER.to_string(),
            field_line(SOURCE_ID_FIELD, &self.source_id),
            field_line(SOURCE_KIND_FIELD, &self.source_kind),
            field_line(
                GENERATED_AT_FIELD,
                &self.generated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            END_MARKER.to_string(),
        ]
        .join("\n")
    }
}

impl fmt::Display for SignatureBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn field_line(name: &str, value: &str) -> String {
    format!("<!-- {name}: {value} -->")
}

fn validate_field(name: &str, value: &str) -> Result<()> {
    let value = value.trim();
    if value.is_empty() {
        return Err(TributaryError::invariant(format!("signature {name} is empty")));
    }
    if value.contains('\n') || value.contains('\r') || value.contains("-->") {
        return Err(TributaryError::invariant(format!(
            "signature {name} must be a single line without '-->'"
        )));
    }
    Ok(())
}

/// Insert `signature` at `position`, replacing a block already there.
pub fn insert_signature(content: &str, signature: &SignatureBlock, position: Position) -> Result<String> {
    let blocks = find_blocks(content)?;
    let block = signature.render();

    let out = match position {
        Position::End => {
            let body_end = match blocks.last() {
                Some(span) if content[span.end..].trim().is_empty() => span.start,
                _ => content.len(),
            };
            let body = content[..body_end].trim_end();
            if body.is_empty() {
                format!("{block}\n")
            } else {
                format!("{body}\n\n{block}\n")
            }
        }
        Position::Start => {
            let body_start = match blocks.first() {
                Some(span) if content[..span.start].trim().is_empty() => span.end,
                _ => 0,
            };
            let body = content[body_start..].trim_start();
            if body.is_empty() {
                format!("{block}\n")
            } else {
                format!("{block}\n\n{body}")
            }
        }
    };
    Ok(out)
}

/// Strip every signature block, keeping the surrounding text.
pub fn remove_signature(content: &str) -> Result<String> {
    let blocks = find_blocks(content)?;
    if blocks.is_empty() {
        return Ok(content.to_string());
    }

    let mut pieces: Vec<&str> = Vec::with_capacity(blocks.len() + 1);
    let mut cursor = 0;
    for span in &blocks {
        pieces.push(&content[cursor..span.start]);
        cursor = span.end;
    }
    pieces.push(&content[cursor..]);

    let joined = pieces
        .iter()
        .map(|piece| piece.trim_matches('\n'))
        .filter(|piece| !piece.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    Ok(if joined.is_empty() {
        joined
    } else {
        format!("{}\n", joined.trim_end())
    })
}

/// First signature block in the document, if any.
pub fn parse_signature(content: &str) -> Result<Option<SignatureBlock>> {
    let blocks = find_blocks(content)?;
    let Some(span) = blocks.first() else {
        return Ok(None);
    };

    let mut source_id = None;
    let mut source_kind = None;
    let mut generated_at = None;
    for line in content[span.start..span.end].lines() {
        let Some((name, value)) = parse_field_line(line) else {
            continue;
        };
        match name {
            SOURCE_ID_FIELD => source_id = Some(value),
            SOURCE_KIND_FIELD => source_kind = Some(value),
            GENERATED_AT_FIELD => {
                let at = DateTime::parse_from_rfc3339(value).map_err(|e| {
                    TributaryError::invariant(format!("signature generated-at '{value}': {e}"))
                })?;
                generated_at = Some(at.with_timezone(&Utc));
            }
            _ => {}
        }
    }

    match (source_id, source_kind, generated_at) {
        (Some(id), Some(kind), Some(at)) => Ok(Some(SignatureBlock::new(id, kind, at)?)),
        _ => Err(TributaryError::invariant(
            "signature block is missing source-id, source-kind or generated-at",
        )),
    }
}

fn parse_field_line(line: &str) -> Option<(&str, &str)> {
    let inner = line.trim().strip_prefix("<!--")?.strip_suffix("-->")?.trim();
    let (name, value) = inner.split_once(':')?;
    Some((name.trim(), value.trim()))
}

/// Byte range of one block, from the start of its begin line through the
/// newline after its end line (or end of input).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlockSpan {
    start: usize,
    end: usize,
}

fn find_blocks(content: &str) -> Result<Vec<BlockSpan>> {
    let mut blocks = Vec::new();
    let mut open: Option<usize> = None;
    let mut offset = 0;

    for line in content.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        match line.trim() {
            BEGIN_MARKER => {
                if open.is_some() {
                    return Err(TributaryError::invariant(
                        "signature begin marker inside an open signature block",
                    ));
                }
                open = Some(line_start);
            }
            END_MARKER => match open.take() {
                Some(start) => blocks.push(BlockSpan { start, end: offset }),
                None => {
                    return Err(TributaryError::invariant(
                        "signature end marker without a begin marker",
                    ))
                }
            },
            _ => {}
        }
    }

    if open.is_some() {
        return Err(TributaryError::invariant(
            "signature begin marker without an end marker",
        ));
    }
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sig_at(secs: u32) -> SignatureBlock {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, secs).unwrap();
        SignatureBlock::new("file-123", "remote-drive", at).unwrap()
    }

    #[test]
    fn test_render_is_canonical() {
        let rendered = sig_at(0).render();
        assert_eq!(
            rendered,
            "<!-- tributary:signature:begin -->\n\
             <!-- source-id: file-123 -->\n\
             <!-- source-kind: remote-drive -->\n\
             <!-- generated-at: 2025-03-01T09:30:00Z -->\n\
             <!-- tributary:signature:end -->"
        );
    }

    #[test]
    fn test_generate_truncates_subseconds() {
        let sig = generate_signature("a", "b").unwrap();
        assert_eq!(sig.generated_at.timestamp_subsec_nanos(), 0);
    }

    #[test]
    fn test_insert_end_is_fixed_point() {
        let content = "# Notes\n\nSome body text.\n";
        let once = insert_signature(content, &sig_at(0), Position::End).unwrap();
        let twice = insert_signature(&once, &sig_at(0), Position::End).unwrap();
        assert_eq!(once, twice);
        assert!(once.starts_with("# Notes\n\nSome body text.\n\n<!-- tributary"));
        assert!(once.ends_with("-->\n"));
    }

    #[test]
    fn test_insert_start_is_fixed_point() {
        let content = "Body\nline two\n";
        let once = insert_signature(content, &sig_at(0), Position::Start).unwrap();
        let twice = insert_signature(&once, &sig_at(0), Position::Start).unwrap();
        assert_eq!(once, twice);
        assert!(once.ends_with("\n\nBody\nline two\n"));
    }

    #[test]
    fn test_resign_only_changes_timestamp() {
        let once = insert_signature("text", &sig_at(0), Position::End).unwrap();
        let later = insert_signature(&once, &sig_at(59), Position::End).unwrap();

        let differing: Vec<(&str, &str)> = once
            .lines()
            .zip(later.lines())
            .filter(|(a, b)| a != b)
            .collect();
        assert_eq!(differing.len(), 1);
        assert!(differing[0].0.contains("generated-at"));
        assert_eq!(once.lines().count(), later.lines().count());
    }

    #[test]
    fn test_insert_into_empty_content() {
        let out = insert_signature("", &sig_at(0), Position::Start).unwrap();
        assert_eq!(out, format!("{}\n", sig_at(0).render()));
        let out = insert_signature("\n\n", &sig_at(0), Position::End).unwrap();
        assert_eq!(out, format!("{}\n", sig_at(0).render()));
    }

    #[test]
    fn test_block_elsewhere_is_left_alone() {
        let content = format!("intro\n\n{}\n\noutro\n", sig_at(0).render());
        let out = insert_signature(&content, &sig_at(1), Position::End).unwrap();
        assert_eq!(find_blocks(&out).unwrap().len(), 2);
    }

    #[test]
    fn test_malformed_block_rejected() {
        let content = "text\n<!-- tributary:signature:begin -->\n<!-- source-id: x -->\n";
        let err = insert_signature(content, &sig_at(0), Position::End).unwrap_err();
        assert!(matches!(err, TributaryError::InvariantViolation(_)));

        let orphan_end = "text\n<!-- tributary:signature:end -->\n";
        assert!(parse_signature(orphan_end).is_err());
    }

    #[test]
    fn test_parse_roundtrip_and_missing_fields() {
        let signed = insert_signature("body\n", &sig_at(7), Position::End).unwrap();
        assert_eq!(parse_signature(&signed).unwrap(), Some(sig_at(7)));
        assert_eq!(parse_signature("no signature").unwrap(), None);

        let partial = format!("{BEGIN_MARKER}\n<!-- source-id: x -->\n{END_MARKER}\n");
        assert!(parse_signature(&partial).is_err());
    }

    #[test]
    fn test_remove_signature() {
        let signed = insert_signature("# Title\n\nbody\n", &sig_at(0), Position::End).unwrap();
        let signed = insert_signature(&signed, &sig_at(0), Position::Start).unwrap();
        let stripped = remove_signature(&signed).unwrap();
        assert_eq!(stripped, "# Title\n\nbody\n");
        assert_eq!(remove_signature("plain").unwrap(), "plain");
    }

    #[test]
    fn test_rejects_unsafe_fields() {
        let at = Utc::now();
        assert!(SignatureBlock::new("", "kind", at).is_err());
        assert!(SignatureBlock::new("a\nb", "kind", at).is_err());
        assert!(SignatureBlock::new("id", "x --> y", at).is_err());
    }

    #[test]
    fn test_position_from_str() {
        assert_eq!("START".parse::<Position>().unwrap(), Position::Start);
        assert!("middle".parse::<Position>().is_err());
    }
}
