//! Reference extraction from document text.
//!
//! Recognized forms: `[[target]]`, `[[target|alias]]`, `[[target#section]]`
//! and the embed variant `![[target]]`. Anything inside fenced code blocks or
//! inline code spans is ignored.

use std::collections::BTreeSet;

/// Normalized targets referenced by `content`.
pub fn extract_references(content: &str) -> BTreeSet<String> {
    let mut refs = BTreeSet::new();
    let mut fence: Option<(char, usize)> = None;

    for line in content.lines() {
        if let Some(marker) = fence_marker(line) {
            match fence {
                None => fence = Some(marker),
                Some((ch, len)) if marker.0 == ch && marker.1 >= len => fence = None,
                Some(_) => {}
            }
            continue;
        }
        if fence.is_some() {
            continue;
        }
        scan_line(line, &mut refs);
    }
    refs
}

/// Canonical form of a reference or document path: forward slashes, no
/// leading `./` or `/`, no `.md` suffix, lowercase.
pub fn normalize_target(raw: &str) -> Option<String> {
    let mut target = raw.trim().replace('\\', "/");
    loop {
        if let Some(rest) = target.strip_prefix("./") {
            target = rest.to_string();
        } else if let Some(rest) = target.strip_prefix('/') {
            target = rest.to_string();
        } else {
            break;
        }
    }
    while target.contains("//") {
        target = target.replace("//", "/");
    }
    let mut target = target.trim_end_matches('/').to_lowercase();
    if target.ends_with(".md") {
        target.truncate(target.len() - 3);
    }
    let target = target.trim().to_string();
    if target.is_empty() {
        None
    } else {
        Some(target)
    }
}

/// Opening or closing fence: three or more backticks or tildes.
fn fence_marker(line: &str) -> Option<(char, usize)> {
    let trimmed = line.trim_start();
    let ch = trimmed.chars().next()?;
    if ch != '`' && ch != '~' {
        return None;
    }
    let run = trimmed.chars().take_while(|c| *c == ch).count();
    (run >= 3).then_some((ch, run))
}

fn scan_line(line: &str, refs: &mut BTreeSet<String>) {
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'`' {
            // Skip an inline code span delimited by an equal-length run.
            let run = count_run(bytes, i, b'`');
            match find_closing_run(bytes, i + run, run) {
                Some(close) => {
                    i = close + run;
                    continue;
                }
                None => {
                    i += run;
                    continue;
                }
            }
        }
        if bytes[i] == b'[' && bytes.get(i + 1) == Some(&b'[') {
            if let Some(rel_close) = line[i + 2..].find("]]") {
                let inner = &line[i + 2..i + 2 + rel_close];
                if !inner.contains('[') {
                    if let Some(target) = reference_target(inner) {
                        refs.insert(target);
                    }
                    i += 2 + rel_close + 2;
                    continue;
                }
            }
        }
        i += 1;
    }
}

fn reference_target(inner: &str) -> Option<String> {
    let target = inner.split('|').next().unwrap_or_default();
    let target = target.split('#').next().unwrap_or_default();
    normalize_target(target)
}

fn count_run(bytes: &[u8], start: usize, byte: u8) -> usize {
    bytes[start..].iter().take_while(|b| **b == byte).count()
}

fn find_closing_run(bytes: &[u8], from: usize, len: usize) -> Option<usize> {
    let mut i = from;
    while i < bytes.len() {
        if bytes[i] == b'`' {
            let run = count_run(bytes, i, b'`');
            if run == len {
                return Some(i);
            }
            i += run;
        } else {
            i += 1;
        }
    }
    None
}
