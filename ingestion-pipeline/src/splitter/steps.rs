//! The individual splitting strategies. Each function consumes a text and
//! returns its ordered splits; post-processing (trim, empty-drop) is applied
//! by the caller.

use regex::Regex;

use common::config::StepConfig;

/// Sliding window over characters. `start` never regresses, so a large
/// overlap still makes forward progress.
pub(crate) fn split_by_character(
    text: &str,
    chunk_size: Option<usize>,
    chunk_overlap: usize,
) -> Vec<String> {
    let Some(chunk_size) = chunk_size.filter(|size| *size > 0) else {
        return vec![text.to_string()];
    };

    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= chunk_size {
        return vec![text.to_string()];
    }

    let stride = (chunk_size - chunk_overlap.min(chunk_size)).max(1);
    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        start += stride;
    }
    chunks
}

/// Sliding window over whitespace-split tokens, re-joined with single spaces.
pub(crate) fn split_by_word(
    text: &str,
    chunk_size: Option<usize>,
    chunk_overlap: usize,
) -> Vec<String> {
    let Some(chunk_size) = chunk_size.filter(|size| *size > 0) else {
        return vec![text.to_string()];
    };

    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= chunk_size {
        return vec![text.to_string()];
    }

    let stride = (chunk_size - chunk_overlap.min(chunk_size)).max(1);
    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < words.len() {
        let end = (start + chunk_size).min(words.len());
        chunks.push(words[start..end].join(" "));
        start += stride;
    }
    chunks
}

/// Sliding window over sentences. Sentence boundaries are runs of `.!?`;
/// windows re-join with `". "` and a trailing period.
pub(crate) fn split_by_sentence(
    text: &str,
    chunk_size: Option<usize>,
    chunk_overlap: usize,
) -> Vec<String> {
    let Some(chunk_size) = chunk_size.filter(|size| *size > 0) else {
        return vec![text.to_string()];
    };

    let sentences: Vec<&str> = text
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|sentence| !sentence.is_empty())
        .collect();
    if sentences.len() <= chunk_size {
        return vec![text.to_string()];
    }

    let stride = (chunk_size - chunk_overlap.min(chunk_size)).max(1);
    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < sentences.len() {
        let end = (start + chunk_size).min(sentences.len());
        chunks.push(format!("{}.", sentences[start..end].join(". ")));
        start += stride;
    }
    chunks
}

/// Split on blank lines; single newlines stay inside a paragraph. Empty
/// paragraphs are always discarded.
pub(crate) fn split_by_paragraph(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|paragraph| !paragraph.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split on a literal separator; empty pieces are always discarded.
pub(crate) fn split_by_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return vec![text.to_string()];
    }
    text.split(separator)
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split on a compiled pattern. With `keep_separator` the match is glued
/// onto the preceding piece.
pub(crate) fn split_by_regex(text: &str, pattern: &Regex, keep_separator: bool) -> Vec<String> {
    if keep_separator {
        let mut pieces = Vec::new();
        let mut last = 0usize;
        for found in pattern.find_iter(text) {
            pieces.push(text[last..found.end()].to_string());
            last = found.end();
        }
        pieces.push(text[last..].to_string());
        pieces
    } else {
        pattern.split(text).map(str::to_string).collect()
    }
}

/// Common post-processing: optional trim, optional empty-drop.
pub(crate) fn post_process(splits: Vec<String>, step: &StepConfig) -> Vec<String> {
    splits
        .into_iter()
        .map(|split| {
            if step.trim_whitespace {
                split.trim().to_string()
            } else {
                split
            }
        })
        .filter(|split| step.keep_empty || !split.is_empty())
        .collect()
}
