//! Language annotation parsing and slot normalization.
//!
//! Both annotation channels (`lang_lupus.txt` and `lang.txt`) are newline
//! separated candidate instructions interleaved with `confidence: ...` score
//! lines. Every episode exposes exactly [`LANGUAGE_SLOTS`] candidates per
//! channel, so short lists are padded and the lupus list is ranked.

use std::path::Path;

use anyhow::{Context, Result};

/// Number of instruction slots per language channel.
pub const LANGUAGE_SLOTS: usize = 3;

/// Lines containing this marker carry scores, not instructions.
const CONFIDENCE_MARKER: &str = "confidence";

/// Split annotation text into candidate instructions.
///
/// Score lines are dropped, the rest are trimmed, and lines that are empty
/// after trimming are discarded. This applies to interior blank lines as well
/// as the trailing one, so an empty string never wins a length-ranked slot
/// unless the file has no candidates at all.
pub fn parse_candidates(text: &str) -> Vec<String> {
    text.split('\n')
        .filter(|line| !line.contains(CONFIDENCE_MARKER))
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read and parse an annotation file. The contents must be valid UTF-8.
pub fn read_candidates(path: &Path) -> Result<Vec<String>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read annotation {}", path.display()))?;
    let text = String::from_utf8(bytes)
        .with_context(|| format!("Annotation {} is not valid UTF-8", path.display()))?;
    Ok(parse_candidates(&text))
}

/// Extend `candidates` to at least `len` entries by repeating from the start.
///
/// An empty list cannot be repeated and is padded with empty strings.
pub fn pad_cyclic(mut candidates: Vec<String>, len: usize) -> Vec<String> {
    if candidates.is_empty() {
        return vec![String::new(); len];
    }
    let original = candidates.len();
    for i in 0..len.saturating_sub(original) {
        candidates.push(candidates[i % original].clone());
    }
    candidates
}

/// Rank lupus candidates: pad, then stable-sort by length so the shortest
/// phrasing lands in slot 0.
pub fn rank_lupus(candidates: Vec<String>) -> [String; LANGUAGE_SLOTS] {
    let mut padded = pad_cyclic(candidates, LANGUAGE_SLOTS);
    padded.sort_by_key(|c| c.chars().count());
    first_slots(padded)
}

/// Groundtruth candidates keep their file order.
pub fn groundtruth_slots(candidates: Vec<String>) -> [String; LANGUAGE_SLOTS] {
    first_slots(pad_cyclic(candidates, LANGUAGE_SLOTS))
}

/// Empty-string slots for an absent channel.
pub fn empty_slots() -> [String; LANGUAGE_SLOTS] {
    std::array::from_fn(|_| String::new())
}

fn first_slots(candidates: Vec<String>) -> [String; LANGUAGE_SLOTS] {
    let mut iter = candidates.into_iter();
    std::array::from_fn(|_| iter.next().unwrap_or_default())
}
