use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::section_label;
use crate::config::PatternTuning;

/// A chord sequence that recurs in the progression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormPattern {
    pub label: String,
    /// Chords joined with "-", e.g. "C-Am-F-G".
    pub signature: String,
    pub length: usize,
    pub occurrences: usize,
}

/// Tally every window of `max_length` down to `min_length` chords and keep
/// the signatures seen at least `min_occurrences` times, ranked by count then
/// length. Longer windows are tallied first, so on a full tie the longer
/// signature also wins by insertion order.
pub fn mine_patterns(progression: &[String], tuning: &PatternTuning) -> Vec<FormPattern> {
    let mut counts: Vec<(String, usize, usize)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for length in (tuning.min_length.max(1)..=tuning.max_length).rev() {
        if length > progression.len() {
            continue;
        }
        for window in progression.windows(length) {
            let signature = window.join("-");
            match index.get(&signature) {
                Some(&i) => counts[i].2 += 1,
                None => {
                    index.insert(signature.clone(), counts.len());
                    counts.push((signature, length, 1));
                }
            }
        }
    }

    counts.retain(|(_, _, count)| *count >= tuning.min_occurrences);
    counts.sort_by(|a, b| b.2.cmp(&a.2).then(b.1.cmp(&a.1)));

    counts
        .into_iter()
        .take(tuning.max_patterns)
        .enumerate()
        .map(|(i, (signature, length, occurrences))| FormPattern {
            label: section_label(i),
            signature,
            length,
            occurrences,
        })
        .collect()
}

/// Label of the longest pattern the progression currently ends with.
pub fn current_form_label(progression: &[String], patterns: &[FormPattern]) -> Option<String> {
    let mut best: Option<&FormPattern> = None;
    for pattern in patterns {
        if pattern.length > progression.len() {
            continue;
        }
        let tail = progression[progression.len() - pattern.length..].join("-");
        if tail == pattern.signature && best.is_none_or(|b| pattern.length > b.length) {
            best = Some(pattern);
        }
    }
    best.map(|p| p.label.clone())
}
