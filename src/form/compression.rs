use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::section_label;
use crate::config::CompressionTuning;
use crate::theory::chords::NO_CHORD;
use crate::theory::notes::parse_pitch_class;
use crate::theory::PitchClass;

/// A labeled block of bars played `repeat_count` times in a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressedSection {
    pub id: String,
    pub label: String,
    pub bars: Vec<String>,
    pub repeat_count: usize,
}

/// Where one expanded bar comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarMapEntry {
    pub expanded_bar_index: usize,
    pub section_id: String,
    pub local_bar: usize,
    pub repeat_index: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpandedForm {
    pub bars: Vec<String>,
    pub bar_map: Vec<BarMapEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QualityBucket {
    Major,
    Minor,
    Dominant,
    HalfDiminished,
    Diminished,
    Augmented,
    Suspended,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtensionBucket {
    Plain,
    Seventh,
    Extended,
    Altered,
}

/// A bar's chord reduced to what the similarity function compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BarToken {
    root: Option<PitchClass>,
    quality: QualityBucket,
    extension: ExtensionBucket,
}

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Ga-g](?:#|b|♯|♭)?)(.*)$").expect("valid bar regex"))
}

fn quality_bucket(suffix: &str) -> QualityBucket {
    if suffix.starts_with("m7b5") || suffix.contains('ø') {
        QualityBucket::HalfDiminished
    } else if suffix.starts_with("dim") || suffix.starts_with('°') {
        QualityBucket::Diminished
    } else if suffix.starts_with("aug") || suffix.starts_with('+') {
        QualityBucket::Augmented
    } else if suffix.starts_with("sus") {
        QualityBucket::Suspended
    } else if suffix.starts_with("maj") || suffix.starts_with('M') || suffix.starts_with('Δ') {
        QualityBucket::Major
    } else if suffix.starts_with('m') || suffix.starts_with('-') {
        QualityBucket::Minor
    } else if ["7", "9", "11", "13"].iter().any(|d| suffix.starts_with(d)) {
        QualityBucket::Dominant
    } else {
        QualityBucket::Major
    }
}

fn extension_bucket(suffix: &str) -> ExtensionBucket {
    let suffix = suffix.replacen("m7b5", "m7", 1);
    if ["b9", "#9", "#11", "b13", "#5", "b5", "alt"]
        .iter()
        .any(|t| suffix.contains(t))
    {
        ExtensionBucket::Altered
    } else if ["9", "11", "13"].iter().any(|t| suffix.contains(t)) {
        ExtensionBucket::Extended
    } else if suffix.contains('7') || suffix.contains('6') {
        ExtensionBucket::Seventh
    } else {
        ExtensionBucket::Plain
    }
}

fn normalize(bar: &str) -> BarToken {
    let bar = bar.trim();
    let parsed = token_regex()
        .captures(bar)
        .and_then(|caps| Some((parse_pitch_class(&caps[1])?, caps[2].to_string())));
    match parsed {
        Some((root, suffix)) => BarToken {
            root: Some(root),
            quality: quality_bucket(&suffix),
            extension: extension_bucket(&suffix),
        },
        None => BarToken {
            root: None,
            quality: QualityBucket::Unknown,
            extension: ExtensionBucket::Plain,
        },
    }
}

/// Normalised bars, compared position by position.
struct Bars<'a> {
    raw: &'a [String],
    tokens: Vec<BarToken>,
}

impl<'a> Bars<'a> {
    fn new(raw: &'a [String]) -> Self {
        Self {
            raw,
            tokens: raw.iter().map(|b| normalize(b)).collect(),
        }
    }

    fn bar_similarity(&self, a: usize, b: usize, tuning: &CompressionTuning) -> f64 {
        if self.raw[a] == self.raw[b] {
            return tuning.exact_match;
        }
        let (ta, tb) = (self.tokens[a], self.tokens[b]);
        let same_root = ta.root.is_some() && ta.root == tb.root;
        let same_quality = ta.quality != QualityBucket::Unknown && ta.quality == tb.quality;

        if same_root && ta == tb {
            tuning.same_token
        } else if same_root && same_quality {
            tuning.same_root_quality
        } else if same_root {
            tuning.same_root
        } else if same_quality {
            tuning.same_quality
        } else {
            0.0
        }
    }

    /// Mean bar similarity over the shared length, less a length-mismatch penalty.
    fn chunk_similarity(
        &self,
        a: &Range<usize>,
        b: &Range<usize>,
        tuning: &CompressionTuning,
    ) -> f64 {
        let shared = a.len().min(b.len());
        let longest = a.len().max(b.len());
        if longest == 0 {
            return 0.0;
        }
        if shared == 0 {
            return -tuning.length_mismatch_weight;
        }
        let total: f64 = (0..shared)
            .map(|i| self.bar_similarity(a.start + i, b.start + i, tuning))
            .sum();
        let mismatch = (longest - shared) as f64 / longest as f64;
        total / shared as f64 - tuning.length_mismatch_weight * mismatch
    }
}

struct Block {
    label: String,
    range: Range<usize>,
    repeat_count: usize,
}

struct Plan {
    size: usize,
    blocks: Vec<Block>,
    score: f64,
}

fn candidate_sizes(bar_count: usize, tuning: &CompressionTuning) -> Vec<usize> {
    let mut sizes: Vec<usize> = Vec::new();
    for &size in &tuning.preferred_sizes {
        let in_range = size >= tuning.min_size && size <= tuning.max_size;
        if size > 0 && size <= bar_count && in_range && !sizes.contains(&size) {
            sizes.push(size);
        }
    }
    if bar_count < tuning.exact_size_below && !sizes.contains(&bar_count) {
        sizes.push(bar_count);
    }
    if sizes.is_empty() {
        sizes.push(bar_count.min(tuning.max_size.max(1)));
    }
    sizes
}

fn plan_for_size(bars: &Bars, size: usize, tuning: &CompressionTuning) -> Plan {
    let n = bars.raw.len();
    let chunks: Vec<Range<usize>> = (0..n).step_by(size).map(|s| s..(s + size).min(n)).collect();

    let mut templates: Vec<(String, Range<usize>)> = Vec::new();
    let mut blocks: Vec<Block> = Vec::new();
    let mut matched = 0usize;
    let mut matched_similarity = 0.0;

    for chunk in &chunks {
        let threshold = if chunk.len() == size && size >= tuning.relaxed_from_size {
            tuning.relaxed_threshold
        } else {
            tuning.strict_threshold
        };

        let mut best: Option<(usize, f64)> = None;
        for (i, (_, template)) in templates.iter().enumerate() {
            let similarity = bars.chunk_similarity(template, chunk, tuning);
            if best.is_none_or(|(_, s)| similarity > s) {
                best = Some((i, similarity));
            }
        }

        let label = match best {
            Some((i, similarity)) if similarity >= threshold => {
                matched += 1;
                matched_similarity += similarity;
                templates[i].0.clone()
            }
            _ => {
                let label = section_label(templates.len());
                templates.push((label.clone(), chunk.clone()));
                label
            }
        };

        // Only exact repeats collapse, so expanding the plan restores the input
        let repeats_previous = blocks.last().is_some_and(|prev| {
            prev.label == label && bars.raw[prev.range.clone()] == bars.raw[chunk.clone()]
        });
        match blocks.last_mut() {
            Some(prev) if repeats_previous => prev.repeat_count += 1,
            _ => blocks.push(Block {
                label,
                range: chunk.clone(),
                repeat_count: 1,
            }),
        }
    }

    let coverage = matched as f64 / chunks.len() as f64;
    let average_match = if matched > 0 {
        matched_similarity / matched as f64
    } else {
        0.0
    };
    let remainder_penalty = (n % size) as f64 / size as f64;

    let mut score = tuning.coverage_weight * coverage
        + tuning.match_similarity_weight * average_match
        + tuning.remainder_weight * (1.0 - remainder_penalty);
    if (tuning.size_preference_min..=tuning.size_preference_max).contains(&size) {
        score += tuning.size_preference_bonus;
    }
    score -= tuning.unique_section_penalty * templates.len() as f64;
    if size < 8 {
        score -= tuning.short_size_penalty * (8 - size) as f64 / 4.0;
    }
    let short_sections = blocks.iter().filter(|b| b.range.len() < 4).count();
    score -= tuning.short_section_penalty * short_sections as f64;
    if blocks.len() > tuning.complexity_threshold {
        score -= tuning.complexity_penalty * (blocks.len() - tuning.complexity_threshold) as f64;
    }

    Plan { size, blocks, score }
}

/// Split bars into labeled, repeat-counted sections.
///
/// Every candidate section size is tried and scored; the best plan wins and
/// ties go to the larger size. Chunks that resemble an earlier chunk share its
/// letter, but only identical consecutive chunks fold into a repeat count.
pub fn compress(bars: &[String], tuning: &CompressionTuning) -> Vec<CompressedSection> {
    if bars.is_empty() {
        return Vec::new();
    }
    let normalized = Bars::new(bars);

    let mut best: Option<Plan> = None;
    for size in candidate_sizes(bars.len(), tuning) {
        let plan = plan_for_size(&normalized, size, tuning);
        log::debug!("Section size {}: score {:.3}", size, plan.score);
        let better = match &best {
            None => true,
            Some(b) => {
                let tied = (plan.score - b.score).abs() <= 1e-9;
                plan.score > b.score + 1e-9 || (tied && plan.size > b.size)
            }
        };
        if better {
            best = Some(plan);
        }
    }

    let Some(plan) = best else {
        return Vec::new();
    };
    log::debug!("Compressed {} bars with section size {}", bars.len(), plan.size);

    plan.blocks
        .into_iter()
        .enumerate()
        .map(|(i, block)| CompressedSection {
            id: format!("{}-{}", block.label, i),
            label: block.label,
            bars: bars[block.range].to_vec(),
            repeat_count: block.repeat_count,
        })
        .collect()
}

/// Rebuild the flat bar list and the per-bar section lookup.
pub fn expand(sections: &[CompressedSection]) -> ExpandedForm {
    let mut form = ExpandedForm::default();
    for section in sections {
        for repeat_index in 0..section.repeat_count {
            for (local_bar, bar) in section.bars.iter().enumerate() {
                form.bar_map.push(BarMapEntry {
                    expanded_bar_index: form.bars.len(),
                    section_id: section.id.clone(),
                    local_bar,
                    repeat_index,
                });
                form.bars.push(bar.clone());
            }
        }
    }
    form
}

fn is_empty_bar(bar: &str) -> bool {
    bar.trim().is_empty() || bar == NO_CHORD
}

/// Fill empty or "N.C." slots of `existing` from `detected` and append any
/// extra trailing detected bars. Filled bars are never overwritten.
pub fn merge_expanded_bars(existing: &[String], detected: &[String]) -> Vec<String> {
    if detected.is_empty() {
        return existing.to_vec();
    }
    if existing.is_empty() {
        return detected.to_vec();
    }

    let mut merged = existing.to_vec();
    for (slot, bar) in merged.iter_mut().zip(detected) {
        if is_empty_bar(slot) {
            *slot = bar.clone();
        }
    }
    if detected.len() > merged.len() {
        merged.extend_from_slice(&detected[merged.len()..]);
    }
    merged
}

/// Split one repeat instance out of a repeated section so it can be edited on
/// its own. The section becomes up to three: the repeats before, the single
/// instance, the repeats after. Ids are reassigned afterwards.
pub fn unlink_repeat_instance(
    sections: &[CompressedSection],
    section_id: &str,
    repeat_index: usize,
) -> Vec<CompressedSection> {
    let mut out = Vec::with_capacity(sections.len() + 2);
    for section in sections {
        if section.id != section_id || section.repeat_count <= 1 {
            out.push(section.clone());
            continue;
        }

        let target = repeat_index.min(section.repeat_count - 1);
        let after = section.repeat_count - target - 1;
        if target > 0 {
            out.push(CompressedSection {
                repeat_count: target,
                ..section.clone()
            });
        }
        out.push(CompressedSection {
            repeat_count: 1,
            ..section.clone()
        });
        if after > 0 {
            out.push(CompressedSection {
                repeat_count: after,
                ..section.clone()
            });
        }
    }
    reassign_ids(&mut out);
    out
}

/// Give every section the id "{label}-{position}".
fn reassign_ids(sections: &mut [CompressedSection]) {
    for (i, section) in sections.iter_mut().enumerate() {
        section.id = format!("{}-{}", section.label, i);
    }
}
