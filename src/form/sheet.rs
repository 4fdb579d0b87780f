use serde::{Deserialize, Serialize};

use super::compression::{
    compress, expand, merge_expanded_bars, unlink_repeat_instance, BarMapEntry, CompressedSection,
};
use crate::analyzer::progression::DetectedBars;
use crate::config::CompressionTuning;
use crate::theory::chords::NO_CHORD;

/// The editable chart: flat bars, their compressed sections and the lookup
/// between the two. `expand(sections)` always reproduces `expanded_bars`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormSheet {
    pub expanded_bars: Vec<String>,
    /// Timeline index of `expanded_bars[0]`.
    pub first_bar: u64,
    pub sections: Vec<CompressedSection>,
    pub bar_map: Vec<BarMapEntry>,
    /// Bar being played right now, if any.
    pub current_bar_index: Option<usize>,
}

fn bar_text(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        NO_CHORD.to_string()
    } else {
        text.to_string()
    }
}

impl FormSheet {
    pub fn from_bars(bars: Vec<String>, tuning: &CompressionTuning) -> Self {
        let mut sheet = Self {
            expanded_bars: bars,
            ..Self::default()
        };
        sheet.rebuild_from_bars(tuning);
        sheet
    }

    /// Merge freshly detected bars, aligned by timeline index. Sections are
    /// recomputed only when the merge changed something, so manual section
    /// edits survive idle calls. At most `max_bars` bars are kept.
    pub fn absorb_detected(&mut self, detected: &DetectedBars, tuning: &CompressionTuning) {
        let Some(newest) = detected.last_bar() else {
            self.clamp_current();
            return;
        };
        if self.expanded_bars.is_empty() {
            self.first_bar = detected.first_bar;
        }

        let len = self.expanded_bars.len() as u64;
        let mut first_bar = self.first_bar;
        let mut merged = match detected.first_bar.checked_sub(self.first_bar) {
            Some(offset) if offset <= len.saturating_add(tuning.max_bars as u64) => {
                let offset = offset as usize;
                let mut merged = self.expanded_bars.clone();
                if merged.len() < offset {
                    merged.resize(offset, NO_CHORD.to_string());
                }
                let tail = merge_expanded_bars(&merged[offset..], &detected.bars);
                merged.truncate(offset);
                merged.extend(tail);
                merged
            }
            // Detection reaches back before the sheet: skip the bars it dropped
            None if self.first_bar - detected.first_bar < detected.bars.len() as u64 => {
                let skip = (self.first_bar - detected.first_bar) as usize;
                merge_expanded_bars(&self.expanded_bars, &detected.bars[skip..])
            }
            _ => {
                log::warn!(
                    "Form sheet at bar {} does not overlap detection at bar {}; restarting",
                    self.first_bar,
                    detected.first_bar
                );
                first_bar = detected.first_bar;
                detected.bars.clone()
            }
        };

        if merged.len() > tuning.max_bars {
            let excess = merged.len() - tuning.max_bars;
            merged.drain(..excess);
            first_bar = first_bar.saturating_add(excess as u64);
        }
        if merged != self.expanded_bars || first_bar != self.first_bar {
            self.expanded_bars = merged;
            self.first_bar = first_bar;
            self.rebuild_from_bars(tuning);
        }

        self.current_bar_index = newest
            .checked_sub(self.first_bar)
            .and_then(|i| usize::try_from(i).ok());
        self.clamp_current();
    }

    /// Repair a sheet that is over `max_bars` or whose sections no longer
    /// expand to its bars. Sections without bars or repeats count as out of
    /// sync.
    pub fn reconcile(&mut self, tuning: &CompressionTuning) {
        if self.expanded_bars.len() > tuning.max_bars {
            let excess = self.expanded_bars.len() - tuning.max_bars;
            log::warn!("Form sheet over {} bars; dropping the oldest {}", tuning.max_bars, excess);
            self.expanded_bars.drain(..excess);
            self.first_bar = self.first_bar.saturating_add(excess as u64);
            self.current_bar_index = self.current_bar_index.and_then(|i| i.checked_sub(excess));
            self.rebuild_from_bars(tuning);
            self.clamp_current();
            return;
        }

        let degenerate = self
            .sections
            .iter()
            .any(|s| s.bars.is_empty() || s.repeat_count == 0);
        let form = expand(&self.sections);
        if !degenerate && form.bars == self.expanded_bars {
            self.bar_map = form.bar_map;
        } else {
            log::warn!("Form sheet out of sync; recompressing {} bars", self.expanded_bars.len());
            self.rebuild_from_bars(tuning);
        }
        self.clamp_current();
    }

    fn rebuild_from_bars(&mut self, tuning: &CompressionTuning) {
        self.sections = compress(&self.expanded_bars, tuning);
        self.bar_map = expand(&self.sections).bar_map;
    }

    fn rebuild_from_sections(&mut self) {
        let form = expand(&self.sections);
        self.expanded_bars = form.bars;
        self.bar_map = form.bar_map;
        self.clamp_current();
    }

    fn clamp_current(&mut self) {
        self.current_bar_index = match (self.current_bar_index, self.expanded_bars.len()) {
            (_, 0) => None,
            (Some(i), len) => Some(i.min(len - 1)),
            (None, _) => None,
        };
    }

    /// Overwrite one bar, padding with "N.C." when the index is past the end.
    pub fn set_bar(&mut self, index: usize, text: &str, tuning: &CompressionTuning) {
        if index >= self.expanded_bars.len() {
            self.expanded_bars.resize(index + 1, NO_CHORD.to_string());
        }
        self.expanded_bars[index] = bar_text(text);
        self.rebuild_from_bars(tuning);
    }

    /// Insert a copy of the previous bar at `index` (clamped to the end).
    pub fn insert_bar(&mut self, index: usize, tuning: &CompressionTuning) {
        let index = index.min(self.expanded_bars.len());
        let bar = index
            .checked_sub(1)
            .and_then(|i| self.expanded_bars.get(i).cloned())
            .unwrap_or_else(|| NO_CHORD.to_string());
        self.expanded_bars.insert(index, bar);
        self.rebuild_from_bars(tuning);
    }

    /// Remove one bar. The last remaining bar cannot be removed.
    pub fn remove_bar(&mut self, index: usize, tuning: &CompressionTuning) -> bool {
        if self.expanded_bars.len() <= 1 || index >= self.expanded_bars.len() {
            return false;
        }
        self.expanded_bars.remove(index);
        self.rebuild_from_bars(tuning);
        self.clamp_current();
        true
    }

    pub fn rename_section(&mut self, section_id: &str, label: &str) -> bool {
        let label = label.trim();
        if label.is_empty() {
            return false;
        }
        let Some(section) = self.sections.iter_mut().find(|s| s.id == section_id) else {
            return false;
        };
        section.label = label.to_string();
        true
    }

    /// Replace a section's bars. Blank entries are dropped; an empty result is
    /// rejected so no section is ever left without bars.
    pub fn replace_section_bars(&mut self, section_id: &str, bars: &[String]) -> bool {
        let bars: Vec<String> = bars
            .iter()
            .map(|b| b.trim())
            .filter(|b| !b.is_empty())
            .map(String::from)
            .collect();
        if bars.is_empty() {
            return false;
        }
        let Some(section) = self.sections.iter_mut().find(|s| s.id == section_id) else {
            return false;
        };
        section.bars = bars;
        self.rebuild_from_sections();
        true
    }

    pub fn unlink_repeat(&mut self, section_id: &str, repeat_index: usize) -> bool {
        if !self
            .sections
            .iter()
            .any(|s| s.id == section_id && s.repeat_count > 1 && !s.bars.is_empty())
        {
            return false;
        }
        self.sections = unlink_repeat_instance(&self.sections, section_id, repeat_index);
        self.rebuild_from_sections();
        true
    }

    /// Section containing the now-playing bar.
    pub fn current_section(&self) -> Option<&CompressedSection> {
        let entry = self.bar_map.get(self.current_bar_index?)?;
        self.sections.iter().find(|s| s.id == entry.section_id)
    }
}
