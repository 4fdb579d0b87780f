use crate::config::RankerTuning;
use crate::theory::scales::{scale_label, RANKED_SCALES};
use crate::theory::{PitchClass, ScaleType};

/// One root/scale pairing scored against the recent note histogram.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleCandidate {
    pub root: PitchClass,
    pub scale: ScaleType,
    pub score: f64,
    /// 0.05-1.0 by default: share of weight that sits inside the scale.
    pub confidence: f64,
    pub notes: Vec<PitchClass>,
}

impl ScaleCandidate {
    pub fn label(&self) -> String {
        scale_label(self.root, self.scale)
    }

    pub fn is_key(&self, root: PitchClass, scale: ScaleType) -> bool {
        self.root == root && self.scale == scale
    }
}

/// Score every root × ranked scale type against the most recent notes,
/// highest score first. Ties keep enumeration order (roots from C, then
/// scale types in `RANKED_SCALES` order).
///
/// score = in·1.25 − out·1.45 + tonic·0.8 + cadence (0.75 when the latest
/// note is the root), with the default tuning.
pub fn rank_scales(history: &[PitchClass], tuning: &RankerTuning) -> Vec<ScaleCandidate> {
    let start = history.len().saturating_sub(tuning.history_window);
    let recent = &history[start..];
    let Some(&latest) = recent.last() else {
        return Vec::new();
    };

    let mut histogram = [0.0_f64; 12];
    for pc in recent {
        histogram[pc.index()] += 1.0;
    }
    let total = recent.len() as f64;

    let mut candidates = Vec::with_capacity(12 * RANKED_SCALES.len());
    for root in PitchClass::all() {
        for scale in RANKED_SCALES {
            let mask = scale.mask(root);
            let in_scale: f64 = (0..12).filter(|&i| mask[i]).map(|i| histogram[i]).sum();
            let out_scale = total - in_scale;
            let tonic = histogram[root.index()];
            let cadence = if latest == root { tuning.cadence_boost } else { 0.0 };

            let score = in_scale * tuning.in_scale_weight - out_scale * tuning.out_of_scale_weight
                + tonic * tuning.tonic_weight
                + cadence;
            let confidence =
                ((in_scale - out_scale * 0.5) / total).clamp(tuning.min_confidence, 1.0);

            candidates.push(ScaleCandidate {
                root,
                scale,
                score,
                confidence,
                notes: scale.pitch_classes(root),
            });
        }
    }

    // Stable sort keeps enumeration order on equal scores
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theory::notes::parse_pitch_class;

    fn pcs(names: &[&str]) -> Vec<PitchClass> {
        names.iter().map(|n| parse_pitch_class(n).unwrap()).collect()
    }

    #[test]
    fn test_empty_history_yields_nothing() {
        assert!(rank_scales(&[], &RankerTuning::default()).is_empty());
    }

    #[test]
    fn test_full_grid_is_ranked() {
        let ranked = rank_scales(&pcs(&["C", "E", "G"]), &RankerTuning::default());
        assert_eq!(ranked.len(), 72);
        for pair in ranked.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_c_major_triad_ranks_c_major_first() {
        let ranked = rank_scales(&pcs(&["C4", "E4", "G4", "C5"]), &RankerTuning::default());
        assert_eq!(ranked[0].label(), "C major");
        assert!((ranked[0].confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_score_formula() {
        // C D E F G C then F#: C major holds 6 of 7 notes
        let history = pcs(&["C", "D", "E", "F", "G", "C", "F#"]);
        let ranked = rank_scales(&history, &RankerTuning::default());
        let c_major = ranked
            .iter()
            .find(|c| c.is_key(PitchClass::C, ScaleType::Major))
            .unwrap();
        // 6*1.25 - 1*1.45 + 2*0.8 + 0 = 7.65
        assert!((c_major.score - 7.65).abs() < 1e-9);
        // (6 - 0.5) / 7
        assert!((c_major.confidence - 5.5 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_cadence_boost_separates_relative_keys() {
        // Same pitch set; landing on A tips it toward A minor
        let history = pcs(&["C", "E", "G", "A", "C", "E", "A"]);
        let ranked = rank_scales(&history, &RankerTuning::default());
        assert_eq!(ranked[0].label(), "A minor");
    }

    #[test]
    fn test_window_limits_history() {
        let tuning = RankerTuning {
            history_window: 3,
            ..RankerTuning::default()
        };
        let mut history = pcs(&["F#", "C#", "G#", "D#", "A#"]);
        history.extend(pcs(&["C", "E", "G"]));
        let ranked = rank_scales(&history, &tuning);
        assert!((ranked[0].confidence - 1.0).abs() < 1e-9);
    }
}
