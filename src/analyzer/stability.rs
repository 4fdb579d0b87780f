use serde::{Deserialize, Serialize};

use super::ranker::ScaleCandidate;
use crate::config::{hold_window_ms, StabilityTuning};
use crate::theory::{PitchClass, ScaleType};

/// The sticky "current key" carried between calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StableContext {
    pub key: PitchClass,
    pub scale: ScaleType,
    pub confidence: f64,
    /// Milliseconds timestamp of the last switch (0 = never).
    pub last_key_change_at: i64,
}

impl Default for StableContext {
    fn default() -> Self {
        Self {
            key: PitchClass::C,
            scale: ScaleType::Major,
            confidence: 0.5,
            last_key_change_at: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyMode {
    #[default]
    Auto,
    Manual,
}

/// Host-controlled override of the key decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyControl {
    pub mode: KeyMode,
    pub manual_key: PitchClass,
    pub manual_scale: ScaleType,
    /// When false the detected key never switches on its own.
    pub follow_key_changes: bool,
}

impl Default for KeyControl {
    fn default() -> Self {
        Self {
            mode: KeyMode::Auto,
            manual_key: PitchClass::C,
            manual_scale: ScaleType::Major,
            follow_key_changes: true,
        }
    }
}

/// Turn ranked candidates into the next stable key.
///
/// Rules in order: manual override; no candidates; top candidate already
/// current (blend confidence); key changes disabled (hold); otherwise a switch
/// needs both a score margin and a confidence lead, and inside the
/// tempo-scaled hold window it needs the stronger override margins too.
/// Without a switch the current key is kept and its confidence decays.
pub fn decide_key(
    candidates: &[ScaleCandidate],
    previous: &StableContext,
    control: &KeyControl,
    now_ms: i64,
    bpm: Option<f64>,
    tuning: &StabilityTuning,
) -> StableContext {
    if control.mode == KeyMode::Manual {
        return StableContext {
            key: control.manual_key,
            scale: control.manual_scale,
            confidence: 1.0,
            last_key_change_at: if previous.key == control.manual_key
                && previous.scale == control.manual_scale
            {
                previous.last_key_change_at
            } else {
                now_ms
            },
        };
    }

    let Some(top) = candidates.first() else {
        return previous.clone();
    };

    let blend = |new_confidence: f64| {
        (tuning.confidence_memory * previous.confidence
            + (1.0 - tuning.confidence_memory) * new_confidence)
            .clamp(0.0, 1.0)
    };

    if top.is_key(previous.key, previous.scale) {
        return StableContext {
            confidence: blend(top.confidence),
            ..previous.clone()
        };
    }

    let current = candidates
        .iter()
        .find(|c| c.is_key(previous.key, previous.scale));

    if !control.follow_key_changes {
        return StableContext {
            confidence: current.map_or(previous.confidence, |c| blend(c.confidence)),
            ..previous.clone()
        };
    }

    let score_margin = top.score - current.map_or(top.score, |c| c.score);
    let required_confidence = previous.confidence + tuning.switch_bonus;

    let hold_ms = hold_window_ms(bpm, tuning.min_hold_ms, tuning.hold_bars);
    let in_hold = previous.last_key_change_at > 0
        && ((now_ms - previous.last_key_change_at) as f64) < hold_ms;
    let overrides_hold = score_margin >= tuning.override_margin
        && top.confidence >= required_confidence + tuning.override_confidence_bonus;

    let switch = score_margin >= tuning.retain_margin
        && top.confidence >= required_confidence
        && (!in_hold || overrides_hold);

    if switch {
        log::info!(
            "Key change: {} {} -> {} (margin {:.2}, confidence {:.2})",
            previous.key,
            previous.scale,
            top.label(),
            score_margin,
            top.confidence
        );
        return StableContext {
            key: top.root,
            scale: top.scale,
            confidence: top.confidence,
            last_key_change_at: now_ms,
        };
    }

    StableContext {
        confidence: (previous.confidence * tuning.confidence_decay).max(tuning.confidence_floor),
        ..previous.clone()
    }
}
