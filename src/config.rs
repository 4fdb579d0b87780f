use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;

/// Application configuration loaded from TOML config file.
/// Every field has a default, so the config file is optional.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// Tempo assumed when `feed` gets no `--bpm` and the session has none.
    pub default_bpm: Option<f64>,
    /// Simulated milliseconds between notes replayed by `feed`.
    pub step_ms: u64,
    /// Inference tuning.
    pub engine: EngineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            default_bpm: None,
            step_ms: 250,
            engine: EngineConfig::default(),
        }
    }
}

/// Every load-bearing constant of the inference pipeline, grouped by stage.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub ranker: RankerTuning,
    pub stability: StabilityTuning,
    pub chords: ChordTuning,
    pub progression: ProgressionTuning,
    pub patterns: PatternTuning,
    pub compression: CompressionTuning,
    pub recommendations: RecommendationTuning,
}

/// Key/scale candidate scoring weights.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RankerTuning {
    /// Most recent notes that enter the histogram.
    pub history_window: usize,
    pub in_scale_weight: f64,
    pub out_of_scale_weight: f64,
    pub tonic_weight: f64,
    /// Added when the latest note is the candidate root.
    pub cadence_boost: f64,
    pub min_confidence: f64,
}

impl Default for RankerTuning {
    fn default() -> Self {
        Self {
            history_window: 64,
            in_scale_weight: 1.25,
            out_of_scale_weight: 1.45,
            tonic_weight: 0.8,
            cadence_boost: 0.75,
            min_confidence: 0.05,
        }
    }
}

/// Hysteresis for the sticky key decision.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StabilityTuning {
    /// Minimum score lead over the current key before a switch is considered.
    pub retain_margin: f64,
    /// Confidence the challenger needs above the current key's confidence.
    pub switch_bonus: f64,
    /// Score lead that breaks through the post-switch hold window.
    pub override_margin: f64,
    /// Extra confidence (on top of `switch_bonus`) needed to break the hold.
    pub override_confidence_bonus: f64,
    pub min_hold_ms: f64,
    pub hold_bars: f64,
    /// Weight of the previous confidence when the key is re-confirmed.
    pub confidence_memory: f64,
    pub confidence_decay: f64,
    pub confidence_floor: f64,
}

impl Default for StabilityTuning {
    fn default() -> Self {
        Self {
            retain_margin: 3.8,
            switch_bonus: 0.18,
            override_margin: 8.5,
            override_confidence_bonus: 0.2,
            min_hold_ms: 20_000.0,
            hold_bars: 10.0,
            confidence_memory: 0.7,
            confidence_decay: 0.98,
            confidence_floor: 0.35,
        }
    }
}

/// Windowed chord matching weights.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChordTuning {
    /// Most recent notes considered for the current chord.
    pub window: usize,
    pub hit_weight: f64,
    pub root_bonus: f64,
    /// Added once two or more chord tones are present.
    pub multi_hit_bonus: f64,
    /// Score that maps to full confidence before clamping.
    pub score_scale: f64,
    pub min_confidence: f64,
    pub max_confidence: f64,
}

impl Default for ChordTuning {
    fn default() -> Self {
        Self {
            window: 10,
            hit_weight: 0.95,
            root_bonus: 0.6,
            multi_hit_bonus: 0.25,
            score_scale: 3.2,
            min_confidence: 0.1,
            max_confidence: 0.98,
        }
    }
}

/// Debounced commit of chord guesses into the progression.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProgressionTuning {
    pub votes_to_commit: u32,
    pub min_commit_confidence: f64,
    pub max_progression: usize,
    pub max_timeline: usize,
    /// Raw notes fingerprinted to detect "nothing new arrived".
    pub tail_fingerprint: usize,
}

impl Default for ProgressionTuning {
    fn default() -> Self {
        Self {
            votes_to_commit: 2,
            min_commit_confidence: 0.42,
            max_progression: 64,
            max_timeline: 256,
            tail_fingerprint: 10,
        }
    }
}

/// Repeating chord-signature mining.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PatternTuning {
    pub min_length: usize,
    pub max_length: usize,
    pub min_occurrences: usize,
    pub max_patterns: usize,
}

impl Default for PatternTuning {
    fn default() -> Self {
        Self {
            min_length: 2,
            max_length: 4,
            min_occurrences: 2,
            max_patterns: 6,
        }
    }
}

/// Section-size search and bar similarity for the repeat detector.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompressionTuning {
    /// Candidate section sizes in preference order.
    pub preferred_sizes: Vec<usize>,
    pub min_size: usize,
    pub max_size: usize,
    /// Longest chart kept; older bars scroll off the front.
    pub max_bars: usize,
    /// Below this bar count the exact bar count is also tried.
    pub exact_size_below: usize,

    pub exact_match: f64,
    pub same_token: f64,
    pub same_root_quality: f64,
    pub same_root: f64,
    pub same_quality: f64,
    pub length_mismatch_weight: f64,

    /// Template reuse threshold for short or partial chunks.
    pub strict_threshold: f64,
    /// Template reuse threshold for full chunks of `relaxed_from_size` bars or more.
    pub relaxed_threshold: f64,
    pub relaxed_from_size: usize,

    pub coverage_weight: f64,
    pub match_similarity_weight: f64,
    pub remainder_weight: f64,
    pub size_preference_bonus: f64,
    pub size_preference_min: usize,
    pub size_preference_max: usize,
    pub unique_section_penalty: f64,
    /// Penalty per 4 bars a candidate size falls short of 8.
    pub short_size_penalty: f64,
    /// Penalty per emitted section with fewer than 4 bars.
    pub short_section_penalty: f64,
    pub complexity_threshold: usize,
    pub complexity_penalty: f64,
}

impl Default for CompressionTuning {
    fn default() -> Self {
        Self {
            preferred_sizes: vec![8, 12, 14, 16, 4, 20, 24],
            min_size: 4,
            max_size: 24,
            max_bars: 256,
            exact_size_below: 8,
            exact_match: 1.0,
            same_token: 0.9,
            same_root_quality: 0.76,
            same_root: 0.64,
            same_quality: 0.42,
            length_mismatch_weight: 0.35,
            strict_threshold: 0.82,
            relaxed_threshold: 0.73,
            relaxed_from_size: 8,
            coverage_weight: 2.2,
            match_similarity_weight: 1.25,
            remainder_weight: 0.45,
            size_preference_bonus: 0.12,
            size_preference_min: 8,
            size_preference_max: 16,
            unique_section_penalty: 0.015,
            short_size_penalty: 0.25,
            short_section_penalty: 0.08,
            complexity_threshold: 6,
            complexity_penalty: 0.05,
        }
    }
}

/// Suggestion list size and refresh pacing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecommendationTuning {
    pub max_items: usize,
    pub min_hold_ms: f64,
    pub hold_bars: f64,
    /// Longest chord basis tried by the next-chord predictor.
    pub max_basis: usize,
}

impl Default for RecommendationTuning {
    fn default() -> Self {
        Self {
            max_items: 12,
            min_hold_ms: 16_000.0,
            hold_bars: 12.0,
            max_basis: 3,
        }
    }
}

/// Milliseconds a musical hold window lasts: `hold_bars` bars of 4/4 at `bpm`,
/// never shorter than `min_hold_ms`. Unknown or nonsensical tempo falls back
/// to `min_hold_ms`.
pub fn hold_window_ms(bpm: Option<f64>, min_hold_ms: f64, hold_bars: f64) -> f64 {
    match bpm {
        Some(b) if b.is_finite() && b > 0.0 => {
            let bar_ms = 4.0 * 60_000.0 / b;
            min_hold_ms.max(bar_ms * hold_bars)
        }
        _ => min_hold_ms,
    }
}

impl AppConfig {
    /// Load config from `~/.config/chordform/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        let config_path = Self::config_path();
        match config_path {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match Self::parse(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Parse config text. Tables and keys left out keep their defaults.
    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("chordform.db")
    } else {
        // Fallback: current directory
        PathBuf::from("chordform.db")
    }
}
