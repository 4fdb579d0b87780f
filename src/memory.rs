use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::analyzer::progression::{NoteFingerprint, Progression};
use crate::analyzer::stability::{KeyControl, StableContext};
use crate::config::EngineConfig;
use crate::form::{FormPattern, FormSheet};
use crate::recommend::RecommendationCache;

/// Everything the engine carries from one call to the next.
///
/// The host owns this value: it starts from `Memory::default()`, passes the
/// previous value into every analysis call and keeps the returned one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Memory {
    pub stable: StableContext,
    pub key_control: KeyControl,
    pub progression: Progression,
    pub form_patterns: Vec<FormPattern>,
    pub current_form_label: Option<String>,
    pub form_sheet: FormSheet,
    pub last_processed: NoteFingerprint,
    pub recommendation_cache: RecommendationCache,
}

impl Memory {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Rebuild memory from a stored snapshot of any vintage.
    ///
    /// Each top-level field is decoded on its own; a field that is missing or
    /// fails to decode keeps its default. Anything that is not a JSON object
    /// yields the default memory.
    pub fn restore_json(text: &str, config: &EngineConfig) -> Memory {
        let map = match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                log::warn!("Stored memory is not an object; starting fresh");
                return Memory::default();
            }
            Err(e) => {
                log::warn!("Stored memory is not valid JSON ({}); starting fresh", e);
                return Memory::default();
            }
        };

        let mut memory = Memory::default();
        restore_field(&map, "stable", &mut memory.stable);
        restore_field(&map, "key_control", &mut memory.key_control);
        restore_field(&map, "progression", &mut memory.progression);
        restore_field(&map, "form_patterns", &mut memory.form_patterns);
        restore_field(&map, "current_form_label", &mut memory.current_form_label);
        restore_field(&map, "form_sheet", &mut memory.form_sheet);
        restore_field(&map, "last_processed", &mut memory.last_processed);
        restore_field(&map, "recommendation_cache", &mut memory.recommendation_cache);

        memory.sanitize(config);
        memory
    }

    /// Restore invariants a hand-edited or older snapshot may break.
    fn sanitize(&mut self, config: &EngineConfig) {
        self.stable.confidence = clamp_unit(self.stable.confidence);
        if self.progression.repair(&config.progression) {
            // Timeline now starts at 0; realign the chart with it
            self.form_sheet.first_bar = 0;
        }
        for item in &mut self.recommendation_cache.items {
            item.confidence = clamp_unit(item.confidence);
        }
        self.form_sheet.reconcile(&config.compression);
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 }
}

fn restore_field<T: DeserializeOwned>(map: &Map<String, Value>, name: &str, slot: &mut T) {
    let Some(value) = map.get(name) else {
        return;
    };
    match serde_json::from_value(value.clone()) {
        Ok(restored) => *slot = restored,
        Err(e) => log::warn!("Ignoring stored {}: {}", name, e),
    }
}
