use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::info;

use crate::domain::{LocalModel, ModelFamily};

/// The currently selected model per family.
///
/// An empty string means "nothing selected". The selection must never
/// point at a model known to be absent.
#[derive(Debug, Default)]
pub struct ModelSelection {
    selected: RwLock<HashMap<ModelFamily, String>>,
}

impl ModelSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from a family -> model id map (e.g. persisted config).
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        let selected = map
            .iter()
            .map(|(family, id)| (ModelFamily::new(family.as_str()), id.clone()))
            .collect();
        Self {
            selected: RwLock::new(selected),
        }
    }

    pub fn get(&self, family: &ModelFamily) -> String {
        self.selected.read().get(family).cloned().unwrap_or_default()
    }

    pub fn set(&self, family: &ModelFamily, model_id: impl Into<String>) {
        self.selected.write().insert(family.clone(), model_id.into());
    }

    /// Export for persistence.
    pub fn to_map(&self) -> HashMap<String, String> {
        self.selected
            .read()
            .iter()
            .map(|(family, id)| (family.as_str().to_string(), id.clone()))
            .collect()
    }

    /// Clear the family's selection if it points at `model_id`.
    pub fn forget(&self, family: &ModelFamily, model_id: &str) -> bool {
        let mut selected = self.selected.write();
        match selected.get_mut(family) {
            Some(current) if current == model_id => {
                info!(family = %family, previous = %model_id, "Model selection cleared");
                current.clear();
                true
            }
            _ => false,
        }
    }

    /// Re-check the selection against a fresh model listing.
    ///
    /// If the selected model is not downloaded, fall back to the first
    /// downloaded model of the family, or to empty if none remain.
    /// Returns the selection after the check.
    pub fn revalidate(&self, family: &ModelFamily, models: &[LocalModel]) -> String {
        let mut selected = self.selected.write();
        let current = selected.get(family).cloned().unwrap_or_default();

        // Nothing selected is valid; do not invent a selection.
        if current.is_empty() || models.iter().any(|m| m.id == current && m.downloaded) {
            return current;
        }

        let fallback = models
            .iter()
            .find(|m| m.downloaded)
            .map(|m| m.id.clone())
            .unwrap_or_default();

        info!(
            family = %family,
            previous = %current,
            selected = %fallback,
            "Model selection fell back"
        );
        selected.insert(family.clone(), fallback.clone());
        fallback
    }
}
