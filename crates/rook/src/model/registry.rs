//
// registry.rs
//
// Concurrent store of finished source models, keyed by unit id. Writers
// replace a unit's model wholesale; readers hold an `Arc` snapshot that
// stays valid across replacements.
//

use crate::model::RSourceModel;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: DashMap<String, Arc<RSourceModel>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            models: DashMap::new(),
        }
    }

    /// Store a unit's model, replacing any previous one. Returns the
    /// replaced model when there was one.
    pub fn insert(&self, model: RSourceModel) -> Option<Arc<RSourceModel>> {
        self.models.insert(model.unit_id.clone(), Arc::new(model))
    }

    /// Snapshot of a unit's current model.
    pub fn get(&self, unit_id: &str) -> Option<Arc<RSourceModel>> {
        self.models.get(unit_id).map(|entry| Arc::clone(&entry))
    }

    pub fn remove(&self, unit_id: &str) -> Option<Arc<RSourceModel>> {
        self.models.remove(unit_id).map(|(_, model)| model)
    }

    pub fn contains(&self, unit_id: &str) -> bool {
        self.models.contains_key(unit_id)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Unit ids currently registered, in no particular order.
    pub fn unit_ids(&self) -> Vec<String> {
        self.models.iter().map(|entry| entry.key().clone()).collect()
    }
}
