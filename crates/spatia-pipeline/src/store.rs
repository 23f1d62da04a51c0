//! Object store boundary
//!
//! The pipeline only needs single-object reads and writes. Every call is
//! made while the caller holds the pipeline's exclusive section.

use std::collections::{BTreeMap, HashMap};

use crate::config::PipelineConfig;
use crate::model::Object;

pub trait ObjectStore: Send {
    fn get(&self, key: &str, id: &str) -> Option<&Object>;

    /// Insert or replace, returning the previous object
    fn upsert(&mut self, key: &str, id: &str, object: Object) -> Option<Object>;

    fn delete(&mut self, key: &str, id: &str) -> Option<Object>;

    /// Total number of objects across all collections
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of objects, if bounded
    fn capacity(&self) -> Option<usize>;
}

/// In-memory store keyed by collection then object id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryStore {
    collections: HashMap<String, BTreeMap<String, Object>>,
    count: usize,
    max_objects: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity_limit(max_objects: usize) -> Self {
        Self {
            max_objects: Some(max_objects),
            ..Default::default()
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_objects: config.max_objects,
            ..Default::default()
        }
    }
}

impl ObjectStore for MemoryStore {
    fn get(&self, key: &str, id: &str) -> Option<&Object> {
        self.collections.get(key).and_then(|c| c.get(id))
    }

    fn upsert(&mut self, key: &str, id: &str, object: Object) -> Option<Object> {
        let previous = self
            .collections
            .entry(key.to_string())
            .or_default()
            .insert(id.to_string(), object);
        if previous.is_none() {
            self.count += 1;
        }
        previous
    }

    fn delete(&mut self, key: &str, id: &str) -> Option<Object> {
        let collection = self.collections.get_mut(key)?;
        let removed = collection.remove(id)?;
        if collection.is_empty() {
            self.collections.remove(key);
        }
        self.count -= 1;
        Some(removed)
    }

    fn len(&self) -> usize {
        self.count
    }

    fn capacity(&self) -> Option<usize> {
        self.max_objects
    }
}
