use crate::ports::QueryPipeline;
use std::collections::HashMap;
use std::sync::Arc;

/// Entries available to server configs, keyed by the name used in `exec`.
#[derive(Default, Clone)]
pub struct PipelineRegistry {
    entries: HashMap<String, Arc<dyn QueryPipeline>>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `pipeline` under `name`, replacing any previous entry.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        pipeline: Arc<dyn QueryPipeline>,
    ) -> Option<Arc<dyn QueryPipeline>> {
        self.entries.insert(name.into(), pipeline)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn QueryPipeline>> {
        self.entries.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
