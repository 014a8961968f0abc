#![forbid(unsafe_code)]

//! Engine configuration.

use std::fmt;
use std::rc::Rc;

use serde_json::json;
use tform_core::{FormDataStore, MemoryStore};

use crate::descriptor::Descriptor;

/// Creates the isolated store of a form root. Receives the form-root
/// descriptor.
pub type StoreFactory = Rc<dyn Fn(&Descriptor) -> Rc<dyn FormDataStore>>;

/// Configuration for a [`FormEngine`](crate::FormEngine).
#[derive(Clone)]
pub struct EngineConfig {
    /// Write a field's `default_value` into the store when the field has no
    /// value yet.
    pub seed_defaults: bool,
    /// Upper bound on evaluation passes triggered by one settle, including
    /// passes scheduled by actions that mutate during a pass.
    pub max_evaluation_passes: usize,
    store_factory: StoreFactory,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed_defaults: true,
            max_evaluation_passes: 16,
            store_factory: Rc::new(|descriptor: &Descriptor| {
                let document = descriptor.default_value.clone().unwrap_or_else(|| json!({}));
                Rc::new(MemoryStore::new(document)) as Rc<dyn FormDataStore>
            }),
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("seed_defaults", &self.seed_defaults)
            .field("max_evaluation_passes", &self.max_evaluation_passes)
            .finish_non_exhaustive()
    }
}

impl EngineConfig {
    #[must_use]
    pub fn with_seed_defaults(mut self, seed: bool) -> Self {
        self.seed_defaults = seed;
        self
    }

    #[must_use]
    pub fn with_max_evaluation_passes(mut self, passes: usize) -> Self {
        self.max_evaluation_passes = passes.max(1);
        self
    }

    /// Replace how form stores are created.
    #[must_use]
    pub fn with_store_factory(
        mut self,
        factory: impl Fn(&Descriptor) -> Rc<dyn FormDataStore> + 'static,
    ) -> Self {
        self.store_factory = Rc::new(factory);
        self
    }

    pub(crate) fn create_store(&self, descriptor: &Descriptor) -> Rc<dyn FormDataStore> {
        (self.store_factory)(descriptor)
    }
}
