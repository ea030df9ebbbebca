//! `Kernel`: the explicit context struct threaded through every builder,
//! replacing the original's module-level singletons (schema registry,
//! repo-root discovery) per the design notes.

use std::path::PathBuf;
use std::sync::Arc;

use crate::immutable_store::ImmutableStore;
use crate::schema_gate::SchemaRegistry;

#[derive(Clone)]
pub struct ProducerIdentity {
    pub repo: String,
    pub git_sha: String,
    pub module: String,
}

#[derive(Clone)]
pub struct Kernel {
    pub repo_root: PathBuf,
    pub schema_registry: Arc<SchemaRegistry>,
    pub store: Arc<ImmutableStore>,
    pub producer: ProducerIdentity,
}

impl Kernel {
    pub fn new(repo_root: impl Into<PathBuf>, producer: ProducerIdentity) -> Self {
        let repo_root = repo_root.into();
        let schema_dir = repo_root.join("schemas");
        let truth_root = repo_root.join("runtime").join("truth");
        Self {
            schema_registry: Arc::new(SchemaRegistry::new(schema_dir)),
            store: Arc::new(ImmutableStore::new(truth_root)),
            repo_root,
            producer,
        }
    }

    pub fn truth_root(&self) -> PathBuf {
        self.store.truth_root.clone()
    }
}
