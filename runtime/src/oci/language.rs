//! Language layer builders and the runtime registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fnbuild_core::{FnError, Platform, Result};

use super::blob::BlobStore;
use super::golang::GoLayerBuilder;
use super::layer::Layer;
use crate::build::BuildContext;

/// Produces the execution layer of one platform's image.
///
/// The layer must hold exactly one executable at `/func/f` and be written
/// into `store`.
#[async_trait]
pub trait LayerBuilder: Send + Sync {
    async fn build(&self, ctx: &BuildContext, platform: &Platform, store: &BlobStore)
        -> Result<Layer>;
}

/// Runtime identifier → layer builder.
#[derive(Clone)]
pub struct LayerBuilders {
    builders: HashMap<String, Arc<dyn LayerBuilder>>,
}

impl LayerBuilders {
    /// Empty registry; every runtime resolves to an error.
    pub fn empty() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// Registry with every built-in language.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("go", Arc::new(GoLayerBuilder));
        registry
    }

    /// Install (or replace) the builder for a runtime.
    pub fn register(&mut self, runtime: impl Into<String>, builder: Arc<dyn LayerBuilder>) {
        self.builders.insert(runtime.into(), builder);
    }

    pub fn resolve(&self, runtime: &str) -> Result<Arc<dyn LayerBuilder>> {
        if let Some(builder) = self.builders.get(runtime) {
            return Ok(Arc::clone(builder));
        }
        Err(FnError::UnsupportedRuntime {
            runtime: runtime.to_string(),
            message: unsupported_message(runtime),
        })
    }
}

impl Default for LayerBuilders {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for LayerBuilders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut runtimes: Vec<&String> = self.builders.keys().collect();
        runtimes.sort();
        f.debug_struct("LayerBuilders")
            .field("runtimes", &runtimes)
            .finish()
    }
}

fn unsupported_message(runtime: &str) -> String {
    let language = match runtime {
        "python" => "Python",
        "node" => "Node",
        "rust" => "Rust",
        "typescript" => "TypeScript",
        "quarkus" => "Quarkus",
        "springboot" => "Spring Boot",
        _ => {
            return format!(
                "The language runtime '{}' is not a recognized language by the host builder.",
                runtime
            )
        }
    };
    format!(
        "{} functions are not yet supported by the host builder.",
        language
    )
}
