//! Playbook definition loaders.
//!
//! The runtime asks a [`DefinitionLoader`] for a playbook by name each time one is executed.
//! Parsing `.busy` sources is upstream work; these loaders serve already-compiled definitions.

use crate::definitions::PlaybookDefinition;
use crate::error::{Result, RuntimeError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

/// Source of playbook definitions.
#[async_trait]
pub trait DefinitionLoader: Send + Sync {
    /// Loads the playbook with the given name.
    ///
    /// # Errors
    /// Returns `PlaybookNotFound` if the loader has no such playbook, or a parse/IO error.
    async fn load_playbook(&self, name: &str) -> Result<PlaybookDefinition>;
}

/// Playbooks registered in memory.
#[derive(Default)]
pub struct InMemoryDefinitionLoader {
    playbooks: RwLock<HashMap<String, PlaybookDefinition>>,
}

impl fmt::Debug for InMemoryDefinitionLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryDefinitionLoader")
            .field("playbook_count", &self.playbooks.try_read().map(|p| p.len()).unwrap_or(0))
            .finish()
    }
}

impl InMemoryDefinitionLoader {
    /// Creates an empty loader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a loader holding the given playbooks.
    #[must_use]
    pub fn with_playbooks(playbooks: impl IntoIterator<Item = PlaybookDefinition>) -> Self {
        let map = playbooks.into_iter().map(|p| (p.name.clone(), p)).collect();
        Self { playbooks: RwLock::new(map) }
    }

    /// Adds or replaces a playbook.
    pub async fn insert(&self, playbook: PlaybookDefinition) {
        debug!(playbook = %playbook.name, steps = playbook.steps.len(), "Registering playbook definition");
        self.playbooks.write().await.insert(playbook.name.clone(), playbook);
    }

    /// Names of the registered playbooks, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.playbooks.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl DefinitionLoader for InMemoryDefinitionLoader {
    async fn load_playbook(&self, name: &str) -> Result<PlaybookDefinition> {
        self.playbooks
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::PlaybookNotFound(name.to_string()))
    }
}

/// Reads compiled playbook manifests from a directory.
///
/// `load_playbook("order-pizza")` looks for `order-pizza.yaml`, `order-pizza.yml`, then
/// `order-pizza.json`.
#[derive(Debug, Clone)]
pub struct ManifestLoader {
    root: PathBuf,
}

impl ManifestLoader {
    const EXTENSIONS: [&'static str; 3] = ["yaml", "yml", "json"];

    /// Creates a loader rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory manifests are read from.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn parse(path: &Path, content: &str) -> Result<PlaybookDefinition> {
        if path.extension().is_some_and(|ext| ext == "json") {
            Ok(serde_json::from_str(content)?)
        } else {
            Ok(serde_yaml::from_str(content)?)
        }
    }
}

#[async_trait]
impl DefinitionLoader for ManifestLoader {
    async fn load_playbook(&self, name: &str) -> Result<PlaybookDefinition> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(RuntimeError::Loader(format!("Invalid playbook name: {name:?}")));
        }

        for ext in Self::EXTENSIONS {
            let path = self.root.join(format!("{name}.{ext}"));
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => {
                    debug!(playbook = %name, path = %path.display(), "Loaded playbook manifest");
                    let mut playbook = Self::parse(&path, &content)?;
                    if playbook.name.is_empty() {
                        playbook.name = name.to_string();
                    }
                    return Ok(playbook);
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Err(RuntimeError::PlaybookNotFound(name.to_string()))
    }
}
