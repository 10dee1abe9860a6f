//! Sources of included template text.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

/// Supplies the source text of templates named by `{% include %}`.
///
/// `Ok(None)` means the template does not exist. Errors are I/O failures
/// while looking it up.
#[async_trait]
pub trait IncludeLoader: Send + Sync {
    async fn load(&self, name: &str) -> io::Result<Option<String>>;
}

#[async_trait]
impl IncludeLoader for BTreeMap<String, String> {
    async fn load(&self, name: &str) -> io::Result<Option<String>> {
        Ok(self.get(name).cloned())
    }
}

#[async_trait]
impl IncludeLoader for HashMap<String, String> {
    async fn load(&self, name: &str) -> io::Result<Option<String>> {
        Ok(self.get(name).cloned())
    }
}

/// Loads includes from files under a root directory.
///
/// Names are relative paths (`partials/header.njk`); names that are absolute
/// or climb out of the root with `..` are treated as missing.
#[derive(Debug, Clone)]
pub struct FsIncludeLoader {
    root: PathBuf,
}

impl FsIncludeLoader {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> Option<PathBuf> {
        let relative = Path::new(name);
        relative
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
            .then(|| self.root.join(relative))
    }
}

#[async_trait]
impl IncludeLoader for FsIncludeLoader {
    async fn load(&self, name: &str) -> io::Result<Option<String>> {
        let Some(path) = self.resolve(name) else {
            debug!("Rejecting include outside template root: {}", name);
            return Ok(None);
        };

        match tokio::fs::read_to_string(&path).await {
            Ok(source) => {
                debug!("Loaded include {} from {:?}", name, path);
                Ok(Some(source))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("Include {} not found at {:?}", name, path);
                Ok(None)
            }
            Err(err) => {
                warn!("Failed to read include {} from {:?}: {}", name, path, err);
                Err(err)
            }
        }
    }
}
