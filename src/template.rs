//! Template lookup over an ordered list of directories.
//!
//! Templates are read from disk on every call, so edits take effect without
//! a restart and a missing template keeps failing until it appears.

use crate::config::TemplateConfig;
use crate::error::{BusError, Result};
use crate::xpath::XPathElement;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resolves template names against the configured load paths.
#[derive(Debug, Clone, Default)]
pub struct TemplateStore {
    load_paths: Vec<PathBuf>,
}

impl TemplateStore {
    pub fn new(load_paths: Vec<PathBuf>) -> Self {
        Self { load_paths }
    }

    pub fn from_config(config: &TemplateConfig) -> Self {
        Self::new(config.load_paths.clone())
    }

    pub fn load_paths(&self) -> &[PathBuf] {
        &self.load_paths
    }

    /// First existing file named `filename` under the load paths.
    pub fn resolve(&self, filename: &str) -> Option<PathBuf> {
        self.load_paths
            .iter()
            .map(|dir| dir.join(filename))
            .find(|path| path.is_file())
    }

    /// Read the template `filename`.
    pub fn load(&self, filename: &str) -> Result<String> {
        let path = self
            .resolve(filename)
            .ok_or_else(|| BusError::TemplateNotFound {
                filename: filename.to_string(),
                search_path: self.load_paths.clone(),
            })?;
        debug!(template = filename, path = %path.display(), "Loading template");
        read_template(&path)
    }

    /// Read and parse the template `filename`.
    pub fn load_document(&self, filename: &str) -> Result<XPathElement<'static>> {
        XPathElement::parse(&self.load(filename)?)
    }
}

fn read_template(path: &Path) -> Result<String> {
    Ok(std::fs::read_to_string(path)?)
}
