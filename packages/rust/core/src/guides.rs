//! The citation-guide folder.
//!
//! Guides are Markdown files named after a citation style. Picking the guide
//! that best fits a requested style is left to the generation capability;
//! this module only lists and reads them.

use std::path::{Path, PathBuf};

use tracing::debug;

use scholarflow_shared::{AppConfig, Result, ScholarflowError, expand_home};

#[derive(Debug, Clone)]
pub struct CitationGuides {
    dir: PathBuf,
}

impl CitationGuides {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(expand_home(&config.defaults.citation_guides_dir))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Guide names (file stems of `*.md`), sorted. A missing folder has none.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.dir.is_dir() {
            debug!(dir = %self.dir.display(), "citation guide folder not found");
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&self.dir).map_err(|e| ScholarflowError::io(&self.dir, e))?;
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "md"))
            .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Read a guide by its exact name, with or without the `.md` extension.
    pub fn read(&self, name: &str) -> Result<String> {
        let stem = name.strip_suffix(".md").unwrap_or(name);
        if stem.is_empty() || stem.contains(['/', '\\']) || stem.starts_with('.') {
            return Err(ScholarflowError::validation(format!(
                "invalid citation guide name '{name}'"
            )));
        }

        let path = self.dir.join(format!("{stem}.md"));
        if !path.is_file() {
            return Err(ScholarflowError::validation(format!(
                "citation guide '{stem}' not found in {}",
                self.dir.display()
            )));
        }
        std::fs::read_to_string(&path).map_err(|e| ScholarflowError::io(&path, e))
    }
}
