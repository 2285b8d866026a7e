//! Knowledge sources: a file or an in-memory text, with a version that
//! increases when the content changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::Result;

/// Where the content comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    File { path: PathBuf },
    Text,
}

/// A loadable knowledge document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeSource {
    identifier: String,
    kind: SourceKind,
    content: Option<String>,
    version: u32,
    last_updated: Option<DateTime<Utc>>,
    versioning: bool,
}

impl KnowledgeSource {
    /// Source backed by a file; the path is its identifier.
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            identifier: path.display().to_string(),
            kind: SourceKind::File { path },
            content: None,
            version: 1,
            last_updated: None,
            versioning: true,
        }
    }

    /// Source backed by a string.
    pub fn from_text(identifier: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            kind: SourceKind::Text,
            content: Some(text.into()),
            version: 1,
            last_updated: Some(Utc::now()),
            versioning: true,
        }
    }

    /// Disable version bumps on reload.
    pub fn without_versioning(mut self) -> Self {
        self.versioning = false;
        self
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn kind(&self) -> &SourceKind {
        &self.kind
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    /// Tag naming the source kind.
    pub fn kind_tag(&self) -> &'static str {
        match self.kind {
            SourceKind::File { .. } => "file_source",
            SourceKind::Text => "text_source",
        }
    }

    /// Short display name (file name for files).
    pub fn display_name(&self) -> String {
        match &self.kind {
            SourceKind::File { path } => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.identifier.clone()),
            SourceKind::Text => self.identifier.clone(),
        }
    }

    /// Load the current content.
    ///
    /// For files, a reload bumps the version when the file was modified
    /// after the previous load.
    pub fn load(&mut self) -> Result<&str> {
        if let SourceKind::File { path } = &self.kind {
            let modified: DateTime<Utc> = std::fs::metadata(path)?.modified()?.into();
            let content = std::fs::read_to_string(path)?;

            if self.versioning && self.content.is_some() {
                if let Some(last) = self.last_updated {
                    if modified > last {
                        self.version += 1;
                        info!(source = %self.identifier, version = self.version, "Source modified, bumped version");
                    }
                }
            }

            self.content = Some(content);
            self.last_updated = Some(Utc::now().max(modified));
            debug!(source = %self.identifier, version = self.version, "Loaded knowledge source");
        }

        Ok(self.content.as_deref().unwrap_or_default())
    }

    /// Replace the content of a text source, bumping the version when it
    /// differs.
    pub fn update_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if self.content.as_deref() == Some(text.as_str()) {
            return;
        }
        if self.versioning && self.content.is_some() {
            self.version += 1;
        }
        self.content = Some(text);
        self.last_updated = Some(Utc::now());
    }
}
