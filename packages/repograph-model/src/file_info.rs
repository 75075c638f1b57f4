//! File metadata produced by the scanner

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which source set a file belongs to within its module
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Main,
    Test,
    Resource,
    #[default]
    Other,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Main => "main",
            SourceType::Test => "test",
            SourceType::Resource => "resource",
            SourceType::Other => "other",
        }
    }
}

/// A scanned source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub absolute_path: PathBuf,
    /// Path relative to the scan root, `/`-separated
    pub relative_path: String,
    /// Lowercased extension without the dot
    pub extension: String,
    pub size: u64,
    /// SHA-256 of the file content, hex; present after `scan_with_hashes`
    pub content_hash: Option<String>,
    /// Module enrichment (longest-prefix match on module roots)
    pub module_name: Option<String>,
    pub module_relative_path: Option<String>,
    pub source_type: SourceType,
}

impl FileInfo {
    pub fn new(absolute_path: PathBuf, relative_path: impl Into<String>, size: u64) -> Self {
        let relative_path = relative_path.into();
        let extension = std::path::Path::new(&relative_path)
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        Self {
            absolute_path,
            relative_path,
            extension,
            size,
            content_hash: None,
            module_name: None,
            module_relative_path: None,
            source_type: SourceType::Other,
        }
    }

    /// Absolute path as a string key (index state, checkpoints, store)
    pub fn path_key(&self) -> String {
        self.absolute_path.to_string_lossy().into_owned()
    }
}
