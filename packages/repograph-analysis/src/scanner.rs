//! Repository file scanner.
//!
//! Depth-first walk with ignore globs applied at every depth, extension
//! filtering, and optional content hashing on the rayon pool. Symlinks are
//! never followed, so cycles cannot occur.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use walkdir::WalkDir;

use repograph_model::{FileInfo, Language, SourceType};

use crate::build::ProjectStructure;
use crate::error::{AnalyzerError, Result};

/// Directories that never contain indexable sources
const DEFAULT_IGNORES: &[&str] = &[
    "**/.git",
    "**/.svn",
    "**/.gradle",
    "**/.idea",
    "**/node_modules",
    "**/target",
    "**/build",
    "**/out",
    "**/dist",
    "**/vendor",
];

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Lowercased extensions (without the dot) to keep
    pub allowed_extensions: HashSet<String>,
    /// Glob patterns; a matching directory prunes its subtree, a matching
    /// file is skipped
    pub ignore_globs: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: Language::all_extensions().map(str::to_string).collect(),
            ignore_globs: DEFAULT_IGNORES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Walks a directory tree into [`FileInfo`] records
pub struct FileScanner {
    config: ScannerConfig,
    ignore: GlobSet,
}

impl FileScanner {
    pub fn new(config: ScannerConfig) -> Result<Self> {
        if config.allowed_extensions.is_empty() {
            return Err(AnalyzerError::Config(
                "scanner needs at least one allowed extension".into(),
            ));
        }
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.ignore_globs {
            let glob = Glob::new(pattern).map_err(|e| {
                AnalyzerError::Config(format!("bad ignore glob {:?}: {}", pattern, e))
            })?;
            builder.add(glob);
        }
        let ignore = builder
            .build()
            .map_err(|e| AnalyzerError::Config(format!("ignore globs: {}", e)))?;
        Ok(Self { config, ignore })
    }

    /// Scan without hashes
    pub fn scan(&self, root: &Path) -> Result<Vec<FileInfo>> {
        if !root.is_dir() {
            return Err(AnalyzerError::Config(format!(
                "scan root is not a directory: {}",
                root.display()
            )));
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(root).follow_links(false).into_iter();
        let walker = walker.filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            let rel = match entry.path().strip_prefix(root) {
                Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
                Err(_) => return true,
            };
            !self.ignore.is_match(rel.as_str())
        });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("scan: skipping unreadable entry: {}", err);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = match entry.path().strip_prefix(root) {
                Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };
            let size = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(err) => {
                    warn!("scan: cannot stat {}: {}", rel, err);
                    continue;
                }
            };
            let info = FileInfo::new(entry.path().to_path_buf(), rel, size);
            if self.config.allowed_extensions.contains(&info.extension) {
                files.push(info);
            }
        }

        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        debug!("scanned {} files under {}", files.len(), root.display());
        Ok(files)
    }

    /// Scan and compute content hashes in parallel.
    ///
    /// Files that cannot be read are dropped (logged, pipeline continues).
    pub fn scan_with_hashes(&self, root: &Path) -> Result<Vec<FileInfo>> {
        let files = self.scan(root)?;
        let mut hashed: Vec<FileInfo> = files
            .into_par_iter()
            .filter_map(|mut info| match fs::read(&info.absolute_path) {
                Ok(bytes) => {
                    info.content_hash = Some(content_hash(&bytes));
                    Some(info)
                }
                Err(err) => {
                    warn!(
                        "hash: skipping {}: {}",
                        info.absolute_path.display(),
                        err
                    );
                    None
                }
            })
            .collect();
        hashed.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(hashed)
    }
}

/// SHA-256 hex digest of file content
pub fn content_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Enrich scanned files with module ownership by longest-prefix match on
/// module roots, then classify each file's source set.
pub fn enrich_with_modules(files: &mut [FileInfo], structure: &ProjectStructure) {
    for file in files.iter_mut() {
        let mut best: Option<&crate::build::ModuleInfo> = None;
        for module in &structure.modules {
            let root = module.relative_path.as_str();
            let matches = root.is_empty()
                || file.relative_path == root
                || file
                    .relative_path
                    .starts_with(&format!("{}/", root));
            if matches
                && best.map_or(true, |b| root.len() >= b.relative_path.len())
            {
                best = Some(module);
            }
        }

        let Some(module) = best else {
            continue;
        };
        let root_len = module.relative_path.len();

        let module_relative = if root_len == 0 {
            file.relative_path.clone()
        } else {
            file.relative_path[root_len..]
                .trim_start_matches('/')
                .to_string()
        };

        file.source_type = classify_source_type(&module_relative, module);
        file.module_name = Some(module.name.clone());
        file.module_relative_path = Some(module_relative);
    }
}

fn classify_source_type(
    module_relative: &str,
    module: &crate::build::ModuleInfo,
) -> SourceType {
    let in_any = |dirs: &[String]| {
        dirs.iter().any(|d| {
            module_relative == d.as_str()
                || module_relative.starts_with(&format!("{}/", d))
        })
    };

    if in_any(&module.build.test_dirs) || module_relative.starts_with("src/test/") {
        SourceType::Test
    } else if in_any(&module.build.resource_dirs)
        || module_relative.starts_with("src/main/resources/")
        || module_relative.starts_with("resources/")
    {
        SourceType::Resource
    } else if in_any(&module.build.source_dirs)
        || module_relative.starts_with("src/main/")
        || module_relative.starts_with("src/")
    {
        SourceType::Main
    } else {
        SourceType::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{BuildFileResult, BuildSystemKind, ModuleInfo, ModuleKind};
    use std::fs;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn scanner() -> FileScanner {
        FileScanner::new(ScannerConfig::default()).unwrap()
    }

    #[test]
    fn test_scan_filters_extensions_and_ignores() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/A.java", "class A {}");
        write(dir.path(), "src/notes.txt", "notes");
        write(dir.path(), "node_modules/dep/index.js", "x");
        write(dir.path(), "build/Gen.java", "class Gen {}");

        let files = scanner().scan(dir.path()).unwrap();
        let rels: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(rels, vec!["src/A.java"]);
    }

    #[test]
    fn test_ignore_applies_at_any_depth() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a/b/node_modules/x/y.js", "x");
        write(dir.path(), "a/b/c.js", "x");

        let files = scanner().scan(dir.path()).unwrap();
        let rels: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(rels, vec!["a/b/c.js"]);
    }

    #[test]
    fn test_scan_with_hashes() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "A.java", "class A {}");
        write(dir.path(), "B.java", "class B {}");

        let files = scanner().scan_with_hashes(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        let a = files.iter().find(|f| f.relative_path == "A.java").unwrap();
        let b = files.iter().find(|f| f.relative_path == "B.java").unwrap();
        assert!(a.content_hash.is_some());
        assert_ne!(a.content_hash, b.content_hash);

        // Identical content hashes identically
        assert_eq!(content_hash(b"class A {}"), a.content_hash.clone().unwrap());
    }

    #[test]
    fn test_bad_glob_is_config_error() {
        let config = ScannerConfig {
            ignore_globs: vec!["[".to_string()],
            ..ScannerConfig::default()
        };
        assert!(matches!(
            FileScanner::new(config),
            Err(AnalyzerError::Config(_))
        ));
    }

    fn two_module_structure() -> ProjectStructure {
        let module = |name: &str, rel: &str| ModuleInfo {
            name: name.to_string(),
            relative_path: rel.to_string(),
            kind: ModuleKind::JavaLibrary,
            build: BuildFileResult::default(),
        };
        ProjectStructure {
            build_system: BuildSystemKind::Gradle,
            root_project_name: "demo".to_string(),
            modules: vec![module("core", "core"), module("core:api", "core/api")],
            module_dependencies: Default::default(),
        }
    }

    #[test]
    fn test_module_enrichment_longest_prefix() {
        let mut files = vec![
            FileInfo::new("/r/core/src/main/java/A.java".into(), "core/src/main/java/A.java", 1),
            FileInfo::new("/r/core/api/src/test/java/B.java".into(), "core/api/src/test/java/B.java", 1),
            FileInfo::new("/r/README.xml".into(), "README.xml", 1),
        ];
        enrich_with_modules(&mut files, &two_module_structure());

        assert_eq!(files[0].module_name.as_deref(), Some("core"));
        assert_eq!(
            files[0].module_relative_path.as_deref(),
            Some("src/main/java/A.java")
        );
        assert_eq!(files[0].source_type, SourceType::Main);

        // Nested module wins over its parent
        assert_eq!(files[1].module_name.as_deref(), Some("core:api"));
        assert_eq!(files[1].source_type, SourceType::Test);

        assert_eq!(files[2].module_name, None);
    }
}
