//! Repository scope supplied by the caller

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Scopes one analysis to a single repository; all produced entities are
/// reachable from the repository's root node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryContext {
    pub repository_id: String,
    pub repository_name: String,
    pub repository_url: Option<String>,
    pub root_directory: PathBuf,
}

impl RepositoryContext {
    pub fn new(
        repository_id: impl Into<String>,
        repository_name: impl Into<String>,
        root_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            repository_id: repository_id.into(),
            repository_name: repository_name.into(),
            repository_url: None,
            root_directory: root_directory.into(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.repository_url = Some(url.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new() {
        let ctx = RepositoryContext::new("r1", "my-repo", "/tmp/repo");
        assert_eq!(ctx.repository_id, "r1");
        assert_eq!(ctx.repository_url, None);
        assert_eq!(ctx.root_directory, PathBuf::from("/tmp/repo"));
    }

    #[test]
    fn test_with_url() {
        let ctx = RepositoryContext::new("r1", "my-repo", "/tmp/repo")
            .with_url("https://example.com/my-repo.git");
        assert_eq!(
            ctx.repository_url.as_deref(),
            Some("https://example.com/my-repo.git")
        );
    }
}
