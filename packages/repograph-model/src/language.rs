//! Language abstraction

use serde::{Deserialize, Serialize};

/// Languages the pipeline routes to per-language parsers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    C,
    Cpp,
    Java,
    Go,
    CSharp,
    TypeScript,
    JavaScript,
    Python,
    Jsp,
    Xml,
}

impl Language {
    pub fn name(&self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Java => "java",
            Language::Go => "go",
            Language::CSharp => "csharp",
            Language::TypeScript => "typescript",
            Language::JavaScript => "javascript",
            Language::Python => "python",
            Language::Jsp => "jsp",
            Language::Xml => "xml",
        }
    }

    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Language::C => &["c", "h"],
            Language::Cpp => &["cpp", "cc", "cxx", "hpp", "hh"],
            Language::Java => &["java"],
            Language::Go => &["go"],
            Language::CSharp => &["cs"],
            Language::TypeScript => &["ts", "tsx"],
            Language::JavaScript => &["js", "jsx", "mjs"],
            Language::Python => &["py", "pyi"],
            Language::Jsp => &["jsp"],
            Language::Xml => &["xml"],
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "c" | "h" => Some(Language::C),
            "cpp" | "cc" | "cxx" | "hpp" | "hh" => Some(Language::Cpp),
            "java" => Some(Language::Java),
            "go" => Some(Language::Go),
            "cs" => Some(Language::CSharp),
            "ts" | "tsx" => Some(Language::TypeScript),
            "js" | "jsx" | "mjs" => Some(Language::JavaScript),
            "py" | "pyi" => Some(Language::Python),
            "jsp" => Some(Language::Jsp),
            "xml" => Some(Language::Xml),
            _ => None,
        }
    }

    pub fn from_file_path(path: &str) -> Option<Self> {
        path.rsplit('.').next().and_then(Self::from_extension)
    }

    /// Every extension any supported language claims
    pub fn all_extensions() -> impl Iterator<Item = &'static str> {
        const ALL: &[Language] = &[
            Language::C,
            Language::Cpp,
            Language::Java,
            Language::Go,
            Language::CSharp,
            Language::TypeScript,
            Language::JavaScript,
            Language::Python,
            Language::Jsp,
            Language::Xml,
        ];
        ALL.iter().flat_map(|l| l.extensions().iter().copied())
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
