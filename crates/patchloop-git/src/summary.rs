//! Repository summary handed to the generator on the first iteration.

use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use std::path::Path;

const DEFAULT_MAX_FILES: usize = 400;

/// Type of project detected
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    Rust,
    Node,
    Python,
    Go,
    Unknown,
}

impl std::fmt::Display for ProjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectType::Rust => write!(f, "Rust"),
            ProjectType::Node => write!(f, "Node.js"),
            ProjectType::Python => write!(f, "Python"),
            ProjectType::Go => write!(f, "Go"),
            ProjectType::Unknown => write!(f, "Unknown"),
        }
    }
}

impl ProjectType {
    pub fn detect(root: &Path) -> Self {
        if root.join("Cargo.toml").exists() {
            ProjectType::Rust
        } else if root.join("package.json").exists() {
            ProjectType::Node
        } else if ["pyproject.toml", "setup.py", "requirements.txt"]
            .iter()
            .any(|f| root.join(f).exists())
        {
            ProjectType::Python
        } else if root.join("go.mod").exists() {
            ProjectType::Go
        } else {
            ProjectType::Unknown
        }
    }

    /// Conventional test command, used when none is configured
    pub fn default_test_command(&self) -> Option<&'static str> {
        match self {
            ProjectType::Rust => Some("cargo test"),
            ProjectType::Node => Some("npm test"),
            ProjectType::Python => Some("python -m pytest"),
            ProjectType::Go => Some("go test ./..."),
            ProjectType::Unknown => None,
        }
    }
}

const KEY_FILES: &[(&str, &str)] = &[
    ("Cargo.toml", "Rust project manifest"),
    ("package.json", "Node.js project manifest"),
    ("tsconfig.json", "TypeScript configuration"),
    ("pyproject.toml", "Python project manifest"),
    ("requirements.txt", "Python dependencies"),
    ("go.mod", "Go module definition"),
    ("Makefile", "Build automation"),
    ("README.md", "Project documentation"),
    ("src/main.rs", "Rust application entry point"),
    ("src/lib.rs", "Rust library entry point"),
    ("src/index.ts", "TypeScript entry point"),
    ("src/index.js", "JavaScript entry point"),
    ("main.go", "Go entry point"),
];

/// A gitignore-aware view of a repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoSummary {
    pub project_type: ProjectType,
    /// `(path, description)` of recognized manifest and entry files
    pub key_files: Vec<(String, String)>,
    /// Relative file paths, sorted
    pub files: Vec<String>,
    /// More files existed than were listed
    pub truncated: bool,
}

impl RepoSummary {
    pub fn scan(root: &Path) -> Self {
        Self::scan_with_limit(root, DEFAULT_MAX_FILES)
    }

    pub fn scan_with_limit(root: &Path, max_files: usize) -> Self {
        let mut files: Vec<String> = WalkBuilder::new(root)
            .hidden(true)
            .require_git(false)
            .build()
            .flatten()
            .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
            .filter_map(|entry| {
                entry
                    .path()
                    .strip_prefix(root)
                    .ok()
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
            })
            .collect();
        files.sort();

        let truncated = files.len() > max_files;
        files.truncate(max_files);

        let key_files = KEY_FILES
            .iter()
            .filter(|(path, _)| root.join(path).exists())
            .map(|(path, desc)| (path.to_string(), desc.to_string()))
            .collect();

        Self {
            project_type: ProjectType::detect(root),
            key_files,
            files,
            truncated,
        }
    }

    /// Plain-text form for prompts
    pub fn render(&self) -> String {
        let mut parts = vec![format!("Type: {}", self.project_type)];

        if !self.key_files.is_empty() {
            parts.push("Key Files:".to_string());
            for (path, desc) in &self.key_files {
                parts.push(format!("  - {}: {}", path, desc));
            }
        }

        parts.push("Files:".to_string());
        for file in &self.files {
            parts.push(format!("  {}", file));
        }
        if self.truncated {
            parts.push("  ... (more files omitted)".to_string());
        }

        parts.join("\n")
    }
}
