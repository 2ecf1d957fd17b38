use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// What an artifact holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Log,
    Diff,
    Screenshot,
    Report,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Log => "log",
            ArtifactKind::Diff => "diff",
            ArtifactKind::Screenshot => "screenshot",
            ArtifactKind::Report => "report",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a saved artifact lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    /// First 12 hex chars of the content's SHA-256
    pub digest: String,
    pub size: u64,
}

pub trait ArtifactStore: Send + Sync {
    fn save(
        &self,
        task_id: &str,
        kind: ArtifactKind,
        name: &str,
        content: &[u8],
    ) -> io::Result<ArtifactRef>;
}

/// Artifacts stored as files under `<root>/<task-id>/<kind>/<name>`
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn task_dir(&self, task_id: &str) -> PathBuf {
        self.root.join(sanitize(task_id))
    }
}

impl ArtifactStore for FsArtifactStore {
    fn save(
        &self,
        task_id: &str,
        kind: ArtifactKind,
        name: &str,
        content: &[u8],
    ) -> io::Result<ArtifactRef> {
        let dir = self.task_dir(task_id).join(kind.as_str());
        fs::create_dir_all(&dir)?;

        let mut hasher = Sha256::new();
        hasher.update(content);
        let digest = hex::encode(hasher.finalize())[..12].to_string();

        let file_name = match sanitize(name) {
            n if n.is_empty() => format!("{}-{}", kind, digest),
            n => n,
        };
        let path = dir.join(file_name);
        fs::write(&path, content)?;

        tracing::debug!(task_id, kind = %kind, path = %path.display(), "Saved artifact");

        Ok(ArtifactRef {
            kind,
            path,
            digest,
            size: content.len() as u64,
        })
    }
}

/// Reduce a name to a single safe path component
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();
    cleaned.trim_start_matches('.').to_string()
}
