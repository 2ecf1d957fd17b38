use patchloop_patch::{ChangeSet, FileChange};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const BLOCK_OPEN: &str = "<response>";
const BLOCK_CLOSE: &str = "</response>";

/// One structured message in a generator reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GeneratorMessage {
    /// What the generator intends to change
    Plan {
        summary: String,
        #[serde(default)]
        steps: Vec<String>,
    },
    /// Concrete per-file changes
    Patches {
        #[serde(default)]
        patches: Vec<FileChange>,
    },
    /// Why the previous attempt failed
    Diagnosis {
        summary: String,
        #[serde(default)]
        root_cause: Option<String>,
        #[serde(default)]
        confidence: Option<f64>,
    },
}

/// A plan extracted from a reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub summary: String,
    pub steps: Vec<String>,
}

/// A diagnosis extracted from a reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub summary: String,
    pub root_cause: Option<String>,
    pub confidence: Option<f64>,
}

#[derive(Error, Debug)]
pub enum ReplyParseError {
    #[error("No response block or unified diff found in generator output")]
    NoResponseFound,

    #[error("Response block {index} is not valid JSON: {source}")]
    InvalidBlock {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unterminated response block at byte {0}")]
    Unterminated(usize),
}

/// The structured content of a reply
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedReply {
    pub messages: Vec<GeneratorMessage>,
}

impl ParsedReply {
    /// Parse generator output.
    ///
    /// Expected format:
    /// ```text
    /// <response>
    /// {"type": "plan", "summary": "...", "steps": ["..."]}
    /// </response>
    /// <response>
    /// {"type": "patches", "patches": [{"path": "src/lib.rs", "diff": "..."}]}
    /// </response>
    /// ```
    /// Output without response blocks is searched for raw unified diffs.
    pub fn parse(output: &str) -> Result<Self, ReplyParseError> {
        debug!(output_len = output.len(), "Parsing generator reply");

        let blocks = Self::parse_blocks(output)?;
        if !blocks.is_empty() {
            return Ok(Self { messages: blocks });
        }

        let patches = split_unified_diffs(output);
        if patches.is_empty() {
            return Err(ReplyParseError::NoResponseFound);
        }

        debug!(files = patches.len(), "Parsed raw diffs from reply");
        Ok(Self {
            messages: vec![GeneratorMessage::Patches { patches }],
        })
    }

    fn parse_blocks(output: &str) -> Result<Vec<GeneratorMessage>, ReplyParseError> {
        let mut messages = Vec::new();
        let mut rest = output;
        let mut offset = 0;

        while let Some(start) = rest.find(BLOCK_OPEN) {
            let body_start = start + BLOCK_OPEN.len();
            let Some(len) = rest[body_start..].find(BLOCK_CLOSE) else {
                return Err(ReplyParseError::Unterminated(offset + start));
            };

            let body = patchloop_patch::strip_code_fence(rest[body_start..body_start + len].trim());
            let message = serde_json::from_str(body.trim()).map_err(|source| {
                ReplyParseError::InvalidBlock {
                    index: messages.len(),
                    source,
                }
            })?;
            messages.push(message);

            let consumed = body_start + len + BLOCK_CLOSE.len();
            offset += consumed;
            rest = &rest[consumed..];
        }

        Ok(messages)
    }

    pub fn plan(&self) -> Option<Plan> {
        self.messages.iter().find_map(|m| match m {
            GeneratorMessage::Plan { summary, steps } => Some(Plan {
                summary: summary.clone(),
                steps: steps.clone(),
            }),
            _ => None,
        })
    }

    pub fn diagnosis(&self) -> Option<Diagnosis> {
        self.messages.iter().find_map(|m| match m {
            GeneratorMessage::Diagnosis {
                summary,
                root_cause,
                confidence,
            } => Some(Diagnosis {
                summary: summary.clone(),
                root_cause: root_cause.clone(),
                confidence: *confidence,
            }),
            _ => None,
        })
    }

    /// All patches across every Patches message, in reply order
    pub fn change_set(&self) -> ChangeSet {
        self.messages
            .iter()
            .filter_map(|m| match m {
                GeneratorMessage::Patches { patches } => Some(patches.iter().cloned()),
                _ => None,
            })
            .flatten()
            .collect::<Vec<_>>()
            .into()
    }
}

/// A generator reply, keeping the raw text next to the parse result
#[derive(Debug)]
pub struct GeneratorReply {
    pub raw: String,
    pub parsed: Result<ParsedReply, ReplyParseError>,
}

impl GeneratorReply {
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let parsed = ParsedReply::parse(&raw);
        Self { raw, parsed }
    }

    pub fn from_messages(messages: Vec<GeneratorMessage>) -> Self {
        Self {
            raw: String::new(),
            parsed: Ok(ParsedReply { messages }),
        }
    }

    pub fn is_malformed(&self) -> bool {
        self.parsed.is_err()
    }

    pub fn parse_error(&self) -> Option<String> {
        self.parsed.as_ref().err().map(|e| e.to_string())
    }

    pub fn plan(&self) -> Option<Plan> {
        self.parsed.as_ref().ok().and_then(ParsedReply::plan)
    }

    pub fn diagnosis(&self) -> Option<Diagnosis> {
        self.parsed.as_ref().ok().and_then(ParsedReply::diagnosis)
    }

    /// The proposed changes, empty when the reply could not be parsed
    pub fn change_set(&self) -> ChangeSet {
        self.parsed
            .as_ref()
            .map(ParsedReply::change_set)
            .unwrap_or_default()
    }
}

/// Split raw multi-file unified diff text into one change per `+++ b/<path>` file
fn split_unified_diffs(output: &str) -> Vec<FileChange> {
    let lines: Vec<&str> = output.lines().collect();
    let mut changes = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];

        let starts_file = line.starts_with("--- ")
            && lines.get(i + 1).is_some_and(|next| next.starts_with("+++ "));

        if starts_file || line.starts_with("diff --git ") || line.starts_with("```") {
            if let Some((path, body)) = current.take() {
                changes.push(FileChange::new(path, body.join("\n") + "\n"));
            }
        }

        if starts_file {
            let new_side = lines[i + 1][4..].split('\t').next().unwrap_or("").trim();
            if new_side != "/dev/null" {
                let path = new_side.strip_prefix("b/").unwrap_or(new_side).to_string();
                current = Some((path, vec![line, lines[i + 1]]));
            }
            i += 2;
            continue;
        }

        if let Some((_, body)) = current.as_mut() {
            body.push(line);
        }
        i += 1;
    }

    if let Some((path, body)) = current {
        changes.push(FileChange::new(path, body.join("\n") + "\n"));
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_plan_and_patches() {
        let output = r#"
I will add the function.

<response>
{"type": "plan", "summary": "Add greet()", "steps": ["write function", "export it"]}
</response>

<response>
```json
{"type": "patches", "patches": [{"path": "src/lib.rs", "diff": "@@ -0,0 +1 @@\n+pub fn greet() {}\n"}]}
```
</response>
"#;
        let reply = ParsedReply::parse(output).unwrap();
        let plan = reply.plan().unwrap();
        assert_eq!(plan.summary, "Add greet()");
        assert_eq!(plan.steps.len(), 2);

        let changes = reply.change_set();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes.paths(), vec![PathBuf::from("src/lib.rs").as_path()]);
    }

    #[test]
    fn test_parse_diagnosis() {
        let output = r#"<response>{"type": "diagnosis", "summary": "off by one", "root_cause": "loop bound", "confidence": 0.6}</response>"#;
        let diagnosis = ParsedReply::parse(output).unwrap().diagnosis().unwrap();
        assert_eq!(diagnosis.summary, "off by one");
        assert_eq!(diagnosis.root_cause.as_deref(), Some("loop bound"));
    }

    #[test]
    fn test_invalid_block_is_reported() {
        let output = "<response>{\"type\": \"plan\", oops}</response>";
        assert!(matches!(
            ParsedReply::parse(output),
            Err(ReplyParseError::InvalidBlock { index: 0, .. })
        ));
    }

    #[test]
    fn test_unterminated_block_is_reported() {
        let output = "prefix <response>{\"type\": \"plan\"";
        assert!(matches!(
            ParsedReply::parse(output),
            Err(ReplyParseError::Unterminated(7))
        ));
    }

    #[test]
    fn test_raw_diffs_are_split_per_file() {
        let output = "\
Here are the changes:
```diff
diff --git a/a.txt b/a.txt
--- a/a.txt
+++ b/a.txt
@@ -1 +1 @@
-x
+y
--- a/dir/b.txt
+++ b/dir/b.txt
@@ -0,0 +1 @@
+new
```
";
        let changes = ParsedReply::parse(output).unwrap().change_set();
        assert_eq!(changes.len(), 2);
        let files: Vec<_> = changes.iter().collect();
        assert_eq!(files[0].path, PathBuf::from("a.txt"));
        assert_eq!(
            files[0].text,
            "--- a/a.txt\n+++ b/a.txt\n@@ -1 +1 @@\n-x\n+y\n"
        );
        assert_eq!(files[1].path, PathBuf::from("dir/b.txt"));
        assert_eq!(
            files[1].text,
            "--- a/dir/b.txt\n+++ b/dir/b.txt\n@@ -0,0 +1 @@\n+new\n"
        );
    }

    #[test]
    fn test_prose_only_is_malformed() {
        let reply = GeneratorReply::parse("I could not figure it out.");
        assert!(reply.is_malformed());
        assert!(reply.change_set().is_empty());
        assert!(reply.plan().is_none());
    }
}
