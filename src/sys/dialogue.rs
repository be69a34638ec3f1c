use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum DialogueError {
    #[error("malformed dialogue `{}`{}: {reason}", .path.display(), node_suffix(.node))]
    MalformedDialogue {
        path: PathBuf,
        node: Option<String>,
        reason: String,
    },
    #[error("unknown dialogue node `{0}`")]
    UnknownNode(String),
    #[error("invalid choice {index}: node has {available} option(s)")]
    InvalidChoice { index: usize, available: usize },
}

fn node_suffix(node: &Option<String>) -> String {
    match node {
        Some(id) => format!(" (node `{id}`)"),
        None => String::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueOption {
    pub label: String,
    pub target: String,
}

/// One authored line of an NPC plus the player's replies to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueNode {
    pub id: String,
    pub text: String,
    pub options: Vec<DialogueOption>,
}

impl DialogueNode {
    pub fn is_terminal(&self) -> bool {
        self.options.is_empty()
    }
}

// Raw document shape. Every field is optional here so that a missing field is
// reported with the node id instead of a bare serde message.
#[derive(Debug, Deserialize)]
struct RawDocument {
    entry: Option<String>,
    #[serde(default)]
    nodes: BTreeMap<String, RawNode>,
}

#[derive(Debug, Deserialize)]
struct RawNode {
    text: Option<String>,
    #[serde(default)]
    options: Vec<RawOption>,
}

#[derive(Debug, Deserialize)]
struct RawOption {
    label: Option<String>,
    target: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Toml,
    Json,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => DocumentFormat::Json,
            _ => DocumentFormat::Toml,
        }
    }
}

/// The conversation graph of one NPC. Read-only once loaded.
#[derive(Debug, Clone)]
pub struct DialogueStore {
    path: PathBuf,
    entry: Option<String>,
    nodes: BTreeMap<String, DialogueNode>,
}

impl DialogueStore {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DialogueError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| DialogueError::MalformedDialogue {
            path: path.to_path_buf(),
            node: None,
            reason: format!("cannot read file: {e}"),
        })?;
        Self::parse(&source, DocumentFormat::from_path(path), path)
    }

    /// Parse and validate a whole document. Either every node is valid and
    /// every option target resolves, or nothing is returned.
    pub fn parse(
        source: &str,
        format: DocumentFormat,
        origin: impl Into<PathBuf>,
    ) -> Result<Self, DialogueError> {
        let path = origin.into();
        let malformed = |node: Option<&str>, reason: String| DialogueError::MalformedDialogue {
            path: path.clone(),
            node: node.map(str::to_string),
            reason,
        };

        let raw: RawDocument = match format {
            DocumentFormat::Toml => toml::from_str(source).map_err(|e| malformed(None, e.to_string()))?,
            DocumentFormat::Json => {
                serde_json::from_str(source).map_err(|e| malformed(None, e.to_string()))?
            }
        };

        if raw.nodes.is_empty() {
            return Err(malformed(None, "document has no nodes".to_string()));
        }

        let mut nodes = BTreeMap::new();
        for (id, node) in &raw.nodes {
            let text = node
                .text
                .clone()
                .ok_or_else(|| malformed(Some(id.as_str()), "missing `text`".to_string()))?;

            let mut options = Vec::with_capacity(node.options.len());
            for (i, option) in node.options.iter().enumerate() {
                let label = option
                    .label
                    .clone()
                    .ok_or_else(|| malformed(Some(id.as_str()), format!("option {i} is missing `label`")))?;
                let target = option
                    .target
                    .clone()
                    .ok_or_else(|| malformed(Some(id.as_str()), format!("option {i} is missing `target`")))?;
                if !raw.nodes.contains_key(&target) {
                    return Err(malformed(
                        Some(id.as_str()),
                        format!("option {i} targets undefined node `{target}`"),
                    ));
                }
                options.push(DialogueOption { label, target });
            }

            nodes.insert(
                id.clone(),
                DialogueNode {
                    id: id.clone(),
                    text,
                    options,
                },
            );
        }

        if let Some(entry) = &raw.entry {
            if !nodes.contains_key(entry) {
                return Err(malformed(None, format!("entry `{entry}` is not a node")));
            }
        }

        log::debug!("loaded {} dialogue node(s) from {}", nodes.len(), path.display());

        Ok(Self {
            path,
            entry: raw.entry,
            nodes,
        })
    }

    pub fn get(&self, id: &str) -> Result<&DialogueNode, DialogueError> {
        self.nodes
            .get(id)
            .ok_or_else(|| DialogueError::UnknownNode(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Entry declared by the document itself, if any.
    pub fn entry(&self) -> Option<&str> {
        self.entry.as_deref()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &DialogueNode> {
        self.nodes.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRADER: &str = r#"
entry = "greeting"

[nodes.greeting]
text = "Welcome, friend!"
options = [
    { label = "What do you sell?", target = "goods" },
    { label = "Bye.", target = "farewell" },
]

[nodes.goods]
text = "Seeds and tools."
options = [{ label = "Back", target = "greeting" }]

[nodes.farewell]
text = "Safe travels."
"#;

    fn parse(source: &str) -> Result<DialogueStore, DialogueError> {
        DialogueStore::parse(source, DocumentFormat::Toml, "trader.toml")
    }

    #[test]
    fn loads_closed_graph() {
        let store = parse(TRADER).unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.entry(), Some("greeting"));
        for node in store.nodes() {
            for option in &node.options {
                assert!(store.contains(&option.target));
            }
        }
        assert!(store.get("farewell").unwrap().is_terminal());
    }

    #[test]
    fn options_keep_authored_order() {
        let store = parse(TRADER).unwrap();
        let labels: Vec<_> = store
            .get("greeting")
            .unwrap()
            .options
            .iter()
            .map(|o| o.label.as_str())
            .collect();
        assert_eq!(labels, ["What do you sell?", "Bye."]);
    }

    #[test]
    fn undefined_target_is_rejected_with_node_id() {
        let source = r#"
[nodes.start]
text = "Hi"
options = [{ label = "Go", target = "nowhere" }]
"#;
        match parse(source) {
            Err(DialogueError::MalformedDialogue { path, node, reason }) => {
                assert_eq!(path, PathBuf::from("trader.toml"));
                assert_eq!(node.as_deref(), Some("start"));
                assert!(reason.contains("nowhere"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_text_is_rejected() {
        let source = r#"
[nodes.start]
options = []
"#;
        let err = parse(source).unwrap_err();
        assert!(err.to_string().contains("node `start`"), "{err}");
        assert!(err.to_string().contains("missing `text`"), "{err}");
    }

    #[test]
    fn missing_option_label_is_rejected() {
        let source = r#"
[nodes.start]
text = "Hi"
options = [{ target = "start" }]
"#;
        let err = parse(source).unwrap_err();
        assert!(err.to_string().contains("missing `label`"), "{err}");
    }

    #[test]
    fn empty_document_is_rejected() {
        assert!(matches!(
            parse("entry = \"a\""),
            Err(DialogueError::MalformedDialogue { node: None, .. })
        ));
    }

    #[test]
    fn undefined_entry_is_rejected() {
        let source = r#"
entry = "missing"
[nodes.start]
text = "Hi"
"#;
        assert!(parse(source).is_err());
    }

    #[test]
    fn syntax_error_is_malformed() {
        assert!(matches!(
            parse("[nodes.start\ntext ="),
            Err(DialogueError::MalformedDialogue { .. })
        ));
    }

    #[test]
    fn json_documents_are_accepted() {
        let source = r#"{
            "nodes": {
                "a": { "text": "One", "options": [{ "label": "next", "target": "b" }] },
                "b": { "text": "Two" }
            }
        }"#;
        let store = DialogueStore::parse(source, DocumentFormat::Json, "npc.json").unwrap();
        assert_eq!(store.get("b").unwrap().text, "Two");
        assert_eq!(store.entry(), None);
    }

    #[test]
    fn get_unknown_node_fails() {
        let store = parse(TRADER).unwrap();
        assert!(matches!(
            store.get("shop"),
            Err(DialogueError::UnknownNode(id)) if id == "shop"
        ));
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(DocumentFormat::from_path(Path::new("a/b.JSON")), DocumentFormat::Json);
        assert_eq!(DocumentFormat::from_path(Path::new("a/b.toml")), DocumentFormat::Toml);
        assert_eq!(DocumentFormat::from_path(Path::new("a/b")), DocumentFormat::Toml);
    }
}
