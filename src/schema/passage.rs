use serde::{Deserialize, Serialize};
use std::fmt;

/// Newtype wrapper for passage IDs, as assigned by the source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PassageId(pub u32);

impl fmt::Display for PassageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tag that turns entering a passage into a checkpoint.
pub const CHECKPOINT_TAG: &str = "checkpoint";

/// A named, tagged fragment of story text.
///
/// `source` is kept in its stored, entity-escaped form; it is only
/// unescaped at render time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub id: PassageId,
    pub name: String,
    pub tags: Vec<String>,
    pub source: String,
}

impl Passage {
    pub fn new(
        id: PassageId,
        name: impl Into<String>,
        tags: impl IntoIterator<Item = impl Into<String>>,
        source: impl Into<String>,
    ) -> Self {
        let mut ordered: Vec<String> = Vec::new();
        for tag in tags {
            let tag = tag.into();
            if !tag.is_empty() && !ordered.contains(&tag) {
                ordered.push(tag);
            }
        }
        Self {
            id,
            name: name.into(),
            tags: ordered,
            source: source.into(),
        }
    }

    /// Split a space-separated tag attribute into an ordered tag list.
    pub fn parse_tags(attr: &str) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        for tag in attr.split_whitespace() {
            if !tags.iter().any(|t| t == tag) {
                tags.push(tag.to_string());
            }
        }
        tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn is_checkpoint(&self) -> bool {
        self.has_tag(CHECKPOINT_TAG)
    }
}

/// How a caller names a passage: by numeric id or by exact name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PassageQuery {
    Id(PassageId),
    Name(String),
}

impl fmt::Display for PassageQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{}", id),
            Self::Name(name) => write!(f, "{}", name),
        }
    }
}

impl From<PassageId> for PassageQuery {
    fn from(id: PassageId) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for PassageQuery {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for PassageQuery {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<&String> for PassageQuery {
    fn from(name: &String) -> Self {
        Self::Name(name.clone())
    }
}

/// Decode `&amp; &lt; &gt; &quot; &#39;` in a single left-to-right pass.
pub fn unescape_html(input: &str) -> String {
    const ENTITIES: [(&str, char); 5] = [
        ("&amp;", '&'),
        ("&lt;", '<'),
        ("&gt;", '>'),
        ("&quot;", '"'),
        ("&#39;", '\''),
    ];

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        match ENTITIES.iter().find(|(entity, _)| rest.starts_with(entity)) {
            Some((entity, ch)) => {
                out.push(*ch);
                rest = &rest[entity.len()..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
