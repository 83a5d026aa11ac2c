/// Story — the root aggregate: passages, metadata, config and helpers.
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::rc::Rc;
use thiserror::Error;

use super::config::{ConfigError, StoryConfig};
use super::helpers::{HelperContext, HelperError, HelperSet};
use super::passage::{unescape_html, Passage, PassageId, PassageQuery};

/// Reserved passage names.
pub const HEADER_PASSAGE: &str = "HEADER";
pub const FOOTER_PASSAGE: &str = "FOOTER";
pub const CONFIG_PASSAGE: &str = "CONFIG";

#[derive(Debug, Error)]
pub enum StoryError {
    #[error("duplicate passage id: {0}")]
    DuplicatePassageId(PassageId),
    #[error("duplicate passage name: {0}")]
    DuplicatePassageName(String),
    #[error("start passage {0} does not exist")]
    MissingStartPassage(PassageId),
    #[error("no start passage set")]
    NoStartPassage,
    #[error("config passage error: {0}")]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("JSON deserialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// On-disk shape of a story.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryData {
    pub name: String,
    pub start: PassageId,
    #[serde(default)]
    pub ifid: Option<String>,
    #[serde(default)]
    pub creator: Option<String>,
    #[serde(default)]
    pub creator_version: Option<String>,
    pub passages: Vec<PassageData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassageData {
    pub id: PassageId,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub source: String,
}

/// A loaded story. Immutable once built; the mutable variable bag and
/// navigation state live in the engine that plays it.
///
/// Clones share the passage table and helpers.
#[derive(Debug, Clone)]
pub struct Story {
    pub name: String,
    pub ifid: Option<String>,
    pub creator: Option<String>,
    pub creator_version: Option<String>,
    start: PassageId,
    passages: Rc<BTreeMap<PassageId, Passage>>,
    by_name: Rc<FxHashMap<String, PassageId>>,
    config: StoryConfig,
    helpers: Rc<HelperSet>,
}

impl Story {
    pub fn builder(name: impl Into<String>) -> StoryBuilder {
        StoryBuilder {
            name: name.into(),
            ifid: None,
            creator: None,
            creator_version: None,
            start: None,
            passages: Vec::new(),
            seed: 0,
            helpers: HelperSet::new(),
        }
    }

    /// Build a story from its data form with built-in helpers only.
    pub fn from_data(data: StoryData) -> Result<Story, StoryError> {
        Self::builder_from_data(data).build()
    }

    /// A builder preloaded from data, so callers can add helpers.
    pub fn builder_from_data(data: StoryData) -> StoryBuilder {
        let mut builder = Story::builder(data.name).start(data.start);
        builder.ifid = data.ifid;
        builder.creator = data.creator;
        builder.creator_version = data.creator_version;
        for p in data.passages {
            builder = builder.passage(Passage::new(p.id, p.name, p.tags, p.source));
        }
        builder
    }

    /// Load a story from a RON file.
    pub fn load_from_ron(path: &Path) -> Result<Story, StoryError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    /// Parse a story from a RON string.
    pub fn parse_ron(input: &str) -> Result<Story, StoryError> {
        let data: StoryData = ron::from_str(input)?;
        Self::from_data(data)
    }

    /// Parse a story from a JSON string (same shape as the RON form).
    pub fn parse_json(input: &str) -> Result<Story, StoryError> {
        let data: StoryData = serde_json::from_str(input)?;
        Self::from_data(data)
    }

    pub fn start(&self) -> PassageId {
        self.start
    }

    pub fn passage(&self, id: PassageId) -> Option<&Passage> {
        self.passages.get(&id)
    }

    pub fn passage_by_name(&self, name: &str) -> Option<&Passage> {
        self.by_name.get(name).and_then(|id| self.passages.get(id))
    }

    pub fn resolve(&self, query: &PassageQuery) -> Option<&Passage> {
        match query {
            PassageQuery::Id(id) => self.passage(*id),
            PassageQuery::Name(name) => self.passage_by_name(name),
        }
    }

    /// Passages in id order.
    pub fn passages(&self) -> impl Iterator<Item = &Passage> {
        self.passages.values()
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn header(&self) -> Option<&Passage> {
        self.passage_by_name(HEADER_PASSAGE)
    }

    pub fn footer(&self) -> Option<&Passage> {
        self.passage_by_name(FOOTER_PASSAGE)
    }

    pub fn config(&self) -> &StoryConfig {
        &self.config
    }

    pub fn helpers(&self) -> &HelperSet {
        &self.helpers
    }
}

/// Builder for constructing a `Story`.
pub struct StoryBuilder {
    name: String,
    ifid: Option<String>,
    creator: Option<String>,
    creator_version: Option<String>,
    start: Option<PassageId>,
    passages: Vec<Passage>,
    seed: u64,
    helpers: HelperSet,
}

impl StoryBuilder {
    pub fn start(mut self, id: PassageId) -> Self {
        self.start = Some(id);
        self
    }

    pub fn ifid(mut self, ifid: impl Into<String>) -> Self {
        self.ifid = Some(ifid.into());
        self
    }

    pub fn creator(mut self, creator: impl Into<String>, version: impl Into<String>) -> Self {
        self.creator = Some(creator.into());
        self.creator_version = Some(version.into());
        self
    }

    pub fn passage(mut self, passage: Passage) -> Self {
        self.passages.push(passage);
        self
    }

    /// Seed for the built-in `either` helper.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Register a story-defined helper. Replaces a built-in of the same name.
    pub fn helper<F>(mut self, name: impl Into<String>, helper: F) -> Self
    where
        F: Fn(&mut HelperContext<'_>, &[serde_json::Value]) -> Result<serde_json::Value, HelperError>
            + 'static,
    {
        self.helpers.register(name, helper);
        self
    }

    pub fn build(self) -> Result<Story, StoryError> {
        let start = self.start.ok_or(StoryError::NoStartPassage)?;

        let mut passages = BTreeMap::new();
        let mut by_name = FxHashMap::default();
        for passage in self.passages {
            if passages.contains_key(&passage.id) {
                return Err(StoryError::DuplicatePassageId(passage.id));
            }
            if by_name.contains_key(&passage.name) {
                return Err(StoryError::DuplicatePassageName(passage.name));
            }
            by_name.insert(passage.name.clone(), passage.id);
            passages.insert(passage.id, passage);
        }

        if !passages.contains_key(&start) {
            return Err(StoryError::MissingStartPassage(start));
        }

        let mut config = StoryConfig::default();
        if let Some(id) = by_name.get(CONFIG_PASSAGE) {
            if let Some(passage) = passages.get(id) {
                config.merge_toml(&unescape_html(&passage.source))?;
            }
        }

        let mut helpers = HelperSet::with_builtins(self.seed);
        helpers.merge(self.helpers);

        Ok(Story {
            name: self.name,
            ifid: self.ifid,
            creator: self.creator,
            creator_version: self.creator_version,
            start,
            passages: Rc::new(passages),
            by_name: Rc::new(by_name),
            config,
            helpers: Rc::new(helpers),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(id: u32, name: &str, source: &str) -> Passage {
        Passage::new(PassageId(id), name, Vec::<String>::new(), source)
    }

    #[test]
    fn lookup_by_id_and_name() {
        let story = Story::builder("Cave")
            .start(PassageId(1))
            .passage(passage(1, "Start", "hello"))
            .passage(passage(2, "Room", "room"))
            .build()
            .unwrap();
        assert_eq!(story.passage(PassageId(2)).unwrap().name, "Room");
        assert_eq!(story.passage_by_name("Start").unwrap().id, PassageId(1));
        assert!(story.passage_by_name("room").is_none());
        assert_eq!(
            story.resolve(&PassageQuery::from("Room")).map(|p| p.id),
            Some(PassageId(2))
        );
        assert_eq!(story.len(), 2);
    }

    #[test]
    fn duplicate_names_rejected() {
        let err = Story::builder("Cave")
            .start(PassageId(1))
            .passage(passage(1, "Start", ""))
            .passage(passage(2, "Start", ""))
            .build()
            .unwrap_err();
        assert!(matches!(err, StoryError::DuplicatePassageName(name) if name == "Start"));
    }

    #[test]
    fn duplicate_ids_rejected() {
        let err = Story::builder("Cave")
            .start(PassageId(1))
            .passage(passage(1, "A", ""))
            .passage(passage(1, "B", ""))
            .build()
            .unwrap_err();
        assert!(matches!(err, StoryError::DuplicatePassageId(PassageId(1))));
    }

    #[test]
    fn missing_start_rejected() {
        let err = Story::builder("Cave")
            .start(PassageId(9))
            .passage(passage(1, "A", ""))
            .build()
            .unwrap_err();
        assert!(matches!(err, StoryError::MissingStartPassage(PassageId(9))));
    }

    #[test]
    fn meta_passages_found() {
        let story = Story::builder("Cave")
            .start(PassageId(1))
            .passage(passage(1, "Start", ""))
            .passage(passage(2, "HEADER", "top"))
            .passage(passage(3, "CONFIG", "darkTheme = true\nstylesheets = [&quot;a.css&quot;]"))
            .build()
            .unwrap();
        assert_eq!(story.header().unwrap().id, PassageId(2));
        assert!(story.footer().is_none());
        assert!(story.config().dark_theme);
        assert_eq!(story.config().stylesheets, vec!["a.css".to_string()]);
    }

    #[test]
    fn bad_config_passage_is_error() {
        let err = Story::builder("Cave")
            .start(PassageId(1))
            .passage(passage(1, "Start", ""))
            .passage(passage(2, "CONFIG", "darkTheme = "))
            .build()
            .unwrap_err();
        assert!(matches!(err, StoryError::Config(_)));
    }

    #[test]
    fn parse_ron_story() {
        let story = Story::parse_ron(
            r#"(
                name: "Tiny",
                start: 1,
                passages: [
                    (id: 1, name: "Start", tags: ["checkpoint"], source: "[[Go->Room]]"),
                    (id: 2, name: "Room", source: "A room."),
                ],
            )"#,
        )
        .unwrap();
        assert_eq!(story.name, "Tiny");
        assert_eq!(story.start(), PassageId(1));
        assert!(story.passage(PassageId(1)).unwrap().is_checkpoint());
        assert!(story.passage(PassageId(2)).unwrap().tags.is_empty());
    }

    #[test]
    fn parse_json_story() {
        let story = Story::parse_json(
            r#"{
                "name": "Tiny",
                "start": 2,
                "ifid": "ABC",
                "passages": [
                    {"id": 1, "name": "Room", "source": "A room."},
                    {"id": 2, "name": "Start", "tags": ["checkpoint"], "source": "[[Go->Room]]"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(story.start(), PassageId(2));
        assert_eq!(story.ifid.as_deref(), Some("ABC"));
        assert_eq!(story.passage_by_name("Room").unwrap().id, PassageId(1));
    }

    #[test]
    fn clones_share_passages() {
        let story = Story::builder("Cave")
            .start(PassageId(1))
            .passage(passage(1, "Start", "hello"))
            .build()
            .unwrap();
        let copy = story.clone();
        assert!(std::ptr::eq(
            story.passage(PassageId(1)).unwrap(),
            copy.passage(PassageId(1)).unwrap()
        ));
    }

    #[test]
    fn story_helpers_override_builtins() {
        let story = Story::builder("Cave")
            .start(PassageId(1))
            .passage(passage(1, "Start", ""))
            .helper("either", |_, _| Ok(serde_json::Value::from("fixed")))
            .helper("has_item", |_, _| Ok(serde_json::Value::Bool(false)))
            .build()
            .unwrap();
        assert!(story.helpers().contains("has_item"));
        assert!(story.helpers().contains("visited"));
    }
}
