/// Serialized forms of engine progress: save records and history payloads.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::passage::PassageId;

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("malformed save record: {0}")]
    Json(#[from] serde_json::Error),
    #[error("save record has an empty history")]
    EmptyHistory,
}

/// The free-form variable bag shared by all passage templates.
pub type StateBag = Map<String, Value>;

/// What gets written to persistent storage on `save()`.
///
/// JSON shape: `{ "state": {..}, "history": [1, 2], "currentCheckpoint": "" }`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveRecord {
    pub state: StateBag,
    pub history: Vec<PassageId>,
    pub current_checkpoint: String,
}

impl SaveRecord {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a stored record. Missing fields and an empty history are both
    /// structural errors.
    pub fn from_json(input: &str) -> Result<SaveRecord, SaveError> {
        let record: SaveRecord = serde_json::from_str(input)?;
        if record.history.is_empty() {
            return Err(SaveError::EmptyHistory);
        }
        Ok(record)
    }

    pub fn last_passage(&self) -> Option<PassageId> {
        self.history.last().copied()
    }
}

/// The opaque state handed to the browser history adapter on every
/// navigation, and handed back on back/forward.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPayload {
    pub state: StateBag,
    pub history: Vec<PassageId>,
    pub checkpoint_name: String,
}

impl HistoryPayload {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(input: &str) -> Result<HistoryPayload, serde_json::Error> {
        serde_json::from_str(input)
    }
}
