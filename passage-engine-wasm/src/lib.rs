//! WASM bindings for passage-engine — plays a story in the browser.
//!
//! Saves go to `window.localStorage` and progress is mirrored into
//! `window.history`. The host page renders the HTML this binding hands
//! back, forwards clicks on `.passage-link` elements to `activate_link`,
//! and forwards `popstate` events to `pop`.

use wasm_bindgen::prelude::*;

use passage_engine::core::display::Screen;
use passage_engine::core::history::{BrowserHistory, HistoryError};
use passage_engine::core::navigation::StoryEngine;
use passage_engine::core::persistence::{KeyValueStore, StoreError};
use passage_engine::schema::passage::PassageId;
use passage_engine::schema::save::HistoryPayload;
use passage_engine::schema::story::Story;

// ---------------------------------------------------------------------------
// Browser globals
// ---------------------------------------------------------------------------
#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(catch, js_namespace = localStorage, js_name = getItem)]
    fn local_storage_get(key: &str) -> Result<Option<String>, JsValue>;

    #[wasm_bindgen(catch, js_namespace = localStorage, js_name = setItem)]
    fn local_storage_set(key: &str, value: &str) -> Result<(), JsValue>;

    #[wasm_bindgen(catch, js_namespace = localStorage, js_name = removeItem)]
    fn local_storage_remove(key: &str) -> Result<(), JsValue>;

    #[wasm_bindgen(catch, js_namespace = history, js_name = pushState)]
    fn history_push_state(state: &str, title: &str) -> Result<(), JsValue>;

    #[wasm_bindgen(catch, js_namespace = history, js_name = replaceState)]
    fn history_replace_state(state: &str, title: &str) -> Result<(), JsValue>;
}

fn unavailable(e: JsValue) -> StoreError {
    StoreError::Unavailable(e.as_string().unwrap_or_else(|| format!("{e:?}")))
}

/// `window.localStorage`.
pub struct WebStorage;

impl KeyValueStore for WebStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        local_storage_get(key).map_err(unavailable)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        local_storage_set(key, value).map_err(unavailable)
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        local_storage_remove(key).map_err(unavailable)
    }
}

fn rejected(e: JsValue) -> HistoryError {
    HistoryError::Rejected(e.as_string().unwrap_or_else(|| format!("{e:?}")))
}

/// `window.history`. Payloads travel as JSON strings.
pub struct WebHistory;

impl BrowserHistory for WebHistory {
    fn push_entry(&mut self, payload: HistoryPayload) -> Result<(), HistoryError> {
        history_push_state(&payload.to_json()?, "").map_err(rejected)
    }

    fn replace_entry(&mut self, payload: HistoryPayload) -> Result<(), HistoryError> {
        history_replace_state(&payload.to_json()?, "").map_err(rejected)
    }
}

// ---------------------------------------------------------------------------
// StoryPlayer — the main exported struct
// ---------------------------------------------------------------------------
#[wasm_bindgen]
pub struct StoryPlayer {
    engine: StoryEngine<WebStorage, WebHistory, Screen>,
}

#[wasm_bindgen]
impl StoryPlayer {
    /// Load a story from its JSON form.
    #[wasm_bindgen(constructor)]
    pub fn new(story_json: &str) -> Result<StoryPlayer, JsError> {
        let story = Story::parse_json(story_json)
            .map_err(|e| JsError::new(&format!("Story load error: {e}")))?;
        Ok(StoryPlayer {
            engine: StoryEngine::new(story, WebStorage, WebHistory, Screen::new()),
        })
    }

    /// Restore the saved game, or start from the beginning.
    pub fn play(&mut self) -> Result<(), JsError> {
        self.engine
            .play()
            .map_err(|e| JsError::new(&format!("Play error: {e}")))
    }

    /// Navigate to a passage by name.
    pub fn go_to(&mut self, name: &str) -> Result<(), JsError> {
        self.engine
            .go_to_passage(name, true)
            .map_err(|e| JsError::new(&format!("Navigation error: {e}")))
    }

    pub fn go_to_id(&mut self, id: u32) -> Result<(), JsError> {
        self.engine
            .go_to_passage(PassageId(id), true)
            .map_err(|e| JsError::new(&format!("Navigation error: {e}")))
    }

    /// Follow a clicked link, given its `data-passage` attribute.
    pub fn activate_link(&mut self, target: &str) -> Result<(), JsError> {
        self.engine
            .activate_link(target)
            .map_err(|e| JsError::new(&format!("Navigation error: {e}")))
    }

    /// Render a passage without navigating. Returns its HTML.
    pub fn show(&mut self, name: &str) -> Result<String, JsError> {
        self.engine
            .show_passage(name)
            .map(|rendered| rendered.html)
            .map_err(|e| JsError::new(&format!("Render error: {e}")))
    }

    pub fn save(&mut self) -> Result<(), JsError> {
        self.engine
            .save()
            .map_err(|e| JsError::new(&format!("Save error: {e}")))
    }

    /// Returns `false` when there was nothing usable to restore.
    pub fn restore(&mut self) -> bool {
        self.engine.restore().is_ok()
    }

    /// Delete the saved game.
    pub fn reset(&mut self) -> Result<(), JsError> {
        self.engine
            .reset()
            .map_err(|e| JsError::new(&format!("Reset error: {e}")))
    }

    /// Handle a `popstate` event. `state` is `event.state`.
    pub fn pop(&mut self, state: Option<String>) -> Result<(), JsError> {
        let payload = state
            .map(|s| HistoryPayload::from_json(&s))
            .transpose()
            .map_err(|e| JsError::new(&format!("Invalid history state: {e}")))?;
        self.engine
            .handle_pop(payload)
            .map_err(|e| JsError::new(&format!("Navigation error: {e}")))
    }

    pub fn passage_html(&self) -> String {
        self.engine.display().passage_html().to_string()
    }

    pub fn header_html(&self) -> Option<String> {
        self.engine.display().header.as_ref().map(|p| p.html.clone())
    }

    pub fn footer_html(&self) -> Option<String> {
        self.engine.display().footer.as_ref().map(|p| p.html.clone())
    }

    /// Document title, set when a checkpoint is reached.
    pub fn title(&self) -> String {
        self.engine
            .display()
            .title
            .clone()
            .unwrap_or_else(|| self.engine.story().name.clone())
    }

    pub fn passage_name(&self) -> Option<String> {
        self.engine.current_passage().map(|p| p.name.clone())
    }

    pub fn checkpoint_name(&self) -> String {
        self.engine.checkpoint_name().to_string()
    }

    pub fn dark_theme(&self) -> bool {
        self.engine.display().dark_theme
    }

    /// Return JSON array of stylesheet URLs to load.
    pub fn stylesheets(&self) -> String {
        serde_json::to_string(&self.engine.display().stylesheets)
            .unwrap_or_else(|_| "[]".to_string())
    }

    /// Return the story's effective config as JSON.
    pub fn config(&self) -> String {
        self.engine.story().config().to_json().to_string()
    }

    /// Return the player's variables as JSON.
    pub fn state(&self) -> String {
        serde_json::to_string(self.engine.state()).unwrap_or_else(|_| "{}".to_string())
    }

    /// Return JSON array of visited passage ids.
    pub fn history(&self) -> String {
        serde_json::to_string(self.engine.history()).unwrap_or_else(|_| "[]".to_string())
    }
}
