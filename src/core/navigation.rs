/// Navigation & checkpoint engine — where the player is, how they got
/// there, and how that round-trips through saves and browser history.
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::compiler::{PassageCompiler, RenderedPassage};
use crate::core::display::{DisplaySink, Screen};
use crate::core::eval::Scope;
use crate::core::events::{EngineEvent, EngineObserver};
use crate::core::history::{BrowserHistory, HistoryError, MemoryHistory};
use crate::core::persistence::{KeyValueStore, MemoryStore, PersistenceError, SaveSlot};
use crate::core::template::TemplateError;
use crate::schema::passage::{Passage, PassageId, PassageQuery, CHECKPOINT_TAG};
use crate::schema::save::{HistoryPayload, SaveRecord, StateBag};
use crate::schema::story::Story;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no passage found with ID or name \"{0}\"")]
    PassageNotFound(PassageQuery),
    #[error("template error: {0}")]
    Template(#[from] TemplateError),
    #[error("restore failed: {0}")]
    RestoreFailed(String),
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("browser history error: {0}")]
    History(#[from] HistoryError),
    #[error("history entry carries an empty passage history")]
    EmptyHistory,
}

/// Where the player is and how they got there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationState {
    /// Visited passage ids; the last one is on screen.
    pub history: Vec<PassageId>,
    /// Empty when no checkpoint has been reached.
    pub checkpoint_name: String,
    /// Set when a checkpoint was reached and not yet left.
    pub at_checkpoint: bool,
    /// State as it was before the current passage rendered. Saves record
    /// this, so a restore re-running the passage lands on the live state.
    pub entry_state: StateBag,
}

impl Default for NavigationState {
    fn default() -> Self {
        Self::new()
    }
}

impl NavigationState {
    /// A fresh session counts as being at a checkpoint.
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
            checkpoint_name: String::new(),
            at_checkpoint: true,
            entry_state: StateBag::new(),
        }
    }

    pub fn current(&self) -> Option<PassageId> {
        self.history.last().copied()
    }
}

/// Whether the engine has shown anything yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Displaying(PassageId),
}

/// How a navigation is recorded in browser history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryAction {
    /// A new save-relevant beat: add a back-stack frame.
    Push,
    /// An intermediate step: fold into the current frame.
    Replace,
}

/// Push when leaving a checkpoint or entering one, replace otherwise.
pub fn history_action(entered_tags: &[String], at_checkpoint: bool) -> HistoryAction {
    if at_checkpoint || entered_tags.iter().any(|t| t == CHECKPOINT_TAG) {
        HistoryAction::Push
    } else {
        HistoryAction::Replace
    }
}

/// How `navigate` records the move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recording {
    Decide,
    /// Re-displaying a popped entry; pushing would drop the forward stack.
    ReplaceOnly,
}

/// Everything a navigation renders, computed before anything is committed.
struct Frame {
    passage: RenderedPassage,
    header: Option<RenderedPassage>,
    footer: Option<RenderedPassage>,
}

pub struct StoryEngine<S = MemoryStore, H = MemoryHistory, D = Screen> {
    story: Story,
    nav: NavigationState,
    state: StateBag,
    compiler: PassageCompiler,
    slot: SaveSlot<S>,
    browser: H,
    display: D,
    observers: Vec<Box<dyn EngineObserver>>,
}

impl StoryEngine {
    /// An engine with in-memory storage, history and display.
    pub fn in_memory(story: Story) -> Self {
        StoryEngine::new(story, MemoryStore::new(), MemoryHistory::new(), Screen::new())
    }
}

impl<S, H, D> StoryEngine<S, H, D>
where
    S: KeyValueStore,
    H: BrowserHistory,
    D: DisplaySink,
{
    pub fn new(story: Story, store: S, browser: H, display: D) -> Self {
        let slot = SaveSlot::new(store, &story.name);
        Self {
            story,
            nav: NavigationState::new(),
            state: StateBag::new(),
            compiler: PassageCompiler::default(),
            slot,
            browser,
            display,
            observers: Vec::new(),
        }
    }

    pub fn with_compiler(mut self, compiler: PassageCompiler) -> Self {
        self.compiler = compiler;
        self
    }

    pub fn with_observer(mut self, observer: impl EngineObserver + 'static) -> Self {
        self.add_observer(observer);
        self
    }

    pub fn add_observer(&mut self, observer: impl EngineObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    // -- accessors ---------------------------------------------------------

    pub fn story(&self) -> &Story {
        &self.story
    }

    pub fn state(&self) -> &StateBag {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut StateBag {
        &mut self.state
    }

    pub fn navigation(&self) -> &NavigationState {
        &self.nav
    }

    pub fn history(&self) -> &[PassageId] {
        &self.nav.history
    }

    pub fn checkpoint_name(&self) -> &str {
        &self.nav.checkpoint_name
    }

    pub fn at_checkpoint(&self) -> bool {
        self.nav.at_checkpoint
    }

    pub fn phase(&self) -> Phase {
        match self.nav.current() {
            Some(id) => Phase::Displaying(id),
            None => Phase::Idle,
        }
    }

    pub fn current_passage(&self) -> Option<&Passage> {
        self.nav.current().and_then(|id| self.story.passage(id))
    }

    /// The passage visited before the current one.
    pub fn previous_passage(&self) -> Option<PassageId> {
        let len = self.nav.history.len();
        if len < 2 {
            return None;
        }
        Some(self.nav.history[len - 2])
    }

    /// Always `None`: forward history is not tracked, so there is no redo.
    pub fn next_passage(&self) -> Option<PassageId> {
        None
    }

    pub fn save_key(&self) -> &str {
        self.slot.key()
    }

    pub fn store(&self) -> &S {
        self.slot.store()
    }

    pub fn store_mut(&mut self) -> &mut S {
        self.slot.store_mut()
    }

    pub fn browser(&self) -> &H {
        &self.browser
    }

    pub fn browser_mut(&mut self) -> &mut H {
        &mut self.browser
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn display_mut(&mut self) -> &mut D {
        &mut self.display
    }

    // -- operations ----------------------------------------------------------

    /// Start the session: restore a save if one loads, otherwise show the
    /// start passage.
    pub fn play(&mut self) -> Result<(), EngineError> {
        self.display.apply_config(self.story.config());

        let has_save = self.slot.exists().unwrap_or_else(|e| {
            warn!(key = self.slot.key(), error = %e, "could not check for save data");
            false
        });
        if has_save && self.restore().is_ok() {
            return Ok(());
        }

        info!(story = %self.story.name, "starting at the beginning");
        self.go_to_passage(self.story.start(), true)?;
        self.nav.at_checkpoint = true;
        Ok(())
    }

    pub fn go_to_passage(
        &mut self,
        query: impl Into<PassageQuery>,
        add_to_history: bool,
    ) -> Result<(), EngineError> {
        self.go_to(query.into(), add_to_history, Recording::Decide)
    }

    /// Follow an internal link by its target passage name.
    pub fn activate_link(&mut self, target: &str) -> Result<(), EngineError> {
        self.go_to_passage(target, true)
    }

    /// Render a passage without navigating to it.
    pub fn show_passage(
        &mut self,
        query: impl Into<PassageQuery>,
    ) -> Result<RenderedPassage, EngineError> {
        let query = query.into();
        self.notify(EngineEvent::ShowPassageBefore {
            query: query.clone(),
        });

        let passage = self
            .story
            .resolve(&query)
            .ok_or(EngineError::PassageNotFound(query))?;
        let mut working = self.state.clone();
        let rendered = self.compiler.render(&mut Scope {
            passage,
            story: &self.story,
            state: &mut working,
            history: &self.nav.history,
            checkpoint: &self.nav.checkpoint_name,
        })?;
        self.state = working;

        self.notify(EngineEvent::ShowPassageAfter {
            passage: rendered.passage,
        });
        Ok(rendered)
    }

    /// Mark the current position as a checkpoint.
    pub fn checkpoint(&mut self, name: &str) {
        self.notify(EngineEvent::CheckpointBefore {
            name: name.to_string(),
        });
        debug!(checkpoint = name, "checkpoint reached");
        let title = format!("{}: {}", self.story.name, name);
        self.display.set_title(&title);
        self.nav.checkpoint_name = name.to_string();
        self.nav.at_checkpoint = true;
        self.notify(EngineEvent::CheckpointAfter {
            name: name.to_string(),
        });
    }

    pub fn save(&mut self) -> Result<(), EngineError> {
        self.notify(EngineEvent::SaveBefore);
        let record = SaveRecord {
            state: self.nav.entry_state.clone(),
            history: self.nav.history.clone(),
            current_checkpoint: self.nav.checkpoint_name.clone(),
        };
        self.slot.save(&record)?;
        info!(key = self.slot.key(), passages = record.history.len(), "saved");
        self.notify(EngineEvent::SaveAfter);
        Ok(())
    }

    /// Load the save record and re-display its last passage. On failure
    /// the engine is left exactly as it was.
    pub fn restore(&mut self) -> Result<(), EngineError> {
        self.notify(EngineEvent::RestoreBefore);
        match self.try_restore() {
            Ok(()) => {
                info!(key = self.slot.key(), "restored");
                self.notify(EngineEvent::RestoreAfter);
                Ok(())
            }
            Err(reason) => {
                warn!(key = self.slot.key(), %reason, "restore failed");
                self.notify(EngineEvent::RestoreFailed {
                    reason: reason.clone(),
                });
                Err(EngineError::RestoreFailed(reason))
            }
        }
    }

    /// Delete the save record. Live state is untouched.
    pub fn reset(&mut self) -> Result<(), EngineError> {
        self.notify(EngineEvent::ResetBefore);
        self.slot.clear()?;
        info!(key = self.slot.key(), "save data cleared");
        self.notify(EngineEvent::ResetAfter);
        Ok(())
    }

    /// Handle a back/forward move reported by the browser history.
    pub fn handle_pop(&mut self, popped: Option<HistoryPayload>) -> Result<(), EngineError> {
        match popped {
            Some(payload) => {
                let last = payload.history.last().copied().ok_or(EngineError::EmptyHistory)?;
                debug!(passage = %last, "adopting popped history entry");
                let saved = (self.nav.clone(), std::mem::take(&mut self.state));
                self.state = payload.state;
                self.nav.history = payload.history;
                self.nav.checkpoint_name = payload.checkpoint_name;
                if let Err(e) = self.go_to(PassageQuery::Id(last), false, Recording::ReplaceOnly) {
                    (self.nav, self.state) = saved;
                    return Err(e);
                }
                Ok(())
            }
            None if self.nav.history.is_empty() => {
                debug!("popped to pre-story entry with no history; starting over");
                self.state = StateBag::new();
                self.nav.history.clear();
                self.nav.checkpoint_name.clear();
                self.go_to_passage(self.story.start(), true)
            }
            None => Ok(()),
        }
    }

    // -- internals -----------------------------------------------------------

    fn try_restore(&mut self) -> Result<(), String> {
        let record = self.slot.load().map_err(|e| e.to_string())?;
        let last = record
            .last_passage()
            .ok_or_else(|| "save record has an empty history".to_string())?;

        let saved = (self.nav.clone(), self.state.clone());
        self.state = record.state;
        self.nav.history = record.history;
        self.nav.checkpoint_name = record.current_checkpoint;
        if let Err(e) = self.go_to_passage(last, false) {
            (self.nav, self.state) = saved;
            return Err(e.to_string());
        }
        Ok(())
    }

    fn go_to(
        &mut self,
        query: PassageQuery,
        add_to_history: bool,
        recording: Recording,
    ) -> Result<(), EngineError> {
        self.notify(EngineEvent::GoToPassageBefore {
            query: query.clone(),
        });

        let passage = self
            .story
            .resolve(&query)
            .ok_or(EngineError::PassageNotFound(query))?;
        let id = passage.id;
        let entering_checkpoint = passage.is_checkpoint();
        let name = passage.name.clone();
        let action = match recording {
            Recording::Decide => history_action(&passage.tags, self.nav.at_checkpoint),
            Recording::ReplaceOnly => HistoryAction::Replace,
        };

        let mut history = self.nav.history.clone();
        if add_to_history {
            history.push(id);
        }
        let checkpoint_name = if entering_checkpoint {
            name.clone()
        } else {
            self.nav.checkpoint_name.clone()
        };
        let payload = HistoryPayload {
            state: self.state.clone(),
            history: history.clone(),
            checkpoint_name: checkpoint_name.clone(),
        };

        // Render against a working copy; nothing is committed on error.
        let mut working = self.state.clone();
        let frame = self.render_frame(passage, &mut working, &history, &checkpoint_name)?;

        match action {
            HistoryAction::Push => self.browser.push_entry(payload)?,
            HistoryAction::Replace => self.browser.replace_entry(payload)?,
        }
        self.nav.history = history;
        if entering_checkpoint {
            self.checkpoint(&name);
        }
        self.nav.at_checkpoint = false;
        self.nav.entry_state = std::mem::replace(&mut self.state, working);

        self.display.show_passage(&frame.passage);
        if let Some(header) = &frame.header {
            self.display.show_header(header);
        }
        if let Some(footer) = &frame.footer {
            self.display.show_footer(footer);
        }

        debug!(passage = %id, name = %name, ?action, "navigated");
        self.notify(EngineEvent::GoToPassageAfter { passage: id });
        Ok(())
    }

    fn render_frame(
        &self,
        passage: &Passage,
        state: &mut StateBag,
        history: &[PassageId],
        checkpoint: &str,
    ) -> Result<Frame, TemplateError> {
        let mut render = |p: &Passage| {
            self.compiler.render(&mut Scope {
                passage: p,
                story: &self.story,
                state: &mut *state,
                history,
                checkpoint,
            })
        };
        let rendered = render(passage)?;
        let header = self.story.header().map(&mut render).transpose()?;
        let footer = self.story.footer().map(&mut render).transpose()?;
        Ok(Frame {
            passage: rendered,
            header,
            footer,
        })
    }

    fn notify(&mut self, event: EngineEvent) {
        for observer in &mut self.observers {
            observer.notify(&event);
        }
    }
}
