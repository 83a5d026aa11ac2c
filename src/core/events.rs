/// Lifecycle notifications — advisory hooks around engine operations.
use std::cell::RefCell;
use std::rc::Rc;

use crate::schema::passage::{PassageId, PassageQuery};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    GoToPassageBefore { query: PassageQuery },
    GoToPassageAfter { passage: PassageId },
    ShowPassageBefore { query: PassageQuery },
    ShowPassageAfter { passage: PassageId },
    CheckpointBefore { name: String },
    CheckpointAfter { name: String },
    SaveBefore,
    SaveAfter,
    RestoreBefore,
    RestoreAfter,
    RestoreFailed { reason: String },
    ResetBefore,
    ResetAfter,
}

impl EngineEvent {
    /// Stable event name, e.g. `goToPassage:before`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::GoToPassageBefore { .. } => "goToPassage:before",
            Self::GoToPassageAfter { .. } => "goToPassage:after",
            Self::ShowPassageBefore { .. } => "showPassage:before",
            Self::ShowPassageAfter { .. } => "showPassage:after",
            Self::CheckpointBefore { .. } => "checkpoint:before",
            Self::CheckpointAfter { .. } => "checkpoint:after",
            Self::SaveBefore => "save:before",
            Self::SaveAfter => "save:after",
            Self::RestoreBefore => "restore:before",
            Self::RestoreAfter => "restore:after",
            Self::RestoreFailed { .. } => "restore:failed",
            Self::ResetBefore => "reset:before",
            Self::ResetAfter => "reset:after",
        }
    }
}

/// Receives engine notifications. Observers cannot affect the operation.
pub trait EngineObserver {
    fn notify(&mut self, event: &EngineEvent);
}

impl<F> EngineObserver for F
where
    F: FnMut(&EngineEvent),
{
    fn notify(&mut self, event: &EngineEvent) {
        self(event)
    }
}

/// An observer that records every event. Clones share the same log, so a
/// host can keep one handle and give the other to the engine.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Rc<RefCell<Vec<EngineEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.borrow().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.borrow().iter().map(EngineEvent::name).collect()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

impl EngineObserver for EventLog {
    fn notify(&mut self, event: &EngineEvent) {
        self.events.borrow_mut().push(event.clone());
    }
}
