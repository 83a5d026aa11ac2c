pub mod compiler;
pub mod display;
pub mod eval;
pub mod events;
pub mod history;
pub mod link;
pub mod navigation;
pub mod persistence;
pub mod template;
