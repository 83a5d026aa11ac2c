//! Passage Engine — a runtime for hypertext interactive fiction.
//!
//! A story is a set of named passages. Each passage is a template that
//! expands against the player's variables, then renders to HTML with
//! `[[links]]` to other passages. The engine tracks where the player has
//! been, marks checkpoints, saves and restores progress, and mirrors
//! progress into browser-style back/forward history.

pub mod core;
pub mod schema;
