pub mod config;
pub mod helpers;
pub mod passage;
pub mod save;
pub mod story;
