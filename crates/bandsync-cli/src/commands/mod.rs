pub mod cache;
pub mod common;
pub mod completions;
pub mod config;
pub mod conflicts;
pub mod detect;
pub mod enqueue;
pub mod pending;
pub mod status;
pub mod sync;
