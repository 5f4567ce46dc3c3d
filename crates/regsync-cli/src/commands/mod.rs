pub mod common;
pub mod completions;
pub mod config;
pub mod list;
pub mod runs;
pub mod show;
pub mod status;
pub mod sync;
