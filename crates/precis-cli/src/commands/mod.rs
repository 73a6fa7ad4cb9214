pub mod account;
pub mod common;
pub mod completions;
pub mod daemon;
pub mod sync;
