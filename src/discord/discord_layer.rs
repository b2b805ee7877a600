// Discord layer - commands and event handlers.

#[path = "antiregex/mod.rs"]
pub mod antiregex;

#[path = "paged/mod.rs"]
pub mod paged;

// Re-export command types for convenience
pub use antiregex::commands::{Data, Error};
