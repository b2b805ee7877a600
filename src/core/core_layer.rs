// The core module contains all business logic.
// Each feature gets its own submodule.

#[path = "antiregex/mod.rs"]
pub mod antiregex;

#[path = "formatter/mod.rs"]
pub mod formatter;

#[path = "paged/mod.rs"]
pub mod paged;
