// Anti-regex module - regex-based message filtering with per-user
// escalation. Pure domain logic; storage, invite resolution and moderation
// actions are injected behind traits.

pub mod attempt_cache;
pub mod regex_models;
pub mod regex_service;

pub use regex_models::*;
pub use regex_service::{
    ActionError, ActionExecutor, AttemptStore, InviteResolver, RegexError, RegexService, RuleStore,
};
