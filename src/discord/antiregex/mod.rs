// Discord adapters for the anti-regex engine: commands, the message-check
// dispatcher and the side-effect executors.

pub mod commands;
pub mod executor;
pub mod message_handler;
