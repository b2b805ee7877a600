// Discord adapters for the paged UI engine.

pub mod ui;

pub use ui::SerenityPagedTransport;
