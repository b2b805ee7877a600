// Paged module - interactive paginated lists with per-session actor tasks.

pub mod paged_manager;
pub mod paged_result;

pub use paged_manager::{PagedError, PagedEvent, PagedManager, PagedTransport};
pub use paged_result::{NavControls, PagePayload, PagedResult};
