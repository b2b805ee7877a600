// Formatter module - the embedded template language used for match and
// moderation messages. Follows the same module pattern as antiregex.

pub mod format_value;
pub mod registry;
pub mod template;

pub use format_value::{ChannelContext, FormatValue, UserContext};
pub use registry::FormatterRegistry;
pub use template::Formatter;
