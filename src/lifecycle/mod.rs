//! Process lifecycle: shutdown coordination and OS signals.

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
