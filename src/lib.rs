pub mod app;
pub mod shutdown;

pub use app::{builtin_handlers, Application};
pub use shutdown::ShutdownManager;
