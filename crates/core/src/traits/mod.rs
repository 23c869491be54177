pub mod clock;
pub mod hooks;
pub mod message_queue;
pub mod repository;

pub use clock::*;
pub use hooks::*;
pub use message_queue::*;
pub use repository::*;
