pub mod database;
pub mod error_handling;
pub mod in_memory_queue;

pub use database::*;
pub use in_memory_queue::PriorityQueueFabric;
