pub mod execution_tracker;
pub mod handlers;
pub mod record_writer;
pub mod service;

pub use execution_tracker::{ExecutionTracker, RecordCommand};
pub use handlers::{FnHandler, HandlerRegistry, TaskError, TaskHandler};
pub use record_writer::RecordWriter;
pub use service::{ExecutionOutcome, WorkerService};
