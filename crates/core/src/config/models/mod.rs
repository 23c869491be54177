pub mod app_config;
pub mod beat_worker;
pub mod database;
pub mod router_queue;
pub mod seed_task;

// Re-export main types for easier imports
pub use app_config::AppConfig;
pub use beat_worker::{BeatConfig, WorkerConfig};
pub use database::DatabaseConfig;
pub use router_queue::{QueueConfig, RouterConfig};
pub use seed_task::SeedTaskConfig;
