//! # Taskbeat Testing Utils
//!
//! 供工作区内各 crate 共用的测试工具：
//!
//! - **内存仓储**: 任务定义与执行记录仓储的内存实现，可注入失败
//! - **内存消息队列**: 记录所有投递消息，可模拟投递失败
//! - **手动时钟**: 可前进的确定性时钟
//! - **测试数据构建器**: 快速创建任务定义与任务消息
//!
//! ```toml
//! [dev-dependencies]
//! taskbeat-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod mocks;

pub use builders::*;
pub use mocks::*;
