//! 配置管理
//!
//! 配置按以下顺序加载，后者覆盖前者：
//! 1. 内置默认值（各配置段的 `Default` 实现）
//! 2. TOML 配置文件
//! 3. 环境变量（前缀 `TASKBEAT`，层级分隔符 `__`，例如 `TASKBEAT_BEAT__REFRESH_INTERVAL_SECONDS=10`）
//!
//! 加载完成后统一调用 [`AppConfig::validate`]。

pub mod models;

pub use models::*;
