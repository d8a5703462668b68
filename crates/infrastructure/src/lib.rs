//! 外部协作方的具体实现：远端后端客户端、设备本地存储、日志与指标初始化

pub mod database;
pub mod observability;
pub mod rest;

pub use database::*;
pub use observability::*;
pub use rest::*;
