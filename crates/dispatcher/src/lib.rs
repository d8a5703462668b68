//! 调度端：区域分组评分与包裹分配

pub mod error;
pub mod scorer;
pub mod service;

pub use error::*;
pub use scorer::*;
pub use service::*;
