//! 远端后端（PostgREST 风格 REST 接口）

mod change_feed;
pub mod client;
mod rows;

pub use client::RestBackend;
