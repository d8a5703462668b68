pub mod app_config;
pub mod backend;
pub mod dispatcher_courier;
pub mod observability;
pub mod scoring;

pub use app_config::*;
pub use backend::*;
pub use dispatcher_courier::*;
pub use observability::*;
pub use scoring::*;
