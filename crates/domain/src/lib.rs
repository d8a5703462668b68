pub mod entities;
pub mod errors;
pub mod notification;
pub mod ports;
pub mod scan;
pub mod state_machine;

pub use entities::*;
pub use errors::*;
pub use lastmile_errors::{LastMileError, LastMileResult};
pub use notification::*;
pub use ports::*;
pub use scan::*;
pub use state_machine::*;
