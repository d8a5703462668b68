//! 快递员设备端：离线变更队列、新分配提醒、会话管理与扫码处理

pub mod alert;
pub mod error;
pub mod notifier;
pub mod offline_queue;
pub mod scan;
pub mod session;

pub use alert::TracingAlertSink;
pub use error::{CourierError, CourierResult};
pub use notifier::AssignmentNotifier;
pub use offline_queue::{FlushReport, OfflineMutationQueue};
pub use scan::{ScanHandler, ScanIntent, ScanOutcome};
pub use session::{SessionEvent, SessionManager, SessionManagerBuilder};
