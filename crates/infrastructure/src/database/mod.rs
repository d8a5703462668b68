pub mod sqlite_device_store;

pub use sqlite_device_store::SqliteDeviceStore;
