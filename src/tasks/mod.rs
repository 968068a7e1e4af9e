//! Background maintenance: directory sync, transformation protection,
//! traffic logging.

pub mod dir_sync;
pub mod protector;
pub mod traffic_log;

pub use dir_sync::{DirectorySync, SyncSettings};
pub use protector::TransformationProtector;
pub use traffic_log::TrafficLogger;
