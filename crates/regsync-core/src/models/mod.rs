//! Data models for regsync

mod conflict;
mod device;
mod entry;
mod sync_run;

pub use conflict::{ConflictKind, SyncConflict};
pub use device::{ActivityFilter, Device, DeviceState, RegistryCounts};
pub use entry::{IncomingBatch, IncomingEntry};
pub use sync_run::{NotificationStatus, SyncRun, SyncStats};
