//! Services shared by regsync front ends

mod registry;

pub use registry::{RegistryService, SyncOutcome};
