//! Coordination-store, claim-scheduler, and control-API library for the
//! render farm coordinator.
//!
//! `farm-worker` and `farm-server` are thin binaries over this crate: the
//! worker talks to `FrameStore` directly for the hot claim/complete/release
//! path, while the server talks through `FarmControlApi` for the operator
//! and re-render surface.

pub mod config;
pub mod control;
pub mod error;
pub mod output_path;
pub mod rerender;
pub mod scheduler;
pub mod store;
pub mod store_memory;
#[cfg(feature = "sqlite")]
pub mod store_sqlite;
pub mod types;

pub use control::{FarmControlApi, JobWithStatus};
pub use error::{FarmError, FarmResult};
pub use store::FrameStore;
