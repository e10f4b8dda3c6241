//! farm-server — HTTP control API for the render-farm coordinator.
//!
//! Thin JSON-REST surface over `farm_core::control::FarmControlApi`, for the
//! operator UI and the re-render hook to call remotely. Routes:
//!   GET/POST   /api/pools
//!   DELETE     /api/pools/:pool_id
//!   GET/POST   /api/jobs
//!   GET/DELETE /api/jobs/:job_id
//!   POST       /api/jobs/:job_id/{exclude,activate,pause,priority,move,reset,rerender}
//!   GET        /api/jobs/:job_id/{progress,eye-progress}
//!   GET        /api/workers

pub mod error;
pub mod routes;
pub mod state;
