//! lamina-web — HTTP and WebSocket surface for the acquisition pipeline.
//!
//!   - job submission, inspection, and control (pause/resume/cancel)
//!   - result enumeration and artifact retrieval
//!   - per-job progress streaming with events.log replay

pub mod handlers;
pub mod router;
pub mod state;
pub mod ws;
