//! lamina-common — shared plumbing for the Lamina workspace.
//!
//! Holds the workspace error type, the confined HTTP client every
//! network-facing component goes through, and the `lamina.toml`
//! configuration model.

pub mod config;
pub mod error;
pub mod net;

pub use error::{LaminaError, Result};
