//! # Common Components
//!
//! Shared data structures used by the client, the development control plane
//! and the binaries.
//!
//! ## Modules
//!
//! - [`messages`]: Wire types for jobs, requests and encrypted outputs
//! - [`config`]: Configuration parsing utilities

pub mod config;
pub mod messages;
