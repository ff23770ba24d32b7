//! Utility Functions
//!
//! User-friendly error formatting for the command line.
//!
//! ```rust
//! use lamco_capture_sync::utils::format_user_error;
//!
//! let error = anyhow::anyhow!("Display DP-1 unavailable after 2 attempts");
//! eprintln!("{}", format_user_error(&error));
//! ```
//!
//! Error categories with context-aware help:
//! - Config errors → Syntax validation, value ranges
//! - Encoder errors → Falling back to software, codec choice
//! - Display errors → Output name, acquisition retries

pub mod errors;

pub use errors::format_user_error;
