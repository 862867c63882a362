//! Liftoff Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Ambient plumbing shared by the Liftoff workspace members.
//!
//! - **Logging**: tracing subscriber setup driven by [`logging::LogConfig`]
//!
//! # Example
//!
//! ```no_run
//! use liftoff_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

pub mod logging;

pub use logging::{init_logging, LogConfig, LoggingGuard};
