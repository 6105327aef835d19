//! Client configuration and keybase discovery.
//!
//! This module provides:
//!
//! - [`ClientConfig`] and [`ClientConfigBuilder`] for configuring the client
//! - [`Environment`] for locating the keybase binary and the current account
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use libkeybase::config::{ClientConfig, Environment};
//!
//! let config = ClientConfig::builder()
//!     .pool_size(4)
//!     .request_timeout(Duration::from_secs(5))
//!     .cache_size(512, 256)
//!     .build()?;
//!
//! let env = Environment::detect(&config).await?;
//! println!("acting as {}", env.user());
//! ```

pub mod builder;
pub mod locator;

pub use builder::{ClientConfig, ClientConfigBuilder};
pub use locator::{default_binary_paths, Environment};
