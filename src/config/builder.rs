//! Client configuration and builder.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use libkeybase::config::ClientConfig;
//!
//! let config = ClientConfig::builder()
//!     .binary_path("/usr/bin/keybase")
//!     .username("alice")
//!     .pool_size(4)
//!     .request_timeout(Duration::from_secs(5))
//!     .build()
//!     .unwrap();
//! assert_eq!(config.pool_size(), 4);
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

/// Default number of pooled request workers.
pub const DEFAULT_POOL_SIZE: usize = 10;
/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Default maximum number of cached messages.
pub const DEFAULT_CACHE_CAPACITY: usize = 2048;
/// Default size the cache evicts down to.
pub const DEFAULT_CACHE_RESIZE: usize = 1024;
/// Default number of idle delete-id buffers kept.
pub const DEFAULT_ID_BATCH_POOL_SIZE: usize = 32;

/// Configuration for the keybase client.
///
/// Use [`ClientConfig::builder()`] to create a new configuration. Every value
/// is fixed once built.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // Locator
    pub(crate) binary_path: Option<PathBuf>,
    pub(crate) username: Option<String>,

    // Sizing
    pub(crate) pool_size: usize,
    pub(crate) request_timeout: Duration,
    pub(crate) cache_capacity: usize,
    pub(crate) cache_resize: usize,
    pub(crate) id_batch_pool_size: usize,

    // Command lines
    pub(crate) api_args: Vec<String>,
    pub(crate) listen_args: Vec<String>,
    pub(crate) ping_args: Vec<String>,

    // Process options
    pub(crate) env_vars: HashMap<String, String>,
    pub(crate) inherit_env: bool,
}

impl ClientConfig {
    /// Create a new builder for ClientConfig.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Get the configured binary path, if any.
    pub fn binary_path(&self) -> Option<&PathBuf> {
        self.binary_path.as_ref()
    }

    /// Get the configured username, if any.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Get the worker pool size.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Get the per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Get the cache capacity.
    pub fn cache_capacity(&self) -> usize {
        self.cache_capacity
    }

    /// Get the cache eviction target.
    pub fn cache_resize(&self) -> usize {
        self.cache_resize
    }

    /// Get the number of idle delete-id buffers retained.
    pub fn id_batch_pool_size(&self) -> usize {
        self.id_batch_pool_size
    }

    /// Arguments for pooled request workers.
    pub fn api_args(&self) -> &[String] {
        &self.api_args
    }

    /// Arguments for the event listener.
    pub fn listen_args(&self) -> &[String] {
        &self.listen_args
    }

    /// Arguments for the connectivity check.
    pub fn ping_args(&self) -> &[String] {
        &self.ping_args
    }
}

/// Builder for [`ClientConfig`].
///
/// Values are validated when [`build()`](ClientConfigBuilder::build) is
/// called. The binary and account are resolved later, on connect.
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    binary_path: Option<PathBuf>,
    username: Option<String>,
    pool_size: usize,
    request_timeout: Duration,
    cache_capacity: usize,
    cache_resize: usize,
    id_batch_pool_size: usize,
    api_args: Vec<String>,
    listen_args: Vec<String>,
    ping_args: Vec<String>,
    env_vars: HashMap<String, String>,
    inherit_env: bool,
}

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self {
            binary_path: None,
            username: None,
            pool_size: DEFAULT_POOL_SIZE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_resize: DEFAULT_CACHE_RESIZE,
            id_batch_pool_size: DEFAULT_ID_BATCH_POOL_SIZE,
            api_args: args(&["chat", "api"]),
            listen_args: args(&["chat", "api-listen"]),
            ping_args: args(&["ping"]),
            env_vars: HashMap::new(),
            inherit_env: true,
        }
    }
}

impl ClientConfigBuilder {
    // -------------------------------------------------------------------------
    // Locator
    // -------------------------------------------------------------------------

    /// Path to the keybase binary (default: search the standard install paths).
    pub fn binary_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary_path = Some(path.into());
        self
    }

    /// Account name to act as (default: ask `keybase id`).
    pub fn username(mut self, name: impl Into<String>) -> Self {
        self.username = Some(name.into());
        self
    }

    // -------------------------------------------------------------------------
    // Sizing
    // -------------------------------------------------------------------------

    /// Number of pooled request workers.
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Timeout applied to every outgoing request.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Maximum cached messages, and the size eviction reduces to.
    pub fn cache_size(mut self, capacity: usize, resize: usize) -> Self {
        self.cache_capacity = capacity;
        self.cache_resize = resize;
        self
    }

    /// Number of idle delete-id buffers kept for reuse.
    pub fn id_batch_pool_size(mut self, size: usize) -> Self {
        self.id_batch_pool_size = size;
        self
    }

    // -------------------------------------------------------------------------
    // Command lines
    // -------------------------------------------------------------------------

    /// Arguments for request workers (default: `chat api`).
    pub fn api_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.api_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Arguments for the event listener (default: `chat api-listen`).
    pub fn listen_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.listen_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Arguments for the connectivity check (default: `ping`).
    pub fn ping_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.ping_args = args.into_iter().map(Into::into).collect();
        self
    }

    // -------------------------------------------------------------------------
    // Process options
    // -------------------------------------------------------------------------

    /// Add/override environment variable for every subprocess.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    /// Don't inherit parent environment (default: inherit).
    pub fn inherit_env(mut self, inherit: bool) -> Self {
        self.inherit_env = inherit;
        self
    }

    // -------------------------------------------------------------------------
    // Build
    // -------------------------------------------------------------------------

    /// Build the configuration.
    ///
    /// This validates:
    /// - Pool sizes and the timeout are non-zero
    /// - The cache resize target is below its capacity
    /// - A configured username is not blank
    ///
    /// Note: the binary is located when the client connects.
    pub fn build(self) -> Result<ClientConfig> {
        if self.pool_size == 0 {
            return Err(Error::InvalidConfig("pool_size must be positive".into()));
        }
        if self.id_batch_pool_size == 0 {
            return Err(Error::InvalidConfig(
                "id_batch_pool_size must be positive".into(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "request_timeout must be positive".into(),
            ));
        }
        if self.cache_capacity == 0 {
            return Err(Error::InvalidConfig(
                "cache capacity must be positive".into(),
            ));
        }
        if self.cache_resize >= self.cache_capacity {
            return Err(Error::InvalidConfig(format!(
                "cache resize target {} must be below capacity {}",
                self.cache_resize, self.cache_capacity
            )));
        }
        if let Some(ref name) = self.username {
            if name.trim().is_empty() {
                return Err(Error::InvalidConfig("username must not be blank".into()));
            }
        }

        Ok(ClientConfig {
            binary_path: self.binary_path,
            username: self.username,
            pool_size: self.pool_size,
            request_timeout: self.request_timeout,
            cache_capacity: self.cache_capacity,
            cache_resize: self.cache_resize,
            id_batch_pool_size: self.id_batch_pool_size,
            api_args: self.api_args,
            listen_args: self.listen_args,
            ping_args: self.ping_args,
            env_vars: self.env_vars,
            inherit_env: self.inherit_env,
        })
    }
}

impl ClientConfig {
    /// Get the environment variables to set for every subprocess.
    pub(crate) fn build_env(&self) -> &HashMap<String, String> {
        &self.env_vars
    }
}
