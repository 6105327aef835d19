//! Locating the keybase binary and the account it is logged in as.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use super::builder::ClientConfig;
use crate::chat::User;
use crate::process::{with_timeout, ProcessSpec};
use crate::{Error, Result};

const ID_TIMEOUT: Duration = Duration::from_secs(10);

/// Standard install locations, checked in order.
pub fn default_binary_paths() -> Vec<PathBuf> {
    let mut paths = vec![
        PathBuf::from("/usr/bin/keybase"),
        PathBuf::from("/usr/local/bin/keybase"),
    ];
    if let Some(local) = dirs::data_local_dir() {
        paths.push(local.join("Keybase").join("Keybase.exe"));
    }
    paths
}

#[derive(Debug, Deserialize)]
struct IdOutput {
    #[serde(default)]
    username: String,
}

/// A resolved keybase installation: which binary to run and as whom.
#[derive(Debug, Clone)]
pub struct Environment {
    binary_path: PathBuf,
    user: User,
}

impl Environment {
    /// Use a known binary and account without probing anything.
    pub fn new(binary_path: impl Into<PathBuf>, user: impl Into<User>) -> Self {
        Self {
            binary_path: binary_path.into(),
            user: user.into(),
        }
    }

    /// Resolve the binary and account for `config`.
    ///
    /// A configured binary path wins over the default install paths. A
    /// configured username wins over asking `keybase id -j`.
    ///
    /// # Errors
    ///
    /// - [`Error::BinaryNotFound`] if no candidate path exists
    /// - [`Error::UserNotFound`] if the account cannot be determined
    pub async fn detect(config: &ClientConfig) -> Result<Self> {
        let binary_path = match config.binary_path() {
            Some(path) => path.clone(),
            None => find_binary(&default_binary_paths())?,
        };

        let user = match config.username() {
            Some(name) => User::new(name),
            None => query_user(&binary_path, config).await?,
        };
        if !user.is_valid() {
            return Err(Error::UserNotFound {
                reason: "empty username".into(),
            });
        }

        tracing::debug!(binary = %binary_path.display(), user = %user, "keybase environment resolved");
        Ok(Self { binary_path, user })
    }

    /// The keybase binary.
    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    /// The account the binary acts as.
    pub fn user(&self) -> &User {
        &self.user
    }

    /// A process spec running the binary with `args` under the config's
    /// environment settings.
    pub fn spec(&self, config: &ClientConfig, args: &[String]) -> ProcessSpec {
        ProcessSpec::new(&self.binary_path, args.iter().cloned())
            .with_env(config.build_env().clone())
            .with_inherit_env(config.inherit_env)
    }
}

fn find_binary(candidates: &[PathBuf]) -> Result<PathBuf> {
    candidates
        .iter()
        .find(|path| path.is_file())
        .cloned()
        .ok_or_else(|| Error::BinaryNotFound {
            searched: candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })
}

async fn query_user(binary_path: &Path, config: &ClientConfig) -> Result<User> {
    let spec = ProcessSpec::new(binary_path, ["id", "-j"])
        .with_env(config.build_env().clone())
        .with_inherit_env(config.inherit_env);

    let output = with_timeout(ID_TIMEOUT, spec.output())
        .await
        .map_err(|e| match e {
            Error::BinaryNotFound { .. } => e,
            other => Error::UserNotFound {
                reason: other.to_string(),
            },
        })?;
    if !output.status.success() {
        return Err(Error::UserNotFound {
            reason: format!("keybase id exited with {}", output.status),
        });
    }

    let parsed: IdOutput = serde_json::from_slice(&output.stdout).map_err(|e| Error::UserNotFound {
        reason: format!("unreadable id output: {e}"),
    })?;
    Ok(User::new(parsed.username))
}
