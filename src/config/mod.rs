// ABOUTME: Resolved run configuration and the loader that builds it from files.
// ABOUTME: Secret material is held in zeroizing buffers and kept out of Debug output.

mod error;
mod hosts;
mod script;

pub use error::{Error, Result};
pub use hosts::parse_hosts;
pub use script::{DRY_RUN_PREFIX, dry_run};

use crate::ssh::HostKeyPolicy;
use error::{LoadHostKeySnafu, PromptSnafu, ReadKeySnafu, ReadScriptSnafu};
use snafu::ResultExt;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use zeroize::Zeroizing;

/// Bound on the first hop's TCP connect when none is given.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Text shown when asking for the key passphrase.
pub const PASSPHRASE_PROMPT: &str = "SSH passphrase: ";

/// Everything a run needs, already read into memory.
#[derive(Clone)]
pub struct RunConfig {
    hosts: Vec<String>,
    user: String,
    key: Zeroizing<Vec<u8>>,
    passphrase: Option<Zeroizing<Vec<u8>>>,
    script: Vec<u8>,
    connect_timeout: Duration,
    host_keys: HostKeyPolicy,
}

impl RunConfig {
    pub fn new(
        hosts: Vec<String>,
        user: impl Into<String>,
        key: impl Into<Vec<u8>>,
        script: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            hosts,
            user: user.into(),
            key: Zeroizing::new(key.into()),
            passphrase: None,
            script: script.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            host_keys: HostKeyPolicy::default(),
        }
    }

    /// An empty passphrase is the same as none.
    pub fn passphrase(mut self, passphrase: impl Into<Vec<u8>>) -> Self {
        self.passphrase = Some(Zeroizing::new(passphrase.into()));
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_keys = policy;
        self
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn passphrase_bytes(&self) -> Option<&[u8]> {
        self.passphrase.as_deref().map(Vec::as_slice)
    }

    pub fn script(&self) -> &[u8] {
        &self.script
    }

    pub fn timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn host_keys(&self) -> &HostKeyPolicy {
        &self.host_keys
    }
}

impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("hosts", &self.hosts)
            .field("user", &self.user)
            .field("key", &"<redacted>")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("script_len", &self.script.len())
            .field("connect_timeout", &self.connect_timeout)
            .field("host_keys", &self.host_keys)
            .finish()
    }
}

/// Where to find the run inputs.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Comma-separated hop list.
    pub hosts: String,
    pub script: PathBuf,
    pub key: PathBuf,
    pub user: String,
    pub dry_run: bool,
    /// Ask for the key passphrase before connecting.
    pub prompt: bool,
    pub timeout: Duration,
    pub known_hosts: Option<PathBuf>,
    /// Public key files whose keys are the only accepted server keys.
    pub host_keys: Vec<PathBuf>,
}

impl LoadOptions {
    /// Read the script and key files and assemble a [`RunConfig`].
    ///
    /// `prompt` is only called when `self.prompt` is set; it receives the
    /// prompt text and returns the passphrase.
    pub fn load<P>(&self, prompt: P) -> Result<RunConfig>
    where
        P: FnOnce(&str) -> std::io::Result<String>,
    {
        let script = std::fs::read(&self.script).context(ReadScriptSnafu { path: &self.script })?;
        let script = if self.dry_run { dry_run(&script) } else { script };

        let key = Zeroizing::new(std::fs::read(&self.key).context(ReadKeySnafu { path: &self.key })?);

        let passphrase = if self.prompt {
            let entered = Zeroizing::new(prompt(PASSPHRASE_PROMPT).context(PromptSnafu)?);
            Some(Zeroizing::new(entered.as_bytes().to_vec()))
        } else {
            None
        };

        let mut config = RunConfig::new(
            parse_hosts(&self.hosts),
            self.user.clone(),
            key.to_vec(),
            script,
        )
        .connect_timeout(self.timeout)
        .host_key_policy(self.host_key_policy()?);
        config.passphrase = passphrase;

        tracing::debug!(?config, "loaded run configuration");
        Ok(config)
    }

    fn host_key_policy(&self) -> Result<HostKeyPolicy> {
        if let Some(path) = &self.known_hosts {
            return Ok(HostKeyPolicy::KnownHosts(path.clone()));
        }
        if self.host_keys.is_empty() {
            return Ok(HostKeyPolicy::AcceptAny);
        }
        let keys = self
            .host_keys
            .iter()
            .map(|path| russh::keys::load_public_key(path).context(LoadHostKeySnafu { path }))
            .collect::<Result<Vec<_>>>()?;
        Ok(HostKeyPolicy::Pinned(keys))
    }
}
