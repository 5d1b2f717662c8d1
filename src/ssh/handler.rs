// ABOUTME: russh client handler that applies the host-key policy to each hop.
// ABOUTME: Supports accept-any, pinned public keys, and an OpenSSH known_hosts file.

use russh::client;
use russh::keys::known_hosts::check_known_hosts_path;
use russh::keys::ssh_key;
use std::path::PathBuf;

/// How a hop's server key is verified.
#[derive(Debug, Clone, Default)]
pub enum HostKeyPolicy {
    /// Accept any server key.
    #[default]
    AcceptAny,
    /// Accept only servers presenting one of these keys. Comments are ignored.
    Pinned(Vec<ssh_key::PublicKey>),
    /// Accept only servers whose key matches their entry in this known_hosts file.
    KnownHosts(PathBuf),
}

impl HostKeyPolicy {
    pub fn is_accept_any(&self) -> bool {
        matches!(self, HostKeyPolicy::AcceptAny)
    }
}

/// Per-hop client handler.
pub(crate) struct HostKeyVerifier {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
}

impl HostKeyVerifier {
    pub(crate) fn new(host: impl Into<String>, port: u16, policy: HostKeyPolicy) -> Self {
        Self {
            host: host.into(),
            port,
            policy,
        }
    }
}

impl client::Handler for HostKeyVerifier {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        let accepted = match &self.policy {
            HostKeyPolicy::AcceptAny => true,
            HostKeyPolicy::Pinned(keys) => keys
                .iter()
                .any(|pinned| pinned.key_data() == server_public_key.key_data()),
            HostKeyPolicy::KnownHosts(path) => {
                match check_known_hosts_path(&self.host, self.port, server_public_key, path) {
                    Ok(found) => found,
                    Err(russh::keys::Error::KeyChanged { .. }) => {
                        tracing::warn!(
                            host = %self.host,
                            port = self.port,
                            "host key does not match known_hosts entry"
                        );
                        false
                    }
                    Err(e) => {
                        tracing::warn!(
                            host = %self.host,
                            path = %path.display(),
                            "failed to read known_hosts: {}",
                            e
                        );
                        false
                    }
                }
            }
        };

        if !accepted {
            tracing::warn!(
                host = %self.host,
                port = self.port,
                fingerprint = %server_public_key.fingerprint(ssh_key::HashAlg::Sha256),
                "rejecting server host key"
            );
        }
        Ok(accepted)
    }
}
