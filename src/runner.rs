// ABOUTME: Orchestrates one run: resolve the key, dial the chain, execute, tear down.
// ABOUTME: The chain is always disconnected in reverse order, whatever the outcome.

use crate::config::RunConfig;
use crate::diagnostics::Diagnostics;
use crate::ssh::{self, ChainDialer, Identity, PtySpec, Stdio};
use tokio::io::{AsyncRead, AsyncWrite};

pub struct Runner {
    config: RunConfig,
    pty: PtySpec,
}

impl Runner {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            pty: PtySpec::default(),
        }
    }

    /// Run the script once, streaming through `stdio`.
    pub async fn run<I, O, E>(&self, stdio: Stdio<I, O, E>) -> ssh::Result<()>
    where
        I: AsyncRead + Unpin + Send + 'static,
        O: AsyncWrite + Unpin + Send + 'static,
        E: AsyncWrite + Unpin + Send + 'static,
    {
        let mut diag = Diagnostics::default();
        self.run_with(stdio, &mut diag).await
    }

    /// Like [`Runner::run`], collecting teardown warnings into `diag`.
    pub async fn run_with<I, O, E>(
        &self,
        stdio: Stdio<I, O, E>,
        diag: &mut Diagnostics,
    ) -> ssh::Result<()>
    where
        I: AsyncRead + Unpin + Send + 'static,
        O: AsyncWrite + Unpin + Send + 'static,
        E: AsyncWrite + Unpin + Send + 'static,
    {
        let config = &self.config;
        if config.host_keys().is_accept_any() {
            tracing::warn!("host key verification is disabled; any server key will be accepted");
        }

        let identity = Identity::resolve(config.key(), config.passphrase_bytes())?;

        let dialer = ChainDialer::new(
            &identity,
            config.user(),
            config.timeout(),
            config.host_keys(),
        );
        let chain = dialer.dial(config.hosts(), diag).await?;
        tracing::info!(hops = chain.len(), target = %chain.active().host(), "chain established");

        let outcome = ssh::execute(&chain, config.script(), &self.pty, stdio, diag).await;

        chain.close(diag).await;
        outcome
    }
}
