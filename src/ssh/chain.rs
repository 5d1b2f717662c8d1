// ABOUTME: Builds the ordered chain of authenticated SSH connections across hops.
// ABOUTME: Hop 0 is dialed directly; every later hop is tunneled through its predecessor.

use super::address::split_host_port;
use super::credentials::Identity;
use super::error::{Error, Op, Result};
use super::handler::{HostKeyPolicy, HostKeyVerifier};
use crate::diagnostics::{Diagnostics, Warning};
use nonempty::NonEmpty;
use russh::Disconnect;
use russh::client::{self, Config, Handle};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// One established, authenticated connection.
pub struct Hop {
    host: String,
    handle: Handle<HostKeyVerifier>,
}

impl Hop {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub(crate) fn handle(&self) -> &Handle<HostKeyVerifier> {
        &self.handle
    }
}

impl std::fmt::Debug for Hop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hop")
            .field("host", &self.host)
            .field("handle", &"<russh::Handle>")
            .finish()
    }
}

/// The hops in dial order. The last one is where the script runs.
#[derive(Debug)]
pub struct ConnectionChain {
    hops: NonEmpty<Hop>,
}

impl ConnectionChain {
    pub fn len(&self) -> usize {
        self.hops.len()
    }

    /// Always false; a chain holds at least its first hop.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.hops.iter().map(Hop::host)
    }

    /// The connection execution targets.
    pub fn active(&self) -> &Hop {
        self.hops.last()
    }

    /// Disconnect every hop, last to first. Failures are recorded, not returned.
    pub async fn close(self, diag: &mut Diagnostics) {
        let mut hops: Vec<Hop> = self.hops.into();
        while let Some(hop) = hops.pop() {
            disconnect_hop(&hop, diag).await;
        }
    }
}

async fn disconnect_hop(hop: &Hop, diag: &mut Diagnostics) {
    if hop.handle.is_closed() {
        return;
    }
    match hop
        .handle
        .disconnect(Disconnect::ByApplication, "", "en")
        .await
    {
        Ok(()) => tracing::debug!(host = %hop.host, "disconnected hop"),
        Err(e) => diag.warn(Warning::hop_disconnect(format!(
            "failed to disconnect from {}: {}",
            hop.host, e
        ))),
    }
}

/// Dials hops in order with a shared identity and user.
pub struct ChainDialer<'a> {
    identity: &'a Identity,
    user: &'a str,
    connect_timeout: Duration,
    host_keys: &'a HostKeyPolicy,
    config: Arc<Config>,
}

impl<'a> ChainDialer<'a> {
    pub fn new(
        identity: &'a Identity,
        user: &'a str,
        connect_timeout: Duration,
        host_keys: &'a HostKeyPolicy,
    ) -> Self {
        let config = Config {
            // Scripts may be silent for a long time; rely on keepalives instead.
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(15)),
            ..Default::default()
        };

        Self {
            identity,
            user,
            connect_timeout,
            host_keys,
            config: Arc::new(config),
        }
    }

    /// Establish one authenticated connection per host, in order.
    ///
    /// On failure at any hop no later hop is attempted and the hops already
    /// established are disconnected, last first; teardown problems from that
    /// release go into `diag`.
    pub async fn dial(&self, hosts: &[String], diag: &mut Diagnostics) -> Result<ConnectionChain> {
        let Some((first, rest)) = hosts.split_first() else {
            return Err(Error::new(Op::Dial).with_message("no hosts provided"));
        };
        let total = hosts.len();

        let first = self.dial_direct(first, total).await?;
        let mut chain = ConnectionChain {
            hops: NonEmpty::new(first),
        };

        for (offset, host) in rest.iter().enumerate() {
            match self.dial_through(chain.active(), host, offset + 2, total).await {
                Ok(hop) => chain.hops.push(hop),
                Err(e) => {
                    chain.close(diag).await;
                    return Err(e);
                }
            }
        }

        Ok(chain)
    }

    /// Hop 1: a TCP connection bounded by the connect timeout.
    async fn dial_direct(&self, host: &str, total: usize) -> Result<Hop> {
        let ctx = HopContext::new(1, total, host);
        let (name, port) = split_host_port(host).map_err(|e| ctx.error("invalid address", e))?;

        tracing::debug!(hop = 1, host, timeout = ?self.connect_timeout, "dialing first hop");

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect((name, port)))
            .await
            .map_err(|e| {
                ctx.error(
                    format!("connection timed out after {:?}", self.connect_timeout),
                    e,
                )
            })?
            .map_err(|e| ctx.error("connection failed", e))?;

        self.establish(&ctx, stream, name, port).await
    }

    /// Hop i>1: a direct-tcpip channel opened on the previous hop.
    async fn dial_through(
        &self,
        previous: &Hop,
        host: &str,
        index: usize,
        total: usize,
    ) -> Result<Hop> {
        let ctx = HopContext::new(index, total, host);
        let (name, port) = split_host_port(host).map_err(|e| ctx.error("invalid address", e))?;

        tracing::debug!(hop = index, host, via = %previous.host, "opening tunnel");

        let channel = previous
            .handle
            .channel_open_direct_tcpip(name, u32::from(port), "127.0.0.1", 0)
            .await
            .map_err(|e| ctx.error(format!("tunnel through {} refused", previous.host), e))?;

        self.establish(&ctx, channel.into_stream(), name, port).await
    }

    /// Handshake and authenticate over an already-open byte stream.
    async fn establish<S>(&self, ctx: &HopContext<'_>, stream: S, name: &str, port: u16) -> Result<Hop>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let verifier = HostKeyVerifier::new(name, port, self.host_keys.clone());
        let mut handle = client::connect_stream(Arc::clone(&self.config), stream, verifier)
            .await
            .map_err(|e| ctx.error("SSH handshake failed", e))?;

        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .map_err(|e| ctx.error("SSH handshake failed", e))?
            .flatten();

        let auth = handle
            .authenticate_publickey(self.user, self.identity.signer(hash_alg))
            .await
            .map_err(|e| ctx.error("authentication failed", e))?;

        if !auth.success() {
            return Err(Error::new(Op::Dial).with_message(format!(
                "{}: public key authentication as {} rejected",
                ctx, self.user
            )));
        }

        tracing::info!(hop = ctx.index, host = ctx.host, user = self.user, "hop established");

        Ok(Hop {
            host: ctx.host.to_string(),
            handle,
        })
    }
}

/// Decoration for errors raised while dialing a particular hop.
struct HopContext<'a> {
    index: usize,
    total: usize,
    host: &'a str,
}

impl<'a> HopContext<'a> {
    fn new(index: usize, total: usize, host: &'a str) -> Self {
        Self { index, total, host }
    }

    fn error<E>(&self, what: impl std::fmt::Display, cause: E) -> Error
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::new(Op::Dial)
            .with_message(format!("{self}: {what}: {cause}"))
            .with_source(cause)
    }
}

impl std::fmt::Display for HopContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "hop {}/{} ({})", self.index, self.total, self.host)
    }
}
