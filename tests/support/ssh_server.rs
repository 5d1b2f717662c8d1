// ABOUTME: In-process SSH server for integration tests.
// ABOUTME: Runs exec requests with sh, routes direct-tcpip by name, and records every event.

use parking_lot::Mutex;
use russh::keys::ssh_key::PublicKey;
use russh::keys::{PrivateKey, decode_secret_key};
use russh::server::{self, Auth, Msg, Server as _, Session};
use russh::{Channel, ChannelId, CryptoVec, Pty};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::process::Command;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;

const HOST_KEY: &str = include_str!("../fixtures/host_ed25519");
const AUTHORIZED_KEY: &str = include_str!("../fixtures/client_ed25519.pub");

/// The only user the server lets in.
pub const USER: &str = "tester";

/// Something a test server observed.
#[derive(Debug, Clone)]
pub enum Event {
    Connected,
    Auth { user: String, accepted: bool },
    SessionRequested { accepted: bool },
    DirectTcpip { target: String, routed: bool },
    Pty {
        term: String,
        cols: u32,
        rows: u32,
        modes: Vec<(Pty, u32)>,
    },
    Exec { command: String },
    Closed,
}

/// Events from every server in a test, in the order they happened.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<(String, Event)>>>);

impl EventLog {
    fn record(&self, server: &str, event: Event) {
        self.0.lock().push((server.to_string(), event));
    }

    pub fn all(&self) -> Vec<(String, Event)> {
        self.0.lock().clone()
    }

    pub fn for_server(&self, server: &str) -> Vec<Event> {
        self.0
            .lock()
            .iter()
            .filter(|(name, _)| name == server)
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Index of the first event matching `pred`, in global order.
    pub fn position(&self, server: &str, pred: impl Fn(&Event) -> bool) -> Option<usize> {
        self.0
            .lock()
            .iter()
            .position(|(name, event)| name == server && pred(event))
    }

    /// Poll until `server` has recorded an event matching `pred`.
    pub async fn wait_for(&self, server: &str, pred: impl Fn(&Event) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while tokio::time::Instant::now() < deadline {
            if self.position(server, &pred).is_some() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }
}

struct Options {
    name: String,
    events: EventLog,
    reject_auth: bool,
    refuse_session: bool,
    refuse_pty: bool,
    routes: HashMap<String, SocketAddr>,
    authorized: PublicKey,
}

pub struct TestServerBuilder {
    name: String,
    events: EventLog,
    reject_auth: bool,
    refuse_session: bool,
    refuse_pty: bool,
    routes: HashMap<String, SocketAddr>,
}

impl TestServerBuilder {
    /// Reject every authentication attempt.
    pub fn reject_auth(mut self) -> Self {
        self.reject_auth = true;
        self
    }

    /// Refuse to open session channels.
    pub fn refuse_session(mut self) -> Self {
        self.refuse_session = true;
        self
    }

    /// Answer pty-req with a failure.
    pub fn refuse_pty(mut self) -> Self {
        self.refuse_pty = true;
        self
    }

    /// Make `target` ("name:port") reachable through this server only.
    pub fn route(mut self, target: &str, to: &TestServer) -> Self {
        self.routes.insert(target.to_string(), to.addr);
        self
    }

    pub async fn start(self) -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = Arc::new(server::Config {
            keys: vec![host_key()],
            auth_rejection_time: Duration::from_millis(10),
            auth_rejection_time_initial: Some(Duration::ZERO),
            inactivity_timeout: Some(Duration::from_secs(30)),
            ..Default::default()
        });

        let mut factory = Factory {
            options: Arc::new(Options {
                name: self.name.clone(),
                events: self.events,
                reject_auth: self.reject_auth,
                refuse_session: self.refuse_session,
                refuse_pty: self.refuse_pty,
                routes: self.routes,
                authorized: PublicKey::from_openssh(AUTHORIZED_KEY.trim()).unwrap(),
            }),
        };

        let task = tokio::spawn(async move {
            let _ = factory.run_on_socket(config, &listener).await;
        });

        TestServer {
            name: self.name,
            addr,
            task,
        }
    }
}

/// A listening server; stops when dropped.
pub struct TestServer {
    name: String,
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl TestServer {
    pub fn builder(name: &str, events: &EventLog) -> TestServerBuilder {
        TestServerBuilder {
            name: name.to_string(),
            events: events.clone(),
            reject_auth: false,
            refuse_session: false,
            refuse_pty: false,
            routes: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// "127.0.0.1:<port>", dialable directly.
    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn host_key() -> PrivateKey {
    decode_secret_key(HOST_KEY, None).unwrap()
}

pub fn host_public_key() -> PublicKey {
    host_key().public_key().clone()
}

struct Factory {
    options: Arc<Options>,
}

impl server::Server for Factory {
    type Handler = Connection;

    fn new_client(&mut self, _peer: Option<SocketAddr>) -> Connection {
        self.options
            .events
            .record(&self.options.name, Event::Connected);
        Connection {
            options: Arc::clone(&self.options),
            stdin_tx: HashMap::new(),
            stdin_rx: HashMap::new(),
        }
    }

    fn handle_session_error(&mut self, error: russh::Error) {
        tracing::debug!(server = %self.options.name, "session ended with error: {}", error);
    }
}

struct Connection {
    options: Arc<Options>,
    // Client input can arrive before the exec request, so it is buffered per channel.
    stdin_tx: HashMap<ChannelId, UnboundedSender<Vec<u8>>>,
    stdin_rx: HashMap<ChannelId, UnboundedReceiver<Vec<u8>>>,
}

impl Connection {
    fn record(&self, event: Event) {
        self.options.events.record(&self.options.name, event);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.record(Event::Closed);
    }
}

impl server::Handler for Connection {
    type Error = russh::Error;

    async fn auth_publickey(&mut self, user: &str, key: &PublicKey) -> Result<Auth, Self::Error> {
        let accepted = !self.options.reject_auth
            && user == USER
            && key.key_data() == self.options.authorized.key_data();
        self.record(Event::Auth {
            user: user.to_string(),
            accepted,
        });

        if accepted {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::Reject {
                proceed_with_methods: None,
                partial_success: false,
            })
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.record(Event::SessionRequested {
            accepted: !self.options.refuse_session,
        });
        if self.options.refuse_session {
            return Ok(false);
        }
        let (tx, rx) = unbounded_channel();
        self.stdin_tx.insert(channel.id(), tx);
        self.stdin_rx.insert(channel.id(), rx);
        Ok(true)
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let target = format!("{host_to_connect}:{port_to_connect}");
        let route = self.options.routes.get(&target).copied();
        self.record(Event::DirectTcpip {
            target,
            routed: route.is_some(),
        });

        let Some(addr) = route else {
            return Ok(false);
        };
        tokio::spawn(async move {
            if let Ok(mut upstream) = TcpStream::connect(addr).await {
                let mut stream = channel.into_stream();
                let _ = tokio::io::copy_bidirectional(&mut stream, &mut upstream).await;
            }
        });
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.record(Event::Pty {
            term: term.to_string(),
            cols: col_width,
            rows: row_height,
            modes: modes.to_vec(),
        });
        if self.options.refuse_pty {
            let _ = session.channel_failure(channel);
        } else {
            let _ = session.channel_success(channel);
        }
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data).into_owned();
        self.record(Event::Exec {
            command: command.clone(),
        });

        let stdin = self.stdin_rx.remove(&channel);
        let _ = session.channel_success(channel);
        tokio::spawn(run_command(session.handle(), channel, command, stdin));
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(tx) = self.stdin_tx.get(&channel) {
            let _ = tx.send(data.to_vec());
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.stdin_tx.remove(&channel);
        Ok(())
    }
}

async fn run_command(
    handle: server::Handle,
    channel: ChannelId,
    command: String,
    stdin: Option<UnboundedReceiver<Vec<u8>>>,
) {
    let spawned = Command::new("sh")
        .arg("-c")
        .arg(&command)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();
    let mut child = match spawned {
        Ok(child) => child,
        Err(_) => {
            let _ = handle.exit_status_request(channel, 127).await;
            let _ = handle.close(channel).await;
            return;
        }
    };

    if let (Some(mut rx), Some(mut child_stdin)) = (stdin, child.stdin.take()) {
        tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                if child_stdin.write_all(&chunk).await.is_err() {
                    break;
                }
            }
        });
    }

    tokio::join!(
        pump(&handle, channel, child.stdout.take(), None),
        pump(&handle, channel, child.stderr.take(), Some(1)),
    );

    let status = child
        .wait()
        .await
        .ok()
        .and_then(|status| status.code())
        .unwrap_or(255);
    let _ = handle.exit_status_request(channel, status as u32).await;
    let _ = handle.eof(channel).await;
    let _ = handle.close(channel).await;
}

async fn pump<R>(handle: &server::Handle, channel: ChannelId, reader: Option<R>, ext: Option<u32>)
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return;
    };
    let mut buf = [0u8; 4096];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let data = CryptoVec::from_slice(&buf[..n]);
        let sent = match ext {
            Some(ext) => handle.extended_data(channel, ext, data).await,
            None => handle.data(channel, data).await,
        };
        if sent.is_err() {
            break;
        }
    }
}
