// ABOUTME: Error taxonomy for the credential, dial, and session stages.
// ABOUTME: One error value carrying the failing operation, a message, and an optional cause.

use std::fmt;

/// Boxed underlying cause.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The step that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Decoding the private key into a signing identity.
    ParseKey,
    /// Dialing, handshaking, or authenticating a hop.
    Dial,
    /// Opening the remote session channel.
    OpenSession,
    /// Requesting the pseudo-terminal.
    RequestPty,
    /// Submitting and waiting on the remote command.
    Run,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::ParseKey => "credentials.resolve",
            Op::Dial => "chain.dial",
            Op::OpenSession => "session.open",
            Op::RequestPty => "session.request_pty",
            Op::Run => "session.run",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed key or wrong passphrase.
    KeyParse,
    /// Network, handshake, or authentication failure at a hop.
    Dial,
    /// The remote side refused or could not open a session.
    SessionOpen,
    /// The remote side refused the pseudo-terminal.
    PtyRequest,
    /// The command exited non-zero, or the transport failed mid-run.
    Command,
}

/// How a remote command ended when it did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteExit {
    #[error("remote command exited with status {0}")]
    Status(u32),

    #[error("remote command killed by signal {0}")]
    Signal(String),
}

/// A failure in one of the run stages.
///
/// Built incrementally: a stage creates the error tagged with its own
/// operation, then attaches a message and/or the underlying cause.
#[derive(Debug)]
pub struct Error {
    op: Op,
    message: Option<String>,
    source: Option<BoxError>,
}

impl Error {
    pub fn new(op: Op) -> Self {
        Self {
            op,
            message: None,
            source: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn op(&self) -> Op {
        self.op
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn kind(&self) -> ErrorKind {
        match self.op {
            Op::ParseKey => ErrorKind::KeyParse,
            Op::Dial => ErrorKind::Dial,
            Op::OpenSession => ErrorKind::SessionOpen,
            Op::RequestPty => ErrorKind::PtyRequest,
            Op::Run => ErrorKind::Command,
        }
    }

    /// Returns how the remote command ended, if that is what failed.
    pub fn remote_exit(&self) -> Option<&RemoteExit> {
        let mut cause = std::error::Error::source(self);
        while let Some(err) = cause {
            if let Some(exit) = err.downcast_ref::<RemoteExit>() {
                return Some(exit);
            }
            cause = err.source();
        }
        None
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.message, &self.source) {
            (Some(message), _) => write!(f, "{}: {}", self.op, message),
            (None, Some(source)) => write!(f, "{}: {}", self.op, source),
            (None, None) => write!(f, "{}", self.op),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
