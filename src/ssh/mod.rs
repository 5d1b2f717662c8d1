// ABOUTME: SSH layer: credentials, the hop chain, and the remote script session.
// ABOUTME: Every failure surfaces as an `Error` tagged with the operation that failed.

mod address;
mod chain;
mod credentials;
mod error;
mod handler;
mod session;

pub use address::{AddressError, DEFAULT_PORT, split_host_port};
pub use chain::{ChainDialer, ConnectionChain, Hop};
pub use credentials::Identity;
pub use error::{BoxError, Error, ErrorKind, Op, RemoteExit, Result};
pub use handler::HostKeyPolicy;
pub use session::{PtySpec, Stdio, execute};
