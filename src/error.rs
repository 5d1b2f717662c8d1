// ABOUTME: Application-wide error type for chainrun.
// ABOUTME: Wraps loader and SSH failures and decides the process exit code.

use crate::ssh::RemoteExit;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] crate::config::Error),

    #[error(transparent)]
    Ssh(#[from] crate::ssh::Error),
}

impl Error {
    /// Exit code for the process: the remote status for a failed script,
    /// otherwise 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Ssh(e) => match e.remote_exit() {
                Some(RemoteExit::Status(status)) => (*status).clamp(1, 255) as i32,
                _ => 1,
            },
            Error::Config(_) => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
