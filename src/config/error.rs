// ABOUTME: Errors raised while loading run inputs from disk and the terminal.
// ABOUTME: Each variant carries the path or step that failed.

use snafu::Snafu;
use std::path::PathBuf;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("failed to read script {}: {source}", path.display()))]
    ReadScript {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to read private key {}: {source}", path.display()))]
    ReadKey {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to read passphrase: {source}"))]
    Prompt { source: std::io::Error },

    #[snafu(display("failed to load host key {}: {source}", path.display()))]
    LoadHostKey {
        path: PathBuf,
        source: russh::keys::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
