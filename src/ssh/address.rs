// ABOUTME: Splits hop addresses into host and port.
// ABOUTME: Accepts "host", "host:port", and "[v6addr]:port"; the port defaults to 22.

use thiserror::Error;

pub const DEFAULT_PORT: u16 = 22;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("host address cannot be empty")]
    Empty,

    #[error("invalid port: {0}")]
    InvalidPort(String),

    #[error("unterminated '[' in address: {0}")]
    UnterminatedBracket(String),
}

/// Split `addr` into `(host, port)`.
pub fn split_host_port(addr: &str) -> Result<(&str, u16), AddressError> {
    let addr = addr.trim();
    if addr.is_empty() {
        return Err(AddressError::Empty);
    }

    // [v6]:port or [v6]
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| AddressError::UnterminatedBracket(addr.to_string()))?;
        if host.is_empty() {
            return Err(AddressError::Empty);
        }
        return match tail.strip_prefix(':') {
            Some(port) => Ok((host, parse_port(port)?)),
            None if tail.is_empty() => Ok((host, DEFAULT_PORT)),
            None => Err(AddressError::InvalidPort(tail.to_string())),
        };
    }

    // A bare IPv6 address has several colons and no port.
    if addr.matches(':').count() > 1 {
        return Ok((addr, DEFAULT_PORT));
    }

    match addr.rsplit_once(':') {
        Some((host, port)) => {
            if host.is_empty() {
                return Err(AddressError::Empty);
            }
            Ok((host, parse_port(port)?))
        }
        None => Ok((addr, DEFAULT_PORT)),
    }
}

fn parse_port(port: &str) -> Result<u16, AddressError> {
    port.parse::<u16>()
        .map_err(|_| AddressError::InvalidPort(port.to_string()))
}
