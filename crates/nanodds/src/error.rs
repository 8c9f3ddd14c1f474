// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Errors returned by nanodds operations.
//!
//! No exception-style unwinding: every fallible operation returns a
//! [`Result`] and recovery is local to the caller. Protocol-level drops
//! (duplicate counts, out-of-order sequence numbers, unknown entities) are
//! not errors at all; they are silently absorbed by the reliability loop.

use std::fmt;
use std::io;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by nanodds operations.
#[derive(Debug)]
pub enum Error {
    /// A datagram, submessage, or parameter list failed to decode. The
    /// offending input is dropped; no state was mutated.
    Malformed,
    /// A fixed slot array is full (matched proxies, endpoints, remote
    /// participants). The operation failed; the caller logs and continues.
    CapacityExceeded,
    /// A submessage addressed an entity id with no local binding.
    UnknownEntity,
    /// An encode target buffer cannot hold the output.
    BufferTooSmall,
    /// A sequence number was outside the history cache's current range.
    NotFound,
    /// The transport driver reported a send failure. Non-fatal: the next
    /// heartbeat round triggers another send.
    Transport(io::Error),
    /// Participant bring-up failed (socket setup, bad config). Fatal to
    /// that participant.
    InvalidConfig(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed wire data"),
            Self::CapacityExceeded => write!(f, "fixed-capacity slot array is full"),
            Self::UnknownEntity => write!(f, "no local binding for entity id"),
            Self::BufferTooSmall => write!(f, "buffer too small for encoding"),
            Self::NotFound => write!(f, "sequence number not in cache"),
            Self::Transport(err) => write!(f, "transport send failed: {}", err),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Transport(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_stable() {
        assert_eq!(Error::Malformed.to_string(), "malformed wire data");
        assert_eq!(Error::NotFound.to_string(), "sequence number not in cache");
    }

    #[test]
    fn test_io_error_conversion() {
        let err: Error = io::Error::new(io::ErrorKind::WouldBlock, "full").into();
        assert!(matches!(err, Error::Transport(_)));
    }
}
