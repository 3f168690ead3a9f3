// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use thiserror::Error;

/// Every failure the mount driver reports. Validation and precondition
/// variants are raised before any byte is sent to the mount.
#[derive(Debug, Error)]
pub enum MountError {
    /// Operation attempted without an open serial link.
    #[error("not connected: {0}")]
    NotConnected(String),

    /// Motion operation attempted while the mount is parked.
    #[error("invalid while parked: {0}")]
    Parked(String),

    /// Out-of-range coordinate, duration, or unsupported rate.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// A value that must be set first (e.g. the slew target) is not set.
    #[error("value not set: {0}")]
    ValueNotSet(String),

    /// Operation not permitted in the current mount state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Axis busy, or a GoTo already in flight.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// The mount refused the request, e.g. GoTo target below the horizon.
    #[error("rejected by mount: {0}")]
    RejectedByDevice(String),

    /// No motion was detected for the whole stall window of a GoTo.
    #[error("slew stalled: {0}")]
    Stall(String),

    /// A bounded wait ran out.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The mount sent an unexpected or malformed reply.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Serial link failure.
    #[error("serial link failure: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serialport::Error> for MountError {
    fn from(e: serialport::Error) -> Self {
        MountError::Io(e.into())
    }
}

pub type MountResult<T> = Result<T, MountError>;
