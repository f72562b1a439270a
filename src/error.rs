/*
 * Error Module
 *
 * This module defines the error taxonomy for the swarm core.
 * Structural mutation errors (unknown swarm, empty swarm, capacity) are
 * recoverable and never leave the data model partially updated.
 * Device errors are fatal for the tick that hit them.
 */

use thiserror::Error;

// Failures reported by a compute backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("no compute program was supplied")]
    MissingProgram,

    #[error("compute entry point `{0}` not found in program")]
    MissingEntryPoint(String),

    #[error("failed to allocate {bytes} bytes for buffer `{label}`")]
    AllocationFailed { label: String, bytes: u64 },

    #[error("buffer {0} is not allocated on this backend")]
    UnknownBuffer(u64),

    #[error("upload of {given} bytes does not match buffer size {expected}")]
    UploadSizeMismatch { expected: u64, given: u64 },

    #[error("device lost: {0}")]
    Lost(String),
}

// Main error type for swarm operations
#[derive(Error, Debug)]
pub enum SwarmError {
    // Unknown swarm or entity reference
    #[error("swarm {0} not found")]
    NotFound(u32),

    // Removal requested on a swarm without members
    #[error("swarm {0} has no boids to remove")]
    EmptySwarm(u32),

    // A fixed limit would be exceeded
    #[error("capacity exceeded: {requested} > {capacity}")]
    CapacityExceeded { requested: usize, capacity: usize },

    // Allocation, upload or kernel lookup failed on the compute backend
    #[error("device resource failure: {0}")]
    DeviceResourceFailure(#[from] DeviceError),

    // The context was torn down; no further mutation is accepted
    #[error("simulation has been shut down")]
    ShutDown,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SwarmResult<T> = Result<T, SwarmError>;

impl SwarmError {
    // Whether the caller can carry on with the same context
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SwarmError::DeviceResourceFailure(_) | SwarmError::ShutDown)
    }
}
