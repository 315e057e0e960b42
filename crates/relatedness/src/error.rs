//! Error types for the relatedness core.
//!
//! This module defines the central `Error` enum. Absence is mostly not an
//! error here: releasing an unknown lease, re-diverting a batched sample and
//! re-inserting a known distance are all no-ops, and an unknown sample on a
//! neighbour query is reported through [`NeighborQuery`] rather than `Err`.
//!
//! ## Error Cases
//! - `Store`: the shared SQLite store rejected a statement or transaction.
//! - `InvalidSpecies` / `InvalidGuid`: an identifier failed validation.
//! - `MalformedRecord`: a line-oriented input could not be parsed.
//! - `InvalidComparison`: a self-pair carried a real distance.
//! - `LeaseNotActive`: a wait was requested on a lease that is gone.
//! - `Comparator`: the external distance comparator failed.
//! - `RunFailed`: a coordinated run failed after admission; the lease has
//!   already been released when this surfaces.
//!
//! [`NeighborQuery`]: crate::NeighborQuery

use crate::{ComparatorError, LeaseId, RunState};

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for the relatedness core.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The shared store failed.
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// A species (tenant) name was empty or contained illegal characters.
    #[error("Invalid species: {reason}")]
    InvalidSpecies { reason: String },

    /// A sample identifier was empty or contained whitespace.
    #[error("Invalid guid: {reason}")]
    InvalidGuid { reason: String },

    /// A line-oriented record could not be parsed.
    #[error("Malformed record on line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },

    /// A comparison could not be classified as a distance or a sentinel.
    #[error("Invalid comparison: {reason}")]
    InvalidComparison { reason: String },

    /// The lease being waited on expired or was released by someone else.
    #[error("Lease {0} is no longer active")]
    LeaseNotActive(LeaseId),

    /// The external comparator failed.
    #[error("Comparator error: {0}")]
    Comparator(#[from] ComparatorError),

    /// A coordinated run failed in `stage`. The lease was released first.
    #[error("Run failed while {stage}: {source}")]
    RunFailed {
        stage: RunState,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Returns the innermost error, unwrapping any [`Error::RunFailed`] layer.
    pub fn root(&self) -> &Self {
        match self {
            Self::RunFailed { source, .. } => source.root(),
            other => other,
        }
    }
}
