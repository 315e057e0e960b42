use core::fmt;
use serde::{Deserialize, Serialize};

/// Identifier of a lease row.
///
/// Ids come from an `AUTOINCREMENT` key, so they are unique for the lifetime
/// of the store and increase with creation order. Turn order is ascending id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseId(i64);

impl LeaseId {
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for LeaseId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

/// Represents the result of asking the lease queue for admission.
///
/// - [`Admission::Granted`] carries the caller's lease. The caller now owns
///   exactly one `release` of it.
/// - [`Admission::Batched`] means the queue was saturated and the sample was
///   recorded in the batch for deferred processing. There is nothing to
///   release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A lease was granted, or the guid already held an active one.
    Granted {
        /// The lease to wait on and later release.
        lease: LeaseId,
        /// Activation time in epoch seconds, offset by queue depth.
        start: i64,
    },
    /// The queue was full; the sample was diverted to the batch.
    Batched,
}

impl Admission {
    /// Returns the granted lease, if any.
    pub const fn lease(&self) -> Option<LeaseId> {
        match self {
            Self::Granted { lease, .. } => Some(*lease),
            Self::Batched => None,
        }
    }

    /// Returns the granted lease or panics.
    ///
    /// # Panics
    /// Panics if the sample was batched.
    #[cfg(test)]
    pub fn unwrap_granted(self) -> LeaseId {
        match self {
            Self::Granted { lease, .. } => lease,
            Self::Batched => panic!("expected a granted lease, sample was batched"),
        }
    }
}

/// A lease row as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub id: LeaseId,
    /// The sample that requested the lease; `None` for batch drains.
    pub guid: Option<String>,
    /// Activation time in epoch seconds.
    pub start: i64,
}
