use super::AdmissionQueue;
use crate::{LeaseId, Result, Species};

/// Scoped ownership of a granted lease.
///
/// The lease is released exactly once: either explicitly through
/// [`LeaseGuard::release`], or when the guard is dropped on any other exit
/// path, including unwinding. Release failures on drop are logged and
/// otherwise ignored; TTL expiry reclaims the row in that case.
///
/// A process killed outright never runs the drop, which is the case the TTL
/// exists for.
#[must_use = "dropping the guard releases the lease immediately"]
pub struct LeaseGuard<'q, Q: AdmissionQueue + ?Sized> {
    queue: &'q Q,
    species: Species,
    lease: LeaseId,
    released: bool,
}

impl<'q, Q: AdmissionQueue + ?Sized> LeaseGuard<'q, Q> {
    /// Takes ownership of an already granted `lease`.
    pub fn new(queue: &'q Q, species: Species, lease: LeaseId) -> Self {
        Self {
            queue,
            species,
            lease,
            released: false,
        }
    }

    pub const fn lease(&self) -> LeaseId {
        self.lease
    }

    pub fn species(&self) -> &Species {
        &self.species
    }

    /// Blocks until the guarded lease reaches the head of the queue.
    pub fn wait(&self) -> Result<()> {
        self.queue.wait(&self.species, self.lease)
    }

    /// Releases the lease now and reports whether the row still existed.
    pub fn release(mut self) -> Result<bool> {
        self.released = true;
        self.queue.release(&self.species, self.lease)
    }
}

impl<Q: AdmissionQueue + ?Sized> Drop for LeaseGuard<'_, Q> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.queue.release(&self.species, self.lease) {
            tracing::error!(
                species = %self.species,
                lease = %self.lease,
                "failed to release lease on drop, left to TTL expiry: {e}"
            );
        }
    }
}
