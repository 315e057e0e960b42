use std::time::{SystemTime, UNIX_EPOCH};

/// A trait for time sources that return a wall-clock timestamp.
///
/// This abstraction allows you to plug in the real system clock, or a mocked
/// time source in tests to step a lease past its TTL without sleeping.
///
/// The unit is **seconds** since the Unix epoch. Lease rows written by one
/// worker are compared against the clock of another, so every implementation
/// used in production must agree on that origin.
///
/// # Example
///
/// ```
/// use relatedness::TimeSource;
///
/// struct FixedTime;
/// impl TimeSource for FixedTime {
///     fn current_secs(&self) -> i64 {
///         1234
///     }
/// }
///
/// let time = FixedTime;
/// assert_eq!(time.current_secs(), 1234);
/// ```
pub trait TimeSource {
    /// Returns the current time in seconds since the Unix epoch.
    fn current_secs(&self) -> i64;
}

impl<T: TimeSource + ?Sized> TimeSource for std::sync::Arc<T> {
    fn current_secs(&self) -> i64 {
        (**self).current_secs()
    }
}

/// The system wall clock.
///
/// Unlike a monotonic timer this can jump when the host clock is adjusted,
/// but it is the only origin that independent processes share.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn current_secs(&self) -> i64 {
        // A clock set before 1970 reads as the epoch itself.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs() as i64)
    }
}
