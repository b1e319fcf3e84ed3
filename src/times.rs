use std::time::SystemTime;

use chrono::{DateTime, TimeZone, Utc};

/// Anything the scheduler can place on the timeline.
///
/// The original value is what the callback receives; `to_instant` is only
/// used to compute dispatch delays.
pub trait ToInstant {
    fn to_instant(&self) -> DateTime<Utc>;
}

impl<Tz: TimeZone> ToInstant for DateTime<Tz> {
    fn to_instant(&self) -> DateTime<Utc> {
        self.with_timezone(&Utc)
    }
}

impl ToInstant for SystemTime {
    fn to_instant(&self) -> DateTime<Utc> {
        (*self).into()
    }
}

/// Infinite fixed-interval sequence: `start`, `start + every`,
/// `start + 2*every`, ...
///
/// Lazy; take as much as you schedule. Consecutive elements differ by
/// exactly `every`.
pub fn periodic(
    start: DateTime<Utc>,
    every: chrono::Duration,
) -> impl Iterator<Item = DateTime<Utc>> + Send {
    std::iter::successors(Some(start), move |t| Some(*t + every))
}
