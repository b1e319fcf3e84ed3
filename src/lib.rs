//! Time-driven job scheduling over lazy sequences of instants.
//!
//! A schedule is one `(times, callback)` pair: a lazy, possibly infinite,
//! non-decreasing sequence of time-convertibles and a callback fired at each
//! one on a dedicated worker task. Around that core:
//!
//! - [`chime_at`] / [`chime_at_with`] — start a schedule; the returned
//!   [`ScheduleHandle`] is both the whole schedule (close, wait, pending)
//!   and its pending next firing (cancel, remaining delay).
//! - [`CronSchedule`] — compile classical cron expressions (including `L`
//!   flags) into lazy zoned time sequences.
//! - [`Coordinator`] — compose many named schedules behind one id map.
//! - [`chime_ch`] — deliver chimes through a bounded queue instead of a
//!   callback.
//! - [`times::periodic`] and the [`ToInstant`] trait — fixed-interval
//!   generators and the time-sequence contract.
//!
//! Overdue times fire immediately in FIFO order (push-forward) unless
//! [`ScheduleOptions::drop_overruns`] selects catch-up. Callback failures
//! are routed to an error handler that decides whether the schedule
//! continues. Every "now" read goes through a [`Clock`], injectable for
//! tests.
//!
//! ```no_run
//! use carillon::{chime_at, times};
//! use chrono::Utc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let start = Utc::now() + chrono::Duration::seconds(1);
//!     let schedule = chime_at(
//!         times::periodic(start, chrono::Duration::seconds(30)).take(3),
//!         |t| async move {
//!             println!("chime at {t}");
//!             Ok(())
//!         },
//!     );
//!     schedule.wait().await;
//! }
//! ```

pub mod channel;
pub mod clock;
pub mod coordinator;
pub mod cron;
pub mod errors;
pub mod schedule;
pub mod times;

pub use channel::{chime_ch, ChannelOptions, ChimeStream, OverflowPolicy};
pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{Coordinator, CoordinatorOptions, Job};
pub use cron::{CronField, CronSchedule, CronTimes};
pub use errors::{CronError, Error};
pub use schedule::{chime_at, chime_at_with, Completion, ScheduleHandle, ScheduleOptions};
pub use times::{periodic, ToInstant};
