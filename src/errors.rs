use thiserror::Error;

use crate::cron::CronField;

/// Errors surfaced by schedule handles and the channel adapter.
#[derive(Debug, Error)]
pub enum Error {
    /// `append` was called on a schedule that was not opened in mutable mode.
    #[error("schedule is immutable: appends require mutable mode")]
    ImmutableSchedule,

    /// `append_relative_to_last` was called before any time was ever queued.
    #[error("no last time to offset from: the schedule was never seeded")]
    NoLastTime,

    /// The running callback was interrupted by `shutdown_now` or
    /// `cancel_current(true)`. Delivered to the error handler, which may
    /// downcast and decide whether the schedule continues.
    #[error("chime callback interrupted")]
    Interrupted,

    /// The read end of a chime channel was closed while a chime was being
    /// delivered.
    #[error("chime channel closed")]
    ChannelClosed,
}

/// Cron expression parse failure, with the offending field and token.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CronError {
    #[error("expected {expected} fields, got {got} in '{expr}'")]
    FieldCount {
        expected: usize,
        got: usize,
        expr: String,
    },

    #[error("cannot parse token '{token}' in the {field} field")]
    BadToken { field: CronField, token: String },

    #[error("value {value} out of bounds {lo}..={hi} for the {field} field (token '{token}')")]
    OutOfBounds {
        field: CronField,
        token: String,
        value: i64,
        lo: i64,
        hi: i64,
    },

    #[error("empty range '{token}' in the {field} field: {from} > {to}")]
    EmptyRange {
        field: CronField,
        token: String,
        from: i64,
        to: i64,
    },

    #[error("step must be positive in '{token}' ({field} field)")]
    ZeroStep { field: CronField, token: String },

    #[error("'{token}' is only valid in the {allowed} field, not {field}")]
    MisplacedFlag {
        field: CronField,
        allowed: CronField,
        token: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immutable_schedule_display() {
        assert_eq!(
            Error::ImmutableSchedule.to_string(),
            "schedule is immutable: appends require mutable mode"
        );
    }

    #[test]
    fn interrupted_display() {
        assert_eq!(Error::Interrupted.to_string(), "chime callback interrupted");
    }

    #[test]
    fn out_of_bounds_carries_context() {
        let err = CronError::OutOfBounds {
            field: CronField::Minute,
            token: "75".to_string(),
            value: 75,
            lo: 0,
            hi: 59,
        };
        let text = err.to_string();
        assert!(text.contains("75"));
        assert!(text.contains("0..=59"));
        assert!(text.contains("minute"));
    }

    #[test]
    fn field_count_display() {
        let err = CronError::FieldCount {
            expected: 5,
            got: 3,
            expr: "0 12 *".to_string(),
        };
        assert_eq!(err.to_string(), "expected 5 fields, got 3 in '0 12 *'");
    }

    #[test]
    fn interrupted_downcasts_through_anyhow() {
        let any: anyhow::Error = Error::Interrupted.into();
        assert!(any.is::<Error>());
        assert!(matches!(
            any.downcast_ref::<Error>(),
            Some(Error::Interrupted)
        ));
    }
}
