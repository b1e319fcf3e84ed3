//! Cron expression compiler.
//!
//! Parses classical whitespace-separated cron expressions into a field-keyed
//! [`CronSchedule`], which lazily enumerates matching zoned timestamps
//! (see [`CronSchedule::iter_from`] / [`CronSchedule::upcoming`]).
//!
//! Supported grammar per field: `*` / `?`, single values, `a-b` ranges,
//! `/step` suffixes, comma lists, `JAN..DEC` and `MON..SUN` names
//! (case-insensitive), `L` in the day field (last day of month) and `<dow>L`
//! in the day-of-week field (last such weekday of the month).

mod sequence;

pub use sequence::CronTimes;

use std::fmt;

use crate::errors::CronError;

/// Field keys of a cron schedule. Day-of-week runs 1 (MON) to 7 (SUN).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CronField {
    Second,
    Minute,
    Hour,
    Day,
    Month,
    DayOfWeek,
    Year,
}

impl CronField {
    /// Inclusive value bounds for this field.
    pub fn bounds(self) -> (u32, u32) {
        match self {
            CronField::Second | CronField::Minute => (0, 59),
            CronField::Hour => (0, 23),
            CronField::Day => (1, 31),
            CronField::Month => (1, 12),
            CronField::DayOfWeek => (1, 7),
            CronField::Year => (1970, 9999),
        }
    }
}

impl fmt::Display for CronField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CronField::Second => "second",
            CronField::Minute => "minute",
            CronField::Hour => "hour",
            CronField::Day => "day",
            CronField::Month => "month",
            CronField::DayOfWeek => "day-of-week",
            CronField::Year => "year",
        };
        f.write_str(name)
    }
}

/// One allowed span of values within a field: `from..=to` stepping by `step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueRange {
    pub from: u32,
    pub to: u32,
    pub step: u32,
}

/// Parsed contents of a single field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FieldSpec {
    Ranges(Vec<ValueRange>),
    /// Day field only: the last calendar day of each month.
    LastDom,
    /// Day-of-week field only: the last occurrence of this weekday (1..=7)
    /// in each month.
    LastDow(u32),
}

impl FieldSpec {
    fn full(field: CronField) -> Self {
        let (lo, hi) = field.bounds();
        FieldSpec::Ranges(vec![ValueRange {
            from: lo,
            to: hi,
            step: 1,
        }])
    }

    fn single(value: u32) -> Self {
        FieldSpec::Ranges(vec![ValueRange {
            from: value,
            to: value,
            step: 1,
        }])
    }
}

/// Field order of the classical five-field expression.
pub const DEFAULT_FIELDS: [CronField; 5] = [
    CronField::Minute,
    CronField::Hour,
    CronField::Day,
    CronField::Month,
    CronField::DayOfWeek,
];

/// A compiled cron expression: per-field allowed values plus the `L` flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    pub(crate) second: FieldSpec,
    pub(crate) minute: FieldSpec,
    pub(crate) hour: FieldSpec,
    pub(crate) day: FieldSpec,
    pub(crate) month: FieldSpec,
    pub(crate) day_of_week: FieldSpec,
    pub(crate) year: FieldSpec,
}

impl CronSchedule {
    /// Parse a classical five-field expression:
    /// `minute hour day month day-of-week`.
    ///
    /// Omitted fields default to: second `[0]`, year unconstrained.
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        Self::parse_with_fields(expr, &DEFAULT_FIELDS)
    }

    /// Parse an expression against a custom field-key list. The expression
    /// must have exactly as many whitespace-separated fields as `fields`.
    ///
    /// Fields absent from the list take defaults: second `[0]`, minute `[0]`,
    /// hour `[0]`, and unconstrained day, month, day-of-week, and year.
    pub fn parse_with_fields(expr: &str, fields: &[CronField]) -> Result<Self, CronError> {
        let tokens: Vec<&str> = expr.split_whitespace().collect();
        if tokens.len() != fields.len() {
            return Err(CronError::FieldCount {
                expected: fields.len(),
                got: tokens.len(),
                expr: expr.to_string(),
            });
        }

        let mut schedule = CronSchedule {
            second: FieldSpec::single(0),
            minute: FieldSpec::single(0),
            hour: FieldSpec::single(0),
            day: FieldSpec::full(CronField::Day),
            month: FieldSpec::full(CronField::Month),
            day_of_week: FieldSpec::full(CronField::DayOfWeek),
            year: FieldSpec::full(CronField::Year),
        };

        for (&field, &token) in fields.iter().zip(&tokens) {
            let spec = parse_field(field, token)?;
            match field {
                CronField::Second => schedule.second = spec,
                CronField::Minute => schedule.minute = spec,
                CronField::Hour => schedule.hour = spec,
                CronField::Day => schedule.day = spec,
                CronField::Month => schedule.month = spec,
                CronField::DayOfWeek => schedule.day_of_week = spec,
                CronField::Year => schedule.year = spec,
            }
        }

        Ok(schedule)
    }
}

fn parse_field(field: CronField, token: &str) -> Result<FieldSpec, CronError> {
    // "L" flags first; they replace the whole field.
    if token.eq_ignore_ascii_case("l") {
        if field == CronField::Day {
            return Ok(FieldSpec::LastDom);
        }
        return Err(CronError::MisplacedFlag {
            field,
            allowed: CronField::Day,
            token: token.to_string(),
        });
    }
    if token.len() > 1 && (token.ends_with('L') || token.ends_with('l')) {
        let prefix = &token[..token.len() - 1];
        if field == CronField::DayOfWeek {
            let dow = parse_value(field, prefix, token)?;
            return Ok(FieldSpec::LastDow(dow));
        }
        // A weekday prefix makes this a misplaced flag; anything else
        // (e.g. the month name JUL) parses normally below.
        if parse_value(CronField::DayOfWeek, prefix, token).is_ok() {
            return Err(CronError::MisplacedFlag {
                field,
                allowed: CronField::DayOfWeek,
                token: token.to_string(),
            });
        }
    }

    let mut ranges = Vec::new();
    for item in token.split(',') {
        ranges.push(parse_item(field, item)?);
    }
    Ok(FieldSpec::Ranges(ranges))
}

fn parse_item(field: CronField, item: &str) -> Result<ValueRange, CronError> {
    let (lo, hi) = field.bounds();

    let (range_part, step) = match item.split_once('/') {
        Some((range_part, step_str)) => {
            let step: u32 = step_str.parse().map_err(|_| CronError::BadToken {
                field,
                token: item.to_string(),
            })?;
            if step == 0 {
                return Err(CronError::ZeroStep {
                    field,
                    token: item.to_string(),
                });
            }
            (range_part, Some(step))
        }
        None => (item, None),
    };

    let (from, to) = if range_part == "*" || range_part == "?" {
        (lo, hi)
    } else if let Some((a, b)) = range_part.split_once('-') {
        (parse_value(field, a, item)?, parse_value(field, b, item)?)
    } else {
        let value = parse_value(field, range_part, item)?;
        // A bare value with a step runs to the field's upper bound.
        match step {
            Some(_) => (value, hi),
            None => (value, value),
        }
    };

    if from > to {
        return Err(CronError::EmptyRange {
            field,
            token: item.to_string(),
            from: from as i64,
            to: to as i64,
        });
    }

    Ok(ValueRange {
        from,
        to,
        step: step.unwrap_or(1),
    })
}

fn parse_value(field: CronField, text: &str, token: &str) -> Result<u32, CronError> {
    let (lo, hi) = field.bounds();

    let value = if let Ok(n) = text.parse::<u32>() {
        n
    } else {
        match symbolic_value(field, text) {
            Some(n) => n,
            None => {
                return Err(CronError::BadToken {
                    field,
                    token: token.to_string(),
                })
            }
        }
    };

    if value < lo || value > hi {
        return Err(CronError::OutOfBounds {
            field,
            token: token.to_string(),
            value: value as i64,
            lo: lo as i64,
            hi: hi as i64,
        });
    }
    Ok(value)
}

fn symbolic_value(field: CronField, text: &str) -> Option<u32> {
    let upper = text.to_ascii_uppercase();
    match field {
        CronField::DayOfWeek => {
            let names = ["MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];
            names.iter().position(|n| *n == upper).map(|i| i as u32 + 1)
        }
        CronField::Month => {
            let names = [
                "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
            ];
            names.iter().position(|n| *n == upper).map(|i| i as u32 + 1)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(spec: &FieldSpec) -> &[ValueRange] {
        match spec {
            FieldSpec::Ranges(r) => r,
            other => panic!("expected ranges, got {:?}", other),
        }
    }

    #[test]
    fn parses_five_field_wildcards() {
        let s = CronSchedule::parse("* * * * *").unwrap();
        assert_eq!(
            ranges(&s.minute),
            &[ValueRange {
                from: 0,
                to: 59,
                step: 1
            }]
        );
        assert_eq!(
            ranges(&s.day),
            &[ValueRange {
                from: 1,
                to: 31,
                step: 1
            }]
        );
        // Omitted fields take their defaults.
        assert_eq!(
            ranges(&s.second),
            &[ValueRange {
                from: 0,
                to: 0,
                step: 1
            }]
        );
        assert_eq!(
            ranges(&s.year),
            &[ValueRange {
                from: 1970,
                to: 9999,
                step: 1
            }]
        );
    }

    #[test]
    fn question_mark_is_unconstrained() {
        let s = CronSchedule::parse("0 12 ? * ?").unwrap();
        assert_eq!(
            ranges(&s.day),
            &[ValueRange {
                from: 1,
                to: 31,
                step: 1
            }]
        );
        assert_eq!(
            ranges(&s.day_of_week),
            &[ValueRange {
                from: 1,
                to: 7,
                step: 1
            }]
        );
    }

    #[test]
    fn parses_lists_ranges_and_steps() {
        let s = CronSchedule::parse("0-55/5 13,18 * * ?").unwrap();
        assert_eq!(
            ranges(&s.minute),
            &[ValueRange {
                from: 0,
                to: 55,
                step: 5
            }]
        );
        assert_eq!(
            ranges(&s.hour),
            &[
                ValueRange {
                    from: 13,
                    to: 13,
                    step: 1
                },
                ValueRange {
                    from: 18,
                    to: 18,
                    step: 1
                }
            ]
        );
    }

    #[test]
    fn bare_value_with_step_runs_to_upper_bound() {
        let s = CronSchedule::parse("5/15 * * * *").unwrap();
        assert_eq!(
            ranges(&s.minute),
            &[ValueRange {
                from: 5,
                to: 59,
                step: 15
            }]
        );
    }

    #[test]
    fn weekday_and_month_names_are_case_insensitive() {
        let s = CronSchedule::parse("15,45 13 ? jun tue").unwrap();
        assert_eq!(
            ranges(&s.month),
            &[ValueRange {
                from: 6,
                to: 6,
                step: 1
            }]
        );
        assert_eq!(
            ranges(&s.day_of_week),
            &[ValueRange {
                from: 2,
                to: 2,
                step: 1
            }]
        );
    }

    #[test]
    fn month_names_ending_in_l_are_not_flags() {
        let s = CronSchedule::parse("0 0 * JUL ?").unwrap();
        assert_eq!(
            ranges(&s.month),
            &[ValueRange {
                from: 7,
                to: 7,
                step: 1
            }]
        );
        let s = CronSchedule::parse("0 0 * may-jul ?").unwrap();
        assert_eq!(
            ranges(&s.month),
            &[ValueRange {
                from: 5,
                to: 7,
                step: 1
            }]
        );
    }

    #[test]
    fn name_ranges_parse() {
        let s = CronSchedule::parse("0 9 * * MON-FRI").unwrap();
        assert_eq!(
            ranges(&s.day_of_week),
            &[ValueRange {
                from: 1,
                to: 5,
                step: 1
            }]
        );
    }

    #[test]
    fn last_dom_flag_in_day_field() {
        let s = CronSchedule::parse("0 0 L * ?").unwrap();
        assert_eq!(s.day, FieldSpec::LastDom);
    }

    #[test]
    fn last_dow_flag_accepts_digit_and_name() {
        let s = CronSchedule::parse("30 10 ? * thuL").unwrap();
        assert_eq!(s.day_of_week, FieldSpec::LastDow(4));
        let s = CronSchedule::parse("30 10 ? * 4L").unwrap();
        assert_eq!(s.day_of_week, FieldSpec::LastDow(4));
    }

    #[test]
    fn misplaced_l_flag_is_rejected() {
        let err = CronSchedule::parse("0 0 * * L").unwrap_err();
        assert!(matches!(
            err,
            CronError::MisplacedFlag {
                field: CronField::DayOfWeek,
                allowed: CronField::Day,
                ..
            }
        ));

        let err = CronSchedule::parse("0 0 friL * *").unwrap_err();
        assert!(matches!(
            err,
            CronError::MisplacedFlag {
                field: CronField::Day,
                allowed: CronField::DayOfWeek,
                ..
            }
        ));
    }

    #[test]
    fn field_count_mismatch_is_rejected() {
        let err = CronSchedule::parse("0 12 *").unwrap_err();
        assert_eq!(
            err,
            CronError::FieldCount {
                expected: 5,
                got: 3,
                expr: "0 12 *".to_string()
            }
        );
    }

    #[test]
    fn out_of_bounds_values_are_rejected_with_context() {
        let err = CronSchedule::parse("75 * * * *").unwrap_err();
        match err {
            CronError::OutOfBounds {
                field,
                value,
                lo,
                hi,
                ..
            } => {
                assert_eq!(field, CronField::Minute);
                assert_eq!((value, lo, hi), (75, 0, 59));
            }
            other => panic!("expected OutOfBounds, got {:?}", other),
        }

        let err = CronSchedule::parse("0 0 32 * ?").unwrap_err();
        assert!(matches!(
            err,
            CronError::OutOfBounds {
                field: CronField::Day,
                value: 32,
                ..
            }
        ));
    }

    #[test]
    fn zero_step_is_rejected() {
        let err = CronSchedule::parse("*/0 * * * *").unwrap_err();
        assert!(matches!(err, CronError::ZeroStep { .. }));
    }

    #[test]
    fn reversed_range_is_rejected() {
        let err = CronSchedule::parse("30-10 * * * *").unwrap_err();
        assert!(matches!(
            err,
            CronError::EmptyRange {
                from: 30,
                to: 10,
                ..
            }
        ));
    }

    #[test]
    fn garbage_token_is_rejected() {
        let err = CronSchedule::parse("banana * * * *").unwrap_err();
        assert!(matches!(err, CronError::BadToken { .. }));
    }

    #[test]
    fn custom_field_list_parses_seconds() {
        let fields = [
            CronField::Second,
            CronField::Minute,
            CronField::Hour,
            CronField::Day,
            CronField::Month,
            CronField::DayOfWeek,
        ];
        let s = CronSchedule::parse_with_fields("30 0 12 * * ?", &fields).unwrap();
        assert_eq!(
            ranges(&s.second),
            &[ValueRange {
                from: 30,
                to: 30,
                step: 1
            }]
        );
        assert_eq!(
            ranges(&s.hour),
            &[ValueRange {
                from: 12,
                to: 12,
                step: 1
            }]
        );
    }

    #[test]
    fn custom_field_list_length_must_match() {
        let err = CronSchedule::parse_with_fields("0 12", &[CronField::Minute]).unwrap_err();
        assert!(matches!(err, CronError::FieldCount { expected: 1, got: 2, .. }));
    }
}
