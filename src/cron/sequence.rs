use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Days, LocalResult, NaiveDate, TimeZone, Timelike};

use crate::clock::Clock;
use crate::cron::{CronField, CronSchedule, FieldSpec, ValueRange};

impl CronSchedule {
    /// Lazily enumerate matching timestamps in `from`'s zone, starting at the
    /// first candidate at or after `from` (whole-second resolution).
    ///
    /// The iterator seeks directly to the start; it does not scan from 1970.
    pub fn iter_from<Tz: TimeZone>(&self, from: DateTime<Tz>) -> CronTimes<Tz> {
        let tz = from.timezone();
        let mut times = CronTimes {
            fields: Expanded::from_schedule(self),
            tz,
            idx: [0; 6],
            done: false,
        };
        times.seek([
            from.year().max(0) as u32,
            from.month(),
            from.day(),
            from.hour(),
            from.minute(),
            from.second(),
        ]);
        times
    }

    /// Matching timestamps strictly after the clock's current time, in `tz`.
    pub fn upcoming<Tz: TimeZone>(&self, tz: Tz, clock: &dyn Clock) -> CronTimes<Tz> {
        let from = clock.now() + chrono::Duration::seconds(1);
        let from = from.with_nanosecond(0).unwrap_or(from);
        self.iter_from(from.with_timezone(&tz))
    }
}

/// Per-field allowed values, expanded and sorted, plus the date filters.
struct Expanded {
    years: Vec<u32>,
    months: Vec<u32>,
    days: Vec<u32>,
    hours: Vec<u32>,
    minutes: Vec<u32>,
    seconds: Vec<u32>,
    /// Keep only the last calendar day of each month.
    last_dom: bool,
    /// Keep only the last occurrence of this weekday (1..=7) in each month.
    last_dow: Option<u32>,
    /// Keep only dates whose weekday is in this set.
    dow_set: Option<Vec<u32>>,
}

impl Expanded {
    fn from_schedule(schedule: &CronSchedule) -> Self {
        let (mut days, last_dom) = match &schedule.day {
            FieldSpec::LastDom => ((21..=31).collect(), true),
            spec => (expand(spec, CronField::Day), false),
        };

        let (dow_set, last_dow) = match &schedule.day_of_week {
            FieldSpec::LastDow(w) => (None, Some(*w)),
            spec => {
                let values = expand(spec, CronField::DayOfWeek);
                if values.len() == 7 {
                    (None, None)
                } else {
                    (Some(values), None)
                }
            }
        };

        // Last-DoW can only land in the final week of a month, so when the
        // day field is unconstrained the candidates shrink to 21..=31.
        if last_dow.is_some() && days.len() == 31 {
            days = (21..=31).collect();
        }

        Expanded {
            years: expand(&schedule.year, CronField::Year),
            months: expand(&schedule.month, CronField::Month),
            days,
            hours: expand(&schedule.hour, CronField::Hour),
            minutes: expand(&schedule.minute, CronField::Minute),
            seconds: expand(&schedule.second, CronField::Second),
            last_dom,
            last_dow,
            dow_set,
        }
    }
}

fn expand(spec: &FieldSpec, field: CronField) -> Vec<u32> {
    let ranges: &[ValueRange] = match spec {
        FieldSpec::Ranges(ranges) => ranges,
        // Flags are handled by the caller; treat a stray one as
        // unconstrained rather than propagating a bad schedule.
        _ => {
            let (lo, hi) = field.bounds();
            return (lo..=hi).collect();
        }
    };
    let mut values = BTreeSet::new();
    for range in ranges {
        let mut v = range.from;
        while v <= range.to {
            values.insert(v);
            v += range.step;
        }
    }
    values.into_iter().collect()
}

/// Lazy sequence of timestamps matching a [`CronSchedule`].
///
/// Candidates are walked odometer-style in calendar order
/// (year > month > day > hour > minute > second); invalid dates
/// (February 31st) and local times skipped by a DST transition are filtered
/// out, ambiguous local times resolve to the earlier offset.
pub struct CronTimes<Tz: TimeZone> {
    fields: Expanded,
    tz: Tz,
    /// Positions into [years, months, days, hours, minutes, seconds].
    idx: [usize; 6],
    done: bool,
}

const YEAR: usize = 0;
const DAY: usize = 2;
const SECOND: usize = 5;

impl<Tz: TimeZone> CronTimes<Tz> {
    fn list(&self, level: usize) -> &[u32] {
        match level {
            0 => &self.fields.years,
            1 => &self.fields.months,
            2 => &self.fields.days,
            3 => &self.fields.hours,
            4 => &self.fields.minutes,
            _ => &self.fields.seconds,
        }
    }

    fn value(&self, level: usize) -> u32 {
        self.list(level)[self.idx[level]]
    }

    /// Position the odometer at the first raw candidate >= the target
    /// components ([y, mo, d, h, min, s]); filters still apply afterwards.
    fn seek(&mut self, target: [u32; 6]) {
        for level in YEAR..=SECOND {
            let list = self.list(level);
            let pos = list.partition_point(|v| *v < target[level]);
            let overflowed = pos == list.len();
            let overshot = !overflowed && list[pos] > target[level];
            if overflowed {
                // Every allowed value here precedes the target: carry.
                for l in level..=SECOND {
                    self.idx[l] = 0;
                }
                self.bump(level as isize - 1);
                return;
            }
            self.idx[level] = pos;
            if overshot {
                for l in level + 1..=SECOND {
                    self.idx[l] = 0;
                }
                return;
            }
        }
    }

    /// Advance the odometer at `from_level`, resetting lower levels and
    /// carrying upward; past the last year the iterator is exhausted.
    fn bump(&mut self, from_level: isize) {
        if from_level < 0 {
            self.done = true;
            return;
        }
        for l in (from_level as usize + 1)..=SECOND {
            self.idx[l] = 0;
        }
        let mut level = from_level;
        while level >= 0 {
            let l = level as usize;
            self.idx[l] += 1;
            if self.idx[l] < self.list(l).len() {
                return;
            }
            self.idx[l] = 0;
            level -= 1;
        }
        self.done = true;
    }

    fn date_matches(&self, date: NaiveDate) -> bool {
        let weekday = date.weekday().number_from_monday();
        if let Some(set) = &self.fields.dow_set {
            if !set.contains(&weekday) {
                return false;
            }
        }
        if self.fields.last_dom {
            let is_last = date
                .succ_opt()
                .map_or(true, |next| next.month() != date.month());
            if !is_last {
                return false;
            }
        }
        if let Some(w) = self.fields.last_dow {
            if weekday != w {
                return false;
            }
            if let Some(next_week) = date.checked_add_days(Days::new(7)) {
                if next_week.month() == date.month() {
                    return false;
                }
            }
        }
        true
    }
}

impl<Tz: TimeZone> Iterator for CronTimes<Tz> {
    type Item = DateTime<Tz>;

    fn next(&mut self) -> Option<DateTime<Tz>> {
        while !self.done {
            let (y, mo, d) = (self.value(0) as i32, self.value(1), self.value(2));
            let date = match NaiveDate::from_ymd_opt(y, mo, d) {
                Some(date) => date,
                // Invalid combination (February 31st): skip the whole day.
                None => {
                    self.bump(DAY as isize);
                    continue;
                }
            };
            if !self.date_matches(date) {
                self.bump(DAY as isize);
                continue;
            }

            let naive = match date.and_hms_opt(self.value(3), self.value(4), self.value(5)) {
                Some(naive) => naive,
                None => {
                    self.bump(SECOND as isize);
                    continue;
                }
            };
            let candidate = match self.tz.from_local_datetime(&naive) {
                LocalResult::Single(dt) => Some(dt),
                LocalResult::Ambiguous(earlier, _) => Some(earlier),
                // Local time skipped by a DST transition.
                LocalResult::None => None,
            };
            self.bump(SECOND as isize);
            if let Some(dt) = candidate {
                return Some(dt);
            }
        }
        None
    }
}
