// Per-field cron correctness over sampled enumerations.

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc, Weekday};

use carillon::CronSchedule;

fn sample(expr: &str, from: DateTime<Utc>, n: usize) -> Vec<DateTime<Utc>> {
    CronSchedule::parse(expr)
        .unwrap_or_else(|e| panic!("'{expr}' should parse: {e}"))
        .iter_from(from)
        .take(n)
        .collect()
}

fn jan_1_2025() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

#[test]
fn noon_daily_pins_hour_and_minute() {
    let times = sample("0 12 * * ?", jan_1_2025(), 48);
    for t in &times {
        assert_eq!(t.hour(), 12);
        assert_eq!(t.minute(), 0);
        assert_eq!(t.second(), 0);
    }
    // One match per day.
    for pair in times.windows(2) {
        assert_eq!(pair[1] - pair[0], chrono::Duration::days(1));
    }
}

#[test]
fn stepped_minutes_with_two_hours_alternate_within_a_day() {
    let times = sample("0-55/5 13,18 * * ?", jan_1_2025(), 48);
    // 12 matches per hour, hours 13 and 18, so 24 per day.
    for t in &times {
        assert_eq!(t.minute() % 5, 0);
        assert!(t.minute() <= 55);
        assert!(t.hour() == 13 || t.hour() == 18);
    }
    let first_day: Vec<_> = times.iter().take(24).collect();
    assert!(first_day.iter().all(|t| t.day() == 1), "day constant in a run");
    assert_eq!(first_day.iter().filter(|t| t.hour() == 13).count(), 12);
    assert_eq!(first_day.iter().filter(|t| t.hour() == 18).count(), 12);
    // Hours come in order within the day.
    assert!(first_day[0].hour() == 13 && first_day[23].hour() == 18);
}

#[test]
fn minute_range_yields_six_consecutive_minutes() {
    let times = sample("0-5 13 * * ?", jan_1_2025(), 12);
    let minutes: Vec<u32> = times.iter().take(6).map(|t| t.minute()).collect();
    assert_eq!(minutes, vec![0, 1, 2, 3, 4, 5]);
    for t in &times {
        assert_eq!(t.hour(), 13);
    }
    // The next day repeats the block.
    assert_eq!(times[6].day(), times[0].day() + 1);
    assert_eq!(times[6].minute(), 0);
}

#[test]
fn june_tuesdays_at_quarter_marks() {
    let times = sample("15,45 13 ? 6 TUE", jan_1_2025(), 16);
    for t in &times {
        assert_eq!(t.month(), 6);
        assert_eq!(t.weekday(), Weekday::Tue);
        assert_eq!(t.hour(), 13);
        assert!(t.minute() == 15 || t.minute() == 45);
    }
    // June 2025 has four Tuesdays after the 1st week: 3, 10, 17, 24 — eight
    // matches that year, so the sample spans two years.
    assert_eq!(times[0].year(), 2025);
    assert_eq!(times[8].year(), 2026);
}

#[test]
fn last_thursday_of_each_month() {
    let times = sample("30 10 ? * thuL", jan_1_2025(), 12);
    for t in &times {
        assert_eq!(t.weekday(), Weekday::Thu);
        assert_eq!((t.hour(), t.minute()), (10, 30));
        // No Thursday later in the same month.
        let week_later = *t + chrono::Duration::days(7);
        assert_ne!(week_later.month(), t.month(), "{t} is not the last Thursday");
    }
    // Exactly one match per month.
    let months: Vec<u32> = times.iter().map(|t| t.month()).collect();
    assert_eq!(months, (1..=12).collect::<Vec<_>>());
}

#[test]
fn every_five_minutes_are_multiples_of_five() {
    let times = sample("*/5 * * * *", jan_1_2025(), 100);
    for t in &times {
        assert_eq!(t.minute() % 5, 0);
    }
    for pair in times.windows(2) {
        assert_eq!(pair[1] - pair[0], chrono::Duration::minutes(5));
    }
}

#[test]
fn last_day_of_month_across_a_leap_year() {
    let times = sample("0 0 L * ?", Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(), 12);
    let days: Vec<(u32, u32)> = times.iter().map(|t| (t.month(), t.day())).collect();
    assert_eq!(
        days,
        vec![
            (1, 31),
            (2, 29),
            (3, 31),
            (4, 30),
            (5, 31),
            (6, 30),
            (7, 31),
            (8, 31),
            (9, 30),
            (10, 31),
            (11, 30),
            (12, 31),
        ]
    );
}

#[test]
fn zoned_enumeration_stays_in_the_requested_zone() {
    let tz: chrono_tz::Tz = "America/New_York".parse().unwrap();
    let from = tz.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
    let times: Vec<_> = CronSchedule::parse("0 12 * * ?")
        .unwrap()
        .iter_from(from)
        .take(3)
        .collect();
    for t in &times {
        assert_eq!(t.hour(), 12, "noon in local time");
        // EDT is UTC-4 in June.
        assert_eq!(t.with_timezone(&Utc).hour(), 16);
    }
}
