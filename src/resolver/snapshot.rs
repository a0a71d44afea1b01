//! Naming of the nightly GMP snapshots.
//!
//! Snapshots are cut at 01:00 UTC on a host in Stockholm and named after the
//! local date there. The local day boundary is therefore 02:00 while Sweden
//! is on CET and 03:00 while it is on CEST.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

const CET_OFFSET_HOURS: i64 = 1;
const CEST_OFFSET_HOURS: i64 = 2;
const SNAPSHOT_CUT_HOUR_UTC: i64 = 1;

fn last_sunday(year: i32, month: u32) -> Option<NaiveDate> {
    let next_month = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };

    let last_day = next_month.pred_opt()?;
    let back = last_day.weekday().num_days_from_sunday() as i64;

    Some(last_day - Duration::days(back))
}

/// EU summer time: last Sunday of March to last Sunday of October, switching
/// at 01:00 UTC.
pub fn is_summer_time(instant: DateTime<Utc>) -> bool {
    let year = instant.year();

    let switch = |month| {
        last_sunday(year, month)
            .and_then(|day| day.and_hms_opt(1, 0, 0))
            .map(|at| at.and_utc())
    };

    match (switch(3), switch(10)) {
        (Some(start), Some(end)) => instant >= start && instant < end,
        _ => false,
    }
}

pub fn utc_offset_hours(instant: DateTime<Utc>) -> i64 {
    if is_summer_time(instant) {
        CEST_OFFSET_HOURS
    } else {
        CET_OFFSET_HOURS
    }
}

/// Local hour at which a new snapshot name starts being valid.
pub fn day_boundary_hour(instant: DateTime<Utc>) -> i64 {
    SNAPSHOT_CUT_HOUR_UTC + utc_offset_hours(instant)
}

pub fn snapshot_date(instant: DateTime<Utc>) -> NaiveDate {
    let local = instant.naive_utc() + Duration::hours(utc_offset_hours(instant));

    (local - Duration::hours(day_boundary_hour(instant))).date()
}

/// `YYYYMMDD` stamp of the newest published snapshot.
pub fn snapshot_stamp(clock: &dyn Clock) -> String {
    snapshot_date(clock.now()).format("%Y%m%d").to_string()
}
