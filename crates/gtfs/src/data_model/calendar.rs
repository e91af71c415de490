use chrono::{Datelike, NaiveDate, Weekday};
use serde::Deserialize;
use serde_repr::Deserialize_repr;

use crate::serde::deserialize_yyyymmdd;

/// Indicates whether the service operates. Note that exceptions for
/// particular dates may be listed in calendar_dates.txt.
/// See <https://gtfs.org/schedule/reference/#calendartxt>
#[derive(Deserialize_repr, PartialEq, Eq, Debug, Clone, Copy)]
#[repr(u8)]
pub enum ServiceAvailability {
    Unavailable = 0,
    Available = 1,
}

impl ServiceAvailability {
    pub fn is_available(self) -> bool {
        matches!(self, Self::Available)
    }
}

/// The weekday columns of `calendar.txt`, monday first, indexed by
/// `Weekday::num_days_from_monday`.
pub const CALENDAR_DAYS: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

/// Service dates specified using a weekly schedule with start and end dates.
/// Primary Key: `service_id`
/// See <https://gtfs.org/schedule/reference/#calendartxt>
#[derive(Debug, Clone, Deserialize)]
pub struct CalendarRow {
    /// Unique Primary Key. Identifies a set of dates when service is
    /// available for one or more routes.
    pub service_id: String,

    /// Indicates whether the service operates on all Mondays in the date
    /// range specified by `start_date` and `end_date`. Exceptions for
    /// particular dates may be listed in calendar_dates.txt.
    pub monday: ServiceAvailability,

    /// Functions in the same way as `monday` except applies to Tuesdays.
    pub tuesday: ServiceAvailability,

    /// Functions in the same way as `monday` except applies to Wednesdays.
    pub wednesday: ServiceAvailability,

    /// Functions in the same way as `monday` except applies to Thursdays.
    pub thursday: ServiceAvailability,

    /// Functions in the same way as `monday` except applies to Fridays.
    pub friday: ServiceAvailability,

    /// Functions in the same way as `monday` except applies to Saturdays.
    pub saturday: ServiceAvailability,

    /// Functions in the same way as `monday` except applies to Sundays.
    pub sunday: ServiceAvailability,

    /// Start service day for the service interval.
    #[serde(deserialize_with = "deserialize_yyyymmdd")]
    pub start_date: NaiveDate,

    /// End service day for the service interval. This service day is
    /// included in the interval.
    #[serde(deserialize_with = "deserialize_yyyymmdd")]
    pub end_date: NaiveDate,
}

impl CalendarRow {
    /// The weekly availability on the weekday of `date`.
    pub fn availability_on(&self, date: NaiveDate) -> ServiceAvailability {
        match date.weekday() {
            Weekday::Mon => self.monday,
            Weekday::Tue => self.tuesday,
            Weekday::Wed => self.wednesday,
            Weekday::Thu => self.thursday,
            Weekday::Fri => self.friday,
            Weekday::Sat => self.saturday,
            Weekday::Sun => self.sunday,
        }
    }
}
