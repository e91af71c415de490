use chrono::NaiveDate;
use serde::Deserialize;
use serde_repr::Deserialize_repr;

use crate::serde::deserialize_yyyymmdd;

/// Indicates whether service is available on the date specified in the date
/// field.
/// See <https://gtfs.org/schedule/reference/#calendar_datestxt>
#[derive(Deserialize_repr, PartialEq, Eq, Debug, Clone, Copy)]
#[repr(u8)]
pub enum ExceptionType {
    /// Service has been added for the specified date.
    ServiceAdded = 1,

    /// Service has been removed for the specified date.
    ServiceRemoved = 2,
}

/// One row of `calendar_dates.txt`: a per-date exception to the weekly
/// pattern defined in calendar.txt.
/// Primary Key: `(service_id, date)`
/// See <https://gtfs.org/schedule/reference/#calendar_datestxt>
#[derive(Debug, Clone, Deserialize)]
pub struct CalendarDate {
    /// Foreign ID referencing `calendar.service_id`. If a `service_id`
    /// appears in both calendar.txt and calendar_dates.txt, the exception
    /// modifies the service information of the weekly pattern.
    pub service_id: String,

    /// Date when the service exception occurs.
    #[serde(deserialize_with = "deserialize_yyyymmdd")]
    pub date: NaiveDate,

    /// Indicates whether service is available on `date`.
    pub exception_type: ExceptionType,
}
