use chrono::NaiveTime;
use serde::Deserialize;

/// One row of `stop_times.txt`: a single call of a trip at a stop.
/// Primary Key: `(trip_id, stop_sequence)`
/// See <https://gtfs.org/schedule/reference/#stop_timestxt>
#[derive(Debug, Clone, Deserialize)]
pub struct StopTime {
    /// Foreign ID referencing `trips.trip_id`.
    pub trip_id: String,

    /// Arrival time at the stop in extended `HH:MM:SS`. For times occurring
    /// after midnight on the service day the hour exceeds 24 (`25:30:00` is
    /// 01:30:00 on the following day). Kept verbatim: parsing happens at
    /// query time, so a malformed value only skips this row.
    pub arrival_time: String,

    /// Departure time from the stop in extended `HH:MM:SS`.
    pub departure_time: String,

    /// Foreign ID referencing `stops.stop_id`. Identifies the serviced stop.
    pub stop_id: String,

    /// Order of the call within the trip. Values must increase along the
    /// trip but need not be consecutive.
    pub stop_sequence: u32,
}

/// An extended time string that did not parse.
#[derive(Debug, thiserror::Error)]
#[error("invalid extended time {0:?}")]
pub struct ExtendedTimeError(pub String);

/// Splits an extended GTFS time into a time of day and a day carry:
/// `25:30:00` becomes (`01:30:00`, 1 day). Hours of 48 and beyond do not
/// occur in schedule data and are rejected.
pub fn parse_extended_time(value: &str) -> Result<(NaiveTime, u32), ExtendedTimeError> {
    let invalid = || ExtendedTimeError(value.to_owned());

    let parts: Vec<&str> = value.split(':').collect();
    let &[hour, minute, second] = parts.as_slice() else {
        return Err(invalid());
    };
    let mut hour: u32 = hour.parse().map_err(|_| invalid())?;
    let minute: u32 = minute.parse().map_err(|_| invalid())?;
    let second: u32 = second.parse().map_err(|_| invalid())?;

    let mut carry = 0;
    if hour >= 24 {
        hour -= 24;
        carry = 1;
    }

    let time = NaiveTime::from_hms_opt(hour, minute, second).ok_or_else(invalid)?;
    Ok((time, carry))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_day_times_carry_nothing() {
        let (time, carry) = parse_extended_time("07:20:16").expect("parse");
        assert_eq!(time, NaiveTime::from_hms_opt(7, 20, 16).unwrap());
        assert_eq!(carry, 0);
    }

    #[test]
    fn hours_past_midnight_carry_one_day() {
        let (time, carry) = parse_extended_time("25:30:00").expect("parse");
        assert_eq!(time, NaiveTime::from_hms_opt(1, 30, 0).unwrap());
        assert_eq!(carry, 1);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_extended_time("sometime soon").is_err());
        assert!(parse_extended_time("07:20").is_err());
        assert!(parse_extended_time("07:20:16:00").is_err());
        assert!(parse_extended_time("26:99:00").is_err());
        // Only one day rolls over; 49:00 would still leave an hour of 25.
        assert!(parse_extended_time("49:00:00").is_err());
    }
}
