use serde::Deserialize;

/// One row of `trips.txt`. A trip is a sequence of two or more stops that
/// occur during a specific time period.
/// Primary Key: `trip_id`
/// See <https://gtfs.org/schedule/reference/#tripstxt>
#[derive(Debug, Clone, Deserialize)]
pub struct TripRow {
    /// Foreign ID referencing `routes.route_id`.
    pub route_id: String,

    /// Foreign ID referencing `calendar.service_id` or
    /// `calendar_dates.service_id`. Identifies the set of dates when service
    /// is available for this trip.
    pub service_id: String,

    /// Unique Primary Key. Identifies a trip.
    pub trip_id: String,

    /// Text that appears on signage identifying the trip's destination to
    /// riders.
    #[serde(default)]
    pub trip_headsign: String,

    /// Indicates the direction of travel for a trip ("0" or "1"). Not used
    /// for routing; it separates trips by direction when publishing time
    /// tables.
    #[serde(default)]
    pub direction_id: String,
}
