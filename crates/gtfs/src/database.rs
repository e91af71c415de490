//! An easy-to-query, in-memory view of a GTFS schedule bundle.
//!
//! This is not a generic GTFS API; it is tailored to answering "which trips
//! arrive at these stops, and when". Everything is populated during
//! [`Database::load`] and immutable afterwards, so concurrent readers need
//! no locking.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, LazyLock};

use chrono::{Days, NaiveDate, NaiveDateTime};
use prometheus::{register_int_counter_vec, register_int_gauge, IntCounterVec, IntGauge};

use crate::data_model::calendar::CalendarRow;
use crate::data_model::calendar_dates::{CalendarDate, ExceptionType};
use crate::data_model::routes::Route;
use crate::data_model::stop_times::{parse_extended_time, StopTime};
use crate::data_model::trips::TripRow;
use crate::loader::{self, KeepFilter, LoaderConfig, LoaderError};

static TRIP_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "gtfs_tripdb_requests_total",
        "Requests to the trip table",
        &["found"]
    )
    .expect("metric registration")
});

static LOADED_TRIPS: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!("gtfs_tripdb_loaded_trips", "Trips loaded in the database")
        .expect("metric registration")
});

/// A single scheduled run of a vehicle along a route, with its calls in
/// `stop_sequence` order.
#[derive(Debug, Clone)]
pub struct Trip {
    pub trip_id: String,
    pub headsign: String,
    pub direction_id: String,
    pub service_id: String,
    pub route: Arc<Route>,
    pub stop_times: Vec<StopTime>,
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error(transparent)]
    Loader(#[from] LoaderError),

    #[error("start must come before end")]
    InvalidWindow,
}

pub struct Database {
    /// All calls at each stop of interest, across every trip.
    stop_index: HashMap<String, Vec<StopTime>>,
    trips: HashMap<String, Trip>,
    routes: HashMap<String, Arc<Route>>,
    calendar: HashMap<String, CalendarRow>,
    exceptions: HashMap<String, HashMap<NaiveDate, ExceptionType>>,
}

impl Database {
    /// Loads the GTFS bundle in `data_dir`, keeping only data reachable from
    /// `keep_stops`. An empty `keep_stops` keeps every stop.
    pub fn load(
        data_dir: impl AsRef<Path>,
        keep_stops: &[String],
        config: &LoaderConfig,
    ) -> Result<Self, DatabaseError> {
        let data_dir = data_dir.as_ref();

        let stop_index = load_stop_index(data_dir, keep_stops, config)?;
        let (trips, routes) = load_trips(data_dir, &stop_index, config)?;
        let calendar = load_calendar(data_dir, config)?;
        let exceptions = load_exceptions(data_dir, config)?;

        LOADED_TRIPS.set(trips.len() as i64);

        Ok(Self {
            stop_index,
            trips,
            routes,
            calendar,
            exceptions,
        })
    }

    /// Looks up a trip by id, counting the hit or miss.
    pub fn trip(&self, trip_id: &str) -> Option<&Trip> {
        let found = self.trips.get(trip_id);
        TRIP_REQUESTS
            .with_label_values(&[if found.is_some() { "true" } else { "false" }])
            .inc();
        found
    }

    pub fn route(&self, route_id: &str) -> Option<&Arc<Route>> {
        self.routes.get(route_id)
    }

    /// Whether `trip` runs on `date`, per its service's weekly pattern,
    /// validity window and per-date exceptions.
    pub fn is_valid_service_day(&self, date: NaiveDate, trip: &Trip) -> bool {
        let Some(service) = self.calendar.get(&trip.service_id) else {
            log::error!("service {:?} not found in database", trip.service_id);
            return false;
        };

        if date < service.start_date || date > service.end_date {
            return false;
        }

        let exception = self
            .exceptions
            .get(&trip.service_id)
            .and_then(|dates| dates.get(&date));

        if !service.availability_on(date).is_available() {
            return exception == Some(&ExceptionType::ServiceAdded);
        }
        exception != Some(&ExceptionType::ServiceRemoved)
    }

    /// The trips scheduled to arrive at `stop_id` between `start` and `end`,
    /// both inclusive. A trip that is valid on more than one service date
    /// within the window is returned once per date.
    pub fn scheduled_for(
        &self,
        stop_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<&Trip>, DatabaseError> {
        let Some(calls) = self.stop_index.get(stop_id) else {
            log::error!("stop {:?} not found in database", stop_id);
            return Ok(Vec::new());
        };

        if end < start {
            return Err(DatabaseError::InvalidWindow);
        }

        // Arrivals with hours >= 24 belong to the previous service date, so
        // the candidate scan starts one day early.
        let start_service_date = start.date() - Days::new(1);
        let end_service_date = end.date();

        let mut ret = Vec::new();

        for call in calls {
            let (time, carry) = match parse_extended_time(&call.arrival_time) {
                Ok(parsed) => parsed,
                Err(why) => {
                    log::error!("invalid arrival_time for trip {:?}: {}", call.trip_id, why);
                    continue;
                }
            };

            let mut service_date = start_service_date;
            while service_date <= end_service_date {
                let arrival = (service_date + Days::new(u64::from(carry))).and_time(time);
                if let Some(trip) = self.trip(&call.trip_id) {
                    if self.is_valid_service_day(service_date, trip)
                        && arrival >= start
                        && arrival <= end
                    {
                        ret.push(trip);
                    }
                }
                service_date = service_date + Days::new(1);
            }
        }

        Ok(ret)
    }
}

fn load_stop_index(
    data_dir: &Path,
    keep_stops: &[String],
    config: &LoaderConfig,
) -> Result<HashMap<String, Vec<StopTime>>, DatabaseError> {
    let keep = if keep_stops.is_empty() {
        None
    } else {
        Some(keep_filter("stop_id", keep_stops.iter().cloned()))
    };

    let rows: Vec<StopTime> = loader::load(data_dir.join("stop_times.txt"), config, keep.as_ref())?;

    let mut index: HashMap<String, Vec<StopTime>> = HashMap::new();
    for row in rows {
        index.entry(row.stop_id.clone()).or_default().push(row);
    }
    Ok(index)
}

fn load_trips(
    data_dir: &Path,
    stop_index: &HashMap<String, Vec<StopTime>>,
    config: &LoaderConfig,
) -> Result<(HashMap<String, Trip>, HashMap<String, Arc<Route>>), DatabaseError> {
    let trip_ids: HashSet<String> = stop_index
        .values()
        .flatten()
        .map(|call| call.trip_id.clone())
        .collect();
    let keep = keep_filter("trip_id", trip_ids.into_iter());

    // Re-read stop_times.txt for the complete call list of every referenced
    // trip, not just the calls at the stops of interest.
    let mut stop_times: HashMap<String, Vec<StopTime>> = HashMap::new();
    for row in loader::load::<StopTime>(data_dir.join("stop_times.txt"), config, Some(&keep))? {
        stop_times.entry(row.trip_id.clone()).or_default().push(row);
    }
    // Chunk order is unspecified, but a trip's calls must scan in sequence
    // order.
    for calls in stop_times.values_mut() {
        calls.sort_by_key(|call| call.stop_sequence);
    }

    let mut routes: HashMap<String, Route> =
        loader::load::<Route>(data_dir.join("routes.txt"), config, None)?
            .into_iter()
            .map(|route| (route.route_id.clone(), route))
            .collect();

    let trip_rows: Vec<TripRow> = loader::load(data_dir.join("trips.txt"), config, Some(&keep))?;

    // Copy each route's inferred fields from the first trip observed using
    // it; trips synthesized for ADDED realtime entities borrow these.
    for row in &trip_rows {
        if let Some(route) = routes.get_mut(&row.route_id) {
            if route.inferred_headsign.is_none() {
                route.inferred_headsign = Some(row.trip_headsign.clone());
                route.inferred_direction_id = Some(row.direction_id.clone());
                route.inferred_service_id = Some(row.service_id.clone());
            }
        }
    }

    let routes: HashMap<String, Arc<Route>> = routes
        .into_iter()
        .map(|(route_id, route)| (route_id, Arc::new(route)))
        .collect();

    let mut trips = HashMap::new();
    for row in trip_rows {
        let Some(route) = routes.get(&row.route_id) else {
            log::debug!(
                "trip {:?} references unknown route_id {:?}",
                row.trip_id,
                row.route_id
            );
            continue;
        };

        let calls = stop_times.remove(&row.trip_id).unwrap_or_else(|| {
            log::debug!("trip {:?} has no stop times", row.trip_id);
            Vec::new()
        });

        trips.insert(
            row.trip_id.clone(),
            Trip {
                trip_id: row.trip_id,
                headsign: row.trip_headsign,
                direction_id: row.direction_id,
                service_id: row.service_id,
                route: Arc::clone(route),
                stop_times: calls,
            },
        );
    }

    Ok((trips, routes))
}

fn load_calendar(
    data_dir: &Path,
    config: &LoaderConfig,
) -> Result<HashMap<String, CalendarRow>, DatabaseError> {
    Ok(
        loader::load::<CalendarRow>(data_dir.join("calendar.txt"), config, None)?
            .into_iter()
            .map(|row| (row.service_id.clone(), row))
            .collect(),
    )
}

fn load_exceptions(
    data_dir: &Path,
    config: &LoaderConfig,
) -> Result<HashMap<String, HashMap<NaiveDate, ExceptionType>>, DatabaseError> {
    let mut exceptions: HashMap<String, HashMap<NaiveDate, ExceptionType>> = HashMap::new();
    for row in loader::load::<CalendarDate>(data_dir.join("calendar_dates.txt"), config, None)? {
        exceptions
            .entry(row.service_id)
            .or_default()
            .insert(row.date, row.exception_type);
    }
    Ok(exceptions)
}

fn keep_filter(column: &str, values: impl Iterator<Item = String>) -> KeepFilter {
    KeepFilter::from([(column.to_owned(), values.collect())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_model::calendar::CALENDAR_DAYS;
    use crate::data_model::routes::RouteType;

    const GTFS_DATA: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/schedule");
    const INTERESTING_STOP: &str = "8220DB000490";

    fn database(keep_stops: &[&str]) -> Database {
        let keep: Vec<String> = keep_stops.iter().map(|stop| stop.to_string()).collect();
        Database::load(GTFS_DATA, &keep, &LoaderConfig::default()).expect("load test schedule")
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        date(year, month, day).and_hms_opt(hour, minute, 0).unwrap()
    }

    #[test]
    fn calendar_has_seven_days() {
        assert_eq!(CALENDAR_DAYS.len(), 7);
    }

    #[test]
    fn trip_lookup() {
        let database = database(&[INTERESTING_STOP]);

        let found = database.trip("1167").expect("1167 loads");
        assert_eq!(
            found.headsign,
            "Loughlinstown Wood Estate - Mountjoy Square Nth"
        );

        // 1168 does not call at the interesting stop, so it is not loaded.
        assert!(database.trip("1168").is_none());
    }

    #[test]
    fn interesting_stops_constrain_the_load() {
        let database = database(&[INTERESTING_STOP]);
        assert_eq!(database.trips.len(), 2);

        let t1167 = database.trip("1167").expect("1167 loads");
        assert_eq!(t1167.direction_id, "1");
        assert_eq!(t1167.route.short_name, "7A");
        assert_eq!(t1167.route.route_type, RouteType::Bus);
        assert_eq!(t1167.stop_times.len(), 4);

        let t1169 = database.trip("1169").expect("1169 loads");
        assert_eq!(
            t1169.headsign,
            "Bride's Glen Bus Stop - Mountjoy Square Nth"
        );
        assert_eq!(t1169.route.short_name, "7");
        assert_eq!(t1169.stop_times.len(), 3);
    }

    #[test]
    fn empty_stop_list_loads_everything() {
        let database = database(&[]);
        let mut trip_ids: Vec<&str> = database.trips.keys().map(String::as_str).collect();
        trip_ids.sort_unstable();
        assert_eq!(trip_ids, ["1167", "1168", "1169", "ONIGHT"]);
    }

    #[test]
    fn stop_times_are_ordered_by_sequence() {
        let database = database(&[]);
        let trip = database.trip("1167").expect("1167 loads");
        let sequences: Vec<u32> = trip.stop_times.iter().map(|call| call.stop_sequence).collect();
        assert_eq!(sequences, [1, 30, 40, 64]);
    }

    #[test]
    fn routes_infer_from_their_first_trip() {
        let database = database(&[]);
        let route = database.route("7A-ROUTE").expect("route loads");
        assert_eq!(
            route.inferred_headsign.as_deref(),
            Some("Loughlinstown Wood Estate - Mountjoy Square Nth")
        );
        assert_eq!(route.inferred_direction_id.as_deref(), Some("1"));
        assert_eq!(route.inferred_service_id.as_deref(), Some("SVC-THU"));
    }

    #[test]
    fn scheduled_for_returns_trips_in_the_window() {
        let database = database(&[]);

        let resp = database
            .scheduled_for(INTERESTING_STOP, at(2020, 11, 19, 7, 30), at(2020, 11, 19, 8, 30))
            .expect("window query");
        let trip_ids: Vec<&str> = resp.iter().map(|trip| trip.trip_id.as_str()).collect();
        assert_eq!(trip_ids, ["1167", "1169"]);

        // This trip's service has no exceptions; ensure it still loads and
        // resolves.
        let resp = database
            .scheduled_for("8220DB000819", at(2020, 11, 19, 20, 0), at(2020, 11, 19, 21, 0))
            .expect("window query");
        assert_eq!(resp.len(), 1);
        assert_eq!(resp[0].trip_id, "1168");
    }

    #[test]
    fn scheduled_for_handles_overnight_trips() {
        let database = database(&[]);
        let stop_id = "ONIGHT-STOP2";

        // The 25:30:00 arrival belongs to the previous service date even
        // though it lands after midnight.
        let resp = database
            .scheduled_for(stop_id, at(2020, 11, 19, 23, 0), at(2020, 11, 20, 2, 0))
            .expect("window query");
        assert_eq!(resp.len(), 1);
        assert_eq!(resp[0].trip_id, "ONIGHT");

        let resp = database
            .scheduled_for(stop_id, at(2020, 11, 20, 0, 0), at(2020, 11, 20, 2, 0))
            .expect("window query");
        assert_eq!(resp.len(), 1);
        assert_eq!(resp[0].trip_id, "ONIGHT");

        // A window spanning two valid service days returns the trip twice.
        let resp = database
            .scheduled_for(stop_id, at(2020, 11, 18, 23, 0), at(2020, 11, 20, 2, 0))
            .expect("window query");
        assert_eq!(resp.len(), 2);
        assert!(resp.iter().all(|trip| trip.trip_id == "ONIGHT"));
    }

    #[test]
    fn scheduled_for_rejects_inverted_windows() {
        let database = database(&[INTERESTING_STOP]);
        let start = at(2020, 11, 20, 0, 0);
        let end = at(2020, 11, 20, 2, 0);

        let resp = database.scheduled_for("foo", start, end).expect("unknown stop");
        assert!(resp.is_empty());

        let result = database.scheduled_for(INTERESTING_STOP, end, start);
        assert!(matches!(result, Err(DatabaseError::InvalidWindow)));
    }

    #[test]
    fn scheduled_for_honors_exceptions() {
        let database = database(&[INTERESTING_STOP]);

        // Service removed on this date.
        let resp = database
            .scheduled_for(INTERESTING_STOP, at(2020, 11, 26, 7, 30), at(2020, 11, 26, 8, 30))
            .expect("window query");
        assert!(resp.is_empty());

        // Service added on a day that is otherwise not a service day.
        let resp = database
            .scheduled_for(INTERESTING_STOP, at(2020, 11, 27, 7, 30), at(2020, 11, 27, 8, 30))
            .expect("window query");
        assert_eq!(resp.len(), 2);
    }

    #[test]
    fn malformed_arrival_times_skip_the_call() {
        let database = database(&[]);
        let resp = database
            .scheduled_for("BAD-STOP", at(2020, 11, 19, 0, 0), at(2020, 11, 19, 23, 59))
            .expect("window query");
        assert!(resp.is_empty());
    }

    #[test]
    fn is_valid_service_day_covers_the_calendar() {
        let database = database(&[]);

        let t1167 = database.trip("1167").expect("1167 loads").clone();
        let t1168 = database.trip("1168").expect("1168 loads").clone();
        let t1169 = database.trip("1169").expect("1169 loads").clone();

        // The exceptions only apply to 1167 and 1169; 1168 has none and
        // should behave normally throughout.
        let removed = date(2020, 11, 26);
        assert!(!database.is_valid_service_day(removed, &t1167));
        assert!(!database.is_valid_service_day(removed, &t1169));
        assert!(database.is_valid_service_day(removed, &t1168));

        let added = date(2020, 11, 27);
        assert!(database.is_valid_service_day(added, &t1167));
        assert!(database.is_valid_service_day(added, &t1169));
        assert!(database.is_valid_service_day(added, &t1168));

        let normal = date(2020, 11, 19);
        assert!(database.is_valid_service_day(normal, &t1167));
        assert!(database.is_valid_service_day(normal, &t1169));
        assert!(database.is_valid_service_day(normal, &t1168));

        let saturday = date(2020, 11, 28);
        assert!(!database.is_valid_service_day(saturday, &t1167));
        assert!(!database.is_valid_service_day(saturday, &t1169));
        assert!(!database.is_valid_service_day(saturday, &t1168));

        // 1167 and 1169 run Thursdays only; 1168 runs Mon-Fri, so use it to
        // probe the validity window of 2020-11-04 to 2021-02-25.
        assert!(!database.is_valid_service_day(date(2020, 11, 3), &t1168));
        assert!(database.is_valid_service_day(date(2020, 11, 4), &t1168));
        assert!(database.is_valid_service_day(date(2021, 2, 25), &t1168));
        assert!(!database.is_valid_service_day(date(2021, 2, 26), &t1168));
    }
}
