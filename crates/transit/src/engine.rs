//! The arrival engine: interprets the realtime feed against the static
//! schedule and merges both into one upcoming-arrivals listing.

use std::sync::{Arc, LazyLock};

use chrono::{Days, Duration, Local, NaiveDate, NaiveDateTime, TimeZone};
use indexmap::IndexMap;
use prometheus::{register_int_counter_vec, IntCounterVec};
use prost::Message;
use serde::Serialize;

use gtfs::data_model::realtime::trip_descriptor::ScheduleRelationship;
use gtfs::data_model::realtime::{FeedMessage, TripUpdate};
use gtfs::data_model::routes::RouteType;
use gtfs::data_model::stop_times::StopTime;
use gtfs::database::{Database, DatabaseError, Trip};

use crate::clock::{Clock, SystemClock};
use crate::fetch::{Fetch, FetchError};

static LIVE_TRIP_STATES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "gtfs_live_trips_total",
        "Live trips matching the stops of interest",
        &["state"]
    )
    .expect("metric registration")
});

static IGNORED_ENTITIES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "gtfs_ignored_entities_total",
        "Feed entities ignored because they were not usable trip updates",
        &["reason"]
    )
    .expect("metric registration")
});

#[derive(Debug, thiserror::Error)]
pub enum TransitError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("could not decode realtime feed: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("invalid time {0:?}")]
    InvalidTime(String),
}

/// Where an upcoming arrival was learned from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Source {
    Schedule,
    Live,
}

/// One upcoming arrival at a stop of interest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Upcoming {
    pub trip_id: String,
    pub route: String,
    pub route_type: RouteType,
    pub headsign: String,
    pub direction: String,
    pub stop_id: String,
    pub due_time: String,
    pub due_in_seconds: f64,
    pub source: Source,
    pub canceled: bool,
    pub added_to_schedule: bool,
}

impl Upcoming {
    fn from_trip(
        trip: &Trip,
        stop_id: &str,
        source: Source,
        due: NaiveDateTime,
        current: NaiveDateTime,
        canceled: bool,
        added_to_schedule: bool,
    ) -> Self {
        Self {
            trip_id: trip.trip_id.clone(),
            route: trip.route.short_name.clone(),
            route_type: trip.route.route_type,
            headsign: trip.headsign.clone(),
            direction: trip.direction_id.clone(),
            stop_id: stop_id.to_owned(),
            due_time: due.format("%H:%M:%S").to_string(),
            due_in_seconds: delta_seconds(due, current),
            source,
            canceled,
            added_to_schedule,
        }
    }
}

/// Parses an extended `HH:MM:SS` against a base date. Hours of 24 and above
/// roll into the following days: `27:20:00` is 03:20:00 one day later.
pub fn parse_time(base_date: NaiveDate, value: &str) -> Result<NaiveDateTime, TransitError> {
    let invalid = || TransitError::InvalidTime(value.to_owned());

    let parts: Vec<&str> = value.split(':').collect();
    let &[hour, minute, second] = parts.as_slice() else {
        return Err(invalid());
    };
    let mut hour: u64 = hour.parse().map_err(|_| invalid())?;
    let minute: u32 = minute.parse().map_err(|_| invalid())?;
    let second: u32 = second.parse().map_err(|_| invalid())?;

    let mut date = base_date;
    if hour >= 24 {
        date = date + Days::new(hour / 24);
        hour %= 24;
    }

    let time = chrono::NaiveTime::from_hms_opt(hour as u32, minute, second).ok_or_else(invalid)?;
    Ok(date.and_time(time))
}

/// Signed seconds from `then` to `now`.
pub fn delta_seconds(now: NaiveDateTime, then: NaiveDateTime) -> f64 {
    (now - then).num_seconds() as f64
}

fn local_naive(timestamp: i64) -> Option<NaiveDateTime> {
    Local
        .timestamp_opt(timestamp, 0)
        .single()
        .map(|instant| instant.naive_local())
}

/// Merges the static schedule with the realtime feed.
pub struct Transit {
    fetcher: Arc<dyn Fetch>,
    database: Arc<Database>,
    clock: Arc<dyn Clock>,
}

impl Transit {
    pub fn new(fetcher: Arc<dyn Fetch>, database: Arc<Database>) -> Self {
        Self::with_clock(fetcher, database, Arc::new(SystemClock))
    }

    pub fn with_clock(
        fetcher: Arc<dyn Fetch>,
        database: Arc<Database>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            fetcher,
            database,
            clock,
        }
    }

    fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    /// Fetches and decodes the realtime feed.
    pub async fn load_from_api(&self) -> Result<FeedMessage, TransitError> {
        let raw = self.fetcher.fetch().await?;
        Ok(FeedMessage::decode(raw.as_slice())?)
    }

    /// Arrivals scheduled at the given stops within the next two hours,
    /// sorted by due time.
    pub fn scheduled(&self, interesting_stops: &[String]) -> Result<Vec<Upcoming>, TransitError> {
        let start = self.now();
        let end = start + Duration::minutes(120);

        let mut ret = Vec::new();
        for stop_id in interesting_stops {
            for trip in self.database.scheduled_for(stop_id, start, end)? {
                let Some(call) = trip.stop_times.iter().find(|call| call.stop_id == *stop_id)
                else {
                    continue;
                };
                let due = parse_time(self.now().date(), &call.arrival_time)?;
                ret.push(Upcoming::from_trip(
                    trip,
                    stop_id,
                    Source::Schedule,
                    due,
                    self.now(),
                    false,
                    false,
                ));
            }
        }

        ret.sort_by(|a, b| a.due_in_seconds.total_cmp(&b.due_in_seconds));
        Ok(ret)
    }

    /// Arrivals according to the realtime feed.
    pub async fn live(&self, interesting_stops: &[String]) -> Result<Vec<Upcoming>, TransitError> {
        let message = self.load_from_api().await?;
        let current = self.now();

        let mut ret = Vec::new();
        let mut early = 0u64;
        let mut on_time = 0u64;
        let mut delayed = 0u64;

        for entity in &message.entity {
            let Some(trip_update) = &entity.trip_update else {
                IGNORED_ENTITIES.with_label_values(&["wrong_type"]).inc();
                continue;
            };
            let descriptor = &trip_update.trip;
            let relationship = descriptor.schedule_relationship();
            let scheduled = relationship == ScheduleRelationship::Scheduled;
            let canceled = relationship == ScheduleRelationship::Canceled;
            let added = relationship == ScheduleRelationship::Added;

            let trip_id = descriptor.trip_id();
            let synthesized;
            let trip = match self.database.trip(trip_id) {
                Some(trip) => trip,
                None if added => match self.trip_from_update(trip_update, interesting_stops) {
                    Some(trip) => {
                        synthesized = trip;
                        &synthesized
                    }
                    None => continue,
                },
                None => continue,
            };

            if !(scheduled || canceled || added) {
                log::warn!(
                    "received unexpected schedule_relationship for trip_id {:?}: {}",
                    trip_id,
                    relationship.as_str_name()
                );
                IGNORED_ENTITIES
                    .with_label_values(&["unexpected_schedule_relationship"])
                    .inc();
                continue;
            }

            // The first call at a stop of interest is the one we report on.
            let mut sequence: i64 = -1;
            let mut stop_id = "";
            let mut arrival_time = local_naive(1).unwrap_or_default();
            for call in &trip.stop_times {
                if interesting_stops.contains(&call.stop_id) {
                    stop_id = &call.stop_id;
                    sequence = i64::from(call.stop_sequence);
                    arrival_time = parse_time(current.date(), &call.arrival_time)?;
                    break;
                }
            }

            let mut updated_arrival_time = arrival_time;
            if scheduled {
                for update in &trip_update.stop_time_update {
                    if i64::from(update.stop_sequence()) > sequence {
                        // Nothing past our stop matters.
                        break;
                    }
                    if let Some(arrival) = &update.arrival {
                        if let Some(delay) = arrival.delay {
                            updated_arrival_time += Duration::seconds(delay.into());
                        }
                        if let Some(time) = arrival.time {
                            if let Some(instant) = local_naive(time) {
                                updated_arrival_time = instant;
                            }
                        }
                    }
                }

                if current > updated_arrival_time {
                    // The vehicle has already passed our stop.
                    continue;
                }

                if updated_arrival_time < arrival_time {
                    early += 1;
                } else if updated_arrival_time == arrival_time {
                    on_time += 1;
                } else {
                    delayed += 1;
                }
            }

            ret.push(Upcoming::from_trip(
                trip,
                stop_id,
                Source::Live,
                updated_arrival_time,
                current,
                canceled,
                added,
            ));
        }

        LIVE_TRIP_STATES.with_label_values(&["early"]).inc_by(early);
        LIVE_TRIP_STATES.with_label_values(&["ontime"]).inc_by(on_time);
        LIVE_TRIP_STATES.with_label_values(&["delayed"]).inc_by(delayed);
        log::debug!(
            "live feed: {} entities, {} returned ({} early, {} on time, {} delayed)",
            message.entity.len(),
            ret.len(),
            early,
            on_time,
            delayed
        );

        Ok(ret)
    }

    /// Live arrivals merged with the schedule: live data wins for trips the
    /// feed reports on, canceled trips are dropped, and everything is sorted
    /// by due time.
    pub async fn upcoming(&self, interesting_stops: &[String]) -> Result<Vec<Upcoming>, TransitError> {
        let scheduled = self.scheduled(interesting_stops)?;
        let mut known_trips: IndexMap<String, Upcoming> = scheduled
            .into_iter()
            .map(|entry| (entry.trip_id.clone(), entry))
            .collect();

        let mut ret = self.live(interesting_stops).await?;
        let mut matched = 0usize;
        for entry in &ret {
            if known_trips.shift_remove(&entry.trip_id).is_some() {
                matched += 1;
            }
        }
        ret.extend(known_trips.into_values());
        log::debug!("{} live trips matched a scheduled trip", matched);

        ret.retain(|entry| !entry.canceled);
        ret.sort_by(|a, b| a.due_in_seconds.total_cmp(&b.due_in_seconds));
        Ok(ret)
    }

    /// Builds a trip for an ADDED entity from the update itself. Headsign,
    /// direction and service come from the route's inferred fields; the due
    /// times come from the update's own events, rendered as local wall time.
    fn trip_from_update(
        &self,
        trip_update: &TripUpdate,
        interesting_stops: &[String],
    ) -> Option<Trip> {
        let trip_id = trip_update.trip.trip_id();

        let Some(route) = self.database.route(trip_update.trip.route_id()) else {
            log::debug!(
                "ADDED trip {:?} does not match a known route, skipping",
                trip_id
            );
            return None;
        };

        let mut stop_times = Vec::new();
        for update in &trip_update.stop_time_update {
            let stop_id = update.stop_id();
            if !interesting_stops.iter().any(|stop| stop == stop_id) {
                continue;
            }

            // Departure wins when both events carry a time.
            let mut time = update.arrival.as_ref().and_then(|event| event.time);
            if let Some(departure) = update.departure.as_ref().and_then(|event| event.time) {
                time = Some(departure);
            }
            let Some(wall_time) = time.and_then(local_naive) else {
                log::warn!(
                    "ADDED trip {:?}, stop_id {:?} has no arrival or departure time (ignoring it)",
                    trip_id,
                    stop_id
                );
                continue;
            };

            log::debug!(
                "ADDED trip {:?} has an interesting stop at {:?}, creating a trip",
                trip_id,
                stop_id
            );
            let formatted = wall_time.format("%H:%M:%S").to_string();
            stop_times.push(StopTime {
                trip_id: trip_id.to_owned(),
                arrival_time: formatted.clone(),
                departure_time: formatted,
                stop_id: stop_id.to_owned(),
                stop_sequence: update.stop_sequence(),
            });
        }

        if stop_times.is_empty() {
            log::debug!(
                "ADDED trip {:?} matches a route but does not reference any interesting stops",
                trip_id
            );
            return None;
        }

        Some(Trip {
            trip_id: trip_id.to_owned(),
            headsign: route.inferred_headsign.clone().unwrap_or_default(),
            direction_id: route.inferred_direction_id.clone().unwrap_or_default(),
            service_id: route.inferred_service_id.clone().unwrap_or_default(),
            route: Arc::clone(route),
            stop_times,
        })
    }
}
