pub mod calendar;
pub mod calendar_dates;
pub mod routes;
pub mod stop_times;
pub mod trips;

pub mod realtime {
    include!(concat!(env!("OUT_DIR"), "/protobuf/transit_realtime.rs"));
}
