use serde::{Deserialize, Serialize, Serializer};
use serde_repr::Deserialize_repr;

/// Indicates the type of transportation used on a route.
/// See <https://gtfs.org/schedule/reference/#routestxt>
///
/// Deserialized from the numeric GTFS code; serialized as the enumerated
/// name (`"BUS"`, `"CABLE_TRAM"`, ...).
#[derive(Deserialize_repr, PartialEq, Eq, Debug, Clone, Copy)]
#[repr(u8)]
pub enum RouteType {
    /// Tram, Streetcar, Light rail.
    /// Any light rail or street level system within a metropolitan area.
    Tram = 0,

    /// Subway, Metro. Any underground rail system within a metropolitan area.
    Subway = 1,

    /// Rail. Used for intercity or long-distance travel.
    Rail = 2,

    /// Bus. Used for short- and long-distance bus routes.
    Bus = 3,

    /// Ferry. Used for short- and long-distance boat service.
    Ferry = 4,

    /// Cable tram. Used for street-level rail cars where the cable runs
    /// beneath the vehicle.
    CableTram = 5,

    /// Aerial lift, suspended cable car (e.g., gondola lift, aerial tramway).
    AerialLift = 6,

    /// Funicular. Any rail system designed for steep inclines.
    Funicular = 7,

    /// Trolleybus. Electric buses that draw power from overhead wires using
    /// poles.
    Trolleybus = 11,

    /// Monorail. Railway in which the track consists of a single rail or a
    /// beam.
    Monorail = 12,
}

impl RouteType {
    /// The enumerated name used in API responses.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tram => "TRAM",
            Self::Subway => "SUBWAY",
            Self::Rail => "RAIL",
            Self::Bus => "BUS",
            Self::Ferry => "FERRY",
            Self::CableTram => "CABLE_TRAM",
            Self::AerialLift => "AERIAL_LIFT",
            Self::Funicular => "FUNICULAR",
            Self::Trolleybus => "TROLLEYBUS",
            Self::Monorail => "MONORAIL",
        }
    }
}

impl Serialize for RouteType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// Transit routes. A route is a group of trips that are displayed to riders
/// as a single service.
/// Primary Key: `route_id`
/// See <https://gtfs.org/schedule/reference/#routestxt>
#[derive(Debug, Clone, Deserialize)]
pub struct Route {
    /// Unique Primary Key. Identifies a route.
    pub route_id: String,

    /// Short name of a route, often a short, abstract identifier like "32"
    /// or "100X" that riders use to identify the route.
    #[serde(rename = "route_short_name", default)]
    pub short_name: String,

    /// Full name of a route, generally more descriptive than the short name
    /// and often including the route's destination or stop.
    #[serde(rename = "route_long_name", default)]
    pub long_name: String,

    /// Indicates the type of transportation used on the route.
    pub route_type: RouteType,

    /// Headsign of the first trip observed using this route. An ADDED
    /// realtime trip carries no headsign of its own, so a trip synthesized
    /// for one borrows this.
    #[serde(skip)]
    pub inferred_headsign: Option<String>,

    /// `direction_id` of the first trip observed using this route.
    #[serde(skip)]
    pub inferred_direction_id: Option<String>,

    /// `service_id` of the first trip observed using this route.
    #[serde(skip)]
    pub inferred_service_id: Option<String>,
}
