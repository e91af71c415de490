use core::fmt;

use chrono::NaiveDate;
use serde::de::{self, Error, Unexpected, Visitor};
use serde::Deserializer;

/// Deserializes a GTFS service day in the `YYYYMMDD` format.
pub(crate) fn deserialize_yyyymmdd<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    struct DateVisitor;

    impl<'de> Visitor<'de> for DateVisitor {
        type Value = NaiveDate;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string in the format YYYYMMDD")
        }

        fn visit_str<E>(self, value: &str) -> Result<NaiveDate, E>
        where
            E: de::Error,
        {
            NaiveDate::parse_from_str(value, "%Y%m%d")
                .map_err(|_| de::Error::invalid_value(Unexpected::Str(value), &self))
        }
    }

    deserializer.deserialize_str(DateVisitor)
}
