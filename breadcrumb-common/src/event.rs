use std::fmt;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Enumeration of errors that can occur while decoding an inbound payload.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("received empty payload")]
    Empty,
    #[error("payload is not a valid breadcrumb: {0}")]
    Json(#[from] serde_json::Error),
}

/// A single payload field as received.
///
/// Upstream producers either omit a key, send it with a JSON null, or send a value.
/// Some validation rules only care about the key being there, so the three cases
/// are kept apart instead of being folded into an `Option`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Field<T> {
    /// The key was not in the payload.
    Absent,
    /// The key was in the payload with a null value.
    Null,
    Present(T),
}

impl<T> Field<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Field::Present(value) => Some(value),
            Field::Absent | Field::Null => None,
        }
    }

    /// True when the key was sent, whether or not it carried a value.
    pub fn has_key(&self) -> bool {
        !matches!(self, Field::Absent)
    }
}

impl<T: Copy> Field<T> {
    pub fn get(&self) -> Option<T> {
        self.value().copied()
    }
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Field::Absent
    }
}

impl<T> From<Option<T>> for Field<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Field::Present(value),
            None => Field::Null,
        }
    }
}

/// Missing keys never reach this impl: they are filled in by `#[serde(default)]` as `Absent`.
impl<'de, T> Deserialize<'de> for Field<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Field::from)
    }
}

/// Integer fields sometimes arrive as JSON floats such as `12.0`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawInteger {
    Int(i64),
    Float(f64),
}

impl RawInteger {
    /// Integral floats are read as integers; anything with a fractional part is an error.
    fn integral<E: serde::de::Error>(self) -> Result<i64, E> {
        match self {
            RawInteger::Int(value) => Ok(value),
            RawInteger::Float(value)
                if value.fract() == 0.0
                    && value >= i64::MIN as f64
                    && value < i64::MAX as f64 =>
            {
                Ok(value as i64)
            }
            RawInteger::Float(value) => Err(E::custom(format!(
                "expected an integer, found {}",
                value
            ))),
        }
    }
}

fn integral_field<'de, D>(deserializer: D) -> Result<Field<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<RawInteger>::deserialize(deserializer)?
        .map(RawInteger::integral::<D::Error>)
        .transpose()
        .map(Field::from)
}

/// Vehicle and trip identifiers. Producers send them as numbers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(String);

impl Identifier {
    pub fn new(value: impl Into<String>) -> Self {
        Identifier(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Identifier(value.to_owned())
    }
}

impl From<i64> for Identifier {
    fn from(value: i64) -> Self {
        Identifier(value.to_string())
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawIdentifier {
            Number(RawInteger),
            Text(String),
        }

        Ok(match RawIdentifier::deserialize(deserializer)? {
            RawIdentifier::Number(number) => Identifier::from(number.integral::<D::Error>()?),
            RawIdentifier::Text(text) => Identifier(text),
        })
    }
}

/// Correlates consecutive breadcrumbs of the same vehicle on the same trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PairKey {
    pub vehicle_id: Option<Identifier>,
    pub trip_id: Option<Identifier>,
}

/// One GPS sample for a vehicle at a point in time.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct BreadcrumbEvent {
    #[serde(rename = "VEHICLE_ID", default)]
    pub vehicle_id: Field<Identifier>,
    #[serde(rename = "EVENT_NO_TRIP", default)]
    pub trip_id: Field<Identifier>,
    /// Service date as sent upstream, e.g. `14DEC2022:00:00:00`.
    #[serde(rename = "OPD_DATE", default)]
    pub service_date: Field<String>,
    #[serde(rename = "ACT_TIME", default, deserialize_with = "integral_field")]
    pub seconds_since_midnight: Field<i64>,
    #[serde(rename = "GPS_LATITUDE", default)]
    pub latitude: Field<f64>,
    #[serde(rename = "GPS_LONGITUDE", default)]
    pub longitude: Field<f64>,
    #[serde(rename = "METERS", default)]
    pub odometer_meters: Field<f64>,
    #[serde(rename = "GPS_HDOP", default)]
    pub hdop: Field<f64>,
    #[serde(rename = "GPS_SATELLITES", default, deserialize_with = "integral_field")]
    pub satellite_count: Field<i64>,
    /// Set by pairing; producers normally leave it out.
    #[serde(rename = "SPEED", default)]
    pub speed: Field<f64>,
}

impl BreadcrumbEvent {
    /// Decode a raw payload into a `BreadcrumbEvent`.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.is_empty() {
            return Err(DecodeError::Empty);
        }

        Ok(serde_json::from_slice(payload)?)
    }

    pub fn pair_key(&self) -> PairKey {
        PairKey {
            vehicle_id: self.vehicle_id.value().cloned(),
            trip_id: self.trip_id.value().cloned(),
        }
    }

    /// Wall-clock time of the sample: the service date plus `ACT_TIME` seconds.
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        let service_date = parse_service_date(self.service_date.value()?)?;
        let seconds = self.seconds_since_midnight.get()?;

        service_date
            .and_hms_opt(0, 0, 0)?
            .checked_add_signed(Duration::try_seconds(seconds)?)
    }
}

/// Parse an upstream service date. Only the leading `DDMONYYYY` part is significant,
/// anything after the first `:` is a zeroed time of day.
pub fn parse_service_date(raw: &str) -> Option<NaiveDate> {
    let date = raw.split(':').next()?;
    NaiveDate::parse_from_str(date, "%d%b%Y").ok()
}
