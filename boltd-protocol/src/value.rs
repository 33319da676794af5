//! Decoded PackStream values and graph entities.
//!
//! `Value` is a closed sum type: one variant per PackStream type plus one per
//! supported structure kind, so every dispatch over decoded data is an
//! exhaustive match.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use std::collections::HashMap;

/// A decoded PackStream value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
    Node(Node),
    Relationship(Relationship),
    RelNode(RelNode),
    /// Wire form of a path: nodes, unbound relationships, signed index list.
    Path(Path),
    /// Hydrated form of a path with oriented, bound relationships.
    BoundPath(BoundPath),
    Point2D(Point2D),
    Point3D(Point3D),
    Date(Date),
    Time(Time),
    LocalTime(LocalTime),
    LocalDateTime(LocalDateTime),
    DateTime(DateTime),
    DateTimeZoneId(DateTimeZoneId),
    LegacyDateTime(LegacyDateTime),
    LegacyDateTimeZoneId(LegacyDateTimeZoneId),
    Duration(Duration),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Wire name of the variant, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Node(_) => "node",
            Value::Relationship(_) => "relationship",
            Value::RelNode(_) => "unbound relationship",
            Value::Path(_) => "path",
            Value::BoundPath(_) => "bound path",
            Value::Point2D(_) => "point2d",
            Value::Point3D(_) => "point3d",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::LocalTime(_) => "local time",
            Value::LocalDateTime(_) => "local datetime",
            Value::DateTime(_) => "datetime",
            Value::DateTimeZoneId(_) => "zoned datetime",
            Value::LegacyDateTime(_) => "legacy datetime",
            Value::LegacyDateTimeZoneId(_) => "legacy zoned datetime",
            Value::Duration(_) => "duration",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<HashMap<String, Value>> for Value {
    fn from(v: HashMap<String, Value>) -> Self {
        Value::Map(v)
    }
}

/// A graph node.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Node {
    pub id: i64,
    pub element_id: String,
    pub labels: Vec<String>,
    pub props: HashMap<String, Value>,
}

/// A bound relationship with both endpoints.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Relationship {
    pub id: i64,
    pub element_id: String,
    pub start_id: i64,
    pub start_element_id: String,
    pub end_id: i64,
    pub end_element_id: String,
    pub rel_type: String,
    pub props: HashMap<String, Value>,
}

/// A relationship without endpoints, as carried inside paths.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RelNode {
    pub id: i64,
    pub element_id: String,
    pub name: String,
    pub props: HashMap<String, Value>,
}

/// A path in wire form: the node list, the unbound relationship list and the
/// flattened signed index list that orders them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Path {
    pub nodes: Vec<Node>,
    pub rels: Vec<RelNode>,
    pub indices: Vec<i64>,
}

/// A hydrated path whose relationships carry start/end orientation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoundPath {
    pub nodes: Vec<Node>,
    pub relationships: Vec<Relationship>,
}

/// A point in a 2-dimensional spatial reference system.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Point2D {
    pub spatial_ref_id: u32,
    pub x: f64,
    pub y: f64,
}

/// A point in a 3-dimensional spatial reference system.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Point3D {
    pub spatial_ref_id: u32,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Days since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Date {
    pub days: i64,
}

impl Date {
    pub fn from_naive(d: NaiveDate) -> Self {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        Self {
            days: (d - epoch).num_days(),
        }
    }

    pub fn to_naive(self) -> Option<NaiveDate> {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        chrono::Duration::try_days(self.days).and_then(|d| epoch.checked_add_signed(d))
    }
}

/// Nanoseconds since midnight with a timezone offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Time {
    pub nanoseconds: i64,
    pub tz_offset_seconds: i64,
}

/// Nanoseconds since midnight, no timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LocalTime {
    pub nanoseconds: i64,
}

impl LocalTime {
    pub fn from_naive(t: NaiveTime) -> Self {
        Self {
            nanoseconds: t.num_seconds_from_midnight() as i64 * 1_000_000_000
                + t.nanosecond() as i64,
        }
    }

    pub fn to_naive(self) -> Option<NaiveTime> {
        let secs = (self.nanoseconds / 1_000_000_000) as u32;
        let nanos = (self.nanoseconds % 1_000_000_000) as u32;
        NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
    }
}

/// Seconds plus nanoseconds since the Unix epoch in local wall time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LocalDateTime {
    pub seconds: i64,
    pub nanoseconds: i64,
}

impl LocalDateTime {
    pub fn from_naive(dt: NaiveDateTime) -> Self {
        Self {
            seconds: dt.and_utc().timestamp(),
            nanoseconds: dt.and_utc().timestamp_subsec_nanos() as i64,
        }
    }

    pub fn to_naive(self) -> Option<NaiveDateTime> {
        chrono::DateTime::from_timestamp(self.seconds, self.nanoseconds as u32)
            .map(|dt| dt.naive_utc())
    }
}

/// Absolute (UTC-patched) instant with a fixed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateTime {
    pub seconds: i64,
    pub nanoseconds: i64,
    pub tz_offset_seconds: i64,
}

/// Absolute (UTC-patched) instant with a named zone.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DateTimeZoneId {
    pub seconds: i64,
    pub nanoseconds: i64,
    pub tz_id: String,
}

/// Legacy datetime: local epoch seconds with a fixed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LegacyDateTime {
    pub seconds: i64,
    pub nanoseconds: i64,
    pub tz_offset_seconds: i64,
}

/// Legacy datetime: local epoch seconds with a named zone.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LegacyDateTimeZoneId {
    pub seconds: i64,
    pub nanoseconds: i64,
    pub tz_id: String,
}

/// A temporal amount: months, days, seconds, nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Duration {
    pub months: i64,
    pub days: i64,
    pub seconds: i64,
    pub nanos: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_accessors() {
        assert!(Value::Null.is_null());
        assert_eq!(Value::Int(7).as_int(), Some(7));
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Float(2.5).as_float(), Some(2.5));
        assert_eq!(Value::from("x").as_str(), Some("x"));
        assert_eq!(Value::Int(7).as_str(), None);

        let list = Value::List(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(list.as_list().unwrap().len(), 2);

        let mut m = HashMap::new();
        m.insert("k".to_owned(), Value::Int(1));
        let map = Value::Map(m);
        assert_eq!(map.as_map().unwrap()["k"].as_int(), Some(1));
    }

    #[test]
    fn test_type_names() {
        assert_eq!(Value::Null.type_name(), "null");
        assert_eq!(Value::Node(Node::default()).type_name(), "node");
        assert_eq!(Value::Path(Path::default()).type_name(), "path");
    }

    #[test]
    fn test_date_chrono_roundtrip() {
        let d = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let wire = Date::from_naive(d);
        assert_eq!(wire.to_naive(), Some(d));

        assert_eq!(Date { days: 0 }.to_naive(),
            NaiveDate::from_ymd_opt(1970, 1, 1));
        assert_eq!(Date { days: -1 }.to_naive(),
            NaiveDate::from_ymd_opt(1969, 12, 31));
    }

    #[test]
    fn test_local_time_chrono_roundtrip() {
        let t = NaiveTime::from_hms_nano_opt(23, 59, 59, 123_456_789).unwrap();
        let wire = LocalTime::from_naive(t);
        assert_eq!(wire.to_naive(), Some(t));
    }

    #[test]
    fn test_local_datetime_chrono_roundtrip() {
        let dt = NaiveDate::from_ymd_opt(2001, 9, 9)
            .unwrap()
            .and_hms_nano_opt(1, 46, 40, 500)
            .unwrap();
        let wire = LocalDateTime::from_naive(dt);
        assert_eq!(wire.seconds, 1_000_000_000);
        assert_eq!(wire.nanoseconds, 500);
        assert_eq!(wire.to_naive(), Some(dt));
    }
}
