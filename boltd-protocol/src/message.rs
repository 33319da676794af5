//! The Bolt message catalog and reply envelope types.

use crate::error::ProtocolError;
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;

/// Protocol message kinds, identified by the structure tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BoltMsg {
    Hello = 0x01,
    Goodbye = 0x02,
    Reset = 0x0F,
    Run = 0x10,
    Begin = 0x11,
    Commit = 0x12,
    Rollback = 0x13,
    DiscardN = 0x2F,
    PullN = 0x3F,
    Telemetry = 0x54,
    Route = 0x66,
    Logon = 0x6A,
    Logoff = 0x6B,
    Success = 0x70,
    Record = 0x71,
    Ignored = 0x7E,
    Failure = 0x7F,
}

impl TryFrom<u8> for BoltMsg {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Ok(match tag {
            0x01 => BoltMsg::Hello,
            0x02 => BoltMsg::Goodbye,
            0x0F => BoltMsg::Reset,
            0x10 => BoltMsg::Run,
            0x11 => BoltMsg::Begin,
            0x12 => BoltMsg::Commit,
            0x13 => BoltMsg::Rollback,
            0x2F => BoltMsg::DiscardN,
            0x3F => BoltMsg::PullN,
            0x54 => BoltMsg::Telemetry,
            0x66 => BoltMsg::Route,
            0x6A => BoltMsg::Logon,
            0x6B => BoltMsg::Logoff,
            0x70 => BoltMsg::Success,
            0x71 => BoltMsg::Record,
            0x7E => BoltMsg::Ignored,
            0x7F => BoltMsg::Failure,
            other => return Err(ProtocolError::UnknownMessageTag(other)),
        })
    }
}

impl fmt::Display for BoltMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BoltMsg::Hello => "HELLO",
            BoltMsg::Goodbye => "GOODBYE",
            BoltMsg::Reset => "RESET",
            BoltMsg::Run => "RUN",
            BoltMsg::Begin => "BEGIN",
            BoltMsg::Commit => "COMMIT",
            BoltMsg::Rollback => "ROLLBACK",
            BoltMsg::DiscardN => "DISCARD",
            BoltMsg::PullN => "PULL",
            BoltMsg::Telemetry => "TELEMETRY",
            BoltMsg::Route => "ROUTE",
            BoltMsg::Logon => "LOGON",
            BoltMsg::Logoff => "LOGOFF",
            BoltMsg::Success => "SUCCESS",
            BoltMsg::Record => "RECORD",
            BoltMsg::Ignored => "IGNORED",
            BoltMsg::Failure => "FAILURE",
        };
        f.write_str(name)
    }
}

/// A hydrated server reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Success(Box<Success>),
    Ignored,
    Failure(DbError),
    Record(Record),
}

/// Query classification reported in Success metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementType {
    Read,
    Write,
    ReadWrite,
    SchemaWrite,
}

/// Metadata of a Success reply. Every field is optional on the wire; absent
/// fields keep their defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Success {
    /// Number of keys the metadata map carried.
    pub num: u32,
    pub fields: Vec<String>,
    pub t_first: i64,
    pub qid: i64,
    pub bookmark: String,
    pub connection_id: String,
    pub server: String,
    pub has_more: bool,
    pub t_last: i64,
    pub statement_type: Option<StatementType>,
    pub db: String,
    pub counters: HashMap<String, Value>,
    pub plan: Option<Box<Plan>>,
    pub profile: Option<Box<ProfiledPlan>>,
    pub notifications: Vec<Notification>,
    pub routing_table: Option<RoutingTable>,
    pub configuration_hints: HashMap<String, Value>,
    pub patches: Vec<String>,
}

impl Default for Success {
    fn default() -> Self {
        Self {
            num: 0,
            fields: Vec::new(),
            t_first: -1,
            qid: -1,
            bookmark: String::new(),
            connection_id: String::new(),
            server: String::new(),
            has_more: false,
            t_last: -1,
            statement_type: None,
            db: String::new(),
            counters: HashMap::new(),
            plan: None,
            profile: None,
            notifications: Vec::new(),
            routing_table: None,
            configuration_hints: HashMap::new(),
            patches: Vec::new(),
        }
    }
}

const CONTAINS_SYSTEM_UPDATES_KEY: &str = "contains-system-updates";
const CONTAINS_UPDATES_KEY: &str = "contains-updates";

impl Success {
    /// Integer counters from the stats map, excluding the boolean flags.
    pub fn int_counters(&self) -> HashMap<String, i64> {
        self.counters
            .iter()
            .filter(|(k, _)| {
                k.as_str() != CONTAINS_SYSTEM_UPDATES_KEY && k.as_str() != CONTAINS_UPDATES_KEY
            })
            .filter_map(|(k, v)| v.as_int().map(|i| (k.clone(), i)))
            .collect()
    }

    /// One of the boolean stats flags, if present.
    pub fn bool_counter(&self, key: &str) -> Option<bool> {
        self.counters.get(key).and_then(Value::as_bool)
    }
}

/// Whether a stats map key carries a boolean flag rather than a count.
pub(crate) fn is_bool_stat(key: &str) -> bool {
    key == CONTAINS_SYSTEM_UPDATES_KEY || key == CONTAINS_UPDATES_KEY
}

/// Failure metadata: an error code and a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DbError {
    pub code: String,
    pub message: String,
}

impl DbError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// One result row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    pub values: Vec<Value>,
}

/// Cluster routing table carried in Success metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoutingTable {
    pub time_to_live: i64,
    pub database_name: String,
    pub routers: Vec<String>,
    pub readers: Vec<String>,
    pub writers: Vec<String>,
}

/// An execution plan node.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Plan {
    pub operation: String,
    pub arguments: HashMap<String, Value>,
    pub identifiers: Vec<String>,
    pub children: Vec<Plan>,
}

/// An executed (profiled) plan node with runtime counters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProfiledPlan {
    pub operation: String,
    pub arguments: HashMap<String, Value>,
    pub identifiers: Vec<String>,
    pub db_hits: i64,
    pub records: i64,
    pub page_cache_misses: i64,
    pub page_cache_hits: i64,
    pub page_cache_hit_ratio: f64,
    pub time: i64,
    pub children: Vec<ProfiledPlan>,
}

/// A server notification attached to a Success reply.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Notification {
    pub code: String,
    pub title: String,
    pub description: String,
    pub severity: String,
    pub category: String,
    pub position: Option<InputPosition>,
}

/// Source position a notification refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputPosition {
    pub line: i64,
    pub column: i64,
    pub offset: i64,
}
