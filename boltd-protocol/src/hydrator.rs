//! Hydration of raw message buffers into typed messages and values.
//!
//! Two entry points:
//!
//! - [`unpack_request`] decodes an inbound request into its tag byte and
//!   positional fields. Requests carry plain values only; structures inside
//!   request fields are rejected.
//! - [`Hydrator`] decodes reply messages (Success, Ignored, Failure, Record),
//!   including nested graph entities, spatial points and temporal values.
//!   Unknown Success metadata keys are read and discarded so the decoder
//!   stays synchronized with the stream.

use crate::error::ProtocolError;
use crate::marker::PackType;
use crate::message::{
    is_bool_stat, BoltMsg, DbError, InputPosition, Notification, Plan, ProfiledPlan, Record,
    Reply, RoutingTable, StatementType, Success,
};
use crate::pack::Unpacker;
use crate::value::{
    BoundPath, Date, DateTime, DateTimeZoneId, Duration, LegacyDateTime, LegacyDateTimeZoneId,
    LocalDateTime, LocalTime, Node, Point2D, Point3D, RelNode, Relationship, Time, Value,
};
use std::collections::HashMap;

/// Decodes a request message buffer into `(tag byte, positional fields)`.
pub fn unpack_request(buf: &[u8]) -> Result<(u8, Vec<Value>), ProtocolError> {
    let mut unp = Unpacker::new(buf);
    unp.next();
    if let Some(e) = unp.error() {
        return Err(e.clone());
    }
    if unp.current_type() != PackType::Structure {
        return Err(ProtocolError::UnexpectedType {
            expected: "structure",
            actual: unp.current_type(),
        });
    }
    let n = unp.len();
    let tag = unp.struct_tag();
    let mut fields = Vec::with_capacity(n as usize);
    for _ in 0..n {
        unp.next();
        fields.push(unpack_value(&mut unp)?);
    }
    if let Some(e) = unp.error() {
        return Err(e.clone());
    }
    Ok((tag, fields))
}

/// Decodes one plain value at the unpacker's current position. Structures are
/// not allowed in request fields.
pub fn unpack_value(unp: &mut Unpacker) -> Result<Value, ProtocolError> {
    if let Some(e) = unp.error() {
        return Err(e.clone());
    }
    match unp.current_type() {
        PackType::Integer => Ok(Value::Int(unp.int())),
        PackType::Float => Ok(Value::Float(unp.double())),
        PackType::String => Ok(Value::String(unp.string())),
        PackType::Structure => Err(ProtocolError::StructureInRequest),
        PackType::Bytes => Ok(Value::Bytes(unp.byte_array())),
        PackType::List => {
            let n = unp.len();
            let mut items = Vec::with_capacity(n.min(64) as usize);
            for _ in 0..n {
                unp.next();
                items.push(unpack_value(unp)?);
            }
            Ok(Value::List(items))
        }
        PackType::Dictionary => {
            let n = unp.len();
            let mut m = HashMap::with_capacity(n.min(64) as usize);
            for _ in 0..n {
                unp.next();
                let key = unp.string();
                unp.next();
                m.insert(key, unpack_value(unp)?);
            }
            Ok(Value::Map(m))
        }
        PackType::Null => Ok(Value::Null),
        PackType::True => Ok(Value::Bool(true)),
        PackType::False => Ok(Value::Bool(false)),
        PackType::Undef => Err(ProtocolError::UnexpectedType {
            expected: "value",
            actual: PackType::Undef,
        }),
    }
}

/// Reply-side decoder keyed by the structure sub-tag.
///
/// The graph-entity arity (legacy 3/5/3 vs element-id 4/8/4) follows the
/// negotiated major version; the temporal encoding follows the `use_utc`
/// flag, set once during session negotiation.
pub struct Hydrator {
    bolt_major: u8,
    use_utc: bool,
    err: Option<ProtocolError>,
}

impl Hydrator {
    pub fn new(bolt_major: u8) -> Self {
        Self {
            bolt_major,
            use_utc: false,
            err: None,
        }
    }

    /// Switches between legacy and UTC-patched temporal encodings.
    pub fn set_use_utc(&mut self, use_utc: bool) {
        self.use_utc = use_utc;
    }

    pub fn use_utc(&self) -> bool {
        self.use_utc
    }

    pub fn bolt_major(&self) -> u8 {
        self.bolt_major
    }

    /// Hydrates one top-level reply message.
    ///
    /// An error in one message does not poison the hydrator: the next call
    /// starts clean.
    pub fn hydrate(&mut self, buf: &[u8]) -> Result<Reply, ProtocolError> {
        self.err = None;
        let mut unp = Unpacker::new(buf);
        unp.next();
        if let Some(e) = unp.error() {
            return Err(e.clone());
        }
        if unp.current_type() != PackType::Structure {
            return Err(ProtocolError::UnexpectedType {
                expected: "structure",
                actual: unp.current_type(),
            });
        }
        let n = unp.len();
        let tag = unp.struct_tag();
        let reply = if tag == BoltMsg::Success as u8 {
            Reply::Success(self.success(&mut unp, n))
        } else if tag == BoltMsg::Ignored as u8 {
            self.assert_len("ignored", 0, n);
            Reply::Ignored
        } else if tag == BoltMsg::Failure as u8 {
            Reply::Failure(self.failure(&mut unp, n))
        } else if tag == BoltMsg::Record as u8 {
            Reply::Record(self.record(&mut unp, n))
        } else {
            return Err(ProtocolError::UnexpectedTopLevelTag(tag));
        };
        match self.take_err(&unp) {
            Some(e) => Err(e),
            None => Ok(reply),
        }
    }

    fn set_err(&mut self, err: ProtocolError) {
        if self.err.is_none() {
            self.err = Some(err);
        }
    }

    fn has_err(&self, unp: &Unpacker) -> bool {
        self.err.is_some() || unp.error().is_some()
    }

    fn take_err(&self, unp: &Unpacker) -> Option<ProtocolError> {
        unp.error().cloned().or_else(|| self.err.clone())
    }

    fn assert_len(&mut self, what: &'static str, expected: u32, actual: u32) {
        if expected != actual {
            self.set_err(ProtocolError::InvalidFieldCount {
                what,
                expected,
                actual,
            });
        }
    }

    fn success(&mut self, unp: &mut Unpacker, n: u32) -> Box<Success> {
        self.assert_len("Success", 1, n);
        if self.has_err(unp) {
            return Box::default();
        }
        let mut succ = Box::<Success>::default();

        unp.next(); // metadata map
        let n = unp.len();
        succ.num = n;
        for _ in 0..n {
            if self.has_err(unp) {
                break;
            }
            unp.next();
            let key = unp.string();
            unp.next();
            match key.as_str() {
                "fields" => succ.fields = self.strings(unp),
                "t_first" => succ.t_first = unp.int(),
                "qid" => succ.qid = unp.int(),
                "bookmark" => succ.bookmark = unp.string(),
                "connection_id" => succ.connection_id = unp.string(),
                "server" => succ.server = unp.string(),
                "has_more" => succ.has_more = unp.bool(),
                "t_last" => succ.t_last = unp.int(),
                "type" => {
                    let statement_type = unp.string();
                    succ.statement_type = match statement_type.as_str() {
                        "routers" => Some(StatementType::Read),
                        "w" => Some(StatementType::Write),
                        "rw" => Some(StatementType::ReadWrite),
                        "s" => Some(StatementType::SchemaWrite),
                        other => {
                            self.set_err(ProtocolError::UnknownStatementType(other.to_owned()));
                            None
                        }
                    };
                }
                "db" => succ.db = unp.string(),
                "stats" => succ.counters = self.success_stats(unp),
                "plan" => {
                    let m = self.amap(unp);
                    succ.plan = Some(Box::new(parse_plan(m)));
                }
                "profile" => {
                    let m = self.amap(unp);
                    succ.profile = Some(Box::new(parse_profile(m)));
                }
                "notifications" => {
                    let l = self.array(unp);
                    succ.notifications = parse_notifications(l);
                }
                "rt" => succ.routing_table = Some(self.routing_table(unp)),
                "hints" => succ.configuration_hints = self.amap(unp),
                "patch_bolt" => succ.patches = self.strings(unp),
                // Unknown key, waste it
                _ => self.trash(unp),
            }
        }
        succ
    }

    fn success_stats(&mut self, unp: &mut Unpacker) -> HashMap<String, Value> {
        let n = unp.len();
        let mut counts = HashMap::with_capacity(n.min(64) as usize);
        for _ in 0..n {
            if self.has_err(unp) {
                break;
            }
            unp.next();
            let key = unp.string();
            unp.next();
            let val = if is_bool_stat(&key) {
                Value::Bool(unp.bool())
            } else {
                Value::Int(unp.int())
            };
            counts.insert(key, val);
        }
        counts
    }

    fn failure(&mut self, unp: &mut Unpacker, n: u32) -> DbError {
        self.assert_len("failure", 1, n);
        if self.has_err(unp) {
            return DbError::default();
        }
        let mut dberr = DbError::default();
        unp.next(); // metadata map
        let n = unp.len();
        for _ in 0..n {
            if self.has_err(unp) {
                break;
            }
            unp.next();
            let key = unp.string();
            unp.next();
            match key.as_str() {
                "code" => dberr.code = unp.string(),
                "message" => dberr.message = unp.string(),
                // Do not fail on unknown value in map
                _ => self.trash(unp),
            }
        }
        dberr
    }

    fn record(&mut self, unp: &mut Unpacker, n: u32) -> Record {
        self.assert_len("record", 1, n);
        if self.has_err(unp) {
            return Record::default();
        }
        let mut rec = Record::default();
        unp.next(); // value list
        let n = unp.len();
        for _ in 0..n {
            if self.has_err(unp) {
                break;
            }
            unp.next();
            let value = self.value(unp);
            rec.values.push(value);
        }
        rec
    }

    /// Decodes the value at the current position, dispatching structures by
    /// tag, stream version and the UTC flag.
    fn value(&mut self, unp: &mut Unpacker) -> Value {
        match unp.current_type() {
            PackType::Integer => Value::Int(unp.int()),
            PackType::Float => Value::Float(unp.double()),
            PackType::String => Value::String(unp.string()),
            PackType::Structure => {
                let t = unp.struct_tag();
                let n = unp.len();
                match t {
                    b'N' => {
                        if self.bolt_major >= 5 {
                            self.node_with_element_id(unp, n)
                        } else {
                            self.node(unp, n)
                        }
                    }
                    b'R' => {
                        if self.bolt_major >= 5 {
                            self.relationship_with_element_id(unp, n)
                        } else {
                            self.relationship(unp, n)
                        }
                    }
                    b'r' => {
                        if self.bolt_major >= 5 {
                            self.rel_node_with_element_id(unp, n)
                        } else {
                            self.rel_node(unp, n)
                        }
                    }
                    b'P' => self.path(unp, n),
                    b'X' => self.point2d(unp, n),
                    b'Y' => self.point3d(unp, n),
                    b'F' => {
                        if self.use_utc {
                            self.unknown_struct(t)
                        } else {
                            self.legacy_date_time_offset(unp, n)
                        }
                    }
                    b'I' => {
                        if !self.use_utc {
                            self.unknown_struct(t)
                        } else {
                            self.utc_date_time_offset(unp, n)
                        }
                    }
                    b'f' => {
                        if self.use_utc {
                            self.unknown_struct(t)
                        } else {
                            self.legacy_date_time_named_zone(unp, n)
                        }
                    }
                    b'i' => {
                        if !self.use_utc {
                            self.unknown_struct(t)
                        } else {
                            self.utc_date_time_named_zone(unp, n)
                        }
                    }
                    b'd' => self.local_date_time(unp, n),
                    b'D' => self.date(unp, n),
                    b'T' => self.time(unp, n),
                    b't' => self.local_time(unp, n),
                    b'E' => self.duration(unp, n),
                    _ => self.unknown_struct(t),
                }
            }
            PackType::Bytes => Value::Bytes(unp.byte_array()),
            PackType::List => Value::List(self.array(unp)),
            PackType::Dictionary => Value::Map(self.amap(unp)),
            PackType::Null => Value::Null,
            PackType::True => Value::Bool(true),
            PackType::False => Value::Bool(false),
            PackType::Undef => {
                self.set_err(ProtocolError::UnexpectedType {
                    expected: "value",
                    actual: PackType::Undef,
                });
                Value::Null
            }
        }
    }

    /// Reads and discards the current value to stay synchronized.
    fn trash(&mut self, unp: &mut Unpacker) {
        self.value(unp);
    }

    fn strings(&mut self, unp: &mut Unpacker) -> Vec<String> {
        let n = unp.len();
        let mut slice = Vec::with_capacity(n.min(64) as usize);
        for _ in 0..n {
            if self.has_err(unp) {
                break;
            }
            unp.next();
            slice.push(unp.string());
        }
        slice
    }

    fn amap(&mut self, unp: &mut Unpacker) -> HashMap<String, Value> {
        let n = unp.len();
        let mut m = HashMap::with_capacity(n.min(64) as usize);
        for _ in 0..n {
            if self.has_err(unp) {
                break;
            }
            unp.next();
            let key = unp.string();
            unp.next();
            let value = self.value(unp);
            m.insert(key, value);
        }
        m
    }

    fn array(&mut self, unp: &mut Unpacker) -> Vec<Value> {
        let n = unp.len();
        let mut ret = Vec::with_capacity(n.min(64) as usize);
        for _ in 0..n {
            if self.has_err(unp) {
                break;
            }
            unp.next();
            let value = self.value(unp);
            ret.push(value);
        }
        ret
    }

    fn node(&mut self, unp: &mut Unpacker, num: u32) -> Value {
        self.assert_len("node", 3, num);
        if self.has_err(unp) {
            return Value::Null;
        }
        let mut n = Node::default();
        unp.next();
        n.id = unp.int();
        unp.next();
        n.labels = self.strings(unp);
        unp.next();
        n.props = self.amap(unp);
        n.element_id = n.id.to_string();
        Value::Node(n)
    }

    fn node_with_element_id(&mut self, unp: &mut Unpacker, num: u32) -> Value {
        self.assert_len("node", 4, num);
        if self.has_err(unp) {
            return Value::Null;
        }
        let mut n = Node::default();
        unp.next();
        n.id = unp.int();
        unp.next();
        n.labels = self.strings(unp);
        unp.next();
        n.props = self.amap(unp);
        unp.next();
        n.element_id = unp.string();
        Value::Node(n)
    }

    fn relationship(&mut self, unp: &mut Unpacker, n: u32) -> Value {
        self.assert_len("relationship", 5, n);
        if self.has_err(unp) {
            return Value::Null;
        }
        let mut r = Relationship::default();
        unp.next();
        r.id = unp.int();
        unp.next();
        r.start_id = unp.int();
        unp.next();
        r.end_id = unp.int();
        unp.next();
        r.rel_type = unp.string();
        unp.next();
        r.props = self.amap(unp);
        r.element_id = r.id.to_string();
        r.start_element_id = r.start_id.to_string();
        r.end_element_id = r.end_id.to_string();
        Value::Relationship(r)
    }

    fn relationship_with_element_id(&mut self, unp: &mut Unpacker, n: u32) -> Value {
        self.assert_len("relationship", 8, n);
        if self.has_err(unp) {
            return Value::Null;
        }
        let mut r = Relationship::default();
        unp.next();
        r.id = unp.int();
        unp.next();
        r.start_id = unp.int();
        unp.next();
        r.end_id = unp.int();
        unp.next();
        r.rel_type = unp.string();
        unp.next();
        r.props = self.amap(unp);
        unp.next();
        r.element_id = unp.string();
        unp.next();
        r.start_element_id = unp.string();
        unp.next();
        r.end_element_id = unp.string();
        Value::Relationship(r)
    }

    fn rel_node(&mut self, unp: &mut Unpacker, n: u32) -> Value {
        self.assert_len("relationnode", 3, n);
        if self.has_err(unp) {
            return Value::Null;
        }
        let mut r = RelNode::default();
        unp.next();
        r.id = unp.int();
        unp.next();
        r.name = unp.string();
        unp.next();
        r.props = self.amap(unp);
        r.element_id = r.id.to_string();
        Value::RelNode(r)
    }

    fn rel_node_with_element_id(&mut self, unp: &mut Unpacker, n: u32) -> Value {
        self.assert_len("relationnode", 4, n);
        if self.has_err(unp) {
            return Value::Null;
        }
        let mut r = RelNode::default();
        unp.next();
        r.id = unp.int();
        unp.next();
        r.name = unp.string();
        unp.next();
        r.props = self.amap(unp);
        unp.next();
        r.element_id = unp.string();
        Value::RelNode(r)
    }

    fn path(&mut self, unp: &mut Unpacker, n: u32) -> Value {
        self.assert_len("path", 3, n);
        if self.has_err(unp) {
            return Value::Null;
        }
        // Node list
        unp.next();
        let num = unp.len();
        let mut nodes = Vec::with_capacity(num.min(64) as usize);
        for _ in 0..num {
            if self.has_err(unp) {
                return Value::Null;
            }
            unp.next();
            match self.value(unp) {
                Value::Node(node) => nodes.push(node),
                _ => {
                    self.set_err(ProtocolError::InvalidPathElement("node"));
                    return Value::Null;
                }
            }
        }
        // Unbound relationship list
        unp.next();
        let num = unp.len();
        let mut rels = Vec::with_capacity(num.min(64) as usize);
        for _ in 0..num {
            if self.has_err(unp) {
                return Value::Null;
            }
            unp.next();
            match self.value(unp) {
                Value::RelNode(rel) => rels.push(rel),
                _ => {
                    self.set_err(ProtocolError::InvalidPathElement("relationship"));
                    return Value::Null;
                }
            }
        }
        // Index list
        unp.next();
        let num = unp.len();
        let mut indices = Vec::with_capacity(num.min(64) as usize);
        for _ in 0..num {
            if self.has_err(unp) {
                return Value::Null;
            }
            unp.next();
            indices.push(unp.int());
        }

        if indices.len() & 0x01 == 1 {
            self.set_err(ProtocolError::OddPathIndices(indices.len()));
            return Value::Null;
        }

        self.build_path(nodes, rels, indices)
    }

    /// Rebuilds the ordered, oriented relationship sequence from the
    /// flattened index list. Relationship and node indices are 1-based; a
    /// negative relationship index means the relationship is traversed
    /// against its direction.
    fn build_path(&mut self, nodes: Vec<Node>, rels: Vec<RelNode>, indices: Vec<i64>) -> Value {
        if indices.is_empty() {
            return Value::BoundPath(BoundPath {
                nodes,
                relationships: Vec::new(),
            });
        }
        if nodes.is_empty() {
            self.set_err(ProtocolError::PathIndexOutOfRange(0));
            return Value::Null;
        }
        let mut relationships = Vec::with_capacity(indices.len() / 2);
        let mut prev = &nodes[0];
        for pair in indices.chunks(2) {
            let rel_index = pair[0];
            let node_index = pair[1];
            let next = match node_at(&nodes, node_index) {
                Some(node) => node,
                None => {
                    self.set_err(ProtocolError::PathIndexOutOfRange(node_index));
                    return Value::Null;
                }
            };
            let (rel, start, end) = if rel_index < 0 {
                (rel_at(&rels, -rel_index), next, prev)
            } else {
                (rel_at(&rels, rel_index), prev, next)
            };
            let rel = match rel {
                Some(rel) => rel,
                None => {
                    self.set_err(ProtocolError::PathIndexOutOfRange(rel_index));
                    return Value::Null;
                }
            };
            relationships.push(Relationship {
                id: rel.id,
                element_id: rel.element_id.clone(),
                start_id: start.id,
                start_element_id: start.element_id.clone(),
                end_id: end.id,
                end_element_id: end.element_id.clone(),
                rel_type: rel.name.clone(),
                props: rel.props.clone(),
            });
            prev = next;
        }
        Value::BoundPath(BoundPath {
            nodes,
            relationships,
        })
    }

    fn point2d(&mut self, unp: &mut Unpacker, n: u32) -> Value {
        self.assert_len("point2d", 3, n);
        if self.has_err(unp) {
            return Value::Null;
        }
        let mut p = Point2D::default();
        unp.next();
        p.spatial_ref_id = unp.int() as u32;
        unp.next();
        p.x = unp.double();
        unp.next();
        p.y = unp.double();
        Value::Point2D(p)
    }

    fn point3d(&mut self, unp: &mut Unpacker, n: u32) -> Value {
        self.assert_len("point3d", 4, n);
        if self.has_err(unp) {
            return Value::Null;
        }
        let mut p = Point3D::default();
        unp.next();
        p.spatial_ref_id = unp.int() as u32;
        unp.next();
        p.x = unp.double();
        unp.next();
        p.y = unp.double();
        unp.next();
        p.z = unp.double();
        Value::Point3D(p)
    }

    fn legacy_date_time_offset(&mut self, unp: &mut Unpacker, n: u32) -> Value {
        self.assert_len("datetime", 3, n);
        if self.has_err(unp) {
            return Value::Null;
        }
        unp.next();
        let seconds = unp.int();
        unp.next();
        let nanoseconds = unp.int();
        unp.next();
        let tz_offset_seconds = unp.int();
        Value::LegacyDateTime(LegacyDateTime {
            seconds,
            nanoseconds,
            tz_offset_seconds,
        })
    }

    fn utc_date_time_offset(&mut self, unp: &mut Unpacker, n: u32) -> Value {
        self.assert_len("datetime", 3, n);
        if self.has_err(unp) {
            return Value::Null;
        }
        unp.next();
        let seconds = unp.int();
        unp.next();
        let nanoseconds = unp.int();
        unp.next();
        let tz_offset_seconds = unp.int();
        Value::DateTime(DateTime {
            seconds,
            nanoseconds,
            tz_offset_seconds,
        })
    }

    fn legacy_date_time_named_zone(&mut self, unp: &mut Unpacker, n: u32) -> Value {
        self.assert_len("datetime", 3, n);
        if self.has_err(unp) {
            return Value::Null;
        }
        unp.next();
        let seconds = unp.int();
        unp.next();
        let nanoseconds = unp.int();
        unp.next();
        let tz_id = unp.string();
        Value::LegacyDateTimeZoneId(LegacyDateTimeZoneId {
            seconds,
            nanoseconds,
            tz_id,
        })
    }

    fn utc_date_time_named_zone(&mut self, unp: &mut Unpacker, n: u32) -> Value {
        self.assert_len("datetime", 3, n);
        if self.has_err(unp) {
            return Value::Null;
        }
        unp.next();
        let seconds = unp.int();
        unp.next();
        let nanoseconds = unp.int();
        unp.next();
        let tz_id = unp.string();
        Value::DateTimeZoneId(DateTimeZoneId {
            seconds,
            nanoseconds,
            tz_id,
        })
    }

    fn local_date_time(&mut self, unp: &mut Unpacker, n: u32) -> Value {
        self.assert_len("localdatetime", 2, n);
        if self.has_err(unp) {
            return Value::Null;
        }
        unp.next();
        let seconds = unp.int();
        unp.next();
        let nanoseconds = unp.int();
        Value::LocalDateTime(LocalDateTime {
            seconds,
            nanoseconds,
        })
    }

    fn date(&mut self, unp: &mut Unpacker, n: u32) -> Value {
        self.assert_len("date", 1, n);
        if self.has_err(unp) {
            return Value::Null;
        }
        unp.next();
        let days = unp.int();
        Value::Date(Date { days })
    }

    fn time(&mut self, unp: &mut Unpacker, n: u32) -> Value {
        self.assert_len("time", 2, n);
        if self.has_err(unp) {
            return Value::Null;
        }
        unp.next();
        let nanoseconds = unp.int();
        unp.next();
        let tz_offset_seconds = unp.int();
        Value::Time(Time {
            nanoseconds,
            tz_offset_seconds,
        })
    }

    fn local_time(&mut self, unp: &mut Unpacker, n: u32) -> Value {
        self.assert_len("localtime", 1, n);
        if self.has_err(unp) {
            return Value::Null;
        }
        unp.next();
        let nanoseconds = unp.int();
        Value::LocalTime(LocalTime { nanoseconds })
    }

    fn duration(&mut self, unp: &mut Unpacker, n: u32) -> Value {
        self.assert_len("duration", 4, n);
        if self.has_err(unp) {
            return Value::Null;
        }
        unp.next();
        let months = unp.int();
        unp.next();
        let days = unp.int();
        unp.next();
        let seconds = unp.int();
        unp.next();
        let nanos = unp.int();
        Value::Duration(Duration {
            months,
            days,
            seconds,
            nanos,
        })
    }

    /// Parses a routing table the hard way, without going through a generic
    /// map, since it sits on the normal flow.
    fn routing_table(&mut self, unp: &mut Unpacker) -> RoutingTable {
        let mut rt = RoutingTable::default();
        let nkeys = unp.len();
        for _ in 0..nkeys {
            if self.has_err(unp) {
                break;
            }
            unp.next();
            let key = unp.string();
            unp.next();
            match key.as_str() {
                "ttl" => rt.time_to_live = unp.int(),
                "servers" => {
                    let nservers = unp.len();
                    for _ in 0..nservers {
                        self.routing_table_role(unp, &mut rt);
                    }
                }
                "db" => rt.database_name = unp.string(),
                // Unknown key, waste the value
                _ => self.trash(unp),
            }
        }
        rt
    }

    fn routing_table_role(&mut self, unp: &mut Unpacker, rt: &mut RoutingTable) {
        unp.next();
        let nkeys = unp.len();
        let mut role = String::new();
        let mut addresses = Vec::new();
        for _ in 0..nkeys {
            if self.has_err(unp) {
                break;
            }
            unp.next();
            let key = unp.string();
            unp.next();
            match key.as_str() {
                "role" => role = unp.string(),
                "addresses" => addresses = self.strings(unp),
                // Unknown key, waste the value
                _ => self.trash(unp),
            }
        }
        match role.as_str() {
            "READ" => rt.readers = addresses,
            "WRITE" => rt.writers = addresses,
            "ROUTE" => rt.routers = addresses,
            _ => {}
        }
    }

    fn unknown_struct(&mut self, tag: u8) -> Value {
        self.set_err(ProtocolError::UnknownStructTag(tag));
        Value::Null
    }
}

/// 1-based lookup into the path node list.
fn node_at(nodes: &[Node], index: i64) -> Option<&Node> {
    usize::try_from(index)
        .ok()
        .and_then(|i| i.checked_sub(1))
        .and_then(|i| nodes.get(i))
}

/// 1-based lookup into the path relationship list (sign already stripped).
fn rel_at(rels: &[RelNode], index: i64) -> Option<&RelNode> {
    usize::try_from(index)
        .ok()
        .and_then(|i| i.checked_sub(1))
        .and_then(|i| rels.get(i))
}

fn plan_parts(
    mut m: HashMap<String, Value>,
) -> (String, Vec<String>, HashMap<String, Value>, Vec<Value>) {
    let operation = match m.remove("operatorType") {
        Some(Value::String(s)) => s,
        _ => String::new(),
    };
    let identifiers = match m.remove("identifiers") {
        Some(Value::List(l)) => l
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };
    let arguments = match m.remove("args") {
        Some(Value::Map(a)) => a,
        _ => HashMap::new(),
    };
    let children = match m.remove("children") {
        Some(Value::List(l)) => l,
        _ => Vec::new(),
    };
    (operation, identifiers, arguments, children)
}

/// Builds an execution plan tree out of a decoded metadata map.
pub fn parse_plan(m: HashMap<String, Value>) -> Plan {
    let (operation, identifiers, arguments, children) = plan_parts(m);
    let mut plan = Plan {
        operation,
        arguments,
        identifiers,
        children: Vec::new(),
    };
    for child in children {
        if let Value::Map(child_map) = child {
            if !child_map.is_empty() {
                plan.children.push(parse_plan(child_map));
            }
        }
    }
    plan
}

/// Builds a profiled plan tree out of a decoded metadata map.
pub fn parse_profile(m: HashMap<String, Value>) -> ProfiledPlan {
    let db_hits = m.get("dbHits").and_then(Value::as_int).unwrap_or(0);
    let records = m.get("rows").and_then(Value::as_int).unwrap_or(0);
    let (operation, identifiers, arguments, children) = plan_parts(m);
    let mut plan = ProfiledPlan {
        operation,
        arguments,
        identifiers,
        db_hits,
        records,
        ..Default::default()
    };
    for child in children {
        if let Value::Map(child_map) = child {
            if child_map.is_empty() {
                continue;
            }
            let mut child_plan = parse_profile(child_map.clone());
            if let Some(v) = child_map.get("pageCacheMisses").and_then(Value::as_int) {
                child_plan.page_cache_misses = v;
            }
            if let Some(v) = child_map.get("pageCacheHits").and_then(Value::as_int) {
                child_plan.page_cache_hits = v;
            }
            if let Some(v) = child_map.get("pageCacheHitRatio").and_then(Value::as_float) {
                child_plan.page_cache_hit_ratio = v;
            }
            if let Some(v) = child_map.get("time").and_then(Value::as_int) {
                child_plan.time = v;
            }
            plan.children.push(child_plan);
        }
    }
    plan
}

/// Converts a decoded notification list into typed notifications.
pub fn parse_notifications(notifications: Vec<Value>) -> Vec<Notification> {
    notifications
        .into_iter()
        .filter_map(|item| match item {
            Value::Map(m) => Some(parse_notification(m)),
            _ => None,
        })
        .collect()
}

fn parse_notification(m: HashMap<String, Value>) -> Notification {
    let mut n = Notification::default();
    if let Some(v) = m.get("code").and_then(Value::as_str) {
        n.code = v.to_owned();
    }
    if let Some(v) = m.get("description").and_then(Value::as_str) {
        n.description = v.to_owned();
    }
    if let Some(v) = m.get("severity").and_then(Value::as_str) {
        n.severity = v.to_owned();
    }
    if let Some(v) = m.get("category").and_then(Value::as_str) {
        n.category = v.to_owned();
    }
    if let Some(v) = m.get("title").and_then(Value::as_str) {
        n.title = v.to_owned();
    }
    if let Some(Value::Map(pos)) = m.get("position") {
        n.position = Some(InputPosition {
            line: pos.get("line").and_then(Value::as_int).unwrap_or(0),
            column: pos.get("column").and_then(Value::as_int).unwrap_or(0),
            offset: pos.get("offset").and_then(Value::as_int).unwrap_or(0),
        });
    }
    n
}
