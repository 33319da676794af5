//! Chunked message encoder.
//!
//! Composes the [`Packer`] and the [`Chunker`]: each `append_*` call packs one
//! complete protocol message and frames it. The accumulated output is taken
//! with [`Encoder::take`] and handed to the connection's outbound queue as-is.

use crate::chunk::Chunker;
use crate::error::ProtocolError;
use crate::message::BoltMsg;
use crate::pack::Packer;
use crate::value::{
    Date, Duration, LocalDateTime, LocalTime, Node, Path, Point2D, Point3D, RelNode, Relationship,
    Time, Value,
};
use bytes::Bytes;
use std::collections::HashMap;

/// Encodes and frames outbound protocol messages.
#[derive(Default)]
pub struct Encoder {
    chunker: Chunker,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Packs one message, rolling back the partial output if packing fails.
    fn message(&mut self, f: impl FnOnce(&mut Packer)) -> Result<(), ProtocolError> {
        let start = self.chunker.buffered();
        self.chunker.begin_message();
        let mut packer = Packer::new(self.chunker.buf_mut());
        f(&mut packer);
        match packer.finish() {
            Ok(()) => {
                self.chunker.end_message();
                Ok(())
            }
            Err(e) => {
                self.chunker.truncate(start);
                Err(e)
            }
        }
    }

    /// Appends a structure message with a single map argument.
    pub fn append_struct_message(
        &mut self,
        tag: BoltMsg,
        meta: &HashMap<String, Value>,
    ) -> Result<(), ProtocolError> {
        self.message(|p| {
            p.struct_header(tag as u8, 1);
            pack_map(p, meta);
        })
    }

    /// Appends a structure message with no arguments.
    pub fn append_empty_struct_message(&mut self, tag: BoltMsg) -> Result<(), ProtocolError> {
        self.message(|p| {
            p.struct_header(tag as u8, 0);
        })
    }

    pub fn append_hello(&mut self, meta: &HashMap<String, Value>) -> Result<(), ProtocolError> {
        self.append_struct_message(BoltMsg::Hello, meta)
    }

    pub fn append_success(&mut self, meta: &HashMap<String, Value>) -> Result<(), ProtocolError> {
        self.append_struct_message(BoltMsg::Success, meta)
    }

    pub fn append_ignored(&mut self) -> Result<(), ProtocolError> {
        self.append_empty_struct_message(BoltMsg::Ignored)
    }

    pub fn append_failure(&mut self, meta: &HashMap<String, Value>) -> Result<(), ProtocolError> {
        self.append_struct_message(BoltMsg::Failure, meta)
    }

    pub fn append_run(
        &mut self,
        query: &str,
        params: &HashMap<String, Value>,
        meta: &HashMap<String, Value>,
    ) -> Result<(), ProtocolError> {
        self.message(|p| {
            p.struct_header(BoltMsg::Run as u8, 3);
            p.string(query);
            pack_map(p, params);
            pack_map(p, meta);
        })
    }

    pub fn append_pull_n(&mut self, n: i64) -> Result<(), ProtocolError> {
        let meta = HashMap::from([("n".to_owned(), Value::Int(n))]);
        self.append_struct_message(BoltMsg::PullN, &meta)
    }

    pub fn append_record(&mut self, fields: &[Value]) -> Result<(), ProtocolError> {
        self.message(|p| {
            p.struct_header(BoltMsg::Record as u8, 1);
            p.list_header(fields.len());
            for field in fields {
                pack_value(p, field);
            }
        })
    }

    pub fn append_records(&mut self, records: &[Vec<Value>]) -> Result<(), ProtocolError> {
        for record in records {
            self.append_record(record)?;
        }
        Ok(())
    }

    /// Takes all framed messages accumulated so far.
    pub fn take(&mut self) -> Bytes {
        self.chunker.take()
    }

    /// Discards any accumulated output.
    pub fn reset(&mut self) {
        self.chunker.reset();
    }

    /// Total framed bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.chunker.buffered()
    }
}

/// Packs any encodable value. Hydrated bound paths only exist on the decode
/// side and are rejected.
pub fn pack_value(p: &mut Packer, v: &Value) {
    match v {
        Value::Null => p.null(),
        Value::Bool(b) => p.bool(*b),
        Value::Int(i) => p.int(*i),
        Value::Float(f) => p.float(*f),
        Value::String(s) => p.string(s),
        Value::Bytes(b) => p.bytes(b),
        Value::List(l) => pack_list(p, l),
        Value::Map(m) => pack_map(p, m),
        Value::Node(n) => pack_node(p, n),
        Value::Relationship(r) => pack_relationship(p, r),
        Value::RelNode(r) => pack_rel_node(p, r),
        Value::Path(path) => pack_path(p, path),
        Value::BoundPath(_) => p.set_err(ProtocolError::Unpackable("bound path")),
        Value::Point2D(pt) => pack_point2d(p, pt),
        Value::Point3D(pt) => pack_point3d(p, pt),
        Value::Date(d) => pack_date(p, d),
        Value::Time(t) => pack_time(p, t),
        Value::LocalTime(t) => pack_local_time(p, t),
        Value::LocalDateTime(dt) => pack_local_date_time(p, dt),
        Value::DateTime(dt) => {
            p.struct_header(b'I', 3);
            p.int(dt.seconds);
            p.int(dt.nanoseconds);
            p.int(dt.tz_offset_seconds);
        }
        Value::DateTimeZoneId(dt) => {
            p.struct_header(b'i', 3);
            p.int(dt.seconds);
            p.int(dt.nanoseconds);
            p.string(&dt.tz_id);
        }
        Value::LegacyDateTime(dt) => {
            p.struct_header(b'F', 3);
            p.int(dt.seconds);
            p.int(dt.nanoseconds);
            p.int(dt.tz_offset_seconds);
        }
        Value::LegacyDateTimeZoneId(dt) => {
            p.struct_header(b'f', 3);
            p.int(dt.seconds);
            p.int(dt.nanoseconds);
            p.string(&dt.tz_id);
        }
        Value::Duration(d) => pack_duration(p, d),
    }
}

pub fn pack_map(p: &mut Packer, m: &HashMap<String, Value>) {
    p.map_header(m.len());
    for (key, value) in m {
        p.string(key);
        pack_value(p, value);
    }
}

pub fn pack_list(p: &mut Packer, l: &[Value]) {
    p.list_header(l.len());
    for item in l {
        pack_value(p, item);
    }
}

pub fn pack_node(p: &mut Packer, node: &Node) {
    p.struct_header(b'N', 3);
    p.int(node.id);
    p.list_header(node.labels.len());
    for label in &node.labels {
        p.string(label);
    }
    pack_map(p, &node.props);
}

pub fn pack_relationship(p: &mut Packer, rel: &Relationship) {
    p.struct_header(b'R', 5);
    p.int(rel.id);
    p.int(rel.start_id);
    p.int(rel.end_id);
    p.string(&rel.rel_type);
    pack_map(p, &rel.props);
}

pub fn pack_rel_node(p: &mut Packer, rel: &RelNode) {
    p.struct_header(b'r', 3);
    p.int(rel.id);
    p.string(&rel.name);
    pack_map(p, &rel.props);
}

pub fn pack_path(p: &mut Packer, path: &Path) {
    p.struct_header(b'P', 3);
    p.list_header(path.nodes.len());
    for node in &path.nodes {
        pack_node(p, node);
    }
    p.list_header(path.rels.len());
    for rel in &path.rels {
        pack_rel_node(p, rel);
    }
    p.list_header(path.indices.len());
    for index in &path.indices {
        p.int(*index);
    }
}

pub fn pack_point2d(p: &mut Packer, pt: &Point2D) {
    p.struct_header(b'X', 3);
    p.int(pt.spatial_ref_id as i64);
    p.float(pt.x);
    p.float(pt.y);
}

pub fn pack_point3d(p: &mut Packer, pt: &Point3D) {
    p.struct_header(b'Y', 4);
    p.int(pt.spatial_ref_id as i64);
    p.float(pt.x);
    p.float(pt.y);
    p.float(pt.z);
}

pub fn pack_date(p: &mut Packer, d: &Date) {
    p.struct_header(b'D', 1);
    p.int(d.days);
}

pub fn pack_time(p: &mut Packer, t: &Time) {
    p.struct_header(b'T', 2);
    p.int(t.nanoseconds);
    p.int(t.tz_offset_seconds);
}

pub fn pack_local_time(p: &mut Packer, t: &LocalTime) {
    p.struct_header(b't', 1);
    p.int(t.nanoseconds);
}

pub fn pack_local_date_time(p: &mut Packer, dt: &LocalDateTime) {
    p.struct_header(b'd', 2);
    p.int(dt.seconds);
    p.int(dt.nanoseconds);
}

pub fn pack_duration(p: &mut Packer, d: &Duration) {
    p.struct_header(b'E', 4);
    p.int(d.months);
    p.int(d.days);
    p.int(d.seconds);
    p.int(d.nanos);
}
