//! PackStream primitive packer and unpacker.
//!
//! The packer appends wire bytes to a caller-provided buffer; the unpacker
//! pulls values sequentially out of a borrowed slice. Both carry a sticky
//! error: the first failure is recorded and every later call becomes a no-op
//! (packer) or returns a zero value without advancing past the buffer end
//! (unpacker). Callers check the error once per top-level value.

use crate::error::ProtocolError;
use crate::marker::{self, Marker, PackType};
use bytes::{BufMut, BytesMut};

/// Appends PackStream-encoded values to an output buffer.
pub struct Packer<'a> {
    buf: &'a mut BytesMut,
    err: Option<ProtocolError>,
}

impl<'a> Packer<'a> {
    pub fn new(buf: &'a mut BytesMut) -> Self {
        Self { buf, err: None }
    }

    /// Returns the first encoding error, if any.
    pub fn error(&self) -> Option<&ProtocolError> {
        self.err.as_ref()
    }

    /// Consumes the packer, yielding the first encoding error if one occurred.
    pub fn finish(self) -> Result<(), ProtocolError> {
        match self.err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub(crate) fn set_err(&mut self, err: ProtocolError) {
        if self.err.is_none() {
            self.err = Some(err);
        }
    }

    pub fn null(&mut self) {
        if self.err.is_some() {
            return;
        }
        self.buf.put_u8(0xC0);
    }

    pub fn bool(&mut self, b: bool) {
        if self.err.is_some() {
            return;
        }
        self.buf.put_u8(if b { 0xC3 } else { 0xC2 });
    }

    /// Packs an integer using the smallest of the five wire representations.
    pub fn int(&mut self, i: i64) {
        if self.err.is_some() {
            return;
        }
        if (-0x10..0x80).contains(&i) {
            self.buf.put_u8(i as u8);
        } else if (-0x80..-0x10).contains(&i) {
            self.buf.put_u8(0xC8);
            self.buf.put_i8(i as i8);
        } else if (-0x8000..0x8000).contains(&i) {
            self.buf.put_u8(0xC9);
            self.buf.put_i16(i as i16);
        } else if (-0x8000_0000..0x8000_0000).contains(&i) {
            self.buf.put_u8(0xCA);
            self.buf.put_i32(i as i32);
        } else {
            self.buf.put_u8(0xCB);
            self.buf.put_i64(i);
        }
    }

    pub fn float(&mut self, f: f64) {
        if self.err.is_some() {
            return;
        }
        self.buf.put_u8(0xC1);
        self.buf.put_u64(f.to_bits());
    }

    pub fn string(&mut self, s: &str) {
        if self.err.is_some() {
            return;
        }
        self.sized_header(s.len() as u64, "string", 0x80, 0xD0);
        if self.err.is_none() {
            self.buf.put_slice(s.as_bytes());
        }
    }

    pub fn bytes(&mut self, b: &[u8]) {
        if self.err.is_some() {
            return;
        }
        let l = b.len() as u64;
        if l < 0x100 {
            self.buf.put_u8(0xCC);
            self.buf.put_u8(l as u8);
        } else if l < 0x10000 {
            self.buf.put_u8(0xCD);
            self.buf.put_u16(l as u16);
        } else if l < 0x1_0000_0000 {
            self.buf.put_u8(0xCE);
            self.buf.put_u32(l as u32);
        } else {
            self.set_err(ProtocolError::TooLarge {
                what: "byte array",
                size: l,
            });
            return;
        }
        self.buf.put_slice(b);
    }

    pub fn list_header(&mut self, len: usize) {
        if self.err.is_some() {
            return;
        }
        self.sized_header(len as u64, "list", 0x90, 0xD4);
    }

    pub fn map_header(&mut self, len: usize) {
        if self.err.is_some() {
            return;
        }
        self.sized_header(len as u64, "map", 0xA0, 0xD8);
    }

    /// Packs a structure header: tiny-struct marker carrying the field count,
    /// followed by the tag byte.
    pub fn struct_header(&mut self, tag: u8, fields: u8) {
        if self.err.is_some() {
            return;
        }
        self.buf.put_u8(0xB0 + fields);
        self.buf.put_u8(tag);
    }

    /// Shared sized-header routine for strings, lists and maps: lengths 0-15
    /// fit the marker nibble, larger lengths escalate through 1/2/4 explicit
    /// big-endian length bytes.
    fn sized_header(&mut self, l: u64, what: &'static str, short_offset: u8, long_offset: u8) {
        if l < 0x10 {
            self.buf.put_u8(short_offset + l as u8);
        } else if l < 0x100 {
            self.buf.put_u8(long_offset);
            self.buf.put_u8(l as u8);
        } else if l < 0x10000 {
            self.buf.put_u8(long_offset + 1);
            self.buf.put_u16(l as u16);
        } else if l < u32::MAX as u64 {
            self.buf.put_u8(long_offset + 2);
            self.buf.put_u32(l as u32);
        } else {
            self.set_err(ProtocolError::TooLarge { what, size: l });
        }
    }
}

/// Pulls PackStream values sequentially out of a message buffer.
///
/// `next()` consumes exactly one marker byte; the typed accessors consume
/// exactly the bytes of the current value. Decoding is strictly sequential,
/// with no random access and no backtracking.
pub struct Unpacker<'a> {
    buf: &'a [u8],
    off: usize,
    err: Option<ProtocolError>,
    mrk: Marker,
    curr: PackType,
}

impl<'a> Unpacker<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            off: 0,
            err: None,
            mrk: Marker::default(),
            curr: PackType::Undef,
        }
    }

    /// Consumes the next marker byte and resolves it through the marker table.
    pub fn next(&mut self) {
        let b = self.pop();
        self.mrk = marker::lookup(b);
        self.curr = self.mrk.typ;
    }

    /// Type of the value whose marker was last consumed.
    pub fn current_type(&self) -> PackType {
        self.curr
    }

    /// Returns the first decoding error, if any.
    pub fn error(&self) -> Option<&ProtocolError> {
        self.err.as_ref()
    }

    pub(crate) fn set_err(&mut self, err: ProtocolError) {
        if self.err.is_none() {
            self.err = Some(err);
        }
    }

    /// Length of the current sized value (string/list/map/struct).
    pub fn len(&mut self) -> u32 {
        if self.mrk.numlenbytes == 0 {
            return self.mrk.shortlen as u32;
        }
        self.read_len(self.mrk.numlenbytes as u32)
    }

    /// The current integer value, whatever its wire width.
    pub fn int(&mut self) -> i64 {
        let n = self.mrk.numlenbytes;
        if n == 0 {
            return self.mrk.shortlen as i64;
        }

        let end = self.off + n as usize;
        if end > self.buf.len() {
            self.set_err(ProtocolError::UnexpectedEnd);
            return 0;
        }
        let raw = &self.buf[self.off..end];
        let i = match n {
            1 => raw[0] as i8 as i64,
            2 => i16::from_be_bytes([raw[0], raw[1]]) as i64,
            4 => i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as i64,
            8 => i64::from_be_bytes([
                raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
            ]),
            _ => {
                self.set_err(ProtocolError::IllegalLengthBytes(n));
                return 0;
            }
        };
        self.off = end;
        i
    }

    /// The current float value.
    pub fn double(&mut self) -> f64 {
        let raw = self.read(8);
        if raw.len() < 8 {
            return f64::NAN;
        }
        f64::from_bits(u64::from_be_bytes([
            raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
        ]))
    }

    /// The current string value.
    pub fn string(&mut self) -> String {
        let mut n = self.mrk.numlenbytes as u32;
        if n == 0 {
            n = self.mrk.shortlen as u32;
        } else {
            n = self.read_len(n);
        }
        let raw = self.read(n as usize);
        match std::str::from_utf8(raw) {
            Ok(s) => s.to_owned(),
            Err(_) => {
                self.set_err(ProtocolError::InvalidUtf8);
                String::new()
            }
        }
    }

    /// The current byte-array value.
    pub fn byte_array(&mut self) -> Vec<u8> {
        let mut n = self.mrk.numlenbytes as u32;
        if n == 0 {
            n = self.mrk.shortlen as u32;
        } else {
            n = self.read_len(n);
        }
        self.read(n as usize).to_vec()
    }

    /// The current boolean value.
    pub fn bool(&mut self) -> bool {
        match self.curr {
            PackType::True => true,
            PackType::False => false,
            _ => {
                self.set_err(ProtocolError::IllegalBool);
                false
            }
        }
    }

    /// Consumes and returns the structure tag byte.
    pub fn struct_tag(&mut self) -> u8 {
        self.pop()
    }

    fn pop(&mut self) -> u8 {
        if self.off < self.buf.len() {
            let x = self.buf[self.off];
            self.off += 1;
            return x;
        }
        self.set_err(ProtocolError::UnexpectedEnd);
        0
    }

    fn read(&mut self, n: usize) -> &'a [u8] {
        let start = self.off;
        let end = self.off + n;
        if end > self.buf.len() {
            self.set_err(ProtocolError::UnexpectedEnd);
            return &[];
        }
        self.off = end;
        &self.buf[start..end]
    }

    fn read_len(&mut self, n: u32) -> u32 {
        let end = self.off + n as usize;
        if end > self.buf.len() {
            self.set_err(ProtocolError::UnexpectedEnd);
            return 0;
        }
        let raw = &self.buf[self.off..end];
        let l = match n {
            1 => raw[0] as u32,
            2 => u16::from_be_bytes([raw[0], raw[1]]) as u32,
            4 => u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]),
            _ => {
                self.set_err(ProtocolError::IllegalLengthBytes(n as u8));
                return 0;
            }
        };
        self.off = end;
        l
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pack_one(f: impl FnOnce(&mut Packer)) -> BytesMut {
        let mut buf = BytesMut::new();
        let mut p = Packer::new(&mut buf);
        f(&mut p);
        assert!(p.error().is_none());
        buf
    }

    fn unpack_int(buf: &[u8]) -> i64 {
        let mut u = Unpacker::new(buf);
        u.next();
        assert_eq!(u.current_type(), PackType::Integer);
        let i = u.int();
        assert!(u.error().is_none());
        i
    }

    #[test]
    fn test_int_boundary_encodings() {
        // (value, expected marker byte, expected total length)
        let cases: &[(i64, u8, usize)] = &[
            (-17, 0xC8, 2),
            (-16, 0xF0, 1),
            (-1, 0xFF, 1),
            (0, 0x00, 1),
            (126, 0x7E, 1),
            (127, 0x7F, 1),
            (128, 0xC9, 3),
            (-128, 0xC8, 2),
            (-129, 0xC9, 3),
            (32767, 0xC9, 3),
            (32768, 0xCA, 5),
            (-32768, 0xC9, 3),
            (-32769, 0xCA, 5),
            (i32::MAX as i64, 0xCA, 5),
            (i32::MAX as i64 + 1, 0xCB, 9),
            (i32::MIN as i64, 0xCA, 5),
            (i32::MIN as i64 - 1, 0xCB, 9),
            (i64::MAX, 0xCB, 9),
            (i64::MIN, 0xCB, 9),
        ];
        for &(v, mark, len) in cases {
            let buf = pack_one(|p| p.int(v));
            assert_eq!(buf[0], mark, "marker for {v}");
            assert_eq!(buf.len(), len, "length for {v}");
            assert_eq!(unpack_int(&buf), v, "round trip for {v}");
        }
    }

    #[test]
    fn test_float_roundtrip() {
        for v in [0.0, -0.0, 1.5, -273.15, f64::MAX, f64::MIN_POSITIVE] {
            let buf = pack_one(|p| p.float(v));
            assert_eq!(buf[0], 0xC1);
            assert_eq!(buf.len(), 9);
            let mut u = Unpacker::new(&buf);
            u.next();
            assert_eq!(u.current_type(), PackType::Float);
            assert_eq!(u.double(), v);
            assert!(u.error().is_none());
        }
    }

    #[test]
    fn test_null_and_bool() {
        let buf = pack_one(|p| {
            p.null();
            p.bool(false);
            p.bool(true);
        });
        assert_eq!(&buf[..], &[0xC0, 0xC2, 0xC3]);

        let mut u = Unpacker::new(&buf);
        u.next();
        assert_eq!(u.current_type(), PackType::Null);
        u.next();
        assert!(!u.bool());
        u.next();
        assert!(u.bool());
        assert!(u.error().is_none());
    }

    #[test]
    fn test_bool_on_wrong_type() {
        let buf = pack_one(|p| p.int(1));
        let mut u = Unpacker::new(&buf);
        u.next();
        assert!(!u.bool());
        assert_eq!(u.error(), Some(&ProtocolError::IllegalBool));
    }

    #[test]
    fn test_string_length_boundaries() {
        // (length, expected marker)
        let cases: &[(usize, u8)] = &[
            (0, 0x80),
            (15, 0x8F),
            (16, 0xD0),
            (255, 0xD0),
            (256, 0xD1),
            (65535, 0xD1),
            (65536, 0xD2),
        ];
        for &(len, mark) in cases {
            let s = "x".repeat(len);
            let buf = pack_one(|p| p.string(&s));
            assert_eq!(buf[0], mark, "marker for len {len}");
            let mut u = Unpacker::new(&buf);
            u.next();
            assert_eq!(u.current_type(), PackType::String);
            assert_eq!(u.string(), s);
            assert!(u.error().is_none());
        }
    }

    #[test]
    fn test_list_and_map_header_boundaries() {
        let cases: &[(usize, u8, u8)] = &[
            (0, 0x90, 0xA0),
            (15, 0x9F, 0xAF),
            (16, 0xD4, 0xD8),
            (255, 0xD4, 0xD8),
            (256, 0xD5, 0xD9),
            (65535, 0xD5, 0xD9),
            (65536, 0xD6, 0xDA),
        ];
        for &(len, list_mark, map_mark) in cases {
            let buf = pack_one(|p| p.list_header(len));
            assert_eq!(buf[0], list_mark, "list marker for {len}");
            let mut u = Unpacker::new(&buf);
            u.next();
            assert_eq!(u.current_type(), PackType::List);
            assert_eq!(u.len() as usize, len);

            let buf = pack_one(|p| p.map_header(len));
            assert_eq!(buf[0], map_mark, "map marker for {len}");
            let mut u = Unpacker::new(&buf);
            u.next();
            assert_eq!(u.current_type(), PackType::Dictionary);
            assert_eq!(u.len() as usize, len);
        }
    }

    #[test]
    fn test_bytes_roundtrip() {
        for len in [0usize, 255, 256, 65535, 65536] {
            let data = vec![0xABu8; len];
            let buf = pack_one(|p| p.bytes(&data));
            let mut u = Unpacker::new(&buf);
            u.next();
            assert_eq!(u.current_type(), PackType::Bytes);
            assert_eq!(u.byte_array(), data);
            assert!(u.error().is_none());
        }
        let buf = pack_one(|p| p.bytes(&[1, 2, 3]));
        assert_eq!(&buf[..], &[0xCC, 0x03, 1, 2, 3]);
    }

    #[test]
    fn test_struct_header() {
        let buf = pack_one(|p| p.struct_header(b'N', 3));
        assert_eq!(&buf[..], &[0xB3, b'N']);

        let mut u = Unpacker::new(&buf);
        u.next();
        assert_eq!(u.current_type(), PackType::Structure);
        assert_eq!(u.len(), 3);
        assert_eq!(u.struct_tag(), b'N');
        assert!(u.error().is_none());
    }

    #[test]
    fn test_packer_sticky_error() {
        let mut buf = BytesMut::new();
        let mut p = Packer::new(&mut buf);
        p.sized_header(u32::MAX as u64, "list", 0x90, 0xD4);
        assert!(matches!(
            p.error(),
            Some(ProtocolError::TooLarge { what: "list", .. })
        ));
        // Later calls are no-ops and the first error is kept.
        p.int(42);
        p.string("ignored");
        assert!(matches!(
            p.error(),
            Some(ProtocolError::TooLarge { what: "list", .. })
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_unpacker_sticky_error_at_end() {
        // A string header claiming 10 bytes with only 3 present.
        let buf = [0x8A, b'a', b'b', b'c'];
        let mut u = Unpacker::new(&buf);
        u.next();
        assert_eq!(u.string(), "");
        assert_eq!(u.error(), Some(&ProtocolError::UnexpectedEnd));
        // Errored decoder keeps returning zero values without advancing.
        u.next();
        assert_eq!(u.int(), 0);
        assert_eq!(u.string(), "");
        assert_eq!(u.error(), Some(&ProtocolError::UnexpectedEnd));
    }

    #[test]
    fn test_unpacker_empty_buffer() {
        let mut u = Unpacker::new(&[]);
        u.next();
        assert_eq!(u.error(), Some(&ProtocolError::UnexpectedEnd));
        assert_eq!(u.int(), 0);
    }

    #[test]
    fn test_truncated_int() {
        // 0xCB promises 8 bytes, only 2 follow.
        let buf = [0xCB, 0x01, 0x02];
        let mut u = Unpacker::new(&buf);
        u.next();
        assert_eq!(u.int(), 0);
        assert_eq!(u.error(), Some(&ProtocolError::UnexpectedEnd));
    }

    proptest! {
        #[test]
        fn prop_int_roundtrip(v in any::<i64>()) {
            let buf = pack_one(|p| p.int(v));
            prop_assert_eq!(unpack_int(&buf), v);
        }

        #[test]
        fn prop_string_roundtrip(s in ".{0,300}") {
            let buf = pack_one(|p| p.string(&s));
            let mut u = Unpacker::new(&buf);
            u.next();
            prop_assert_eq!(u.string(), s);
            prop_assert!(u.error().is_none());
        }

        #[test]
        fn prop_float_roundtrip(v in any::<f64>()) {
            let buf = pack_one(|p| p.float(v));
            let mut u = Unpacker::new(&buf);
            u.next();
            let out = u.double();
            prop_assert_eq!(out.to_bits(), v.to_bits());
        }
    }
}
