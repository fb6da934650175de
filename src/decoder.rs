//! Data-section decoding for the MMDB format.
//!
//! The data section is a stream of self-describing values: a control byte
//! carries a type tag in its high 3 bits and a size hint in the low 5 bits.
//! Tag 0 is "extended" and pulls the real type from the following byte.
//! Values reference each other through compressed pointers, which is how the
//! format deduplicates shared records.
//!
//! Control byte layout:
//!
//! ```text
//! ┌───────────┬─────────────┐
//! │ type (3)  │  size (5)   │   size 29/30/31 → 1/2/3 extra length bytes
//! └───────────┴─────────────┘
//! ```
//!
//! This module has two layers:
//! - free functions that decode a value at an arbitrary offset with strict
//!   bounds checking and never panic on malformed input;
//! - [`Decoder`], a stateful cursor with typed reads and lazy map/array
//!   iteration, the building block for the serde binder in `de`.

use crate::cache::CacheScope;
use crate::error::{Error, Result};

/// Maximum container/pointer nesting before a database is declared corrupt.
/// Defeats pointer cycles in hostile files.
pub(crate) const MAX_DATA_DEPTH: usize = 512;

/// Data type tags used in the data section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Compressed reference to another data-section offset
    Pointer,
    /// UTF-8 string
    String,
    /// IEEE 754 double precision float, always 8 bytes
    Double,
    /// Raw byte array
    Bytes,
    /// Unsigned 16-bit integer, 0-2 big-endian bytes
    Uint16,
    /// Unsigned 32-bit integer, 0-4 big-endian bytes
    Uint32,
    /// Key/value map; size counts entries
    Map,
    /// Signed 32-bit integer, left-zero-padded
    Int32,
    /// Unsigned 64-bit integer, 0-8 big-endian bytes
    Uint64,
    /// Unsigned 128-bit integer, 0-16 big-endian bytes
    Uint128,
    /// Ordered list of values; size counts elements
    Array,
    /// Reserved container type; never valid in a data section
    Container,
    /// Reserved end marker; never valid in a data section
    EndMarker,
    /// Boolean; the size hint is the value, the payload is empty
    Bool,
    /// IEEE 754 single precision float, always 4 bytes
    Float,
}

impl Kind {
    fn from_tag(tag: u8) -> Option<Kind> {
        match tag {
            1 => Some(Kind::Pointer),
            2 => Some(Kind::String),
            3 => Some(Kind::Double),
            4 => Some(Kind::Bytes),
            5 => Some(Kind::Uint16),
            6 => Some(Kind::Uint32),
            7 => Some(Kind::Map),
            _ => None,
        }
    }

    fn from_extended(ext: u8) -> Result<Kind> {
        match ext.wrapping_add(7) {
            8 => Ok(Kind::Int32),
            9 => Ok(Kind::Uint64),
            10 => Ok(Kind::Uint128),
            11 => Ok(Kind::Array),
            12 => Ok(Kind::Container),
            13 => Ok(Kind::EndMarker),
            14 => Ok(Kind::Bool),
            15 => Ok(Kind::Float),
            n => Err(Error::InvalidDatabase(format!("unknown type: {n}"))),
        }
    }

    /// On-disk type name, matching the reference implementation's diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Kind::Pointer => "pointer",
            Kind::String => "utf8_string",
            Kind::Double => "double",
            Kind::Bytes => "bytes",
            Kind::Uint16 => "uint16",
            Kind::Uint32 => "uint32",
            Kind::Map => "map",
            Kind::Int32 => "int32",
            Kind::Uint64 => "uint64",
            Kind::Uint128 => "uint128",
            Kind::Array => "array",
            Kind::Container => "container",
            Kind::EndMarker => "end_marker",
            Kind::Bool => "boolean",
            Kind::Float => "float",
        }
    }
}

pub(crate) fn depth_error() -> Error {
    Error::InvalidDatabase(
        "exceeded maximum data structure depth; database is likely corrupt".to_string(),
    )
}

fn bad_data(detail: &str) -> Error {
    Error::InvalidDatabase(format!(
        "the MaxMind DB file's data section contains bad data ({detail})"
    ))
}

pub(crate) fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes)
        .map_err(|_| Error::InvalidDatabase("invalid UTF-8 in string".to_string()))
}

fn fetch(data: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    let end = offset.checked_add(len).ok_or(Error::OffsetOverrun)?;
    data.get(offset..end).ok_or(Error::OffsetOverrun)
}

fn fetch_byte(data: &[u8], offset: usize) -> Result<u8> {
    data.get(offset).copied().ok_or(Error::OffsetOverrun)
}

/// Decode the control byte at `offset`.
///
/// Returns `(kind, size, payload_offset)`. For [`Kind::Pointer`] the returned
/// size is the raw 5-bit hint (pointers encode their own length in it, never
/// the 29/30/31 extension); for every other kind it is the fully decoded
/// payload size or entry count.
pub(crate) fn read_control(data: &[u8], offset: usize) -> Result<(Kind, usize, usize)> {
    let ctrl = fetch_byte(data, offset)?;
    let mut cursor = offset + 1;

    let kind = match ctrl >> 5 {
        0 => {
            let ext = fetch_byte(data, cursor)?;
            cursor += 1;
            Kind::from_extended(ext)?
        }
        tag => match Kind::from_tag(tag) {
            Some(kind) => kind,
            None => return Err(Error::InvalidDatabase(format!("unknown type: {tag}"))),
        },
    };

    if matches!(kind, Kind::Container | Kind::EndMarker) {
        return Err(Error::InvalidDatabase(format!(
            "unsupported data type {} in data section",
            kind.name()
        )));
    }

    let hint = (ctrl & 0x1f) as usize;
    if kind == Kind::Pointer {
        return Ok((kind, hint, cursor));
    }

    let size = match hint {
        0..=28 => hint,
        29 => {
            let b = fetch_byte(data, cursor)?;
            cursor += 1;
            29 + b as usize
        }
        30 => {
            let b = fetch(data, cursor, 2)?;
            cursor += 2;
            285 + ((b[0] as usize) << 8 | b[1] as usize)
        }
        _ => {
            let b = fetch(data, cursor, 3)?;
            cursor += 3;
            65821 + ((b[0] as usize) << 16 | (b[1] as usize) << 8 | b[2] as usize)
        }
    };

    Ok((kind, size, cursor))
}

/// Decode a pointer payload.
///
/// `hint` is the raw 5-bit size field of the pointer's control byte;
/// `cursor` points just past the control byte. Returns the target offset
/// (data-section relative) and the offset just past the pointer in the
/// originating stream.
pub(crate) fn decode_pointer(data: &[u8], hint: usize, cursor: usize) -> Result<(usize, usize)> {
    const BIAS: [usize; 4] = [0, 2048, 526336, 0];

    let pointer_size = ((hint >> 3) & 0x3) + 1;
    let prefix = if pointer_size == 4 { 0 } else { hint & 0x7 };
    let bytes = fetch(data, cursor, pointer_size)?;
    let unpacked = bytes
        .iter()
        .fold(prefix, |acc, &b| (acc << 8) | b as usize);

    Ok((unpacked + BIAS[pointer_size - 1], cursor + pointer_size))
}

/// A control byte resolved through any pointer chain in front of it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResolvedControl {
    pub kind: Kind,
    pub size: usize,
    /// Offset of the payload (first entry, for containers)
    pub payload: usize,
    /// Offset of the resolved value's own control byte
    pub value_offset: usize,
    /// Continuation in the originating stream when a pointer was followed
    pub after_pointer: Option<usize>,
}

impl ResolvedControl {
    /// Offset just past this value, valid for non-container kinds only.
    fn next(&self) -> usize {
        match self.after_pointer {
            Some(next) => next,
            None => match self.kind {
                Kind::Bool => self.payload,
                _ => self.payload + self.size,
            },
        }
    }
}

/// Decode the control byte at `offset`, transparently following pointers.
pub(crate) fn follow_pointers(data: &[u8], offset: usize) -> Result<ResolvedControl> {
    let mut current = offset;
    let mut after_pointer = None;

    for _ in 0..MAX_DATA_DEPTH {
        let (kind, size, cursor) = read_control(data, current)?;
        if kind != Kind::Pointer {
            return Ok(ResolvedControl {
                kind,
                size,
                payload: cursor,
                value_offset: current,
                after_pointer,
            });
        }
        let (target, next) = decode_pointer(data, size, cursor)?;
        if after_pointer.is_none() {
            after_pointer = Some(next);
        }
        current = target;
    }

    Err(depth_error())
}

/// Resolve a pointer chain to the offset of the first non-pointer value.
///
/// Equal records share a resolved offset regardless of which pointer reached
/// them, which is what makes the offset usable as a client-side cache key.
pub(crate) fn resolve_pointer_chain(data: &[u8], offset: usize) -> Result<usize> {
    Ok(follow_pointers(data, offset)?.value_offset)
}

/// Advance past `count` consecutive values starting at `offset` without
/// materializing them. Pointers are stepped over, not followed into.
pub(crate) fn next_value_offset(data: &[u8], mut offset: usize, mut count: usize) -> Result<usize> {
    while count > 0 {
        count -= 1;
        let (kind, size, cursor) = read_control(data, offset)?;
        offset = match kind {
            Kind::Pointer => decode_pointer(data, size, cursor)?.1,
            Kind::Map => {
                count += 2 * size;
                cursor
            }
            Kind::Array => {
                count += size;
                cursor
            }
            Kind::Bool => cursor,
            _ => cursor + size,
        };
    }
    if offset > data.len() {
        return Err(Error::OffsetOverrun);
    }
    Ok(offset)
}

/// Decode the map key at `offset`: one pointer hop at most, then a string.
pub(crate) fn decode_key(data: &[u8], offset: usize) -> Result<(&str, usize)> {
    let (kind, size, cursor) = read_control(data, offset)?;
    let (kind, size, payload, next) = if kind == Kind::Pointer {
        let (target, next) = decode_pointer(data, size, cursor)?;
        let (kind, size, payload) = read_control(data, target)?;
        (kind, size, payload, next)
    } else {
        (kind, size, cursor, cursor + size)
    };

    if kind != Kind::String {
        return Err(Error::InvalidDatabase(format!(
            "invalid map key type: {}",
            kind.name()
        )));
    }
    Ok((utf8(fetch(data, payload, size)?)?, next))
}

fn unmarshal(kind: Kind, dest: &str) -> Error {
    Error::UnmarshalType {
        value: kind.name().to_string(),
        dest: dest.to_string(),
    }
}

fn decode_uint_payload(data: &[u8], payload: usize, size: usize, max: usize, label: &str) -> Result<u64> {
    if size > max {
        return Err(bad_data(&format!("{label} size of {size}")));
    }
    let bytes = fetch(data, payload, size)?;
    Ok(bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64))
}

fn decode_u128_payload(data: &[u8], payload: usize, size: usize) -> Result<u128> {
    if size > 16 {
        return Err(bad_data(&format!("uint128 size of {size}")));
    }
    let bytes = fetch(data, payload, size)?;
    Ok(bytes.iter().fold(0u128, |acc, &b| (acc << 8) | b as u128))
}

fn decode_i32_payload(data: &[u8], payload: usize, size: usize) -> Result<i32> {
    if size > 4 {
        return Err(bad_data(&format!("int32 size of {size}")));
    }
    let bytes = fetch(data, payload, size)?;
    // Left-zero-padded, never sign-extended: short payloads are non-negative.
    Ok(bytes.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32) as i32)
}

fn decode_f64_payload(data: &[u8], payload: usize, size: usize) -> Result<f64> {
    if size != 8 {
        return Err(bad_data(&format!("float 64 size of {size}")));
    }
    let bytes = fetch(data, payload, 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Ok(f64::from_be_bytes(buf))
}

fn decode_f32_payload(data: &[u8], payload: usize, size: usize) -> Result<f32> {
    if size != 4 {
        return Err(bad_data(&format!("float 32 size of {size}")));
    }
    let bytes = fetch(data, payload, 4)?;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    Ok(f32::from_be_bytes(buf))
}

fn decode_bool_size(size: usize) -> Result<bool> {
    match size {
        0 => Ok(false),
        1 => Ok(true),
        n => Err(bad_data(&format!("bool size of {n}"))),
    }
}

/// Stateful cursor over a data section.
///
/// Typed reads verify the stored kind, follow pointer chains transparently,
/// and leave the cursor just past the value (past the originating pointer if
/// one was followed). Obtain one with `Reader::decoder_at`.
pub struct Decoder<'a> {
    data: &'a [u8],
    offset: usize,
    depth: usize,
    cache: CacheScope<'a>,
    poisoned: Option<Error>,
}

impl<'a> Decoder<'a> {
    pub(crate) fn new(data: &'a [u8], offset: usize, cache: CacheScope<'a>) -> Self {
        Self {
            data,
            offset,
            depth: 0,
            cache,
            poisoned: None,
        }
    }

    /// Current offset within the data section.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub(crate) fn data(&self) -> &'a [u8] {
        self.data
    }

    pub(crate) fn set_offset(&mut self, offset: usize) {
        self.offset = offset;
    }

    pub(crate) fn resolved_control(&self) -> Result<ResolvedControl> {
        follow_pointers(self.data, self.offset)
    }

    pub(crate) fn enter(&mut self) -> Result<()> {
        if self.depth >= MAX_DATA_DEPTH {
            return Err(depth_error());
        }
        self.depth += 1;
        Ok(())
    }

    pub(crate) fn exit(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub(crate) fn poison(&mut self, err: Error) {
        if self.poisoned.is_none() {
            self.poisoned = Some(err);
        }
    }

    fn check(&self) -> Result<()> {
        match &self.poisoned {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Kind of the value at the cursor, after following pointers. Does not
    /// advance.
    pub fn peek_kind(&self) -> Result<Kind> {
        self.check()?;
        Ok(self.resolved_control()?.kind)
    }

    /// Advance past one value without materializing it.
    pub fn skip_value(&mut self) -> Result<()> {
        self.check()?;
        self.offset = next_value_offset(self.data, self.offset, 1)?;
        Ok(())
    }

    /// Read a boolean.
    pub fn read_bool(&mut self) -> Result<bool> {
        self.check()?;
        let (v, next) = self.read_bool_at(self.offset)?;
        self.offset = next;
        Ok(v)
    }

    /// Read an unsigned 16-bit integer.
    pub fn read_u16(&mut self) -> Result<u16> {
        self.check()?;
        let (v, next) = self.read_u16_at(self.offset)?;
        self.offset = next;
        Ok(v)
    }

    /// Read an unsigned 32-bit integer.
    pub fn read_u32(&mut self) -> Result<u32> {
        self.check()?;
        let (v, next) = self.read_u32_at(self.offset)?;
        self.offset = next;
        Ok(v)
    }

    /// Read an unsigned 64-bit integer.
    pub fn read_u64(&mut self) -> Result<u64> {
        self.check()?;
        let (v, next) = self.read_u64_at(self.offset)?;
        self.offset = next;
        Ok(v)
    }

    /// Read an unsigned 128-bit integer.
    pub fn read_u128(&mut self) -> Result<u128> {
        self.check()?;
        let (v, next) = self.read_u128_at(self.offset)?;
        self.offset = next;
        Ok(v)
    }

    /// Read a signed 32-bit integer.
    pub fn read_i32(&mut self) -> Result<i32> {
        self.check()?;
        let (v, next) = self.read_i32_at(self.offset)?;
        self.offset = next;
        Ok(v)
    }

    /// Read a 32-bit float.
    pub fn read_f32(&mut self) -> Result<f32> {
        self.check()?;
        let (v, next) = self.read_f32_at(self.offset)?;
        self.offset = next;
        Ok(v)
    }

    /// Read a 64-bit float.
    pub fn read_f64(&mut self) -> Result<f64> {
        self.check()?;
        let (v, next) = self.read_f64_at(self.offset)?;
        self.offset = next;
        Ok(v)
    }

    /// Read a string borrowed from the underlying buffer.
    pub fn read_str(&mut self) -> Result<&'a str> {
        self.check()?;
        let (v, next) = self.read_str_at(self.offset)?;
        self.offset = next;
        Ok(v)
    }

    /// Read an owned string, consulting the intern cache when one is
    /// configured.
    pub fn read_string(&mut self) -> Result<String> {
        self.check()?;
        let c = self.resolved_control()?;
        if c.kind != Kind::String {
            return Err(unmarshal(c.kind, "string"));
        }
        let bytes = fetch(self.data, c.payload, c.size)?;
        let s = self.cache.intern(c.payload, bytes)?;
        self.offset = c.next();
        Ok(s)
    }

    /// Read a byte blob borrowed from the underlying buffer.
    pub fn read_bytes(&mut self) -> Result<&'a [u8]> {
        self.check()?;
        let (v, next) = self.read_bytes_at(self.offset)?;
        self.offset = next;
        Ok(v)
    }

    /// Begin reading a map. The returned reader yields each key; the value
    /// behind each key is read through [`MapReader::value`], or skipped
    /// automatically if left untouched. Dropping the reader mid-way skips the
    /// remaining entries so this cursor stays positioned correctly.
    pub fn read_map(&mut self) -> Result<MapReader<'a, '_>> {
        self.check()?;
        let c = self.resolved_control()?;
        if c.kind != Kind::Map {
            return Err(unmarshal(c.kind, "map"));
        }
        self.enter()?;
        self.offset = c.payload;
        Ok(MapReader {
            len: c.size,
            remaining: c.size,
            pending_value: None,
            resume: c.after_pointer,
            dec: self,
        })
    }

    /// Begin reading an array. Same positioning contract as [`read_map`].
    ///
    /// [`read_map`]: Decoder::read_map
    pub fn read_array(&mut self) -> Result<ArrayReader<'a, '_>> {
        self.check()?;
        let c = self.resolved_control()?;
        if c.kind != Kind::Array {
            return Err(unmarshal(c.kind, "array"));
        }
        self.enter()?;
        self.offset = c.payload;
        Ok(ArrayReader {
            len: c.size,
            remaining: c.size,
            pending: None,
            resume: c.after_pointer,
            dec: self,
        })
    }

    /// Kind of the value at `offset`, after following pointers.
    pub fn kind_at(&self, offset: usize) -> Result<Kind> {
        Ok(follow_pointers(self.data, offset)?.kind)
    }

    fn control_expecting(&self, offset: usize, kind: Kind, dest: &str) -> Result<ResolvedControl> {
        let c = follow_pointers(self.data, offset)?;
        if c.kind != kind {
            return Err(unmarshal(c.kind, dest));
        }
        Ok(c)
    }

    /// Stateless boolean read; returns the value and the offset just past it.
    pub fn read_bool_at(&self, offset: usize) -> Result<(bool, usize)> {
        let c = self.control_expecting(offset, Kind::Bool, "bool")?;
        Ok((decode_bool_size(c.size)?, c.next()))
    }

    /// Stateless unsigned 16-bit read.
    pub fn read_u16_at(&self, offset: usize) -> Result<(u16, usize)> {
        let c = self.control_expecting(offset, Kind::Uint16, "uint16")?;
        let v = decode_uint_payload(self.data, c.payload, c.size, 2, "uint16")?;
        Ok((v as u16, c.next()))
    }

    /// Stateless unsigned 32-bit read.
    pub fn read_u32_at(&self, offset: usize) -> Result<(u32, usize)> {
        let c = self.control_expecting(offset, Kind::Uint32, "uint32")?;
        let v = decode_uint_payload(self.data, c.payload, c.size, 4, "uint32")?;
        Ok((v as u32, c.next()))
    }

    /// Stateless unsigned 64-bit read.
    pub fn read_u64_at(&self, offset: usize) -> Result<(u64, usize)> {
        let c = self.control_expecting(offset, Kind::Uint64, "uint64")?;
        let v = decode_uint_payload(self.data, c.payload, c.size, 8, "uint64")?;
        Ok((v, c.next()))
    }

    /// Stateless unsigned 128-bit read.
    pub fn read_u128_at(&self, offset: usize) -> Result<(u128, usize)> {
        let c = self.control_expecting(offset, Kind::Uint128, "uint128")?;
        Ok((decode_u128_payload(self.data, c.payload, c.size)?, c.next()))
    }

    /// Stateless signed 32-bit read.
    pub fn read_i32_at(&self, offset: usize) -> Result<(i32, usize)> {
        let c = self.control_expecting(offset, Kind::Int32, "int32")?;
        Ok((decode_i32_payload(self.data, c.payload, c.size)?, c.next()))
    }

    /// Stateless 32-bit float read.
    pub fn read_f32_at(&self, offset: usize) -> Result<(f32, usize)> {
        let c = self.control_expecting(offset, Kind::Float, "float")?;
        Ok((decode_f32_payload(self.data, c.payload, c.size)?, c.next()))
    }

    /// Stateless 64-bit float read.
    pub fn read_f64_at(&self, offset: usize) -> Result<(f64, usize)> {
        let c = self.control_expecting(offset, Kind::Double, "double")?;
        Ok((decode_f64_payload(self.data, c.payload, c.size)?, c.next()))
    }

    /// Stateless borrowed string read.
    pub fn read_str_at(&self, offset: usize) -> Result<(&'a str, usize)> {
        let c = self.control_expecting(offset, Kind::String, "string")?;
        let bytes = fetch(self.data, c.payload, c.size)?;
        Ok((utf8(bytes)?, c.next()))
    }

    /// Stateless borrowed bytes read.
    pub fn read_bytes_at(&self, offset: usize) -> Result<(&'a [u8], usize)> {
        let c = self.control_expecting(offset, Kind::Bytes, "bytes")?;
        Ok((fetch(self.data, c.payload, c.size)?, c.next()))
    }
}

/// Lazy reader over one map value. See [`Decoder::read_map`].
pub struct MapReader<'a, 'd> {
    dec: &'d mut Decoder<'a>,
    len: usize,
    remaining: usize,
    /// Offset of the current entry's value, until the caller consumes it
    pending_value: Option<usize>,
    /// Where the enclosing stream resumes if the map was reached by pointer
    resume: Option<usize>,
}

impl<'a> MapReader<'a, '_> {
    /// Number of entries in the map.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Yield the next key, or `None` when the map is exhausted. The cursor is
    /// left at the entry's value; an unconsumed value is skipped on the next
    /// call.
    pub fn next_key(&mut self) -> Result<Option<&'a str>> {
        self.dec.check()?;
        match self.advance() {
            Ok(key) => Ok(key),
            Err(err) => {
                self.dec.poison(err.clone());
                Err(err)
            }
        }
    }

    fn advance(&mut self) -> Result<Option<&'a str>> {
        self.consume_pending()?;
        if self.remaining == 0 {
            self.apply_resume();
            return Ok(None);
        }
        self.remaining -= 1;
        let (key, next) = decode_key(self.dec.data, self.dec.offset)?;
        self.dec.offset = next;
        self.pending_value = Some(self.dec.offset);
        Ok(Some(key))
    }

    /// Access the cursor to read the current entry's value.
    pub fn value(&mut self) -> &mut Decoder<'a> {
        self.dec
    }

    fn consume_pending(&mut self) -> Result<()> {
        if let Some(start) = self.pending_value.take() {
            if self.dec.offset == start {
                self.dec.offset = next_value_offset(self.dec.data, start, 1)?;
            }
        }
        Ok(())
    }

    fn apply_resume(&mut self) {
        if let Some(resume) = self.resume.take() {
            self.dec.offset = resume;
        }
    }

    fn finish(&mut self) -> Result<()> {
        self.consume_pending()?;
        if self.remaining > 0 {
            let skipped = next_value_offset(self.dec.data, self.dec.offset, 2 * self.remaining)?;
            self.remaining = 0;
            self.dec.offset = skipped;
        }
        self.apply_resume();
        Ok(())
    }
}

impl Drop for MapReader<'_, '_> {
    fn drop(&mut self) {
        if self.dec.poisoned.is_none() {
            if let Err(err) = self.finish() {
                self.dec.poison(err);
            }
        }
        self.dec.exit();
    }
}

/// Lazy reader over one array value. See [`Decoder::read_array`].
pub struct ArrayReader<'a, 'd> {
    dec: &'d mut Decoder<'a>,
    len: usize,
    remaining: usize,
    pending: Option<usize>,
    resume: Option<usize>,
}

impl<'a> ArrayReader<'a, '_> {
    /// Number of elements in the array.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Position the cursor at the next element. Returns `false` when the
    /// array is exhausted. An unconsumed element is skipped on the next call.
    pub fn step(&mut self) -> Result<bool> {
        self.dec.check()?;
        match self.advance() {
            Ok(more) => Ok(more),
            Err(err) => {
                self.dec.poison(err.clone());
                Err(err)
            }
        }
    }

    fn advance(&mut self) -> Result<bool> {
        if let Some(start) = self.pending.take() {
            if self.dec.offset == start {
                self.dec.offset = next_value_offset(self.dec.data, start, 1)?;
            }
        }
        if self.remaining == 0 {
            if let Some(resume) = self.resume.take() {
                self.dec.offset = resume;
            }
            return Ok(false);
        }
        self.remaining -= 1;
        self.pending = Some(self.dec.offset);
        Ok(true)
    }

    /// Access the cursor to read the current element.
    pub fn value(&mut self) -> &mut Decoder<'a> {
        self.dec
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(start) = self.pending.take() {
            if self.dec.offset == start {
                self.dec.offset = next_value_offset(self.dec.data, start, 1)?;
            }
        }
        if self.remaining > 0 {
            let skipped = next_value_offset(self.dec.data, self.dec.offset, self.remaining)?;
            self.remaining = 0;
            self.dec.offset = skipped;
        }
        if let Some(resume) = self.resume.take() {
            self.dec.offset = resume;
        }
        Ok(())
    }
}

impl Drop for ArrayReader<'_, '_> {
    fn drop(&mut self) {
        if self.dec.poisoned.is_none() {
            if let Err(err) = self.finish() {
                self.dec.poison(err);
            }
        }
        self.dec.exit();
    }
}
