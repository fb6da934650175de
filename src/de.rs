//! Reflective binding of data-section values into caller types.
//!
//! The binder is a [`serde::Deserializer`] driving the cursor in
//! [`crate::decoder`]. Field resolution, tag overrides and unknown-key
//! skipping come from serde's compile-time derive machinery; this module
//! supplies the data-model mapping:
//!
//! - maps become `MapAccess` with exactly `size` lazy steps,
//! - arrays become `SeqAccess`,
//! - scalars decode by their stored kind and are widened by the
//!   destination's visitor (overflow is an error),
//! - pointers are transparent, with the cursor resuming after the
//!   originating pointer,
//! - a reserved newtype name lets `RecordOffset` capture the resolved
//!   offset of a sub-record without decoding it.
//!
//! Errors are wrapped on the way out with the offset at which they were
//! observed and a slash-delimited key/index path; the happy path allocates
//! nothing for this.

use serde::de::{self, DeserializeSeed, Visitor};
use serde::Deserialize;

use crate::decoder::{decode_key, next_value_offset, resolve_pointer_chain, Decoder, Kind};
use crate::error::{Error, Result};

/// Reserved newtype-struct name used by `RecordOffset` to request the
/// resolved offset of the value at the cursor instead of its contents.
pub(crate) const RECORD_OFFSET_TOKEN: &str = "$mmdbkit::RecordOffset";

/// One step of a [`decode_path`] traversal.
///
/// [`decode_path`]: crate::reader::LookupResult::decode_path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathElement<'p> {
    /// Map key to match
    Key(&'p str),
    /// Array index; negative values count from the end
    Index(i32),
}

impl<'p> From<&'p str> for PathElement<'p> {
    fn from(key: &'p str) -> Self {
        PathElement::Key(key)
    }
}

impl From<i32> for PathElement<'_> {
    fn from(index: i32) -> Self {
        PathElement::Index(index)
    }
}

/// Navigate `path` from the cursor and decode the value it lands on.
///
/// A missing key, an out-of-range index, or a kind mismatch along the way is
/// a no-op returning `Ok(None)`.
pub(crate) fn decode_path<'de, T>(
    dec: &mut Decoder<'de>,
    path: &[PathElement<'_>],
) -> Result<Option<T>>
where
    T: Deserialize<'de>,
{
    for element in path {
        let c = dec.resolved_control()?;
        match (element, c.kind) {
            (PathElement::Key(wanted), Kind::Map) => {
                dec.set_offset(c.payload);
                let mut found = false;
                for _ in 0..c.size {
                    let (key, next) = decode_key(dec.data(), dec.offset())?;
                    dec.set_offset(next);
                    if key == *wanted {
                        found = true;
                        break;
                    }
                    dec.set_offset(next_value_offset(dec.data(), dec.offset(), 1)?);
                }
                if !found {
                    return Ok(None);
                }
            }
            (PathElement::Index(index), Kind::Array) => {
                let position = if *index >= 0 {
                    *index as usize
                } else {
                    match c.size.checked_sub(index.unsigned_abs() as usize) {
                        Some(position) => position,
                        None => return Ok(None),
                    }
                };
                if position >= c.size {
                    return Ok(None);
                }
                dec.set_offset(next_value_offset(dec.data(), c.payload, position)?);
            }
            _ => return Ok(None),
        }
    }
    T::deserialize(dec).map(Some)
}

struct MapBinder<'d, 'de> {
    dec: &'d mut Decoder<'de>,
    remaining: usize,
    pending_value: bool,
    last_key: Option<&'de str>,
}

impl<'de> de::MapAccess<'de> for &mut MapBinder<'_, 'de> {
    type Error = Error;

    fn next_key_seed<K>(&mut self, seed: K) -> Result<Option<K::Value>>
    where
        K: DeserializeSeed<'de>,
    {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        self.pending_value = true;
        let key_offset = self.dec.offset();
        // Remember the key text so a failing value decode can name it
        // without paying for it on the happy path.
        self.last_key = decode_key(self.dec.data(), key_offset).ok().map(|(k, _)| k);
        seed.deserialize(&mut *self.dec)
            .map(Some)
            .map_err(|e| e.at_offset(key_offset))
    }

    fn next_value_seed<V>(&mut self, seed: V) -> Result<V::Value>
    where
        V: DeserializeSeed<'de>,
    {
        self.pending_value = false;
        let value_offset = self.dec.offset();
        let key = self.last_key.take();
        seed.deserialize(&mut *self.dec).map_err(|e| {
            let e = e.at_offset(value_offset);
            match key {
                Some(key) => e.in_field(key),
                None => e,
            }
        })
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.remaining)
    }
}

struct SeqBinder<'d, 'de> {
    dec: &'d mut Decoder<'de>,
    remaining: usize,
    index: usize,
}

impl<'de> de::SeqAccess<'de> for &mut SeqBinder<'_, 'de> {
    type Error = Error;

    fn next_element_seed<E>(&mut self, seed: E) -> Result<Option<E::Value>>
    where
        E: DeserializeSeed<'de>,
    {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        let element_offset = self.dec.offset();
        let index = self.index;
        self.index += 1;
        seed.deserialize(&mut *self.dec)
            .map(Some)
            .map_err(|e| e.at_offset(element_offset).at_index(index))
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.remaining)
    }
}

struct UnitVariantAccess<'d, 'de> {
    dec: &'d mut Decoder<'de>,
}

impl<'de> de::EnumAccess<'de> for UnitVariantAccess<'_, 'de> {
    type Error = Error;
    type Variant = UnitOnly;

    fn variant_seed<V>(self, seed: V) -> Result<(V::Value, UnitOnly)>
    where
        V: DeserializeSeed<'de>,
    {
        let variant = seed.deserialize(&mut *self.dec)?;
        Ok((variant, UnitOnly))
    }
}

struct UnitOnly;

impl<'de> de::VariantAccess<'de> for UnitOnly {
    type Error = Error;

    fn unit_variant(self) -> Result<()> {
        Ok(())
    }

    fn newtype_variant_seed<T>(self, _seed: T) -> Result<T::Value>
    where
        T: DeserializeSeed<'de>,
    {
        Err(Error::Decoding(
            "cannot deserialize a newtype variant from a string".to_string(),
        ))
    }

    fn tuple_variant<V>(self, _len: usize, _visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        Err(Error::Decoding(
            "cannot deserialize a tuple variant from a string".to_string(),
        ))
    }

    fn struct_variant<V>(self, _fields: &'static [&'static str], _visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        Err(Error::Decoding(
            "cannot deserialize a struct variant from a string".to_string(),
        ))
    }
}

struct MapVariantAccess<'d, 'de> {
    dec: &'d mut Decoder<'de>,
}

impl<'de, 'd> de::EnumAccess<'de> for MapVariantAccess<'d, 'de> {
    type Error = Error;
    type Variant = Self;

    fn variant_seed<V>(self, seed: V) -> Result<(V::Value, Self)>
    where
        V: DeserializeSeed<'de>,
    {
        let dec = self.dec;
        let variant = seed.deserialize(&mut *dec)?;
        Ok((variant, MapVariantAccess { dec }))
    }
}

impl<'de> de::VariantAccess<'de> for MapVariantAccess<'_, 'de> {
    type Error = Error;

    fn unit_variant(self) -> Result<()> {
        self.dec.skip_value()
    }

    fn newtype_variant_seed<T>(self, seed: T) -> Result<T::Value>
    where
        T: DeserializeSeed<'de>,
    {
        seed.deserialize(&mut *self.dec)
    }

    fn tuple_variant<V>(self, _len: usize, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        de::Deserializer::deserialize_any(&mut *self.dec, visitor)
    }

    fn struct_variant<V>(self, _fields: &'static [&'static str], visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        de::Deserializer::deserialize_any(&mut *self.dec, visitor)
    }
}

impl<'de> de::Deserializer<'de> for &mut Decoder<'de> {
    type Error = Error;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        let offset = self.offset();
        let wrap = |e: Error| e.at_offset(offset);
        let c = self.resolved_control().map_err(wrap)?;

        match c.kind {
            Kind::String => {
                let s = self.read_str().map_err(wrap)?;
                visitor.visit_borrowed_str(s).map_err(wrap)
            }
            Kind::Bytes => {
                let b = self.read_bytes().map_err(wrap)?;
                visitor.visit_borrowed_bytes(b).map_err(wrap)
            }
            Kind::Double => {
                let v = self.read_f64().map_err(wrap)?;
                visitor.visit_f64(v).map_err(wrap)
            }
            Kind::Float => {
                let v = self.read_f32().map_err(wrap)?;
                visitor.visit_f32(v).map_err(wrap)
            }
            Kind::Bool => {
                let v = self.read_bool().map_err(wrap)?;
                visitor.visit_bool(v).map_err(wrap)
            }
            Kind::Uint16 => {
                let v = self.read_u16().map_err(wrap)?;
                visitor.visit_u64(v.into()).map_err(wrap)
            }
            Kind::Uint32 => {
                let v = self.read_u32().map_err(wrap)?;
                visitor.visit_u64(v.into()).map_err(wrap)
            }
            Kind::Uint64 => {
                let v = self.read_u64().map_err(wrap)?;
                visitor.visit_u64(v).map_err(wrap)
            }
            Kind::Uint128 => {
                let v = self.read_u128().map_err(wrap)?;
                visitor.visit_u128(v).map_err(wrap)
            }
            Kind::Int32 => {
                let v = self.read_i32().map_err(wrap)?;
                visitor.visit_i32(v).map_err(wrap)
            }
            Kind::Map => {
                self.enter().map_err(wrap)?;
                self.set_offset(c.payload);
                let mut binder = MapBinder {
                    dec: &mut *self,
                    remaining: c.size,
                    pending_value: false,
                    last_key: None,
                };
                let result = visitor.visit_map(&mut binder);
                let remaining = binder.remaining;
                let pending = binder.pending_value;
                let result = result.and_then(|value| {
                    // A visitor may stop early; drain what it left behind so
                    // the cursor lands just past the map.
                    let leftover = 2 * remaining + usize::from(pending);
                    if leftover > 0 {
                        let next = next_value_offset(self.data(), self.offset(), leftover)?;
                        self.set_offset(next);
                    }
                    if let Some(after) = c.after_pointer {
                        self.set_offset(after);
                    }
                    Ok(value)
                });
                self.exit();
                result.map_err(wrap)
            }
            Kind::Array => {
                self.enter().map_err(wrap)?;
                self.set_offset(c.payload);
                let mut binder = SeqBinder {
                    dec: &mut *self,
                    remaining: c.size,
                    index: 0,
                };
                let result = visitor.visit_seq(&mut binder);
                let remaining = binder.remaining;
                let result = result.and_then(|value| {
                    if remaining > 0 {
                        let next = next_value_offset(self.data(), self.offset(), remaining)?;
                        self.set_offset(next);
                    }
                    if let Some(after) = c.after_pointer {
                        self.set_offset(after);
                    }
                    Ok(value)
                });
                self.exit();
                result.map_err(wrap)
            }
            Kind::Pointer | Kind::Container | Kind::EndMarker => Err(wrap(
                Error::InvalidDatabase(format!("unexpected {} value", c.kind.name())),
            )),
        }
    }

    fn deserialize_string<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        let offset = self.offset();
        let c = self.resolved_control().map_err(|e| e.at_offset(offset))?;
        if c.kind == Kind::String {
            let s = self.read_string().map_err(|e| e.at_offset(offset))?;
            visitor.visit_string(s).map_err(|e: Error| e.at_offset(offset))
        } else {
            self.deserialize_any(visitor)
        }
    }

    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        // The format has no null; a value that is present is always Some.
        visitor.visit_some(self)
    }

    fn deserialize_newtype_struct<V>(self, name: &'static str, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        if name == RECORD_OFFSET_TOKEN {
            let offset = self.offset();
            let wrap = |e: Error| e.at_offset(offset);
            let resolved = resolve_pointer_chain(self.data(), offset).map_err(wrap)?;
            self.skip_value().map_err(wrap)?;
            return visitor.visit_u64(resolved as u64).map_err(wrap);
        }
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        let offset = self.offset();
        let wrap = |e: Error| e.at_offset(offset);
        let c = self.resolved_control().map_err(wrap)?;
        match c.kind {
            Kind::String => visitor.visit_enum(UnitVariantAccess { dec: self }).map_err(wrap),
            Kind::Map => {
                if c.size != 1 {
                    return Err(wrap(Error::Decoding(format!(
                        "cannot deserialize an enum from a map with {} entries",
                        c.size
                    ))));
                }
                self.enter().map_err(wrap)?;
                self.set_offset(c.payload);
                let result = visitor.visit_enum(MapVariantAccess { dec: &mut *self });
                let result = result.and_then(|value| {
                    if let Some(after) = c.after_pointer {
                        self.set_offset(after);
                    }
                    Ok(value)
                });
                self.exit();
                result.map_err(wrap)
            }
            other => Err(wrap(Error::Decoding(format!(
                "cannot deserialize an enum from {}",
                other.name()
            )))),
        }
    }

    fn deserialize_ignored_any<V>(self, visitor: V) -> Result<V::Value>
    where
        V: Visitor<'de>,
    {
        let offset = self.offset();
        self.skip_value().map_err(|e| e.at_offset(offset))?;
        visitor.visit_unit()
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str bytes
        byte_buf unit unit_struct seq tuple tuple_struct map struct identifier
    }
}
