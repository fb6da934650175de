//! End-to-end database validation.
//!
//! Four passes, each building on the last:
//! 1. metadata sanity (format version, type, description, tree shape),
//! 2. a full tree walk collecting every reachable data offset,
//! 3. the 16-byte separator must be all zeros,
//! 4. a complete recursive decode of every reachable record, bounded by the
//!    container depth cap.
//!
//! The verifier reports the first failure it finds; a database that passes
//! can be decoded in full without errors.

use log::debug;
use rustc_hash::FxHashSet;

use crate::decoder::{decode_key, depth_error, follow_pointers, Decoder, Kind, MAX_DATA_DEPTH};
use crate::error::{Error, Result};
use crate::metadata::{Metadata, DATA_SECTION_SEPARATOR_SIZE};
use crate::reader::Reader;

pub(crate) fn verify_reader<S: AsRef<[u8]>>(reader: &Reader<S>) -> Result<()> {
    verify_metadata(reader.metadata())?;
    let offsets = verify_tree(reader)?;
    verify_separator(reader)?;
    verify_data(reader, &offsets)?;
    debug!(
        "verified database: {} reachable data offsets",
        offsets.len()
    );
    Ok(())
}

fn verify_metadata(metadata: &Metadata) -> Result<()> {
    if metadata.binary_format_major_version != 2 || metadata.binary_format_minor_version != 0 {
        return Err(Error::InvalidDatabase(format!(
            "unsupported binary format version {}.{}",
            metadata.binary_format_major_version, metadata.binary_format_minor_version
        )));
    }
    if metadata.database_type.is_empty() {
        return Err(Error::InvalidDatabase(
            "database_type is empty".to_string(),
        ));
    }
    if metadata.description.is_empty() {
        return Err(Error::InvalidDatabase("description is empty".to_string()));
    }
    if !matches!(metadata.ip_version, 4 | 6) {
        return Err(Error::InvalidDatabase(format!(
            "invalid ip_version: {}",
            metadata.ip_version
        )));
    }
    if !matches!(metadata.record_size, 24 | 28 | 32) {
        return Err(Error::InvalidDatabase(format!(
            "unknown record size: {}",
            metadata.record_size
        )));
    }
    if metadata.node_count == 0 {
        return Err(Error::InvalidDatabase(
            "node_count must be positive".to_string(),
        ));
    }
    Ok(())
}

fn verify_tree<S: AsRef<[u8]>>(reader: &Reader<S>) -> Result<FxHashSet<usize>> {
    let mut offsets = FxHashSet::default();
    for item in reader.networks() {
        let result = item?;
        if let Some(offset) = result.raw_offset() {
            offsets.insert(offset);
        }
    }
    Ok(offsets)
}

fn verify_separator<S: AsRef<[u8]>>(reader: &Reader<S>) -> Result<()> {
    let buf = reader.buffer()?;
    let start = reader.tree_size();
    let separator = &buf[start..start + DATA_SECTION_SEPARATOR_SIZE];
    for (i, &byte) in separator.iter().enumerate() {
        if byte != 0 {
            return Err(Error::InvalidDatabase(format!(
                "unexpected byte in data section separator at offset {i}"
            )));
        }
    }
    Ok(())
}

fn verify_data<S: AsRef<[u8]>>(reader: &Reader<S>, offsets: &FxHashSet<usize>) -> Result<()> {
    let data = reader.data_section()?;
    let decoder = Decoder::new(data, 0, crate::cache::CacheScope::None);
    for &offset in offsets {
        check_value(&decoder, offset, 0)?;
    }
    Ok(())
}

/// Recursively decode the value at `offset`, validating kinds, sizes, UTF-8
/// and pointer targets. Returns the offset just past the value in the
/// originating stream.
fn check_value(dec: &Decoder<'_>, offset: usize, depth: usize) -> Result<usize> {
    if depth > MAX_DATA_DEPTH {
        return Err(depth_error());
    }

    let data = dec.data();
    let c = follow_pointers(data, offset)?;
    match c.kind {
        Kind::Map => {
            let mut cursor = c.payload;
            for _ in 0..c.size {
                let (_key, value_offset) = decode_key(data, cursor)?;
                cursor = check_value(dec, value_offset, depth + 1)?;
            }
            Ok(c.after_pointer.unwrap_or(cursor))
        }
        Kind::Array => {
            let mut cursor = c.payload;
            for _ in 0..c.size {
                cursor = check_value(dec, cursor, depth + 1)?;
            }
            Ok(c.after_pointer.unwrap_or(cursor))
        }
        Kind::Bool => dec.read_bool_at(offset).map(|(_, next)| next),
        Kind::Uint16 => dec.read_u16_at(offset).map(|(_, next)| next),
        Kind::Uint32 => dec.read_u32_at(offset).map(|(_, next)| next),
        Kind::Uint64 => dec.read_u64_at(offset).map(|(_, next)| next),
        Kind::Uint128 => dec.read_u128_at(offset).map(|(_, next)| next),
        Kind::Int32 => dec.read_i32_at(offset).map(|(_, next)| next),
        Kind::Double => dec.read_f64_at(offset).map(|(_, next)| next),
        Kind::Float => dec.read_f32_at(offset).map(|(_, next)| next),
        Kind::String => dec.read_str_at(offset).map(|(_, next)| next),
        Kind::Bytes => dec.read_bytes_at(offset).map(|(_, next)| next),
        Kind::Pointer | Kind::Container | Kind::EndMarker => Err(Error::InvalidDatabase(
            format!("unsupported data type {} in data section", c.kind.name()),
        )),
    }
}
