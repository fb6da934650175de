//! Database metadata and file-region layout.
//!
//! An MMDB file ends with a metadata map encoded in the same self-describing
//! format as the data section, preceded by a fixed marker. The marker is
//! searched from the end of the buffer; the last occurrence wins, since the
//! data section may legitimately contain the marker bytes.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::cache::CacheScope;
use crate::decoder::Decoder;
use crate::error::{Error, Result};

/// Marker preceding the metadata map: `\xAB\xCD\xEF` followed by
/// `MaxMind.com`.
pub(crate) const METADATA_START_MARKER: &[u8] = b"\xab\xcd\xefMaxMind.com";

/// Size of the zero-filled separator between the search tree and the data
/// section.
pub(crate) const DATA_SECTION_SEPARATOR_SIZE: usize = 16;

/// Metadata describing an open database.
#[derive(Debug, Clone, Deserialize)]
pub struct Metadata {
    /// Major version of the binary format; always 2
    pub binary_format_major_version: u16,
    /// Minor version of the binary format
    pub binary_format_minor_version: u16,
    /// Database build time, seconds since the Unix epoch
    pub build_epoch: u64,
    /// Database type string, e.g. `GeoIP2-City`
    pub database_type: String,
    /// Human-readable description per language tag
    #[serde(default)]
    pub description: BTreeMap<String, String>,
    /// IP version the search tree covers: 4 or 6
    pub ip_version: u16,
    /// Language tags the records are localized for
    #[serde(default)]
    pub languages: Vec<String>,
    /// Number of nodes in the search tree
    pub node_count: u32,
    /// Size of one tree record in bits: 24, 28 or 32
    pub record_size: u16,
}

impl Metadata {
    /// Decode the metadata map at the start of `section`.
    pub(crate) fn from_section(section: &[u8]) -> Result<Metadata> {
        let mut decoder = Decoder::new(section, 0, CacheScope::None);
        Metadata::deserialize(&mut decoder)
            .map_err(|e| Error::InvalidDatabase(format!("invalid metadata: {e}")))
    }

    /// Size of the search tree in bytes, rejecting overflow on hostile
    /// node counts.
    pub(crate) fn tree_size(&self) -> Result<usize> {
        let node_bytes = self.record_size as usize / 4;
        (self.node_count as usize)
            .checked_mul(node_bytes)
            .ok_or_else(|| Error::InvalidDatabase("invalid metadata".to_string()))
    }
}

/// Locate the start of the metadata map (the byte after the last marker).
pub(crate) fn find_metadata_start(buf: &[u8]) -> Result<usize> {
    memchr::memmem::rfind(buf, METADATA_START_MARKER)
        .map(|index| index + METADATA_START_MARKER.len())
        .ok_or_else(|| Error::InvalidDatabase("invalid MaxMind DB file".to_string()))
}
