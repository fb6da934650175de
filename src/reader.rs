//! Reader over a memory-mapped or in-memory MMDB image.
//!
//! A [`Reader`] partitions the buffer into the search tree, the 16-byte
//! separator, the data section and the metadata map, then answers lookups
//! against it. The buffer is immutable for the reader's lifetime; lookups
//! take `&self` and are safe to run from many threads at once.

use std::fs::File;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;

use ipnetwork::IpNetwork;
use log::debug;
use memmap2::Mmap;
use serde::Deserialize;

use crate::cache::CachePolicy;
use crate::de::{self, PathElement, RECORD_OFFSET_TOKEN};
use crate::decoder::{resolve_pointer_chain, Decoder};
use crate::error::{Error, Result};
use crate::metadata::{
    find_metadata_start, Metadata, DATA_SECTION_SEPARATOR_SIZE, METADATA_START_MARKER,
};
use crate::networks::{mask_ip16, Networks};
use crate::tree::SearchTree;
use crate::verify::verify_reader;

/// Options applied when opening a database.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub(crate) cache: CachePolicy,
}

impl Options {
    /// Options with the default pooled string cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the string interning provider. [`CachePolicy::Disabled`] turns
    /// interning off.
    pub fn with_cache(mut self, cache: CachePolicy) -> Self {
        self.cache = cache;
        self
    }
}

/// Opaque, resolved data-section offset of a record.
///
/// Captured from [`LookupResult::offset`] or from a struct field of this
/// type during binding; feed it back to [`Reader::decode_at`] to decode the
/// sub-record later. Pointer chains are resolved before capture, so equal
/// records always compare equal by offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordOffset(pub(crate) usize);

impl RecordOffset {
    /// The raw data-section offset.
    pub fn as_usize(self) -> usize {
        self.0
    }
}

impl<'de> Deserialize<'de> for RecordOffset {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct OffsetVisitor;

        impl serde::de::Visitor<'_> for OffsetVisitor {
            type Value = RecordOffset;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a record offset")
            }

            fn visit_u64<E>(self, v: u64) -> std::result::Result<RecordOffset, E> {
                Ok(RecordOffset(v as usize))
            }
        }

        deserializer.deserialize_newtype_struct(RECORD_OFFSET_TOKEN, OffsetVisitor)
    }
}

/// Translate a leaf record value into a data-section offset.
pub(crate) fn data_offset_for_record(
    record: usize,
    node_count: usize,
    data_len: usize,
) -> Result<usize> {
    let offset = record
        .checked_sub(node_count + DATA_SECTION_SEPARATOR_SIZE)
        .ok_or_else(corrupt_tree)?;
    if offset >= data_len {
        return Err(corrupt_tree());
    }
    Ok(offset)
}

fn corrupt_tree() -> Error {
    Error::InvalidDatabase("the MaxMind DB file's search tree is corrupt".to_string())
}

/// A reader for the MaxMind DB format.
///
/// `S` is any byte container: [`memmap2::Mmap`] from [`Reader::open`], a
/// `Vec<u8>` or a borrowed `&[u8]` through [`Reader::from_bytes`].
pub struct Reader<S: AsRef<[u8]>> {
    storage: Option<S>,
    metadata: Metadata,
    cache: CachePolicy,
    tree_size: usize,
    data_start: usize,
    data_end: usize,
    node_count: usize,
    ipv4_start: usize,
    ipv4_start_bit: usize,
}

impl Reader<Mmap> {
    /// Open and memory-map a database file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Reader<Mmap>> {
        Self::open_with(path, Options::default())
    }

    /// Open and memory-map a database file with explicit options.
    pub fn open_with<P: AsRef<Path>>(path: P, options: Options) -> Result<Reader<Mmap>> {
        let file = File::open(path)?;
        // SAFETY: the mapping is read-only and treated as untrusted bytes;
        // every access below is bounds-checked.
        let mmap = unsafe { Mmap::map(&file)? };
        Reader::from_bytes_with(mmap, options)
    }
}

impl<S: AsRef<[u8]>> Reader<S> {
    /// Build a reader over an already-materialized database image.
    pub fn from_bytes(source: S) -> Result<Reader<S>> {
        Self::from_bytes_with(source, Options::default())
    }

    /// Build a reader over an already-materialized database image with
    /// explicit options.
    pub fn from_bytes_with(source: S, options: Options) -> Result<Reader<S>> {
        let buf = source.as_ref();
        let metadata_start = find_metadata_start(buf)?;
        let metadata = Metadata::from_section(&buf[metadata_start..])?;

        if !matches!(metadata.record_size, 24 | 28 | 32) {
            return Err(Error::InvalidDatabase(format!(
                "unknown record size: {}",
                metadata.record_size
            )));
        }
        if !matches!(metadata.ip_version, 4 | 6) {
            return Err(Error::InvalidDatabase(format!(
                "invalid ip_version: {}",
                metadata.ip_version
            )));
        }

        let tree_size = metadata.tree_size()?;
        let data_start = tree_size
            .checked_add(DATA_SECTION_SEPARATOR_SIZE)
            .ok_or_else(|| Error::InvalidDatabase("invalid metadata".to_string()))?;
        let data_end = metadata_start - METADATA_START_MARKER.len();
        if data_start > data_end {
            return Err(Error::InvalidDatabase("invalid metadata".to_string()));
        }

        let node_count = metadata.node_count as usize;
        let tree = SearchTree::new(&buf[..tree_size], node_count, metadata.record_size);
        let (ipv4_start, ipv4_start_bit) = if metadata.ip_version == 6 {
            tree.ipv4_start()?
        } else {
            // 16-byte addresses skip the 96 leading zero bits.
            (0, 96)
        };

        debug!(
            "opened MaxMind DB: type={}, node_count={}, record_size={}, ip_version={}",
            metadata.database_type, metadata.node_count, metadata.record_size, metadata.ip_version
        );

        Ok(Reader {
            storage: Some(source),
            metadata,
            cache: options.cache,
            tree_size,
            data_start,
            data_end,
            node_count,
            ipv4_start,
            ipv4_start_bit,
        })
    }

    /// Metadata of the open database.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub(crate) fn buffer(&self) -> Result<&[u8]> {
        self.storage.as_ref().map(AsRef::as_ref).ok_or(Error::Closed)
    }

    pub(crate) fn data_section(&self) -> Result<&[u8]> {
        Ok(&self.buffer()?[self.data_start..self.data_end])
    }

    pub(crate) fn tree_view(&self) -> Result<SearchTree<'_>> {
        Ok(SearchTree::new(
            &self.buffer()?[..self.tree_size],
            self.node_count,
            self.metadata.record_size,
        ))
    }

    pub(crate) fn tree_size(&self) -> usize {
        self.tree_size
    }

    pub(crate) fn node_count(&self) -> usize {
        self.node_count
    }

    pub(crate) fn ipv4_start_info(&self) -> (usize, usize) {
        (self.ipv4_start, self.ipv4_start_bit)
    }

    /// Look up an address.
    ///
    /// The result always carries the enclosing prefix; [`LookupResult::found`]
    /// tells whether a record exists for it. IPv4-mapped IPv6 addresses are
    /// unmapped before the search.
    pub fn lookup(&self, address: IpAddr) -> Result<LookupResult<'_, S>> {
        let tree = self.tree_view()?;
        let lookup_addr = unmap(address);

        if self.metadata.ip_version == 4 && matches!(lookup_addr, IpAddr::V6(_)) {
            return Err(Error::IpVersionMismatch(address));
        }

        let ip = ip_to_bytes(lookup_addr);
        let (start_node, start_bit) = match lookup_addr {
            IpAddr::V4(_) => (self.ipv4_start, self.ipv4_start_bit),
            IpAddr::V6(_) => (0, 0),
        };

        let (record, prefix_len) = tree.traverse(&ip, start_node, start_bit, 128)?;
        if record < self.node_count {
            return Err(Error::InvalidDatabase(
                "invalid node in search tree".to_string(),
            ));
        }

        let network = lookup_network(lookup_addr, &ip, prefix_len)?;
        let data_offset = if record == self.node_count {
            None
        } else {
            Some(data_offset_for_record(
                record,
                self.node_count,
                self.data_end - self.data_start,
            )?)
        };

        Ok(LookupResult {
            reader: self,
            network,
            data_offset,
        })
    }

    /// Iterate every prefix/record pair in the database.
    ///
    /// Aliases of the IPv4 subtree are skipped by default; see
    /// [`Networks::include_aliased_networks`].
    pub fn networks(&self) -> Networks<'_, S> {
        Networks::all(self)
    }

    /// Iterate the prefix/record pairs contained in `network`.
    pub fn networks_within(&self, network: IpNetwork) -> Result<Networks<'_, S>> {
        Networks::within(self, network)
    }

    /// Validate the database end-to-end: metadata, search tree, separator,
    /// and a full decode of every reachable record.
    pub fn verify(&self) -> Result<()> {
        verify_reader(self)
    }

    /// Close the reader, releasing the mapping. Idempotent; later operations
    /// return [`Error::Closed`].
    pub fn close(&mut self) {
        self.storage = None;
    }

    /// A cursor positioned at `offset`, for hand-written decoders.
    pub fn decoder_at(&self, offset: RecordOffset) -> Result<Decoder<'_>> {
        let data = self.data_section()?;
        if offset.0 >= data.len() {
            return Err(Error::OffsetOverrun);
        }
        Ok(Decoder::new(data, offset.0, self.cache.scope()))
    }

    /// Decode the record at a previously captured offset, bypassing the
    /// search tree.
    pub fn decode_at<'s, T>(&'s self, offset: RecordOffset) -> Result<T>
    where
        T: Deserialize<'s>,
    {
        let mut decoder = self.decoder_at(offset)?;
        T::deserialize(&mut decoder)
    }
}

impl<S: AsRef<[u8]>> std::fmt::Debug for Reader<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("metadata", &self.metadata)
            .field("closed", &self.storage.is_none())
            .finish()
    }
}

/// Outcome of a lookup: the enclosing prefix plus the record, if any.
pub struct LookupResult<'r, S: AsRef<[u8]>> {
    reader: &'r Reader<S>,
    network: IpNetwork,
    data_offset: Option<usize>,
}

impl<'r, S: AsRef<[u8]>> LookupResult<'r, S> {
    pub(crate) fn new(
        reader: &'r Reader<S>,
        network: IpNetwork,
        data_offset: Option<usize>,
    ) -> Self {
        Self {
            reader,
            network,
            data_offset,
        }
    }

    /// Whether a record exists for this prefix.
    pub fn found(&self) -> bool {
        self.data_offset.is_some()
    }

    /// The smallest enclosing prefix the search ended on.
    pub fn network(&self) -> IpNetwork {
        self.network
    }

    pub(crate) fn raw_offset(&self) -> Option<usize> {
        self.data_offset
    }

    /// Resolved data-section offset of the record, usable as a cache key:
    /// equal records yield equal offsets even when reached through different
    /// pointers.
    pub fn offset(&self) -> Result<Option<RecordOffset>> {
        match self.data_offset {
            None => Ok(None),
            Some(offset) => {
                let data = self.reader.data_section()?;
                Ok(Some(RecordOffset(resolve_pointer_chain(data, offset)?)))
            }
        }
    }

    /// Decode the record into `T`. Returns `Ok(None)` when no record exists.
    pub fn decode<'s, T>(&'s self) -> Result<Option<T>>
    where
        T: Deserialize<'s>,
    {
        let Some(offset) = self.data_offset else {
            return Ok(None);
        };
        let data = self.reader.data_section()?;
        let mut decoder = Decoder::new(data, offset, self.reader.cache.scope());
        T::deserialize(&mut decoder).map(Some)
    }

    /// Decode the value at `path` inside the record. A missing key, an
    /// out-of-range index, or a kind mismatch along the path returns
    /// `Ok(None)`.
    pub fn decode_path<'s, T>(&'s self, path: &[PathElement<'_>]) -> Result<Option<T>>
    where
        T: Deserialize<'s>,
    {
        let Some(offset) = self.data_offset else {
            return Ok(None);
        };
        let data = self.reader.data_section()?;
        let mut decoder = Decoder::new(data, offset, self.reader.cache.scope());
        de::decode_path(&mut decoder, path)
    }
}

impl<S: AsRef<[u8]>> std::fmt::Debug for LookupResult<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LookupResult")
            .field("network", &self.network)
            .field("data_offset", &self.data_offset)
            .finish()
    }
}

fn unmap(address: IpAddr) -> IpAddr {
    match address {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

fn ip_to_bytes(address: IpAddr) -> [u8; 16] {
    match address {
        IpAddr::V4(v4) => {
            let mut bytes = [0u8; 16];
            bytes[12..].copy_from_slice(&v4.octets());
            bytes
        }
        IpAddr::V6(v6) => v6.octets(),
    }
}

/// The enclosing network for a lookup. The family follows the query: an
/// IPv4 query yields an IPv4 prefix once the match is at least 96 bits deep;
/// shallower matches in an IPv6 tree are reported as the zero-address IPv6
/// prefix, which is the only honest description of such a record.
fn lookup_network(address: IpAddr, ip: &[u8; 16], prefix_len: usize) -> Result<IpNetwork> {
    let mut masked = *ip;
    mask_ip16(&mut masked, prefix_len);

    match address {
        IpAddr::V4(_) if prefix_len >= 96 => {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&masked[12..]);
            Ok(IpNetwork::new(
                IpAddr::V4(Ipv4Addr::from(octets)),
                (prefix_len - 96) as u8,
            )?)
        }
        _ => Ok(IpNetwork::new(
            IpAddr::V6(Ipv6Addr::from(masked)),
            prefix_len as u8,
        )?),
    }
}
