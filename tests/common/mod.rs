//! Test-support builder for synthetic MMDB images.
//!
//! Produces small, well-formed database files in memory so the integration
//! tests can exercise lookups, iteration and verification without vendored
//! fixtures. Writing databases is not a library feature; this lives with the
//! tests on purpose.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use mmdbkit::Value;

const METADATA_MARKER: &[u8] = b"\xab\xcd\xefMaxMind.com";
const SEPARATOR: [u8; 16] = [0; 16];

/// Builder for a synthetic database.
pub struct TestDb {
    ip_version: u16,
    record_size: u16,
    database_type: String,
    description: Vec<(String, String)>,
    languages: Vec<String>,
    entries: Vec<(IpNetwork, Value)>,
    aliases: bool,
}

impl TestDb {
    pub fn new(ip_version: u16) -> Self {
        Self {
            ip_version,
            record_size: 24,
            database_type: "Test".to_string(),
            description: vec![("en".to_string(), "Test Database".to_string())],
            languages: vec!["en".to_string()],
            entries: Vec::new(),
            aliases: false,
        }
    }

    pub fn record_size(mut self, bits: u16) -> Self {
        self.record_size = bits;
        self
    }

    pub fn database_type(mut self, db_type: &str) -> Self {
        self.database_type = db_type.to_string();
        self
    }

    /// Graft the `::ffff:0:0/96` and `2002::/16` aliases onto the canonical
    /// IPv4 subtree, the way production IPv6 databases do.
    pub fn with_aliases(mut self) -> Self {
        self.aliases = true;
        self
    }

    pub fn insert(&mut self, cidr: &str, value: Value) -> &mut Self {
        let network: IpNetwork = cidr.parse().expect("bad test network");
        self.entries.push((network, value));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        self.build_parts().bytes
    }

    pub fn build_parts(&self) -> BuiltDb {
        let mut encoder = DataEncoder::new();
        let mut tree = TreeBuilder::new(self.ip_version, self.record_size);

        // Aliases go in first, the way production writers lay the tree out;
        // records then grow inside and around the shared IPv4 subtree.
        if self.aliases && self.ip_version == 6 {
            tree.graft_standard_aliases();
        }
        for (network, value) in &self.entries {
            let offset = encoder.encode(value);
            tree.insert(*network, offset);
        }

        let (tree_bytes, node_count) = tree.build();
        let data = encoder.into_bytes();
        let metadata = self.metadata_value(node_count);

        let mut meta_encoder = DataEncoder::new();
        meta_encoder.encode(&metadata);
        let metadata_bytes = meta_encoder.into_bytes();

        let tree_size = tree_bytes.len();
        let mut bytes = tree_bytes;
        bytes.extend_from_slice(&SEPARATOR);
        let data_start = bytes.len();
        bytes.extend_from_slice(&data);
        let data_end = bytes.len();
        bytes.extend_from_slice(METADATA_MARKER);
        bytes.extend_from_slice(&metadata_bytes);

        BuiltDb {
            bytes,
            tree_size,
            data_start,
            data_end,
            node_count,
        }
    }

    fn metadata_value(&self, node_count: u32) -> Value {
        let description = Value::Map(
            self.description
                .iter()
                .map(|(lang, text)| (lang.clone(), Value::String(text.clone())))
                .collect(),
        );
        let languages = Value::Array(
            self.languages
                .iter()
                .map(|lang| Value::String(lang.clone()))
                .collect(),
        );
        Value::Map(vec![
            (
                "binary_format_major_version".to_string(),
                Value::Uint16(2),
            ),
            (
                "binary_format_minor_version".to_string(),
                Value::Uint16(0),
            ),
            ("build_epoch".to_string(), Value::Uint64(1_700_000_000)),
            (
                "database_type".to_string(),
                Value::String(self.database_type.clone()),
            ),
            ("description".to_string(), description),
            ("ip_version".to_string(), Value::Uint16(self.ip_version)),
            ("languages".to_string(), languages),
            ("node_count".to_string(), Value::Uint32(node_count)),
            ("record_size".to_string(), Value::Uint16(self.record_size)),
        ])
    }
}

/// A built database image plus its region layout, for corruption tests.
pub struct BuiltDb {
    pub bytes: Vec<u8>,
    pub tree_size: usize,
    pub data_start: usize,
    pub data_end: usize,
    pub node_count: u32,
}

/// Convenience constructor: a map record with string values.
pub fn record(pairs: &[(&str, &str)]) -> Value {
    Value::Map(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect(),
    )
}

// ---------------------------------------------------------------------------
// Data section encoding
// ---------------------------------------------------------------------------

/// Encoder with whole-value deduplication and string interning, so the
/// output exercises the reader's pointer handling the way production
/// databases do.
pub struct DataEncoder {
    buffer: Vec<u8>,
    dedup: HashMap<Vec<u8>, u32>,
    strings: HashMap<String, u32>,
}

impl DataEncoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            dedup: HashMap::new(),
            strings: HashMap::new(),
        }
    }

    /// Encode a value, returning its offset. Identical values share one
    /// offset.
    pub fn encode(&mut self, value: &Value) -> u32 {
        let canonical = canonical_bytes(value);
        if let Some(&offset) = self.dedup.get(&canonical) {
            return offset;
        }
        let offset = self.buffer.len() as u32;
        self.encode_value(value);
        self.dedup.insert(canonical, offset);
        offset
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    fn encode_value(&mut self, value: &Value) {
        match value {
            Value::String(s) => self.encode_interned_string(s),
            Value::Map(entries) => {
                push_control(&mut self.buffer, 7, None, entries.len());
                for (key, value) in entries {
                    self.encode_interned_string(key);
                    self.encode_value(value);
                }
            }
            Value::Array(items) => {
                push_control(&mut self.buffer, 0, Some(4), items.len());
                for item in items {
                    self.encode_value(item);
                }
            }
            other => encode_scalar(&mut self.buffer, other),
        }
    }

    fn encode_interned_string(&mut self, s: &str) {
        if let Some(&offset) = self.strings.get(s) {
            push_pointer(&mut self.buffer, offset);
            return;
        }
        let offset = self.buffer.len() as u32;
        push_control(&mut self.buffer, 2, None, s.len());
        self.buffer.extend_from_slice(s.as_bytes());
        self.strings.insert(s.to_string(), offset);
    }
}

/// Pointer-free encoding used as the deduplication key.
fn canonical_bytes(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_static(&mut buf, value);
    buf
}

fn encode_static(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::String(s) => {
            push_control(buf, 2, None, s.len());
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Map(entries) => {
            push_control(buf, 7, None, entries.len());
            for (key, value) in entries {
                push_control(buf, 2, None, key.len());
                buf.extend_from_slice(key.as_bytes());
                encode_static(buf, value);
            }
        }
        Value::Array(items) => {
            push_control(buf, 0, Some(4), items.len());
            for item in items {
                encode_static(buf, item);
            }
        }
        other => encode_scalar(buf, other),
    }
}

fn encode_scalar(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Bool(b) => {
            buf.push(usize::from(*b) as u8);
            buf.push(0x07);
        }
        Value::Uint16(n) => {
            let bytes = minimal_be(u128::from(*n));
            push_control(buf, 5, None, bytes.len());
            buf.extend_from_slice(&bytes);
        }
        Value::Uint32(n) => {
            let bytes = minimal_be(u128::from(*n));
            push_control(buf, 6, None, bytes.len());
            buf.extend_from_slice(&bytes);
        }
        Value::Uint64(n) => {
            let bytes = minimal_be(u128::from(*n));
            push_control(buf, 0, Some(2), bytes.len());
            buf.extend_from_slice(&bytes);
        }
        Value::Uint128(n) => {
            let bytes = minimal_be(*n);
            push_control(buf, 0, Some(3), bytes.len());
            buf.extend_from_slice(&bytes);
        }
        Value::Int32(n) => {
            // Negative values need the full width; the decoder zero-pads.
            let bytes = if *n < 0 {
                n.to_be_bytes().to_vec()
            } else {
                minimal_be(*n as u128)
            };
            push_control(buf, 0, Some(1), bytes.len());
            buf.extend_from_slice(&bytes);
        }
        Value::Double(d) => {
            push_control(buf, 3, None, 8);
            buf.extend_from_slice(&d.to_be_bytes());
        }
        Value::Float(f) => {
            push_control(buf, 0, Some(8), 4);
            buf.extend_from_slice(&f.to_be_bytes());
        }
        Value::Bytes(b) => {
            push_control(buf, 4, None, b.len());
            buf.extend_from_slice(b);
        }
        Value::String(_) | Value::Map(_) | Value::Array(_) => unreachable!("handled by caller"),
    }
}

fn minimal_be(value: u128) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    bytes[skip..].to_vec()
}

/// Control byte, optional extended-type byte, then size-extension bytes.
fn push_control(buf: &mut Vec<u8>, tag: u8, extended: Option<u8>, size: usize) {
    let (hint, extra): (u8, Vec<u8>) = if size < 29 {
        (size as u8, Vec::new())
    } else if size < 285 {
        (29, vec![(size - 29) as u8])
    } else if size < 65821 {
        (30, ((size - 285) as u16).to_be_bytes().to_vec())
    } else {
        let adjusted = (size - 65821) as u32;
        (31, adjusted.to_be_bytes()[1..].to_vec())
    };
    buf.push((tag << 5) | hint);
    if let Some(ext) = extended {
        buf.push(ext);
    }
    buf.extend_from_slice(&extra);
}

pub fn push_pointer(buf: &mut Vec<u8>, offset: u32) {
    if offset < 2048 {
        buf.push(0x20 | ((offset >> 8) & 0x7) as u8);
        buf.push((offset & 0xff) as u8);
    } else if offset < 526336 {
        let adjusted = offset - 2048;
        buf.push(0x20 | 0x08 | ((adjusted >> 16) & 0x7) as u8);
        buf.push(((adjusted >> 8) & 0xff) as u8);
        buf.push((adjusted & 0xff) as u8);
    } else if offset < 134744064 {
        let adjusted = offset - 526336;
        buf.push(0x20 | 0x10 | ((adjusted >> 24) & 0x7) as u8);
        buf.push(((adjusted >> 16) & 0xff) as u8);
        buf.push(((adjusted >> 8) & 0xff) as u8);
        buf.push((adjusted & 0xff) as u8);
    } else {
        buf.push(0x20 | 0x18);
        buf.extend_from_slice(&offset.to_be_bytes());
    }
}

// ---------------------------------------------------------------------------
// Search tree building
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodePointer {
    Node(u32),
    Data(u32, u8),
    Empty,
}

#[derive(Debug, Clone)]
struct Node {
    left: NodePointer,
    right: NodePointer,
}

impl Node {
    fn empty() -> Self {
        Self {
            left: NodePointer::Empty,
            right: NodePointer::Empty,
        }
    }
}

struct TreeBuilder {
    ip_version: u16,
    record_size: u16,
    nodes: Vec<Node>,
}

impl TreeBuilder {
    fn new(ip_version: u16, record_size: u16) -> Self {
        Self {
            ip_version,
            record_size,
            nodes: vec![Node::empty()],
        }
    }

    fn insert(&mut self, network: IpNetwork, data_offset: u32) {
        let (bits, prefix_len) = match (network, self.ip_version) {
            (IpNetwork::V4(net), 4) => {
                let bits = (u32::from(net.ip()) as u128) << 96;
                (bits, net.prefix())
            }
            (IpNetwork::V4(net), _) => {
                // Canonical IPv4 embedding at ::/96.
                let bits = u32::from(net.ip()) as u128;
                (bits, 96 + net.prefix())
            }
            (IpNetwork::V6(net), 6) => (u128::from(net.ip()), net.prefix()),
            (IpNetwork::V6(_), _) => panic!("IPv6 network in an IPv4 test database"),
        };
        self.insert_bits(bits, prefix_len, data_offset);
    }

    fn insert_bits(&mut self, bits: u128, prefix_len: u8, data_offset: u32) {
        let mut node_id = 0u32;

        for depth in 0..prefix_len {
            let bit = ((bits >> (127 - depth)) & 1) as u8;
            let child = self.child(node_id, bit);

            if depth + 1 == prefix_len {
                match child {
                    NodePointer::Empty => {
                        self.set_child(node_id, bit, NodePointer::Data(data_offset, prefix_len));
                    }
                    NodePointer::Data(_, existing_len) => {
                        if prefix_len >= existing_len {
                            self.set_child(
                                node_id,
                                bit,
                                NodePointer::Data(data_offset, prefix_len),
                            );
                        }
                    }
                    NodePointer::Node(subtree) => {
                        // A less specific prefix over an existing subtree:
                        // fill the gaps the more specific routes left.
                        self.backfill(subtree, data_offset, prefix_len);
                    }
                }
                return;
            }

            node_id = match child {
                NodePointer::Node(next) => next,
                NodePointer::Empty => {
                    let next = self.allocate();
                    self.set_child(node_id, bit, NodePointer::Node(next));
                    next
                }
                NodePointer::Data(existing_offset, existing_len) => {
                    // Splitting a leaf: both halves keep the less specific
                    // record while we descend.
                    let next = self.allocate();
                    self.nodes[next as usize].left =
                        NodePointer::Data(existing_offset, existing_len);
                    self.nodes[next as usize].right =
                        NodePointer::Data(existing_offset, existing_len);
                    self.set_child(node_id, bit, NodePointer::Node(next));
                    next
                }
            };
        }
    }

    fn backfill(&mut self, node_id: u32, data_offset: u32, prefix_len: u8) {
        for bit in 0..2u8 {
            match self.child(node_id, bit) {
                NodePointer::Empty => {
                    self.set_child(node_id, bit, NodePointer::Data(data_offset, prefix_len));
                }
                NodePointer::Data(_, existing_len) => {
                    if prefix_len > existing_len {
                        self.set_child(node_id, bit, NodePointer::Data(data_offset, prefix_len));
                    }
                }
                NodePointer::Node(child) => self.backfill(child, data_offset, prefix_len),
            }
        }
    }

    /// Point the standard alias prefixes at the canonical IPv4 subtree.
    fn graft_standard_aliases(&mut self) {
        let v4_root = self.ensure_zero_spine(96);
        let ffff = 0x0000_0000_0000_0000_0000_ffff_0000_0000u128;
        self.graft(ffff, 96, v4_root);
        let six_to_four = 0x2002_0000_0000_0000_0000_0000_0000_0000u128;
        self.graft(six_to_four, 16, v4_root);
    }

    /// Materialize the all-zero left spine down to `depth`, returning the
    /// node there (the canonical IPv4 subtree root for depth 96).
    fn ensure_zero_spine(&mut self, depth: u8) -> u32 {
        let mut node_id = 0u32;
        for _ in 0..depth {
            node_id = match self.nodes[node_id as usize].left {
                NodePointer::Node(next) => next,
                NodePointer::Empty => {
                    let next = self.allocate();
                    self.nodes[node_id as usize].left = NodePointer::Node(next);
                    next
                }
                NodePointer::Data(..) => panic!("zero spine collides with a record"),
            };
        }
        node_id
    }

    fn graft(&mut self, bits: u128, depth: u8, target: u32) {
        let mut node_id = 0u32;
        for d in 0..depth {
            let bit = ((bits >> (127 - d)) & 1) as u8;
            if d + 1 == depth {
                self.set_child(node_id, bit, NodePointer::Node(target));
                return;
            }
            node_id = match self.child(node_id, bit) {
                NodePointer::Node(next) => next,
                NodePointer::Empty => {
                    let next = self.allocate();
                    self.set_child(node_id, bit, NodePointer::Node(next));
                    next
                }
                NodePointer::Data(..) => panic!("alias path collides with a record"),
            };
        }
    }

    fn child(&self, node_id: u32, bit: u8) -> NodePointer {
        let node = &self.nodes[node_id as usize];
        if bit == 0 {
            node.left
        } else {
            node.right
        }
    }

    fn set_child(&mut self, node_id: u32, bit: u8, pointer: NodePointer) {
        let node = &mut self.nodes[node_id as usize];
        if bit == 0 {
            node.left = pointer;
        } else {
            node.right = pointer;
        }
    }

    fn allocate(&mut self) -> u32 {
        let id = self.nodes.len() as u32;
        self.nodes.push(Node::empty());
        id
    }

    fn build(&self) -> (Vec<u8>, u32) {
        let node_count = self.nodes.len() as u32;
        let node_bytes = self.record_size as usize / 4;
        let mut tree = vec![0u8; node_count as usize * node_bytes];

        for (node_id, node) in self.nodes.iter().enumerate() {
            let left = self.record_value(node.left, node_count);
            let right = self.record_value(node.right, node_count);
            self.write_node(&mut tree, node_id, left, right);
        }

        (tree, node_count)
    }

    fn record_value(&self, pointer: NodePointer, node_count: u32) -> u32 {
        match pointer {
            NodePointer::Node(id) => id,
            NodePointer::Empty => node_count,
            NodePointer::Data(offset, _) => node_count + 16 + offset,
        }
    }

    fn write_node(&self, tree: &mut [u8], node_id: usize, left: u32, right: u32) {
        match self.record_size {
            24 => {
                let base = node_id * 6;
                tree[base..base + 3].copy_from_slice(&left.to_be_bytes()[1..]);
                tree[base + 3..base + 6].copy_from_slice(&right.to_be_bytes()[1..]);
            }
            28 => {
                let base = node_id * 7;
                tree[base..base + 3].copy_from_slice(&left.to_be_bytes()[1..]);
                tree[base + 3] = (((left >> 24) as u8 & 0x0f) << 4) | ((right >> 24) as u8 & 0x0f);
                tree[base + 4..base + 7].copy_from_slice(&right.to_be_bytes()[1..]);
            }
            32 => {
                let base = node_id * 8;
                tree[base..base + 4].copy_from_slice(&left.to_be_bytes());
                tree[base + 4..base + 8].copy_from_slice(&right.to_be_bytes());
            }
            other => panic!("unsupported record size {other}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Hand-assembled corrupt fixtures
// ---------------------------------------------------------------------------

/// Assemble a raw database image from parts, for corruption tests.
pub fn assemble_raw(
    tree_bytes: &[u8],
    node_count: u32,
    data: &[u8],
    ip_version: u16,
    record_size: u16,
) -> Vec<u8> {
    let metadata = TestDb {
        ip_version,
        record_size,
        database_type: "Test".to_string(),
        description: vec![("en".to_string(), "Test Database".to_string())],
        languages: vec!["en".to_string()],
        entries: Vec::new(),
        aliases: false,
    }
    .metadata_value(node_count);

    let mut meta_encoder = DataEncoder::new();
    meta_encoder.encode(&metadata);

    let mut bytes = tree_bytes.to_vec();
    bytes.extend_from_slice(&SEPARATOR);
    bytes.extend_from_slice(data);
    bytes.extend_from_slice(METADATA_MARKER);
    bytes.extend_from_slice(&meta_encoder.into_bytes());
    bytes
}

/// A one-node IPv4 database whose only record is a pointer loop.
pub fn pointer_loop_db() -> Vec<u8> {
    // Node 0: left -> data offset 0, right -> empty (node_count = 1).
    // Record value for offset 0 is 1 + 16 = 17.
    let mut tree = vec![0u8; 6];
    tree[..3].copy_from_slice(&17u32.to_be_bytes()[1..]);
    tree[3..6].copy_from_slice(&1u32.to_be_bytes()[1..]);

    // Data section: a pointer targeting itself.
    let data = [0x20, 0x00];
    assemble_raw(&tree, 1, &data, 4, 24)
}

/// A one-node IPv4 database whose record is a Double with a bad size.
pub fn broken_double_db() -> Vec<u8> {
    let mut tree = vec![0u8; 6];
    tree[..3].copy_from_slice(&17u32.to_be_bytes()[1..]);
    tree[3..6].copy_from_slice(&1u32.to_be_bytes()[1..]);

    // Control byte claims a Double of size 2.
    let data = [0x62, 0x01, 0x02];
    assemble_raw(&tree, 1, &data, 4, 24)
}

/// Addresses drawn across both families for smoke tests.
pub fn sample_addresses() -> Vec<IpAddr> {
    [
        "1.1.1.1",
        "1.1.1.33",
        "81.2.69.142",
        "200.0.2.1",
        "255.255.255.255",
        "::1",
        "2001:db8::1",
        "2002:101:101::",
        "::ffff:1.1.1.1",
    ]
    .iter()
    .map(|s| s.parse().unwrap())
    .collect()
}
