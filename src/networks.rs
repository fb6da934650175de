//! Depth-first iteration over every prefix in the search tree.
//!
//! The iterator keeps an explicit stack of `(node, prefix)` frames and
//! yields a [`LookupResult`] for every leaf, left side first, so networks
//! come out in ascending address order. In an IPv6 database the canonical
//! IPv4 subtree is reachable through several aliases (`::ffff:0:0/96`,
//! `2002::/16`, ...); by default re-entry into that subtree from outside the
//! zero-prefixed embedding is skipped so each record is visited once.

use ipnetwork::IpNetwork;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::{Error, Result};
use crate::reader::{data_offset_for_record, LookupResult, Reader};

#[derive(Debug, Clone, Copy)]
struct Frame {
    node: usize,
    ip: [u8; 16],
    bit: usize,
}

/// Iterator over prefix/record pairs. Created by `Reader::networks` and
/// `Reader::networks_within`. Becomes terminal after yielding an error.
pub struct Networks<'r, S: AsRef<[u8]>> {
    reader: &'r Reader<S>,
    stack: Vec<Frame>,
    include_aliased: bool,
    done: bool,
}

impl<'r, S: AsRef<[u8]>> Networks<'r, S> {
    pub(crate) fn all(reader: &'r Reader<S>) -> Self {
        let bit = if reader.metadata().ip_version == 4 {
            96
        } else {
            0
        };
        Networks {
            reader,
            stack: vec![Frame {
                node: 0,
                ip: [0; 16],
                bit,
            }],
            include_aliased: false,
            done: false,
        }
    }

    pub(crate) fn within(reader: &'r Reader<S>, network: IpNetwork) -> Result<Self> {
        let tree = reader.tree_view()?;
        let (mut ip, start_node, start_bit, stop_bit) = match network {
            IpNetwork::V4(net) => {
                let mut ip = [0u8; 16];
                ip[12..].copy_from_slice(&net.ip().octets());
                let (node, bit) = reader.ipv4_start_info();
                (ip, node, bit, 96 + net.prefix() as usize)
            }
            IpNetwork::V6(net) => {
                if reader.metadata().ip_version == 4 {
                    return Err(Error::InvalidNetwork(
                        "you attempted to use an IPv6 network in an IPv4-only database"
                            .to_string(),
                    ));
                }
                (net.ip().octets(), 0, 0, net.prefix() as usize)
            }
        };
        mask_ip16(&mut ip, stop_bit);

        let (record, _depth) = tree.traverse(&ip, start_node, start_bit, stop_bit)?;
        let stack = if record == reader.node_count() {
            Vec::new()
        } else {
            // Either an interior node at the prefix boundary, or a record
            // covering the whole queried prefix; both start the walk there.
            vec![Frame {
                node: record,
                ip,
                bit: stop_bit,
            }]
        };

        Ok(Networks {
            reader,
            stack,
            include_aliased: false,
            done: false,
        })
    }

    /// Also yield the aliases of the IPv4 subtree instead of only its
    /// canonical embedding. The result is a strict superset of the default
    /// iteration.
    pub fn include_aliased_networks(mut self) -> Self {
        self.include_aliased = true;
        self
    }

    fn advance(&mut self) -> Result<Option<LookupResult<'r, S>>> {
        let tree = self.reader.tree_view()?;
        let node_count = self.reader.node_count();
        let (ipv4_start, _) = self.reader.ipv4_start_info();
        let skip_aliases = !self.include_aliased && self.reader.metadata().ip_version == 6;

        while let Some(frame) = self.stack.pop() {
            if frame.node == node_count {
                continue;
            }

            if frame.node > node_count {
                let data_len = self.reader.data_section()?.len();
                let offset = data_offset_for_record(frame.node, node_count, data_len)?;
                let network = frame_network(&frame)?;
                return Ok(Some(LookupResult::new(
                    self.reader,
                    network,
                    Some(offset),
                )));
            }

            if skip_aliases && frame.node == ipv4_start && !in_v4_embedding(&frame.ip) {
                continue;
            }

            if frame.bit >= 128 {
                return Err(Error::InvalidDatabase(
                    "the MaxMind DB file's search tree is corrupt".to_string(),
                ));
            }

            let left = tree.read_child(frame.node, 0)?;
            let right = tree.read_child(frame.node, 1)?;

            let mut right_ip = frame.ip;
            set_bit(&mut right_ip, frame.bit);
            self.stack.push(Frame {
                node: right,
                ip: right_ip,
                bit: frame.bit + 1,
            });
            self.stack.push(Frame {
                node: left,
                ip: frame.ip,
                bit: frame.bit + 1,
            });
        }

        Ok(None)
    }
}

impl<'r, S: AsRef<[u8]>> Iterator for Networks<'r, S> {
    type Item = Result<LookupResult<'r, S>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(result)) => Some(Ok(result)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

fn frame_network(frame: &Frame) -> Result<IpNetwork> {
    if frame.bit >= 96 && in_v4_embedding(&frame.ip) {
        let mut octets = [0u8; 4];
        octets.copy_from_slice(&frame.ip[12..]);
        Ok(IpNetwork::new(
            IpAddr::V4(Ipv4Addr::from(octets)),
            (frame.bit - 96) as u8,
        )?)
    } else {
        Ok(IpNetwork::new(
            IpAddr::V6(Ipv6Addr::from(frame.ip)),
            frame.bit as u8,
        )?)
    }
}

fn in_v4_embedding(ip: &[u8; 16]) -> bool {
    ip[..12].iter().all(|&b| b == 0)
}

fn set_bit(ip: &mut [u8; 16], bit: usize) {
    ip[bit >> 3] |= 1 << (7 - (bit & 7));
}

/// Zero every bit of `ip` past `prefix_len`.
pub(crate) fn mask_ip16(ip: &mut [u8; 16], prefix_len: usize) {
    for (i, byte) in ip.iter_mut().enumerate() {
        let bit_start = i * 8;
        if bit_start >= prefix_len {
            *byte = 0;
        } else if bit_start + 8 > prefix_len {
            let keep = prefix_len - bit_start;
            *byte &= 0xffu8 << (8 - keep);
        }
    }
}
