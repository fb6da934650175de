//! mmdbkit - Read-Only Engine for the MaxMind DB Format
//!
//! mmdbkit answers three questions against a single MMDB file image: what
//! record is associated with an address, what is its smallest enclosing
//! prefix, and what are all the prefix/record pairs in the database. Records
//! decode into caller types through serde, into the dynamic [`Value`] tree,
//! or through a hand-driven [`Decoder`] cursor.
//!
//! # Quick Start
//!
//! ```no_run
//! use mmdbkit::Reader;
//! use serde::Deserialize;
//! use std::net::IpAddr;
//!
//! #[derive(Deserialize, Debug)]
//! struct Country {
//!     iso_code: Option<String>,
//! }
//!
//! let reader = Reader::open("GeoLite2-Country.mmdb")?;
//!
//! let ip: IpAddr = "89.160.20.128".parse()?;
//! let result = reader.lookup(ip)?;
//! println!("network: {}", result.network());
//! if let Some(country) = result.decode::<Country>()? {
//!     println!("country: {:?}", country.iso_code);
//! }
//!
//! // Enumerate every stored prefix.
//! for item in reader.networks() {
//!     let item = item?;
//!     println!("{}", item.network());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Key Features
//!
//! - **Zero-Copy Loading**: files are memory-mapped and queried in place;
//!   strings and byte blobs can bind as borrowed slices
//! - **Safe on Untrusted Input**: every read is bounds-checked and container
//!   depth is capped, so corrupt files fail with errors, never faults
//! - **Shared Readers**: lookups take `&self` and run concurrently without
//!   coordination
//! - **String Interning**: repeated record strings resolve through a bounded
//!   cache, shared or pooled per decode
//! - **Verification**: [`Reader::verify`] validates a database end-to-end
//!
//! # File Layout
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │  1. Binary search tree               │
//! │  2. 16-byte zero separator           │
//! │  3. Data section (self-describing,   │
//! │     pointer-deduplicated values)     │
//! │  4. Marker + metadata map            │
//! └──────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod cache;
mod de;
mod decoder;
mod error;
mod metadata;
mod networks;
mod reader;
mod tree;
mod value;
mod verify;

pub use crate::cache::{CacheConfig, CachePolicy, CachePool, SharedStringCache};
pub use crate::de::PathElement;
pub use crate::decoder::{ArrayReader, Decoder, Kind, MapReader};
pub use crate::error::{Error, Result};
pub use crate::metadata::Metadata;
pub use crate::networks::Networks;
pub use crate::reader::{LookupResult, Options, Reader, RecordOffset};
pub use crate::value::Value;

/// Library version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
