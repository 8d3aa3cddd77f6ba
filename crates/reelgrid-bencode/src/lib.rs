#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Bencode primitives for torrent metadata.
//!
//! # Design
//! - The `info` dictionary is identified by its exact byte range inside the
//!   source file; re-marshalling a parsed dictionary reorders keys and breaks
//!   the info-hash. [`extract_raw_info`] is therefore the single source of
//!   truth for info-hash recomputation.
//! - [`Writer`] emits dictionaries with lexicographically sorted keys so that
//!   freshly generated metadata is canonical from the start.

mod error;
mod metainfo;
mod scan;
mod writer;

pub use error::BencodeError;
pub use metainfo::{FileEntry, InfoDict, Metainfo, serialize_download_format};
pub use scan::{extract_raw_info, parse_dict_entries};
pub use writer::{DictBuilder, Writer};
