//! Parsed views over .torrent payloads.

use sha1::{Digest, Sha1};

use crate::error::BencodeError;
use crate::scan::{
    extract_raw_info, parse_dict_entries, parse_integer_value, parse_list_items,
    parse_string_value,
};
use crate::writer::Writer;

/// Parsed top-level .torrent metadata with the info dictionary kept raw.
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// Tracker announce URL baked into the torrent.
    pub announce: String,
    /// Creator label recorded at generation time.
    pub created_by: String,
    /// Creation timestamp in seconds since the epoch.
    pub creation_date: i64,
    /// Exact bytes of the info dictionary as found in the source payload.
    pub info_bytes: Vec<u8>,
}

impl Metainfo {
    /// Parse a .torrent payload, preserving the raw info byte range.
    ///
    /// # Errors
    ///
    /// Returns [`BencodeError`] when the payload is malformed or missing the
    /// `info` key.
    pub fn parse(data: &[u8]) -> Result<Self, BencodeError> {
        let mut announce = String::new();
        let mut created_by = String::new();
        let mut creation_date = 0;
        for (key, value) in parse_dict_entries(data)? {
            match key {
                b"announce" => {
                    announce = String::from_utf8_lossy(parse_string_value(value)?).into_owned();
                }
                b"created by" => {
                    created_by = String::from_utf8_lossy(parse_string_value(value)?).into_owned();
                }
                b"creation date" => creation_date = parse_integer_value(value)?,
                _ => {}
            }
        }
        let info_bytes = extract_raw_info(data)?.to_vec();
        Ok(Self {
            announce,
            created_by,
            creation_date,
            info_bytes,
        })
    }

    /// SHA-1 of the raw info bytes, the canonical swarm identifier.
    #[must_use]
    pub fn info_hash(&self) -> [u8; 20] {
        Sha1::digest(&self.info_bytes).into()
    }

    /// Hex rendering of [`Metainfo::info_hash`].
    #[must_use]
    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash())
    }

    /// Parse the embedded info dictionary into a typed view.
    ///
    /// # Errors
    ///
    /// Returns [`BencodeError`] when the info dictionary is malformed.
    pub fn info(&self) -> Result<InfoDict, BencodeError> {
        InfoDict::parse(&self.info_bytes)
    }
}

/// One file entry from a multi-file info dictionary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path components relative to the torrent root directory.
    pub path: Vec<String>,
    /// File size in bytes.
    pub length: u64,
}

impl FileEntry {
    /// Join the path components with `/` for display and filesystem use.
    #[must_use]
    pub fn relative_path(&self) -> String {
        self.path.join("/")
    }
}

/// Typed view of an info dictionary.
#[derive(Debug, Clone)]
pub struct InfoDict {
    /// Torrent root name; equals the package directory basename.
    pub name: String,
    /// Piece length in bytes.
    pub piece_length: u64,
    /// Ordered 20-byte SHA-1 piece hashes.
    pub pieces: Vec<[u8; 20]>,
    /// File list; a single-file torrent is represented as one entry whose
    /// path is empty (the payload is the root name itself).
    pub files: Vec<FileEntry>,
    /// Whether the source used the single-file `length` form.
    pub single_file: bool,
}

impl InfoDict {
    /// Parse raw info dictionary bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BencodeError`] when required keys are missing or mistyped.
    pub fn parse(info_bytes: &[u8]) -> Result<Self, BencodeError> {
        let mut name = None;
        let mut piece_length = None;
        let mut pieces_blob: Option<&[u8]> = None;
        let mut single_length = None;
        let mut files = Vec::new();
        for (key, value) in parse_dict_entries(info_bytes)? {
            match key {
                b"name" => {
                    name = Some(String::from_utf8_lossy(parse_string_value(value)?).into_owned());
                }
                b"piece length" => piece_length = Some(parse_integer_value(value)?),
                b"pieces" => pieces_blob = Some(parse_string_value(value)?),
                b"length" => single_length = Some(parse_integer_value(value)?),
                b"files" => {
                    for item in parse_list_items(value)? {
                        files.push(parse_file_entry(item)?);
                    }
                }
                _ => {}
            }
        }
        let name = name.ok_or(BencodeError::MissingKey { key: "name" })?;
        let piece_length = piece_length
            .and_then(|value| u64::try_from(value).ok())
            .ok_or(BencodeError::MissingKey { key: "piece length" })?;
        let blob = pieces_blob.ok_or(BencodeError::MissingKey { key: "pieces" })?;
        if blob.len() % 20 != 0 {
            return Err(BencodeError::InvalidPieces { len: blob.len() });
        }
        let pieces = blob
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        let single_file = single_length.is_some();
        if let Some(length) = single_length {
            files = vec![FileEntry {
                path: Vec::new(),
                length: u64::try_from(length).unwrap_or_default(),
            }];
        } else if files.is_empty() {
            return Err(BencodeError::MissingKey { key: "files" });
        }

        Ok(Self {
            name,
            piece_length,
            pieces,
            files,
            single_file,
        })
    }

    /// Total payload size across all files.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|file| file.length).sum()
    }

    /// Number of pieces declared by the dictionary.
    #[must_use]
    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }
}

fn parse_file_entry(item: &[u8]) -> Result<FileEntry, BencodeError> {
    let mut path = Vec::new();
    let mut length = None;
    for (key, value) in parse_dict_entries(item)? {
        match key {
            b"path" => {
                for component in parse_list_items(value)? {
                    path.push(
                        String::from_utf8_lossy(parse_string_value(component)?).into_owned(),
                    );
                }
            }
            b"length" => length = Some(parse_integer_value(value)?),
            _ => {}
        }
    }
    let length = length
        .and_then(|value| u64::try_from(value).ok())
        .ok_or(BencodeError::MissingKey { key: "length" })?;
    Ok(FileEntry { path, length })
}

/// Serialise a downloader-friendly .torrent with the info key embedded as a
/// nested dictionary.
///
/// Top-level keys land in lexicographic order (`announce`, `created by`,
/// `creation date`, `info`); the raw info bytes are spliced in verbatim so the
/// info-hash is preserved exactly.
#[must_use]
pub fn serialize_download_format(meta: &Metainfo) -> Vec<u8> {
    let mut writer = Writer::new();
    writer.raw(b"d");
    writer.text("announce");
    writer.text(&meta.announce);
    writer.text("created by");
    writer.text(&meta.created_by);
    writer.text("creation date");
    writer.integer(meta.creation_date);
    writer.text("info");
    writer.raw(&meta.info_bytes);
    writer.raw(b"e");
    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info_bytes() -> Vec<u8> {
        let mut writer = Writer::new();
        writer.dict(|dict| {
            dict.entry("name", |w| w.text("PKG_A"));
            dict.entry("piece length", |w| w.integer(16));
            dict.entry("pieces", |w| w.bytes(&[7u8; 40]));
            dict.entry("files", |w| {
                w.list(|list| {
                    list.dict(|file| {
                        file.entry("length", |v| v.integer(10));
                        file.entry("path", |v| v.list(|p| p.text("a.mxf")));
                    });
                    list.dict(|file| {
                        file.entry("length", |v| v.integer(6));
                        file.entry("path", |v| {
                            v.list(|p| {
                                p.text("meta");
                                p.text("b.xml");
                            });
                        });
                    });
                });
            });
        });
        writer.finish()
    }

    fn sample_torrent() -> Vec<u8> {
        let info = sample_info_bytes();
        let meta = Metainfo {
            announce: "http://tracker.local/announce".into(),
            created_by: "reelgrid".into(),
            creation_date: 1_700_000_000,
            info_bytes: info,
        };
        serialize_download_format(&meta)
    }

    #[test]
    fn parse_round_trips_raw_info_bytes() {
        let payload = sample_torrent();
        let meta = Metainfo::parse(&payload).expect("parse");
        assert_eq!(meta.announce, "http://tracker.local/announce");
        assert_eq!(meta.created_by, "reelgrid");
        assert_eq!(meta.creation_date, 1_700_000_000);
        assert_eq!(meta.info_bytes, sample_info_bytes());
    }

    #[test]
    fn download_format_preserves_info_hash() {
        let payload = sample_torrent();
        let first = Metainfo::parse(&payload).expect("parse");
        let re_serialized = serialize_download_format(&first);
        let second = Metainfo::parse(&re_serialized).expect("reparse");
        assert_eq!(first.info_hash(), second.info_hash());
        assert_eq!(re_serialized, payload);
    }

    #[test]
    fn info_dict_exposes_files_and_totals() {
        let payload = sample_torrent();
        let info = Metainfo::parse(&payload)
            .expect("parse")
            .info()
            .expect("info dict");
        assert_eq!(info.name, "PKG_A");
        assert_eq!(info.piece_length, 16);
        assert_eq!(info.piece_count(), 2);
        assert_eq!(info.total_bytes(), 16);
        assert_eq!(info.files[0].relative_path(), "a.mxf");
        assert_eq!(info.files[1].relative_path(), "meta/b.xml");
        assert!(!info.single_file);
    }

    #[test]
    fn single_file_info_parses_with_length_key() {
        let mut writer = Writer::new();
        writer.dict(|dict| {
            dict.entry("length", |w| w.integer(5));
            dict.entry("name", |w| w.text("solo.bin"));
            dict.entry("piece length", |w| w.integer(4));
            dict.entry("pieces", |w| w.bytes(&[1u8; 40]));
        });
        let info = InfoDict::parse(&writer.finish()).expect("info");
        assert!(info.single_file);
        assert_eq!(info.files.len(), 1);
        assert_eq!(info.files[0].length, 5);
        assert!(info.files[0].path.is_empty());
    }

    #[test]
    fn ragged_pieces_blob_rejected() {
        let mut writer = Writer::new();
        writer.dict(|dict| {
            dict.entry("length", |w| w.integer(5));
            dict.entry("name", |w| w.text("solo.bin"));
            dict.entry("piece length", |w| w.integer(4));
            dict.entry("pieces", |w| w.bytes(&[1u8; 21]));
        });
        let err = InfoDict::parse(&writer.finish()).expect_err("ragged blob");
        assert!(matches!(err, BencodeError::InvalidPieces { len: 21 }));
    }
}
