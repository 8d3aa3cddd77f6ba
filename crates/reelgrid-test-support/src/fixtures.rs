//! On-disk package fixtures and hand-built torrents for tests.

use std::fs;
use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};

use reelgrid_bencode::{Metainfo, Writer, serialize_download_format};

/// Deterministic pseudo-random bytes; same `(len, seed)` gives same payload.
#[must_use]
pub fn deterministic_bytes(len: usize, seed: u8) -> Vec<u8> {
    let mut state = u32::from(seed).wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            u8::try_from(state >> 24).unwrap_or(0)
        })
        .collect()
}

/// Create a package directory with the given `(relative path, size)` files.
///
/// File contents are deterministic so repeated builds hash identically.
pub fn package_dir(root: &Path, name: &str, files: &[(&str, usize)]) -> PathBuf {
    let package = root.join(name);
    for (seed, (relative, size)) in files.iter().enumerate() {
        let path = package.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create fixture directories");
        }
        fs::write(&path, deterministic_bytes(*size, u8::try_from(seed).unwrap_or(0)))
            .expect("write fixture file");
    }
    package
}

/// Files of a package directory in walk order (sorted by relative path).
#[must_use]
pub fn walk_package(package: &Path) -> Vec<(Vec<String>, u64)> {
    let mut files = Vec::new();
    collect_files(package, package, &mut files);
    files.sort();
    files
        .into_iter()
        .map(|(components, len)| (components, len))
        .collect()
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<(Vec<String>, u64)>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out);
        } else if let Ok(meta) = entry.metadata() {
            let components = path
                .strip_prefix(root)
                .expect("file under package root")
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            out.push((components, meta.len()));
        }
    }
}

/// Build a complete .torrent for an on-disk package by hashing its stream.
///
/// The declared file order matches [`walk_package`], which is also the order
/// the generator walks.
pub fn build_torrent(package: &Path, piece_length: u64, announce: &str) -> Vec<u8> {
    let name = package
        .file_name()
        .expect("package has a basename")
        .to_string_lossy()
        .into_owned();
    let files = walk_package(package);

    let mut pieces = Vec::new();
    let mut hasher = Sha1::new();
    let mut in_piece = 0u64;
    for (components, _) in &files {
        let path = package.join(components.join("/"));
        let data = fs::read(&path).expect("read fixture file");
        let mut rest = data.as_slice();
        while !rest.is_empty() {
            let room = usize::try_from(piece_length - in_piece).expect("piece fits usize");
            let take = rest.len().min(room);
            hasher.update(&rest[..take]);
            in_piece += take as u64;
            rest = &rest[take..];
            if in_piece == piece_length {
                pieces.extend_from_slice(&hasher.finalize_reset());
                in_piece = 0;
            }
        }
    }
    if in_piece > 0 {
        pieces.extend_from_slice(&hasher.finalize_reset());
    }

    let mut writer = Writer::new();
    writer.dict(|dict| {
        dict.entry("files", |w| {
            w.list(|list| {
                for (components, len) in &files {
                    list.dict(|file| {
                        file.entry("length", |v| {
                            v.integer(i64::try_from(*len).expect("length fits"));
                        });
                        file.entry("path", |v| {
                            v.list(|p| {
                                for component in components {
                                    p.text(component);
                                }
                            });
                        });
                    });
                }
            });
        });
        dict.entry("name", |w| w.text(&name));
        dict.entry("piece length", |w| {
            w.integer(i64::try_from(piece_length).expect("piece length fits"));
        });
        dict.entry("pieces", |w| w.bytes(&pieces));
    });
    let info_bytes = writer.finish();

    let meta = Metainfo {
        announce: announce.to_string(),
        created_by: "reelgrid-test".to_string(),
        creation_date: 1_700_000_000,
        info_bytes,
    };
    serialize_download_format(&meta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_bytes_are_stable() {
        assert_eq!(deterministic_bytes(16, 1), deterministic_bytes(16, 1));
        assert_ne!(deterministic_bytes(16, 1), deterministic_bytes(16, 2));
    }

    #[test]
    fn built_torrent_parses_and_counts_pieces() {
        let dir = tempfile::tempdir().expect("tempdir");
        let package = package_dir(
            dir.path(),
            "PKG_T",
            &[("a.mxf", 5000), ("meta/info.xml", 100)],
        );
        let payload = build_torrent(&package, 4096, "http://tracker.local/announce");
        let meta = Metainfo::parse(&payload).expect("parse");
        let info = meta.info().expect("info");
        assert_eq!(info.name, "PKG_T");
        assert_eq!(info.total_bytes(), 5100);
        assert_eq!(info.piece_count(), 2);
        assert_eq!(info.files.len(), 2);
    }
}
