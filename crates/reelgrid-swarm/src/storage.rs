//! On-disk storage binding for a torrent's file tree.

use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use reelgrid_bencode::{FileEntry, InfoDict};

/// Maps torrent-relative paths onto the filesystem.
///
/// `Plain` roots everything under one parent directory; `Split` routes
/// `.mxf` payloads to one parent and every other file to a shadow parent
/// holding canonical metadata, which lets two nodes co-seed a package whose
/// XML differs by ingest site.
#[derive(Debug, Clone)]
pub enum StorageLayout {
    /// Single-parent layout; the torrent's top-level name sits below it.
    Plain {
        /// Parent directory of the package directory.
        parent: PathBuf,
    },
    /// Extension-routed layout for co-seeding.
    Split {
        /// Parent for `.mxf` media payloads.
        mxf_parent: PathBuf,
        /// Parent for every other (metadata) file.
        shadow_parent: PathBuf,
    },
}

impl StorageLayout {
    /// Resolve the absolute path of one file entry.
    #[must_use]
    pub fn file_path(&self, torrent_name: &str, entry: &FileEntry) -> PathBuf {
        let relative = if entry.path.is_empty() {
            PathBuf::new()
        } else {
            entry.path.iter().collect()
        };
        let parent = match self {
            Self::Plain { parent } => parent,
            Self::Split {
                mxf_parent,
                shadow_parent,
            } => {
                if entry
                    .path
                    .last()
                    .is_some_and(|name| name.to_ascii_lowercase().ends_with(".mxf"))
                {
                    mxf_parent
                } else {
                    shadow_parent
                }
            }
        };
        let mut path = parent.join(torrent_name);
        if !relative.as_os_str().is_empty() {
            path.push(relative);
        }
        path
    }

    /// The package root directory (or single-file payload path).
    #[must_use]
    pub fn root_path(&self, torrent_name: &str) -> PathBuf {
        match self {
            Self::Plain { parent } => parent.join(torrent_name),
            Self::Split { mxf_parent, .. } => mxf_parent.join(torrent_name),
        }
    }

    /// Pre-create every directory the file tree needs.
    ///
    /// # Errors
    ///
    /// Returns the first directory-creation failure.
    pub fn create_directories(&self, info: &InfoDict) -> io::Result<()> {
        if info.single_file {
            if let Some(parent) = self
                .file_path(&info.name, &info.files[0])
                .parent()
                .map(Path::to_path_buf)
            {
                fs::create_dir_all(parent)?;
            }
            return Ok(());
        }
        for entry in &info.files {
            if let Some(parent) = self.file_path(&info.name, entry).parent() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    /// Read one piece's bytes by walking the declared file list.
    ///
    /// Returns `None` when any covered file is missing or too short, which
    /// callers treat as "piece not present" rather than an error.
    ///
    /// # Errors
    ///
    /// Returns IO errors other than absence (permission problems and the
    /// like).
    pub fn read_piece(&self, info: &InfoDict, piece_index: u32) -> io::Result<Option<Vec<u8>>> {
        let piece_length = info.piece_length;
        let total = info.total_bytes();
        let start = u64::from(piece_index) * piece_length;
        if start >= total {
            return Ok(None);
        }
        let length = piece_length.min(total - start);
        let mut buffer = vec![0u8; usize::try_from(length).unwrap_or(usize::MAX)];
        let mut filled = 0usize;
        let mut file_start = 0u64;

        for entry in &info.files {
            let file_end = file_start + entry.length;
            let read_from = start + filled as u64;
            if file_end <= read_from {
                file_start = file_end;
                continue;
            }
            if filled == buffer.len() {
                break;
            }
            let within = read_from - file_start;
            let want = (buffer.len() - filled).min(
                usize::try_from(entry.length - within).unwrap_or(usize::MAX),
            );
            let path = self.file_path(&info.name, entry);
            let mut file = match fs::File::open(&path) {
                Ok(file) => file,
                Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
                Err(err) => return Err(err),
            };
            file.seek(SeekFrom::Start(within))?;
            let mut slice = &mut buffer[filled..filled + want];
            if read_exact_or_short(&mut file, &mut slice)? < want {
                return Ok(None);
            }
            filled += want;
            file_start = file_end;
        }

        if filled == buffer.len() {
            Ok(Some(buffer))
        } else {
            Ok(None)
        }
    }

    /// Write a block at a global payload offset, creating parent directories
    /// on demand.
    ///
    /// # Errors
    ///
    /// Returns IO failures verbatim so the disk-error policy can classify
    /// them.
    pub fn write_block(&self, info: &InfoDict, offset: u64, data: &[u8]) -> io::Result<()> {
        let mut remaining = data;
        let mut write_at = offset;
        let mut file_start = 0u64;
        for entry in &info.files {
            let file_end = file_start + entry.length;
            if remaining.is_empty() {
                break;
            }
            if file_end <= write_at {
                file_start = file_end;
                continue;
            }
            let within = write_at - file_start;
            let room = usize::try_from(entry.length - within).unwrap_or(usize::MAX);
            let take = remaining.len().min(room);
            let path = self.file_path(&info.name, entry);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)?;
            file.seek(SeekFrom::Start(within))?;
            file.write_all(&remaining[..take])?;
            remaining = &remaining[take..];
            write_at += take as u64;
            file_start = file_end;
        }
        Ok(())
    }

    /// Check that the first `sample` file entries exist with their full size.
    #[must_use]
    pub fn spot_check_files(&self, info: &InfoDict, sample: usize) -> bool {
        info.files.iter().take(sample).all(|entry| {
            fs::metadata(self.file_path(&info.name, entry))
                .is_ok_and(|meta| meta.len() >= entry.length)
        })
    }
}

fn read_exact_or_short(file: &mut fs::File, buffer: &mut &mut [u8]) -> io::Result<usize> {
    let mut read = 0usize;
    while read < buffer.len() {
        let n = file.read(&mut buffer[read..])?;
        if n == 0 {
            break;
        }
        read += n;
    }
    Ok(read)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelgrid_bencode::{DictBuilder, Writer};

    fn info_with_files(files: &[(&str, &[&str], u64)], piece_length: u64) -> InfoDict {
        let total: u64 = files.iter().map(|(_, _, len)| len).sum();
        let piece_count = total.div_ceil(piece_length).max(1);
        let mut writer = Writer::new();
        writer.dict(|dict: &mut DictBuilder| {
            dict.entry("name", |w| w.text("PKG"));
            dict.entry("piece length", |w| {
                w.integer(i64::try_from(piece_length).expect("fits"));
            });
            dict.entry("pieces", |w| {
                w.bytes(&vec![0u8; usize::try_from(piece_count).expect("fits") * 20]);
            });
            dict.entry("files", |w| {
                w.list(|list| {
                    for (_, path, len) in files {
                        list.dict(|file| {
                            file.entry("length", |v| {
                                v.integer(i64::try_from(*len).expect("fits"));
                            });
                            file.entry("path", |v| {
                                v.list(|p| {
                                    for component in *path {
                                        p.text(component);
                                    }
                                });
                            });
                        });
                    }
                });
            });
        });
        InfoDict::parse(&writer.finish()).expect("info")
    }

    #[test]
    fn split_layout_routes_by_extension() {
        let layout = StorageLayout::Split {
            mxf_parent: PathBuf::from("/media"),
            shadow_parent: PathBuf::from("/shadow"),
        };
        let video = FileEntry {
            path: vec!["video_01.MXF".into()],
            length: 10,
        };
        let manifest = FileEntry {
            path: vec!["ASSETMAP.xml".into()],
            length: 2,
        };
        assert_eq!(
            layout.file_path("PKG", &video),
            PathBuf::from("/media/PKG/video_01.MXF")
        );
        assert_eq!(
            layout.file_path("PKG", &manifest),
            PathBuf::from("/shadow/PKG/ASSETMAP.xml")
        );
    }

    #[test]
    fn read_piece_spans_file_boundaries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = StorageLayout::Plain {
            parent: dir.path().to_path_buf(),
        };
        let info = info_with_files(&[("a", &["a.bin"], 6), ("b", &["b.bin"], 6)], 8);
        layout.create_directories(&info).expect("dirs");
        fs::write(dir.path().join("PKG/a.bin"), b"AAAAAA").expect("write a");
        fs::write(dir.path().join("PKG/b.bin"), b"BBBBBB").expect("write b");

        let piece = layout
            .read_piece(&info, 0)
            .expect("read")
            .expect("present");
        assert_eq!(piece, b"AAAAAABB");
        let tail = layout
            .read_piece(&info, 1)
            .expect("read")
            .expect("present");
        assert_eq!(tail, b"BBBB");
        assert!(layout.read_piece(&info, 2).expect("read").is_none());
    }

    #[test]
    fn read_piece_reports_absent_files_as_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = StorageLayout::Plain {
            parent: dir.path().to_path_buf(),
        };
        let info = info_with_files(&[("a", &["a.bin"], 4)], 4);
        assert!(layout.read_piece(&info, 0).expect("read").is_none());
    }

    #[test]
    fn write_block_creates_parents_and_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = StorageLayout::Plain {
            parent: dir.path().to_path_buf(),
        };
        let info = info_with_files(&[("a", &["nested", "deep.bin"], 4)], 4);
        layout
            .write_block(&info, 0, b"WXYZ")
            .expect("write");
        let piece = layout
            .read_piece(&info, 0)
            .expect("read")
            .expect("present");
        assert_eq!(piece, b"WXYZ");
    }

    #[test]
    fn spot_check_requires_full_length() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = StorageLayout::Plain {
            parent: dir.path().to_path_buf(),
        };
        let info = info_with_files(&[("a", &["a.bin"], 4)], 4);
        assert!(!layout.spot_check_files(&info, 3));
        layout.create_directories(&info).expect("dirs");
        fs::write(dir.path().join("PKG/a.bin"), b"1234").expect("write");
        assert!(layout.spot_check_files(&info, 3));
    }
}
