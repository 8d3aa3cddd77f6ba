//! Disk write-error policy.
//!
//! Transient errors re-enable the download after a short sleep; a missing
//! directory is repaired in place. Read-only filesystems, permission
//! failures, full disks, and runaway error counts are fatal and surface a
//! fixed user-facing message.

/// Raw write-error count at which a torrent is declared fatally broken.
pub(crate) const FATAL_WRITE_ERROR_THRESHOLD: u32 = 50;

/// How a write error should be handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskErrorKind {
    /// A path component is missing; create it and continue.
    MissingDirectory {
        /// The path extracted from the error text, when present.
        path: Option<String>,
    },
    /// Fatal condition with a fixed user-facing message.
    Fatal {
        /// Message copied to the transfer row.
        message: &'static str,
    },
    /// Anything else: sleep briefly and re-enable the download.
    Transient,
}

/// User-facing message for a read-only filesystem.
pub(crate) const MSG_READ_ONLY: &str = "Disk is read-only — cannot write downloaded data";
/// User-facing message for permission failures.
pub(crate) const MSG_PERMISSION: &str = "Permission denied — cannot write downloaded data";
/// User-facing message for a full disk.
pub(crate) const MSG_NO_SPACE: &str = "Disk is full — no space left for downloaded data";
/// User-facing message for a runaway error count.
pub(crate) const MSG_TOO_MANY: &str = "Repeated disk write failures — download stopped";

/// Classify one write error given the torrent's running error count.
#[must_use]
pub fn classify_write_error(error_text: &str, error_count: u32) -> DiskErrorKind {
    let lowered = error_text.to_ascii_lowercase();
    if lowered.contains("no such file or directory") {
        return DiskErrorKind::MissingDirectory {
            path: extract_path(error_text),
        };
    }
    if lowered.contains("read-only file system") {
        return DiskErrorKind::Fatal {
            message: MSG_READ_ONLY,
        };
    }
    if lowered.contains("permission denied") {
        return DiskErrorKind::Fatal {
            message: MSG_PERMISSION,
        };
    }
    if lowered.contains("no space left on device") {
        return DiskErrorKind::Fatal {
            message: MSG_NO_SPACE,
        };
    }
    if error_count >= FATAL_WRITE_ERROR_THRESHOLD {
        return DiskErrorKind::Fatal {
            message: MSG_TOO_MANY,
        };
    }
    DiskErrorKind::Transient
}

/// Pull a filesystem path out of error text shaped like
/// `failed to write "/some/path": no such file or directory`.
fn extract_path(error_text: &str) -> Option<String> {
    if let Some(start) = error_text.find('"') {
        let rest = &error_text[start + 1..];
        if let Some(end) = rest.find('"') {
            return Some(rest[..end].to_string());
        }
    }
    error_text
        .split_whitespace()
        .find(|token| token.starts_with('/'))
        .map(|token| token.trim_end_matches([':', ',']).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_is_repairable_and_extracts_path() {
        let kind = classify_write_error(
            "failed to write \"/data/PKG/video.mxf\": No such file or directory",
            3,
        );
        assert_eq!(
            kind,
            DiskErrorKind::MissingDirectory {
                path: Some("/data/PKG/video.mxf".to_string())
            }
        );
    }

    #[test]
    fn missing_directory_wins_over_error_count() {
        let kind = classify_write_error("open /x: no such file or directory", 200);
        assert!(matches!(kind, DiskErrorKind::MissingDirectory { .. }));
    }

    #[test]
    fn fatal_conditions_map_to_fixed_messages() {
        assert_eq!(
            classify_write_error("write /x: Read-only file system", 0),
            DiskErrorKind::Fatal {
                message: MSG_READ_ONLY
            }
        );
        assert_eq!(
            classify_write_error("open /x: permission denied", 0),
            DiskErrorKind::Fatal {
                message: MSG_PERMISSION
            }
        );
        assert_eq!(
            classify_write_error("write /x: No space left on device", 0),
            DiskErrorKind::Fatal {
                message: MSG_NO_SPACE
            }
        );
    }

    #[test]
    fn error_count_threshold_is_fatal() {
        assert_eq!(classify_write_error("weird transient error", 49), DiskErrorKind::Transient);
        assert_eq!(
            classify_write_error("weird transient error", 50),
            DiskErrorKind::Fatal {
                message: MSG_TOO_MANY
            }
        );
    }

    #[test]
    fn unquoted_paths_are_still_extracted() {
        let kind = classify_write_error("openat /data/PKG/meta.xml: no such file or directory", 0);
        assert_eq!(
            kind,
            DiskErrorKind::MissingDirectory {
                path: Some("/data/PKG/meta.xml".to_string())
            }
        );
    }
}
