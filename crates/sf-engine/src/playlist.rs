//! Playlist resolution
//!
//! Maps the URL list of a clip to locally openable files. Resolution is
//! best-effort: entries that cannot be resolved are dropped with a
//! warning, never an error — a clip with nothing playable simply stays
//! silent.

use std::path::{Path, PathBuf};

/// Resolves clip URLs against a set of search paths.
pub struct PlaylistResolver;

impl PlaylistResolver {
    /// Resolve `urls` to an ordered list of existing files.
    ///
    /// Empty entries are skipped. A `file://` prefix is stripped.
    /// Absolute paths are checked directly; other entries are tried
    /// against each search path in order, then against the working
    /// directory. Unresolvable entries are dropped with a warning.
    pub fn resolve(urls: &[String], search_paths: &[PathBuf]) -> Vec<PathBuf> {
        let mut resolved = Vec::new();

        for url in urls {
            let url = url.trim();
            if url.is_empty() {
                continue;
            }
            let bare = url.strip_prefix("file://").unwrap_or(url);
            let candidate = Path::new(bare);

            if candidate.is_absolute() {
                if candidate.is_file() {
                    resolved.push(candidate.to_path_buf());
                } else {
                    log::warn!("audio url '{}' does not exist, dropping", url);
                }
                continue;
            }

            let found = search_paths
                .iter()
                .map(|base| base.join(candidate))
                .find(|path| path.is_file());

            if let Some(path) = found {
                resolved.push(path);
            } else if candidate.is_file() {
                resolved.push(candidate.to_path_buf());
            } else {
                log::warn!("audio url '{}' not found in any search path, dropping", url);
            }
        }

        resolved
    }
}
