//! Local directory traversal.

use crate::content_type;
use crate::error::{DeployError, DeployResult};
use crate::fingerprint::{Fingerprint, Fingerprinter};
use crate::types::{FileError, LocalFile};
use std::io;
use std::path::{Component, Path};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Result of walking a sync root.
#[derive(Clone, Debug, Default)]
pub struct LocalScan {
    /// Readable files, sorted by key.
    pub files: Vec<LocalFile>,
    /// Files found by the walk that could not be fingerprinted, sorted by key.
    pub unreadable: Vec<FileError>,
}

/// Walks `root` and fingerprints every regular file beneath it.
///
/// Symlinks are not followed. A file that cannot be read is recorded in
/// [`LocalScan::unreadable`] and the walk continues. A directory that cannot
/// be listed fails the whole scan, since the local tree would be incomplete.
pub fn scan_directory(root: &Path, fingerprinter: &Fingerprinter) -> DeployResult<LocalScan> {
    scan_directory_with(root, |path| fingerprinter.fingerprint_file(path))
}

/// Like [`scan_directory`] with a caller-supplied file reader.
pub fn scan_directory_with<F>(root: &Path, mut read: F) -> DeployResult<LocalScan>
where
    F: FnMut(&Path) -> io::Result<Fingerprint>,
{
    let meta = std::fs::metadata(root).map_err(|e| {
        DeployError::Config(format!("cannot read sync root {}: {e}", root.display()))
    })?;
    if !meta.is_dir() {
        return Err(DeployError::Config(format!(
            "sync root {} is not a directory",
            root.display()
        )));
    }

    let mut scan = LocalScan::default();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| DeployError::Scan(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path
            .strip_prefix(root)
            .map_err(|e| DeployError::Scan(format!("{}: {e}", path.display())))?;
        let key = match object_key(relative) {
            Ok(key) => key,
            Err(e) => {
                warn!("skipping {}: {e}", path.display());
                scan.unreadable.push(FileError::from_error(lossy_key(relative), &e));
                continue;
            }
        };

        let read_result = entry
            .metadata()
            .map_err(io::Error::from)
            .and_then(|meta| Ok((meta.len(), read(path)?)));
        let (size, fingerprint) = match read_result {
            Ok(found) => found,
            Err(e) => {
                warn!("cannot read {}: {e}", path.display());
                let err =
                    DeployError::transfer(&key, format!("cannot read {}: {e}", path.display()));
                scan.unreadable.push(FileError::from_error(key, &err));
                continue;
            }
        };

        debug!("scanned {key} ({size} bytes, {fingerprint})");
        scan.files.push(LocalFile {
            content_type: content_type::resolve(&key).to_string(),
            key,
            path: path.to_path_buf(),
            size,
            fingerprint,
        });
    }

    scan.files.sort_by(|a, b| a.key.cmp(&b.key));
    scan.unreadable.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(scan)
}

fn lossy_key(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Builds a slash-separated object key from a root-relative path.
pub fn object_key(relative: &Path) -> DeployResult<String> {
    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| {
                    DeployError::Scan(format!(
                        "path {} is not valid UTF-8",
                        relative.display()
                    ))
                })?;
                segments.push(part);
            }
            Component::CurDir => {}
            _ => {
                return Err(DeployError::Scan(format!(
                    "path {} escapes the sync root",
                    relative.display()
                )));
            }
        }
    }
    if segments.is_empty() {
        return Err(DeployError::Scan("empty object key".to_string()));
    }
    Ok(segments.join("/"))
}
