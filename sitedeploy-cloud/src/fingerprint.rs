//! Content fingerprints compatible with S3 ETags.
//!
//! S3 reports the MD5 of the object body for single-part uploads, and
//! `md5(md5(part_1) || ... || md5(part_n))-n` for multipart uploads. The
//! fingerprinter reproduces both forms for a given part size, which must be
//! the same part size the uploader uses.

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Content-derived identity of an object body.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fingerprint {
    /// Lowercase hex digest, with a `-<parts>` suffix for multipart content.
    Digest(String),
    /// The remote side reported something we cannot reproduce locally.
    Unknown,
}

impl Fingerprint {
    /// Parses an ETag as returned by S3 (quoted or not).
    pub fn from_etag(etag: &str) -> Self {
        let value = etag.trim().trim_matches('"').to_ascii_lowercase();
        let (digest, parts) = match value.split_once('-') {
            Some((digest, parts)) => (digest, Some(parts)),
            None => (value.as_str(), None),
        };

        let digest_ok = digest.len() == 32 && digest.bytes().all(|b| b.is_ascii_hexdigit());
        let parts_ok = parts.is_none_or(|p| p.parse::<u32>().is_ok_and(|n| n > 0));

        if digest_ok && parts_ok {
            Fingerprint::Digest(value)
        } else {
            Fingerprint::Unknown
        }
    }

    /// Returns true only if both sides are known and identical.
    ///
    /// `Unknown` never matches, not even another `Unknown`.
    pub fn matches(&self, other: &Fingerprint) -> bool {
        match (self, other) {
            (Fingerprint::Digest(a), Fingerprint::Digest(b)) => a == b,
            _ => false,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Fingerprint::Unknown)
    }

    /// Number of multipart parts encoded in the digest (1 for single-part).
    pub fn part_count(&self) -> Option<u32> {
        match self {
            Fingerprint::Digest(d) => match d.split_once('-') {
                Some((_, parts)) => parts.parse().ok(),
                None => Some(1),
            },
            Fingerprint::Unknown => None,
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fingerprint::Digest(d) => write!(f, "{d}"),
            Fingerprint::Unknown => write!(f, "unknown"),
        }
    }
}

/// Computes ETag-compatible fingerprints for a fixed multipart part size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fingerprinter {
    chunk_size: u64,
}

impl Fingerprinter {
    pub fn new(chunk_size: u64) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Fingerprints an in-memory byte sequence.
    pub fn fingerprint(&self, bytes: &[u8]) -> Fingerprint {
        let chunk = usize::try_from(self.chunk_size).unwrap_or(usize::MAX);
        if bytes.len() <= chunk {
            return Fingerprint::Digest(hex::encode(Md5::digest(bytes)));
        }

        let parts: Vec<_> = bytes.chunks(chunk).map(|c| Md5::digest(c)).collect();
        combine(&parts)
    }

    /// Fingerprints a stream, holding at most one read buffer in memory.
    pub fn fingerprint_reader<R: Read>(&self, mut reader: R) -> io::Result<Fingerprint> {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut parts = Vec::new();

        loop {
            let mut part = Md5::new();
            let mut remaining = self.chunk_size;
            let mut consumed = 0u64;

            while remaining > 0 {
                let want = remaining.min(buf.len() as u64) as usize;
                let n = match reader.read(&mut buf[..want]) {
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                };
                if n == 0 {
                    break;
                }
                part.update(&buf[..n]);
                remaining -= n as u64;
                consumed += n as u64;
            }

            if consumed == 0 {
                break;
            }
            parts.push(part.finalize());

            // Short part means EOF
            if remaining > 0 {
                break;
            }
        }

        Ok(match parts.len() {
            0 => Fingerprint::Digest(hex::encode(Md5::digest(b""))),
            1 => Fingerprint::Digest(hex::encode(&parts[0])),
            _ => combine(&parts),
        })
    }

    /// Fingerprints a file on disk.
    pub fn fingerprint_file(&self, path: &Path) -> io::Result<Fingerprint> {
        let file = File::open(path)?;
        self.fingerprint_reader(file)
    }
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_CHUNK_SIZE)
    }
}

fn combine<D: AsRef<[u8]>>(parts: &[D]) -> Fingerprint {
    let mut combined = Md5::new();
    for part in parts {
        combined.update(part.as_ref());
    }
    Fingerprint::Digest(format!(
        "{}-{}",
        hex::encode(combined.finalize()),
        parts.len()
    ))
}
