use std::fs::File;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};

/// Streams a file through SHA-256 and returns `(hex_digest, size_bytes)`.
///
/// Blocking; async callers should run it on a blocking thread.
pub fn file_hash(path: &Path) -> io::Result<(String, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let size = io::copy(&mut file, &mut hasher)?;
    Ok((hex::encode(hasher.finalize()), size))
}
