// Content Hashing
// SHA-256 digests used by strict-mode change detection

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Raw SHA-256 digest
pub type Digest256 = [u8; 32];

/// Hash everything a reader yields
pub fn sha256_reader<R: Read>(mut reader: R) -> io::Result<Digest256> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hasher.finalize().into())
}

/// Hash a file on disk
pub fn sha256_file(path: &Path) -> io::Result<Digest256> {
    sha256_reader(File::open(path)?)
}
