use crate::error::{Result, RollError};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

pub type Digest = [u8; 32];

const READ_BUF: usize = 64 * 1024;

/// BLAKE3 over `reader` from `start_offset` to end of stream.
pub fn digest_reader<R: Read + Seek>(reader: &mut R, start_offset: u64) -> io::Result<Digest> {
    reader.seek(SeekFrom::Start(start_offset))?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; READ_BUF];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(*hasher.finalize().as_bytes())
}

pub fn digest_file(path: &Path, start_offset: u64) -> Result<Digest> {
    let mut f = File::open(path).map_err(|e| RollError::io(path, e))?;
    digest_reader(&mut f, start_offset).map_err(|e| RollError::io(path, e))
}

pub fn digest_bytes(bytes: &[u8]) -> Digest {
    *blake3::hash(bytes).as_bytes()
}
