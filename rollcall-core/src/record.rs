use crate::digest::Digest;
use crate::hex::{self, HexCase};
use serde::Serialize;
use thiserror::Error;

/// Largest size a record may declare (100 GB).
pub const MAX_RECORD_SIZE: u64 = 100_000_000_000;

pub const FIELD_SEP: char = '|';

/// One file in a roll. `digest: None` means size-only.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct FileRecord {
    relative_path: String,
    size: u64,
    #[serde(serialize_with = "serialize_digest")]
    digest: Option<Digest>,
}

fn serialize_digest<S: serde::Serializer>(d: &Option<Digest>, s: S) -> Result<S::Ok, S::Error> {
    match d {
        Some(d) => s.serialize_some(&hex::encode_lower(d)),
        None => s.serialize_none(),
    }
}

impl FileRecord {
    pub fn new(relative_path: impl Into<String>, size: u64, digest: Option<Digest>) -> Self {
        Self { relative_path: relative_path.into(), size, digest }
    }

    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn digest(&self) -> Option<&Digest> {
        self.digest.as_ref()
    }

    /// `path|size|digest`, digest left empty in size-only mode.
    pub fn to_line(&self, case: HexCase) -> String {
        let digest = self.digest.as_ref().map(|d| hex::encode(d, case)).unwrap_or_default();
        format!("{}{FIELD_SEP}{}{FIELD_SEP}{}", self.relative_path, self.size, digest)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordFault {
    #[error("expected 2 or 3 fields, found {0}")]
    FieldCount(usize),
    #[error("could not parse the file length {0:?}")]
    BadSize(String),
    #[error("file length {0} exceeds the sanity ceiling")]
    SizeTooLarge(u64),
    #[error("bad digest: {0}")]
    BadDigest(String),
    #[error("empty path")]
    EmptyPath,
}

/// A dropped record line; `line` is 1-based within the roll file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRecord {
    pub line: usize,
    pub fault: RecordFault,
}

/// Parse one record line. `Ok(None)` for blank lines and `#` comments.
pub fn parse_line(line: &str) -> Result<Option<FileRecord>, RecordFault> {
    let trimmed = line.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let fields: Vec<&str> = line.split(FIELD_SEP).collect();
    if fields.len() < 2 || fields.len() > 3 {
        return Err(RecordFault::FieldCount(fields.len()));
    }

    let path = fields[0].trim();
    if path.is_empty() {
        return Err(RecordFault::EmptyPath);
    }

    let size_text = fields[1].trim();
    // u64 parsing already refuses a sign, so negatives land here too
    let size: u64 = size_text.parse().map_err(|_| RecordFault::BadSize(size_text.to_string()))?;
    if size > MAX_RECORD_SIZE {
        return Err(RecordFault::SizeTooLarge(size));
    }

    let digest = match fields.get(2).map(|s| s.trim()) {
        Some(text) if !text.is_empty() => {
            Some(hex::decode_digest(text).map_err(|e| RecordFault::BadDigest(e.to_string()))?)
        }
        _ => None,
    };

    Ok(Some(FileRecord::new(path, size, digest)))
}

/// Parse record lines, keeping the good ones and collecting faults.
/// `first_line` is the 1-based number of the first line yielded.
pub fn parse_lines<'a>(
    lines: impl Iterator<Item = &'a str>,
    first_line: usize,
) -> (Vec<FileRecord>, Vec<MalformedRecord>) {
    let mut records = Vec::new();
    let mut malformed = Vec::new();
    for (i, line) in lines.enumerate() {
        match parse_line(line) {
            Ok(Some(rec)) => records.push(rec),
            Ok(None) => {}
            Err(fault) => {
                let line = first_line + i;
                tracing::warn!(line, %fault, "bad file record line");
                malformed.push(MalformedRecord { line, fault });
            }
        }
    }
    (records, malformed)
}
