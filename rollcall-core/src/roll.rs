use crate::record::{FileRecord, MalformedRecord};
use std::fmt;
use std::str::FromStr;

/// Format tag written on the second header line of a sequenced roll.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum FormatVersion {
    TextV01 = 0,
    JsonV01 = 256,
    XmlV01 = 512,
    /// Rolls read from the standalone (content-addressed) layout. Never
    /// written into a header.
    AdhocText = 0xFFFF,
}

impl FormatVersion {
    pub fn name(self) -> &'static str {
        match self {
            FormatVersion::TextV01 => "TEXT_V01",
            FormatVersion::JsonV01 => "JSON_V01",
            FormatVersion::XmlV01 => "XML_V01",
            FormatVersion::AdhocText => "ADHOC_TEXT",
        }
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FormatVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "TEXT_V01" => Ok(FormatVersion::TextV01),
            "JSON_V01" => Ok(FormatVersion::JsonV01),
            "XML_V01" => Ok(FormatVersion::XmlV01),
            "ADHOC_TEXT" => Ok(FormatVersion::AdhocText),
            other => Err(format!("unknown format {other:?}")),
        }
    }
}

/// A parsed (or freshly built) roll.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Roll {
    pub format_version: FormatVersion,
    pub scope: String,
    /// Transmission number within `scope`; 0 means unordered.
    pub sequence: u64,
    /// Sequence this roll resends, 0 when it is not a retransmit.
    pub retransmit_of: u64,
    pub records: Vec<FileRecord>,
    pub malformed: Vec<MalformedRecord>,
}

impl Roll {
    pub fn is_retransmit(&self) -> bool {
        self.retransmit_of != 0
    }

    /// Same paths, sizes and digests in the same order.
    pub fn same_records_as(&self, other: &Roll) -> bool {
        self.records == other.records
    }

    pub fn total_bytes(&self) -> u64 {
        self.records.iter().map(FileRecord::size).sum()
    }
}

/// Length of the sequenced roll's first line (`# ` + 64 hex digits), which is
/// also the offset where the digest-checked region starts.
pub const DIGEST_LINE_LEN: usize = 66;

pub const SEQUENCED_EXT: &str = "roll";
pub const STANDALONE_EXT: &str = "log";
pub const DEFAULT_PREFIX: &str = "RollCall-";

pub fn sequenced_file_name(scope: &str, sequence: u64) -> String {
    format!("{scope}-{sequence}.{SEQUENCED_EXT}")
}

/// Scopes end up in file names and header lines.
pub fn validate_scope(scope: &str) -> Result<(), String> {
    if scope.is_empty() {
        return Err("scope must not be empty".into());
    }
    if scope.trim() != scope {
        return Err("scope must not start or end with whitespace".into());
    }
    if let Some(c) = scope.chars().find(|c| c.is_control() || "/\\:*?\"<>|".contains(*c)) {
        return Err(format!("scope contains forbidden character {c:?}"));
    }
    Ok(())
}
