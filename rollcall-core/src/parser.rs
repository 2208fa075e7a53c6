//! Reading rolls back. The roll's own digest is always checked before any
//! header field or record is interpreted; a roll that fails that check, or
//! whose header is broken, is rejected whole. Individual record lines are
//! parsed leniently (see [`crate::record::parse_lines`]).

use crate::digest::{self, Digest};
use crate::error::{Result, RollError};
use crate::hex;
use crate::record;
use crate::roll::{FormatVersion, Roll, DIGEST_LINE_LEN, SEQUENCED_EXT};
use fs2::FileExt;
use std::fs::{self, File};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Read a roll file under a shared lock. Fails if a writer holds it.
fn read_shared(path: &Path) -> Result<Vec<u8>> {
    let mut f = File::open(path).map_err(|e| RollError::io(path, e))?;
    if let Err(e) = FileExt::try_lock_shared(&f) {
        if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
            return Err(RollError::io(path, e));
        }
        tracing::debug!("shared lock unavailable for {}: {e}", path.display());
    }
    let mut buf = Vec::new();
    f.read_to_end(&mut buf).map_err(|e| RollError::io(path, e))?;
    let _ = FileExt::unlock(&f);
    Ok(buf)
}

fn check_digest(path: &Path, bytes: &[u8], offset: u64, declared: &Digest) -> Result<()> {
    let actual = digest::digest_reader(&mut Cursor::new(bytes), offset)
        .map_err(|e| RollError::io(path, e))?;
    if &actual != declared {
        tracing::error!("hash does not match: {}", path.display());
        return Err(RollError::IntegrityMismatch {
            path: path.to_path_buf(),
            expected: hex::encode_lower(declared),
            actual: hex::encode_lower(&actual),
        });
    }
    Ok(())
}

fn header_line<'a>(
    path: &Path,
    lines: &mut impl Iterator<Item = &'a str>,
    what: &str,
) -> Result<&'a str> {
    let line = lines
        .next()
        .ok_or_else(|| RollError::malformed(path, format!("missing {what} line")))?;
    line.strip_prefix("# ")
        .ok_or_else(|| RollError::malformed(path, format!("{what} line does not start with '# '")))
}

/// Parse a sequenced roll (`<scope>-<sequence>.roll`).
pub fn parse_sequenced(path: &Path) -> Result<Roll> {
    let bytes = read_shared(path)?;
    if bytes.len() < DIGEST_LINE_LEN || &bytes[..2] != b"# " {
        return Err(RollError::malformed(path, "missing digest line"));
    }
    let declared = std::str::from_utf8(&bytes[2..DIGEST_LINE_LEN])
        .ok()
        .and_then(|s| hex::decode_digest(s).ok())
        .ok_or_else(|| RollError::malformed(path, "digest line is not 64 hex digits"))?;

    check_digest(path, &bytes, DIGEST_LINE_LEN as u64, &declared)?;

    let rest = std::str::from_utf8(&bytes[DIGEST_LINE_LEN..])
        .map_err(|_| RollError::malformed(path, "roll is not UTF-8 text"))?;
    let body = rest
        .strip_prefix("\r\n")
        .or_else(|| rest.strip_prefix('\n'))
        .ok_or_else(|| RollError::malformed(path, "digest line is too long"))?;

    let mut lines = body.lines();
    let format_name = header_line(path, &mut lines, "format")?.trim();
    let format_version: FormatVersion = format_name.parse().map_err(RollError::UnsupportedFormat)?;
    if format_version != FormatVersion::TextV01 {
        tracing::error!("format/version is not supported: {format_version}");
        return Err(RollError::UnsupportedFormat(format_version.to_string()));
    }
    let scope = header_line(path, &mut lines, "scope")?.to_string();
    let sequence = parse_number(path, header_line(path, &mut lines, "sequence")?, "sequence")?;
    let retransmit_of =
        parse_number(path, header_line(path, &mut lines, "retransmit")?, "retransmit")?;

    // Lines 1-5 are the header.
    let (records, malformed) = record::parse_lines(lines, 6);
    Ok(Roll { format_version, scope, sequence, retransmit_of, records, malformed })
}

fn parse_number(path: &Path, text: &str, what: &str) -> Result<u64> {
    text.trim()
        .parse()
        .map_err(|_| RollError::malformed(path, format!("{what} {text:?} is not a number")))
}

/// Parse a content-addressed roll (`<prefix><DIGEST>.log`).
pub fn parse_standalone(path: &Path) -> Result<Roll> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| RollError::malformed(path, "file name is not UTF-8"))?;
    let declared = stem
        .len()
        .checked_sub(64)
        .and_then(|start| stem.get(start..))
        .and_then(|tail| hex::decode_digest(tail).ok())
        .ok_or_else(|| RollError::malformed(path, "file name does not end with a digest"))?;

    let bytes = read_shared(path)?;
    check_digest(path, &bytes, 0, &declared)?;

    let text = std::str::from_utf8(&bytes)
        .map_err(|_| RollError::malformed(path, "roll is not UTF-8 text"))?;
    let scope = text
        .lines()
        .next()
        .and_then(|l| l.strip_prefix("# Roll for "))
        .map(|l| l.rsplit_once(" at ").map_or(l, |(dir, _)| dir).to_string())
        .unwrap_or_default();
    let (records, malformed) = record::parse_lines(text.lines(), 1);
    Ok(Roll {
        format_version: FormatVersion::AdhocText,
        scope,
        sequence: 0,
        retransmit_of: 0,
        records,
        malformed,
    })
}

/// Pick the parser from the file extension.
pub fn parse_any(path: &Path) -> Result<Roll> {
    if path.extension().is_some_and(|e| e == SEQUENCED_EXT) {
        parse_sequenced(path)
    } else {
        parse_standalone(path)
    }
}

/// The most recently written file in `dir` whose name starts with `prefix`.
pub fn locate_latest(dir: &Path, prefix: &str) -> Result<PathBuf> {
    let mut best: Option<(SystemTime, PathBuf)> = None;
    for ent in fs::read_dir(dir).map_err(|e| RollError::io(dir, e))? {
        let ent = ent.map_err(|e| RollError::io(dir, e))?;
        let name = ent.file_name();
        if !name.to_str().is_some_and(|n| n.starts_with(prefix)) {
            continue;
        }
        let md = match ent.metadata() {
            Ok(m) if m.is_file() => m,
            _ => continue,
        };
        let mtime = md.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let path = ent.path();
        let newer = match &best {
            None => true,
            Some((t, p)) => mtime > *t || (mtime == *t && path > *p),
        };
        if newer {
            best = Some((mtime, path));
        }
    }
    best.map(|(_, p)| p)
        .ok_or_else(|| RollError::NoRoll { dir: dir.to_path_buf(), prefix: prefix.to_string() })
}
