//! Sending a batch through the wormhole and checking it at the other end.
//!
//! The orchestrator only sequences the steps; all roll logic lives in the
//! builder, parser and verifier. Transport is plain copy/rename and is
//! best-effort: failures are reported, not retried.

use crate::builder::{BuildOptions, BuiltRoll, RollBuilder, SequencedRequest};
use crate::error::{Result, RollError};
use crate::parser;
use crate::path_safety::check_relative;
use crate::select::{select_files, Selector};
use crate::verify::{self, Summary, VerifyOptions};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransferMode {
    #[default]
    Copy,
    /// Delete the originals once they are in the wormhole.
    Move,
}

#[derive(Clone, Debug)]
pub struct TransferRequest {
    pub source_root: PathBuf,
    pub selector: Selector,
    pub scope: String,
    pub sequence: u64,
    /// Non-zero to resend an earlier transmission.
    pub retransmit_of: u64,
    /// The earlier roll being resent. When given, the new roll must carry
    /// the same record set or the transfer is refused.
    pub original_roll: Option<PathBuf>,
    pub wormhole_entry: PathBuf,
    pub dest_subdir: Option<PathBuf>,
    pub mode: TransferMode,
}

#[derive(Debug)]
pub struct TransferFailure {
    pub path: PathBuf,
    pub error: io::Error,
}

#[derive(Debug)]
pub struct TransferReport {
    pub roll: BuiltRoll,
    pub destination: PathBuf,
    pub transferred: usize,
    pub failures: Vec<TransferFailure>,
    pub elapsed: Duration,
}

impl TransferReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.roll.excluded.is_empty()
    }
}

/// Build the roll, re-read it, then copy it and its files into the wormhole.
pub fn transfer(req: &TransferRequest, opts: BuildOptions) -> Result<TransferReport> {
    let timer = Instant::now();
    let files = select_files(&req.source_root, &req.selector)?;
    if files.is_empty() {
        return Err(RollError::Build(format!(
            "no files matched {:?} under {}",
            req.selector.pattern,
            req.source_root.display()
        )));
    }

    let original = match &req.original_roll {
        Some(p) => Some(parser::parse_sequenced(p)?),
        None => None,
    };
    if let Some(orig) = &original {
        if req.retransmit_of != 0 && req.retransmit_of != orig.sequence {
            return Err(RollError::RetransmitMismatch(format!(
                "asked to resend {} but the original roll is {}",
                req.retransmit_of, orig.sequence
            )));
        }
    }

    let builder = RollBuilder::new(opts);
    let built = builder.build_sequenced(
        &SequencedRequest {
            scope: &req.scope,
            sequence: req.sequence,
            retransmit_of: original.as_ref().map_or(req.retransmit_of, |o| o.sequence),
        },
        &req.source_root,
        &files,
        &req.source_root,
    )?;

    let roll = parser::parse_sequenced(&built.path)?;
    if let Some(orig) = &original {
        if let Err(e) = verify::check_retransmit(orig, &roll) {
            let _ = fs::remove_file(&built.path);
            return Err(e);
        }
    }

    let destination = match &req.dest_subdir {
        Some(sub) => {
            check_relative(sub)?;
            req.wormhole_entry.join(sub)
        }
        None => req.wormhole_entry.clone(),
    };
    fs::create_dir_all(&destination).map_err(|e| RollError::io(&destination, e))?;

    let roll_name = built.path.file_name().map(PathBuf::from).unwrap_or_default();
    fs::copy(&built.path, destination.join(&roll_name)).map_err(|e| RollError::io(&built.path, e))?;

    let mut transferred = 0usize;
    let mut failures = Vec::new();
    for rec in &roll.records {
        let rel = Path::new(rec.relative_path());
        if let Err(e) = check_relative(rel) {
            tracing::error!("{e}");
            failures.push(TransferFailure {
                path: rel.to_path_buf(),
                error: io::Error::new(io::ErrorKind::InvalidInput, e.to_string()),
            });
            continue;
        }
        let from = req.source_root.join(rel);
        let to = destination.join(rel);
        match send_file(&from, &to, req.mode) {
            Ok(()) => transferred += 1,
            Err(error) => {
                tracing::error!("failed to transfer {}: {error}", from.display());
                failures.push(TransferFailure { path: from, error });
            }
        }
    }
    tracing::info!(
        roll = %roll_name.display(),
        transferred,
        failed = failures.len(),
        "transfer finished in {:?}",
        timer.elapsed()
    );

    Ok(TransferReport { roll: built, destination, transferred, failures, elapsed: timer.elapsed() })
}

/// Copy or move one file, replacing whatever is at `to`.
fn send_file(from: &Path, to: &Path, mode: TransferMode) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    match mode {
        TransferMode::Copy => fs::copy(from, to).map(|_| ()),
        TransferMode::Move => match fs::rename(from, to) {
            Ok(()) => Ok(()),
            // e.g. the wormhole is on another volume
            Err(_) => {
                fs::copy(from, to)?;
                fs::remove_file(from)
            }
        },
    }
}

#[derive(Clone, Debug)]
pub struct ReceiveRequest {
    pub roll: PathBuf,
    /// Where the batch landed; defaults to the roll's directory.
    pub root: Option<PathBuf>,
    pub original_roll: Option<PathBuf>,
    pub verify: VerifyOptions,
}

/// Check a delivered batch at the wormhole exit.
pub fn receive(req: &ReceiveRequest) -> Result<Summary> {
    let roll = parser::parse_sequenced(&req.roll)?;
    if let Some(orig_path) = &req.original_roll {
        let orig = parser::parse_sequenced(orig_path)?;
        verify::check_retransmit(&orig, &roll)?;
    }
    let root = match &req.root {
        Some(r) => r.clone(),
        None => req.roll.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(".")),
    };
    tracing::info!(
        scope = %roll.scope,
        sequence = roll.sequence,
        retransmit_of = roll.retransmit_of,
        "checking delivery"
    );
    Ok(verify::verify_with(&roll, &root, &req.verify))
}
