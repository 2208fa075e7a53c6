use crate::digest;
use crate::error::{Result, RollError};
use crate::path_safety::{validate_path, PathPolicy};
use crate::record::FileRecord;
use crate::roll::Roll;
use rayon::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::Path;

#[derive(Clone, Copy, Debug)]
pub struct VerifyOptions {
    /// Off for a quick presence-and-size check.
    pub check_hashes: bool,
    pub path_policy: PathPolicy,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self { check_hashes: true, path_policy: PathPolicy::default() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemKind {
    Missing,
    UnsafePath,
    BadLength,
    BadHash,
    Unreadable,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Problem {
    pub path: String,
    pub kind: ProblemKind,
    pub detail: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: u64,
    pub missing: u64,
    pub bad_length: u64,
    pub bad_hash: u64,
    pub good_hashed: u64,
    pub good_unhashed: u64,
    pub malformed_lines: u64,
    pub problems: Vec<Problem>,
}

impl Summary {
    pub fn failed(&self) -> u64 {
        self.missing + self.bad_length + self.bad_hash
    }

    /// Every record verified and no record line was dropped.
    pub fn is_clean(&self) -> bool {
        self.failed() == 0 && self.malformed_lines == 0
    }
}

enum Outcome {
    GoodHashed,
    GoodUnhashed,
    Bad(Problem),
}

fn problem(rec: &FileRecord, kind: ProblemKind, detail: impl Into<String>) -> Outcome {
    Outcome::Bad(Problem { path: rec.relative_path().to_string(), kind, detail: detail.into() })
}

fn check_record(rec: &FileRecord, root: &Path, opts: &VerifyOptions) -> Outcome {
    let path = match validate_path(root, Path::new(rec.relative_path()), opts.path_policy) {
        Ok(p) => p,
        Err(e) => return problem(rec, ProblemKind::UnsafePath, e.to_string()),
    };
    let md = match fs::metadata(&path) {
        Ok(m) if m.is_file() => m,
        _ => return problem(rec, ProblemKind::Missing, "missing file"),
    };
    if md.len() != rec.size() {
        return problem(
            rec,
            ProblemKind::BadLength,
            format!("length {} expected {}", md.len(), rec.size()),
        );
    }
    let expected = match rec.digest() {
        Some(d) if opts.check_hashes => d,
        _ => return Outcome::GoodUnhashed,
    };
    match digest::digest_file(&path, 0) {
        Ok(actual) if &actual == expected => Outcome::GoodHashed,
        Ok(_) => problem(rec, ProblemKind::BadHash, "hash mismatch"),
        Err(e) => problem(rec, ProblemKind::Unreadable, e.to_string()),
    }
}

/// Reconcile `records` against the files under `root`. Never touches the
/// filesystem beyond reading, and never stops at a bad record.
pub fn verify_records(
    records: &[FileRecord],
    malformed_lines: usize,
    root: &Path,
    opts: &VerifyOptions,
) -> Summary {
    let outcomes: Vec<Outcome> = records.par_iter().map(|r| check_record(r, root, opts)).collect();

    let mut s = Summary {
        total: records.len() as u64,
        malformed_lines: malformed_lines as u64,
        ..Summary::default()
    };
    for o in outcomes {
        match o {
            Outcome::GoodHashed => s.good_hashed += 1,
            Outcome::GoodUnhashed => s.good_unhashed += 1,
            Outcome::Bad(p) => {
                match p.kind {
                    ProblemKind::Missing | ProblemKind::UnsafePath => s.missing += 1,
                    ProblemKind::BadLength => s.bad_length += 1,
                    ProblemKind::BadHash | ProblemKind::Unreadable => s.bad_hash += 1,
                }
                tracing::warn!("{}: {}", p.path, p.detail);
                s.problems.push(p);
            }
        }
    }
    s
}

pub fn verify(roll: &Roll, root: &Path) -> Summary {
    verify_with(roll, root, &VerifyOptions::default())
}

pub fn verify_with(roll: &Roll, root: &Path, opts: &VerifyOptions) -> Summary {
    verify_records(&roll.records, roll.malformed.len(), root, opts)
}

/// A retransmit must name the original's sequence within the same scope and
/// carry an identical record set.
pub fn check_retransmit(original: &Roll, retransmit: &Roll) -> Result<()> {
    if original.scope != retransmit.scope {
        return Err(RollError::RetransmitMismatch(format!(
            "scope {:?} differs from original scope {:?}",
            retransmit.scope, original.scope
        )));
    }
    if retransmit.retransmit_of != original.sequence {
        return Err(RollError::RetransmitMismatch(format!(
            "roll resends {} but the original is {}",
            retransmit.retransmit_of, original.sequence
        )));
    }
    if !retransmit.same_records_as(original) {
        let first = original
            .records
            .iter()
            .zip(&retransmit.records)
            .find(|(a, b)| a != b)
            .map(|(a, _)| a.relative_path().to_string());
        return Err(RollError::RetransmitMismatch(match first {
            Some(p) => format!("record {p} differs"),
            None => format!(
                "{} records, original has {}",
                retransmit.records.len(),
                original.records.len()
            ),
        }));
    }
    Ok(())
}
