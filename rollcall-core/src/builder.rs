use crate::digest::{self, Digest};
use crate::error::{Result, RollError};
use crate::hex::{self, HexCase};
use crate::progress::Progress;
use crate::record::{FileRecord, FIELD_SEP};
use crate::roll::{self, FormatVersion, Roll, DIGEST_LINE_LEN, STANDALONE_EXT};
use fs2::FileExt;
use rayon::prelude::*;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Shared flag that aborts a whole hashing batch.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Hashing {
    #[default]
    Full,
    /// Record sizes only; digests stay empty.
    SizeOnly,
}

/// What to do with a selected file that cannot be read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnreadablePolicy {
    /// Keep the record without a digest (if its size is known).
    KeepSizeOnly,
    /// Leave the file out of the roll and log an error.
    #[default]
    Exclude,
    /// Fail the whole build.
    Abort,
}

/// How a built roll protects itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Finalize {
    /// Standalone rolls: the file is renamed to carry the digest of its content.
    RenameByDigest,
    /// Sequenced rolls: the fixed-width first line is overwritten with the
    /// digest of everything after it.
    PatchHeader,
}

#[derive(Clone)]
pub struct BuildOptions {
    /// Sort records by relative path (reproducible output).
    pub sorted: bool,
    pub hashing: Hashing,
    pub on_unreadable: UnreadablePolicy,
    pub case: HexCase,
    /// Hashing pool size; defaults to available parallelism.
    pub threads: Option<usize>,
    /// Permit a roll with no records.
    pub allow_empty: bool,
    pub cancel: CancelToken,
    pub progress: Option<Progress>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            sorted: false,
            hashing: Hashing::Full,
            on_unreadable: UnreadablePolicy::Exclude,
            case: HexCase::Upper,
            threads: None,
            allow_empty: false,
            cancel: CancelToken::new(),
            progress: None,
        }
    }
}

/// A selected file that did not make it into the roll.
#[derive(Debug)]
pub struct Excluded {
    pub path: PathBuf,
    pub error: RollError,
}

#[derive(Debug, Default)]
pub struct RecordSet {
    pub records: Vec<FileRecord>,
    pub excluded: Vec<Excluded>,
    /// Records kept without a digest because hashing failed.
    pub unhashed: Vec<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct SequencedRequest<'a> {
    pub scope: &'a str,
    pub sequence: u64,
    pub retransmit_of: u64,
}

#[derive(Clone, Debug)]
pub struct StandaloneRequest<'a> {
    pub prefix: &'a str,
    /// Append a `# Generated in ...` line.
    pub stats: bool,
}

/// Handle to a finalized roll on disk.
#[derive(Debug)]
pub struct BuiltRoll {
    pub path: PathBuf,
    pub roll: Roll,
    pub digest: Digest,
    pub finalize: Finalize,
    pub excluded: Vec<Excluded>,
}

struct Computed {
    record: Option<FileRecord>,
    failure: Option<(PathBuf, RollError)>,
}

pub struct RollBuilder {
    opts: BuildOptions,
}

impl RollBuilder {
    pub fn new(opts: BuildOptions) -> Self {
        Self { opts }
    }

    pub fn options(&self) -> &BuildOptions {
        &self.opts
    }

    /// Compute one record per file on a bounded pool. Results are collected
    /// in input order and merged in a single pass afterwards.
    pub fn collect(&self, root: &Path, files: &[PathBuf], skip: &[PathBuf]) -> Result<RecordSet> {
        let threads = self.opts.threads.unwrap_or_else(|| {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        });
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .build()
            .map_err(|e| RollError::Build(format!("hashing pool: {e}")))?;

        let work: Vec<&PathBuf> = files.iter().filter(|p| !skip.contains(*p)).collect();
        if let Some(p) = &self.opts.progress {
            let bytes = work.iter().filter_map(|p| fs::metadata(p).ok()).map(|m| m.len()).sum();
            p.set_totals(work.len() as u64, bytes);
            p.start();
        }

        let computed: Vec<Result<Computed>> =
            pool.install(|| work.par_iter().map(|path| self.compute(root, path)).collect());

        if let Some(p) = &self.opts.progress {
            p.stop();
        }

        let mut set = RecordSet::default();
        for c in computed {
            let c = c?;
            if let Some((path, error)) = c.failure {
                if c.record.is_none() {
                    if self.opts.on_unreadable == UnreadablePolicy::Abort {
                        return Err(error);
                    }
                    tracing::error!("excluding {}: {error}", path.display());
                    set.excluded.push(Excluded { path, error });
                } else {
                    tracing::warn!("no digest for {}: {error}", path.display());
                    set.unhashed.push(path);
                }
            }
            if let Some(record) = c.record {
                set.records.push(record);
            }
        }

        if self.opts.sorted {
            set.records.sort_by(|a, b| a.relative_path().cmp(b.relative_path()));
        }
        Ok(set)
    }

    fn compute(&self, root: &Path, path: &Path) -> Result<Computed> {
        if self.opts.cancel.is_cancelled() {
            return Err(RollError::Cancelled);
        }
        let excluded = |error: RollError| Computed {
            record: None,
            failure: Some((path.to_path_buf(), error)),
        };

        let rel = match relative_name(root, path) {
            Ok(r) => r,
            Err(e) => return Ok(excluded(e)),
        };
        let size = match fs::metadata(path) {
            Ok(m) => m.len(),
            Err(e) => return Ok(excluded(RollError::io(path, e))),
        };

        let out = match self.opts.hashing {
            Hashing::SizeOnly => Computed {
                record: Some(FileRecord::new(rel, size, None)),
                failure: None,
            },
            Hashing::Full => match digest::digest_file(path, 0) {
                Ok(d) => Computed {
                    record: Some(FileRecord::new(rel, size, Some(d))),
                    failure: None,
                },
                Err(e) if self.opts.on_unreadable == UnreadablePolicy::KeepSizeOnly => Computed {
                    record: Some(FileRecord::new(rel, size, None)),
                    failure: Some((path.to_path_buf(), e)),
                },
                Err(e) => excluded(e),
            },
        };
        if let Some(p) = &self.opts.progress {
            p.file_done(size);
        }
        Ok(out)
    }

    /// Write `<out_dir>/<scope>-<sequence>.roll` for `files` under `root`.
    pub fn build_sequenced(
        &self,
        req: &SequencedRequest<'_>,
        root: &Path,
        files: &[PathBuf],
        out_dir: &Path,
    ) -> Result<BuiltRoll> {
        roll::validate_scope(req.scope).map_err(RollError::Build)?;
        if files.is_empty() && !self.opts.allow_empty {
            return Err(RollError::Build("no files matched".into()));
        }
        let path = out_dir.join(roll::sequenced_file_name(req.scope, req.sequence));
        let file = create_exclusive(&path)?;

        let set = match self.collect(root, files, std::slice::from_ref(&path)) {
            Ok(s) => s,
            Err(e) => {
                discard(&path, file);
                return Err(e);
            }
        };
        let roll = Roll {
            format_version: FormatVersion::TextV01,
            scope: req.scope.to_string(),
            sequence: req.sequence,
            retransmit_of: req.retransmit_of,
            records: set.records,
            malformed: Vec::new(),
        };
        let digest = match write_sequenced(file, &path, &roll, self.opts.case) {
            Ok(d) => d,
            Err(e) => {
                let _ = fs::remove_file(&path);
                return Err(e);
            }
        };
        tracing::info!(
            roll = %path.display(),
            records = roll.records.len(),
            excluded = set.excluded.len(),
            "created sequenced roll"
        );
        Ok(BuiltRoll { path, roll, digest, finalize: Finalize::PatchHeader, excluded: set.excluded })
    }

    /// Resend `original` under a new sequence number with its record set unchanged.
    pub fn build_retransmit(&self, original: &Roll, sequence: u64, out_dir: &Path) -> Result<BuiltRoll> {
        roll::validate_scope(&original.scope).map_err(RollError::Build)?;
        if original.sequence == 0 {
            return Err(RollError::Build("cannot retransmit an unsequenced roll".into()));
        }
        if sequence == original.sequence {
            return Err(RollError::Build(format!("sequence {sequence} is already used by the original")));
        }
        let path = out_dir.join(roll::sequenced_file_name(&original.scope, sequence));
        let file = create_exclusive(&path)?;
        let roll = Roll {
            format_version: FormatVersion::TextV01,
            scope: original.scope.clone(),
            sequence,
            retransmit_of: original.sequence,
            records: original.records.clone(),
            malformed: Vec::new(),
        };
        let digest = match write_sequenced(file, &path, &roll, self.opts.case) {
            Ok(d) => d,
            Err(e) => {
                let _ = fs::remove_file(&path);
                return Err(e);
            }
        };
        tracing::info!(roll = %path.display(), retransmit_of = original.sequence, "created retransmit roll");
        Ok(BuiltRoll { path, roll, digest, finalize: Finalize::PatchHeader, excluded: Vec::new() })
    }

    /// Write a content-addressed roll `<root>/<prefix><DIGEST>.log`.
    pub fn build_standalone(
        &self,
        req: &StandaloneRequest<'_>,
        root: &Path,
        files: &[PathBuf],
    ) -> Result<BuiltRoll> {
        if req.prefix.is_empty() || req.prefix.contains(['/', '\\']) {
            return Err(RollError::Build(format!("bad manifest prefix {:?}", req.prefix)));
        }
        if files.is_empty() && !self.opts.allow_empty {
            return Err(RollError::Build("no files matched".into()));
        }
        let timer = Instant::now();
        let heading_root = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        let stamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S");

        let mut tmp = tempfile::Builder::new()
            .prefix(".rollcall-")
            .suffix(".tmp")
            .tempfile_in(root)
            .map_err(|e| RollError::io(root, e))?;
        let tmp_path = tmp.path().to_path_buf();
        FileExt::try_lock_exclusive(tmp.as_file()).map_err(|e| RollError::io(&tmp_path, e))?;

        let set = self.collect(root, files, std::slice::from_ref(&tmp_path))?;
        {
            let mut w = BufWriter::new(tmp.as_file_mut());
            let io = |e| RollError::io(&tmp_path, e);
            writeln!(w, "# Roll for {} at {}", heading_root.display(), stamp).map_err(io)?;
            for rec in &set.records {
                writeln!(w, "{}", rec.to_line(self.opts.case)).map_err(io)?;
            }
            if req.stats {
                writeln!(w, "# Generated in {:?}", timer.elapsed()).map_err(io)?;
            }
            w.flush().map_err(io)?;
        }
        let digest = digest::digest_reader(tmp.as_file_mut(), 0).map_err(|e| RollError::io(&tmp_path, e))?;
        let _ = FileExt::unlock(tmp.as_file());

        let path = root.join(format!("{}{}.{STANDALONE_EXT}", req.prefix, hex::encode_upper(&digest)));
        tmp.persist(&path).map_err(|e| RollError::io(&path, e.error))?;
        if req.stats {
            tracing::info!("roll generated in {:?}", timer.elapsed());
        }
        tracing::info!(roll = %path.display(), records = set.records.len(), "created standalone roll");

        let roll = Roll {
            format_version: FormatVersion::AdhocText,
            scope: heading_root.display().to_string(),
            sequence: 0,
            retransmit_of: 0,
            records: set.records,
            malformed: Vec::new(),
        };
        Ok(BuiltRoll { path, roll, digest, finalize: Finalize::RenameByDigest, excluded: set.excluded })
    }
}

/// Relative path with `/` separators, refusing anything a record line cannot carry.
fn relative_name(root: &Path, path: &Path) -> Result<String> {
    let rel = pathdiff::diff_paths(path, root)
        .ok_or_else(|| RollError::Build(format!("{} is not under {}", path.display(), root.display())))?;
    if rel.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(RollError::Build(format!("{} is not under {}", path.display(), root.display())));
    }
    let name = rel
        .to_str()
        .ok_or_else(|| RollError::Build(format!("path {rel:?} is not UTF-8")))?
        .replace('\\', "/");
    // record lines are trimmed and `#` lines are comments
    if name.contains(FIELD_SEP)
        || name.contains(['\n', '\r'])
        || name.trim() != name
        || name.starts_with('#')
    {
        return Err(RollError::Build(format!("path {name:?} cannot be written to a roll")));
    }
    Ok(name)
}

fn create_exclusive(path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => {
                RollError::Build(format!("{} already exists", path.display()))
            }
            _ => RollError::io(path, e),
        })?;
    FileExt::try_lock_exclusive(&file).map_err(|e| RollError::io(path, e))?;
    Ok(file)
}

fn discard(path: &Path, file: File) {
    drop(file);
    let _ = fs::remove_file(path);
}

/// Placeholder line, header, records; then hash `[66..]` and patch the first line.
fn write_sequenced(file: File, path: &Path, roll: &Roll, case: HexCase) -> Result<Digest> {
    let io = |e| RollError::io(path, e);
    let mut w = BufWriter::new(file);
    writeln!(w, "# {}", "0".repeat(64)).map_err(io)?;
    writeln!(w, "# {}", roll.format_version).map_err(io)?;
    writeln!(w, "# {}", roll.scope).map_err(io)?;
    writeln!(w, "# {}", roll.sequence).map_err(io)?;
    writeln!(w, "# {}", roll.retransmit_of).map_err(io)?;
    for rec in &roll.records {
        writeln!(w, "{}", rec.to_line(case)).map_err(io)?;
    }
    let mut file = w.into_inner().map_err(|e| RollError::io(path, e.into_error()))?;

    let digest = digest::digest_reader(&mut file, DIGEST_LINE_LEN as u64).map_err(io)?;
    let line = format!("# {}", hex::encode(&digest, case));
    debug_assert_eq!(line.len(), DIGEST_LINE_LEN);
    file.seek(SeekFrom::Start(0)).map_err(io)?;
    file.write_all(line.as_bytes()).map_err(io)?;
    file.sync_all().map_err(io)?;
    let _ = FileExt::unlock(&file);
    Ok(digest)
}
