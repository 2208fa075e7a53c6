use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use rollcall_core::builder::{BuildOptions, Hashing, RollBuilder, StandaloneRequest, UnreadablePolicy};
use rollcall_core::parser;
use rollcall_core::path_safety::PathPolicy;
use rollcall_core::progress::Progress;
use rollcall_core::roll::DEFAULT_PREFIX;
use rollcall_core::select::{select_files, Selector};
use rollcall_core::transfer::{self, ReceiveRequest, TransferMode, TransferRequest};
use rollcall_core::verify::{self, Summary, VerifyOptions};

#[derive(Parser)]
#[command(name = "rollcall", version, about = "Self-verifying file rolls and wormhole transfers")]
struct Cli {
    /// Debug logging (overridden by ROLLCALL_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Create the roll file for a folder
    Generate {
        /// The folder containing files to examine, and where the roll file is created
        #[arg(short, long, default_value = ".")]
        root: PathBuf,
        /// Do not include subdirectories
        #[arg(long)]
        no_recurse: bool,
        /// The roll file is named <prefix><digest>.log
        #[arg(long, env = "ROLLCALL_PREFIX", default_value = DEFAULT_PREFIX)]
        manifest_prefix: String,
        /// Record presence and size only, no hashes
        #[arg(short, long)]
        quick: bool,
        /// Report processing times in the roll and on the console
        #[arg(long)]
        with_stats: bool,
        /// Order records by path (reproducible rolls)
        #[arg(long, alias = "for-testing")]
        sorted: bool,
        /// Leave unreadable files out instead of listing them without a hash
        #[arg(long)]
        strict: bool,
        #[arg(long)]
        progress: bool,
        /// Hashing threads (default: available parallelism)
        #[arg(long)]
        threads: Option<usize>,
    },
    /// Compare the newest roll file with the files present
    Check {
        #[arg(short, long, default_value = ".")]
        root: PathBuf,
        #[arg(long, env = "ROLLCALL_PREFIX", default_value = DEFAULT_PREFIX)]
        manifest_prefix: String,
        /// Check a specific roll file instead of the newest one
        #[arg(long)]
        roll: Option<PathBuf>,
        /// Check presence and size only
        #[arg(short, long)]
        quick: bool,
        #[arg(long)]
        with_stats: bool,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Build a sequenced roll and hand the batch to the wormhole
    Send {
        /// The folder containing files to transfer
        #[arg(short = 'r', long)]
        source_root: PathBuf,
        /// File(s) to transfer; wildcards accepted, relative to source-root
        #[arg(long)]
        file: String,
        #[arg(long)]
        exclude: Vec<String>,
        /// Include files in subdirectories
        #[arg(long)]
        recurse: bool,
        /// Move instead of copy
        #[arg(long)]
        delete_originals: bool,
        /// Scope identifier for a sequence of transmissions
        #[arg(long)]
        scope: String,
        /// Transmit number within the scope. Never reused; 0 means no ordering
        #[arg(long)]
        transmit_number: u64,
        /// Original transmit number this transfer resends (0 = not a resend)
        #[arg(long, default_value_t = 0)]
        resend: u64,
        /// Roll of the original transmission; the resend must match it
        #[arg(long)]
        original_roll: Option<PathBuf>,
        /// The folder which is the entry to the wormhole
        #[arg(long)]
        wormhole_entry: PathBuf,
        /// Subdirectory under the wormhole entry, created if needed
        #[arg(long)]
        dest_subdir: Option<PathBuf>,
        #[arg(long)]
        sorted: bool,
        #[arg(long)]
        with_stats: bool,
    },
    /// Verify a delivered sequenced roll against the files next to it
    Receive {
        roll: PathBuf,
        /// Where the files landed (default: the roll's folder)
        #[arg(long)]
        root: Option<PathBuf>,
        /// Roll of the original transmission, for resends
        #[arg(long)]
        original_roll: Option<PathBuf>,
        #[arg(short, long)]
        quick: bool,
        #[arg(long)]
        follow_symlinks: bool,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match cli.cmd {
        Cmd::Generate {
            root, no_recurse, manifest_prefix, quick, with_stats, sorted, strict, progress, threads,
        } => {
            let opts = BuildOptions {
                sorted,
                hashing: if quick { Hashing::SizeOnly } else { Hashing::Full },
                on_unreadable: if strict {
                    UnreadablePolicy::Exclude
                } else {
                    UnreadablePolicy::KeepSizeOnly
                },
                threads,
                progress: Some(Progress::new(progress, "Hashing")),
                ..BuildOptions::default()
            };
            let req = StandaloneRequest { prefix: &manifest_prefix, stats: with_stats };
            generate(&root, !no_recurse, &req, opts)
        }
        Cmd::Check { root, manifest_prefix, roll, quick, with_stats, json } => {
            check(&root, &manifest_prefix, roll, quick, with_stats, json)
        }
        Cmd::Send {
            source_root, file, exclude, recurse, delete_originals, scope, transmit_number, resend,
            original_roll, wormhole_entry, dest_subdir, sorted, with_stats,
        } => {
            let req = TransferRequest {
                source_root,
                selector: Selector { pattern: file, recurse, exclude },
                scope,
                sequence: transmit_number,
                retransmit_of: resend,
                original_roll,
                wormhole_entry,
                dest_subdir,
                mode: if delete_originals { TransferMode::Move } else { TransferMode::Copy },
            };
            send(&req, sorted, with_stats)
        }
        Cmd::Receive { roll, root, original_roll, quick, follow_symlinks, json } => {
            let req = ReceiveRequest {
                roll,
                root,
                original_roll,
                verify: VerifyOptions { check_hashes: !quick, path_policy: PathPolicy { follow_symlinks } },
            };
            receive(&req, json)
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("ROLLCALL_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn display_rel(root: &Path, p: &Path) -> String {
    p.strip_prefix(root).unwrap_or(p).display().to_string()
}

fn generate(root: &Path, recurse: bool, req: &StandaloneRequest<'_>, opts: BuildOptions) -> Result<ExitCode> {
    let files = select_files(root, &Selector::all(recurse))
        .with_context(|| format!("list files under {}", root.display()))?;
    let built = RollBuilder::new(opts)
        .build_standalone(req, root, &files)
        .context("generate roll")?;
    println!("Roll generated: {}", display_rel(root, &built.path));
    if !built.excluded.is_empty() {
        eprintln!("{} file(s) left out of the roll", built.excluded.len());
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn check(
    root: &Path,
    prefix: &str,
    roll: Option<PathBuf>,
    quick: bool,
    with_stats: bool,
    json: bool,
) -> Result<ExitCode> {
    let timer = Instant::now();
    let roll_path = match roll {
        Some(p) => p,
        None => parser::locate_latest(root, prefix)?,
    };
    let roll = parser::parse_any(&roll_path)
        .with_context(|| format!("roll file is corrupt: {}", roll_path.display()))?;
    if !json {
        println!("Checking Roll : {}", display_rel(root, &roll_path));
    }
    let opts = VerifyOptions { check_hashes: !quick, ..VerifyOptions::default() };
    let summary = verify::verify_with(&roll, root, &opts);
    if with_stats {
        eprintln!("Check completed in {:?}", timer.elapsed());
    }
    print_summary(&summary, json)?;
    Ok(exit_for(&summary))
}

fn send(req: &TransferRequest, sorted: bool, with_stats: bool) -> Result<ExitCode> {
    let opts = BuildOptions { sorted, on_unreadable: UnreadablePolicy::Exclude, ..BuildOptions::default() };
    let report = transfer::transfer(req, opts).context("transfer")?;
    println!("Created roll: {}", report.roll.path.display());
    println!("Transferred {} file(s) to {}", report.transferred, report.destination.display());
    for f in &report.failures {
        eprintln!("  failed: {} ({})", f.path.display(), f.error);
    }
    for x in &report.roll.excluded {
        eprintln!("  not sent: {} ({})", x.path.display(), x.error);
    }
    if with_stats {
        println!("Roll generated and files copied in {:?}", report.elapsed);
    }
    Ok(if report.is_complete() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn receive(req: &ReceiveRequest, json: bool) -> Result<ExitCode> {
    let summary = transfer::receive(req).with_context(|| format!("reject roll {}", req.roll.display()))?;
    print_summary(&summary, json)?;
    Ok(exit_for(&summary))
}

fn print_summary(s: &Summary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(s)?);
        return Ok(());
    }
    println!("Summary files: {}", s.total);
    println!("        good : hashed={} unhashed={}", s.good_hashed, s.good_unhashed);
    if s.failed() > 0 {
        println!("        bad  : missing={} badLength={} badHash={}", s.missing, s.bad_length, s.bad_hash);
    }
    if s.malformed_lines > 0 {
        println!("        ugly : {} strange lines in roll file", s.malformed_lines);
    }
    Ok(())
}

fn exit_for(s: &Summary) -> ExitCode {
    if s.failed() == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}
