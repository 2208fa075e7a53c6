use rollcall_core::builder::{
    BuildOptions, CancelToken, Hashing, RollBuilder, SequencedRequest, UnreadablePolicy,
};
use rollcall_core::parser::parse_sequenced;
use rollcall_core::progress::Progress;
use rollcall_core::verify;
use rollcall_core::RollError;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

// A directory passed in as a selected file: its metadata is readable but
// its content is not, which holds even when the tests run as root.
fn batch_with_unreadable(root: &Path) -> Vec<PathBuf> {
    fs::write(root.join("ok.txt"), b"fine").unwrap();
    fs::create_dir(root.join("stuck")).unwrap();
    vec![root.join("ok.txt"), root.join("stuck")]
}

#[test]
fn unreadable_kept_without_digest() {
    let td = tempfile::tempdir().unwrap();
    let files = batch_with_unreadable(td.path());
    let opts = BuildOptions { on_unreadable: UnreadablePolicy::KeepSizeOnly, ..BuildOptions::default() };
    let set = RollBuilder::new(opts).collect(td.path(), &files, &[]).unwrap();

    assert_eq!(set.records.len(), 2);
    assert!(set.excluded.is_empty());
    assert_eq!(set.unhashed, vec![td.path().join("stuck")]);
    let stuck = set.records.iter().find(|r| r.relative_path() == "stuck").unwrap();
    assert!(stuck.digest().is_none());
    let ok = set.records.iter().find(|r| r.relative_path() == "ok.txt").unwrap();
    assert!(ok.digest().is_some());
}

#[test]
fn unreadable_excluded_by_default() {
    let td = tempfile::tempdir().unwrap();
    let files = batch_with_unreadable(td.path());
    let set = RollBuilder::new(BuildOptions::default()).collect(td.path(), &files, &[]).unwrap();

    assert_eq!(set.records.len(), 1);
    assert_eq!(set.records[0].relative_path(), "ok.txt");
    assert_eq!(set.excluded.len(), 1);
    assert_eq!(set.excluded[0].path, td.path().join("stuck"));
}

#[test]
fn unreadable_aborts_and_leaves_no_roll() {
    let td = tempfile::tempdir().unwrap();
    let files = batch_with_unreadable(td.path());
    let opts = BuildOptions { on_unreadable: UnreadablePolicy::Abort, ..BuildOptions::default() };
    let req = SequencedRequest { scope: "p", sequence: 1, retransmit_of: 0 };
    let err = RollBuilder::new(opts).build_sequenced(&req, td.path(), &files, td.path()).unwrap_err();
    assert!(matches!(err, RollError::Io { .. }), "{err:?}");
    assert!(!td.path().join("p-1.roll").exists());
}

#[test]
fn size_only_never_reads_content() {
    let td = tempfile::tempdir().unwrap();
    let files = batch_with_unreadable(td.path());
    let opts = BuildOptions { hashing: Hashing::SizeOnly, ..BuildOptions::default() };
    let set = RollBuilder::new(opts).collect(td.path(), &files, &[]).unwrap();
    assert_eq!(set.records.len(), 2);
    assert!(set.records.iter().all(|r| r.digest().is_none()));
    assert!(set.unhashed.is_empty());
}

#[test]
fn vanished_file_is_excluded() {
    let td = tempfile::tempdir().unwrap();
    fs::write(td.path().join("here"), b"x").unwrap();
    let files = vec![td.path().join("here"), td.path().join("gone")];
    let opts = BuildOptions { on_unreadable: UnreadablePolicy::KeepSizeOnly, ..BuildOptions::default() };
    let set = RollBuilder::new(opts).collect(td.path(), &files, &[]).unwrap();
    assert_eq!(set.records.len(), 1);
    assert_eq!(set.excluded.len(), 1);
}

#[test]
fn cancelled_build_removes_partial_roll() {
    let td = tempfile::tempdir().unwrap();
    fs::write(td.path().join("a"), b"a").unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();
    let opts = BuildOptions { cancel: cancel.clone(), ..BuildOptions::default() };
    let req = SequencedRequest { scope: "c", sequence: 1, retransmit_of: 0 };
    let err = RollBuilder::new(opts)
        .build_sequenced(&req, td.path(), &[td.path().join("a")], td.path())
        .unwrap_err();
    assert!(matches!(err, RollError::Cancelled));
    assert!(!td.path().join("c-1.roll").exists());
}

#[test]
fn sorted_output_does_not_depend_on_thread_count() {
    let td = tempfile::tempdir().unwrap();
    let mut files = Vec::new();
    for i in 0..40 {
        let p = td.path().join(format!("f{:02}", fastrand::u32(0..1000) + i * 1000));
        fs::write(&p, vec![i as u8; (i as usize) * 97]).unwrap();
        files.push(p);
    }
    fastrand::shuffle(&mut files);

    let run = |threads| {
        let opts = BuildOptions { sorted: true, threads: Some(threads), ..BuildOptions::default() };
        RollBuilder::new(opts).collect(td.path(), &files, &[]).unwrap().records
    };
    let one = run(1);
    let many = run(8);
    assert_eq!(one, many);
    assert!(one.windows(2).all(|w| w[0].relative_path() < w[1].relative_path()));
}

#[test]
fn progress_counts_every_file() {
    let td = tempfile::tempdir().unwrap();
    let mut files = Vec::new();
    for i in 0..5u8 {
        let p = td.path().join(format!("{i}.bin"));
        fs::write(&p, vec![i; 100]).unwrap();
        files.push(p);
    }
    let progress = Progress::new(false, "Hashing");
    let opts = BuildOptions { progress: Some(progress.clone()), ..BuildOptions::default() };
    RollBuilder::new(opts).collect(td.path(), &files, &[]).unwrap();
    assert_eq!(progress.files_total.load(Ordering::Relaxed), 5);
    assert_eq!(progress.files_done.load(Ordering::Relaxed), 5);
    assert_eq!(progress.bytes_done.load(Ordering::Relaxed), 500);
}

#[cfg(unix)]
#[test]
fn separator_in_file_name_is_not_rolled() {
    let td = tempfile::tempdir().unwrap();
    fs::write(td.path().join("fine"), b"1").unwrap();
    fs::write(td.path().join("pipe|name"), b"2").unwrap();
    let files = vec![td.path().join("fine"), td.path().join("pipe|name")];
    let set = RollBuilder::new(BuildOptions::default()).collect(td.path(), &files, &[]).unwrap();
    assert_eq!(set.records.len(), 1);
    assert_eq!(set.excluded.len(), 1);
    assert!(matches!(set.excluded[0].error, RollError::Build(_)));
}

#[test]
fn names_a_record_line_would_alter_are_not_rolled() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path();
    let names = ["#notes.txt", " lead.txt", "trail.txt ", "ok.txt", "sub/#inner.txt"];
    fs::create_dir(root.join("sub")).unwrap();
    for n in names {
        fs::write(root.join(n), n.as_bytes()).unwrap();
    }
    let files: Vec<PathBuf> = names.iter().map(|n| root.join(n)).collect();

    let opts = BuildOptions { sorted: true, ..BuildOptions::default() };
    let req = SequencedRequest { scope: "names", sequence: 1, retransmit_of: 0 };
    let built = RollBuilder::new(opts).build_sequenced(&req, root, &files, root).unwrap();
    let kept: Vec<&str> = built.roll.records.iter().map(|r| r.relative_path()).collect();
    assert_eq!(kept, ["ok.txt", "sub/#inner.txt"]);
    assert_eq!(built.excluded.len(), 3);
    assert!(built.excluded.iter().all(|x| matches!(x.error, RollError::Build(_))));

    let parsed = parse_sequenced(&built.path).unwrap();
    assert_eq!(parsed.records, built.roll.records);
    assert!(parsed.malformed.is_empty());

    let opts = BuildOptions { on_unreadable: UnreadablePolicy::Abort, ..BuildOptions::default() };
    let req = SequencedRequest { scope: "names", sequence: 2, retransmit_of: 0 };
    let err = RollBuilder::new(opts).build_sequenced(&req, root, &files, root).unwrap_err();
    assert!(matches!(err, RollError::Build(_)), "{err:?}");
    assert!(!root.join("names-2.roll").exists());
}

#[cfg(target_os = "linux")]
#[test]
fn non_utf8_name_is_not_rolled() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let td = tempfile::tempdir().unwrap();
    let root = td.path();
    let odd = root.join(OsStr::from_bytes(b"bad\xff.txt"));
    fs::write(&odd, b"odd").unwrap();
    fs::write(root.join("good.txt"), b"good").unwrap();
    let files = vec![odd.clone(), root.join("good.txt")];

    let req = SequencedRequest { scope: "utf", sequence: 1, retransmit_of: 0 };
    let built = RollBuilder::new(BuildOptions::default()).build_sequenced(&req, root, &files, root).unwrap();
    assert_eq!(built.roll.records.len(), 1);
    assert_eq!(built.roll.records[0].relative_path(), "good.txt");
    assert_eq!(built.excluded.len(), 1);
    assert_eq!(built.excluded[0].path, odd);

    let roll = parse_sequenced(&built.path).unwrap();
    assert!(verify::verify(&roll, root).is_clean());
}

#[test]
fn files_outside_root_are_refused() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path().join("root");
    fs::create_dir(&root).unwrap();
    fs::write(td.path().join("outside"), b"x").unwrap();
    let set = RollBuilder::new(BuildOptions::default())
        .collect(&root, &[td.path().join("outside")], &[])
        .unwrap();
    assert!(set.records.is_empty());
    assert_eq!(set.excluded.len(), 1);
}
