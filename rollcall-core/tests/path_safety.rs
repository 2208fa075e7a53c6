use rollcall_core::builder::{BuildOptions, RollBuilder, SequencedRequest};
use rollcall_core::parser::parse_sequenced;
use rollcall_core::path_safety::{check_relative, validate_path, PathPolicy};
use rollcall_core::verify::{self, ProblemKind, VerifyOptions};
use rollcall_core::RollError;
use std::fs;
use std::path::Path;

#[cfg(target_family = "unix")]
fn symlink_dir<P: AsRef<Path>, Q: AsRef<Path>>(src: P, dst: Q) -> std::io::Result<()> {
    std::os::unix::fs::symlink(src, dst)
}

#[test]
fn lexical_checks() {
    assert!(check_relative(Path::new("a/b.txt")).is_ok());
    assert!(check_relative(Path::new("./a")).is_ok());
    for bad in ["../a", "a/../../b", "/abs"] {
        assert!(
            matches!(check_relative(Path::new(bad)), Err(RollError::UnsafePath { .. })),
            "accepted {bad}"
        );
    }
}

#[test]
fn missing_path_is_returned_unresolved() {
    let tmp = tempfile::tempdir().unwrap();
    for follow_symlinks in [false, true] {
        let p = validate_path(tmp.path(), Path::new("nope/x"), PathPolicy { follow_symlinks }).unwrap();
        assert_eq!(p, tmp.path().join("nope/x"));
    }
}

#[cfg(target_family = "unix")]
#[test]
fn symlink_rejected_by_default_allowed_when_contained() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("root");
    let out = tmp.path().join("out");
    fs::create_dir_all(root.join("target")).unwrap();
    fs::create_dir_all(&out).unwrap();
    fs::write(root.join("target/file.txt"), b"hello\n").unwrap();

    // Roll the file under target/, then make it reachable only through safe/
    let req = SequencedRequest { scope: "links", sequence: 1, retransmit_of: 0 };
    let built = RollBuilder::new(BuildOptions::default())
        .build_sequenced(&req, &root, &[root.join("target/file.txt")], &out)
        .unwrap();
    let roll = parse_sequenced(&built.path).unwrap();
    let moved = root.join("real");
    fs::rename(root.join("target"), &moved).unwrap();
    symlink_dir(&moved, root.join("target")).unwrap();

    let s = verify::verify(&roll, &root);
    assert_eq!(s.missing, 1);
    assert_eq!(s.problems[0].kind, ProblemKind::UnsafePath);
    assert!(s.problems[0].detail.contains("symlink"), "{}", s.problems[0].detail);

    let follow = VerifyOptions { path_policy: PathPolicy { follow_symlinks: true }, ..VerifyOptions::default() };
    let s = verify::verify_with(&roll, &root, &follow);
    assert!(s.is_clean(), "{s:?}");
    assert_eq!(s.good_hashed, 1);
}

#[cfg(target_family = "unix")]
#[test]
fn symlink_escape_blocked_even_when_following() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("root");
    fs::create_dir_all(&root).unwrap();
    fs::write(tmp.path().join("outside.txt"), b"outside\n").unwrap();
    symlink_dir(tmp.path(), root.join("evil")).unwrap();

    let policy = PathPolicy { follow_symlinks: true };
    let err = validate_path(&root, Path::new("evil/outside.txt"), policy).unwrap_err();
    assert!(err.to_string().contains("escapes root"), "{err}");
}
