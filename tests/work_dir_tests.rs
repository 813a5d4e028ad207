//! Per-test working directories.
//!
//! Kept apart from the other engine tests because `chdir` moves the whole
//! process.

use std::cell::RefCell;
use std::path::PathBuf;
use zest::report::Silent;
use zest::{AllowList, Engine, Failure, Test, TestResult, Zest, ZestConfig};

fn run(config: &ZestConfig, tests: Vec<Test<'_>>) {
    let mut engine = Engine::new(config);
    engine.run(tests, &Silent, &AllowList::All).unwrap();
}

#[test]
fn should_remove_dir_of_passing_test_and_keep_failing_one() {
    let root = tempfile::tempdir().unwrap();
    let passed = RefCell::new(PathBuf::new());
    let failed = RefCell::new(PathBuf::new());

    let config = ZestConfig::new().tmp_root(root.path());
    run(
        &config,
        vec![
            Test::new("it_passes", |z: &mut Zest<'_>| {
                assert!(z.work_dir().starts_with(root.path()));
                *passed.borrow_mut() = z.work_dir().to_path_buf();
            }),
            Test::new("it_fails", |z: &mut Zest<'_>| -> TestResult {
                std::fs::write(z.work_dir().join("evidence.txt"), "left behind")?;
                *failed.borrow_mut() = z.work_dir().to_path_buf();
                Err(Failure::msg("broken"))
            }),
        ],
    );

    let passed = passed.into_inner();
    let failed = failed.into_inner();
    assert_ne!(passed, failed);
    assert!(!passed.exists());
    assert!(failed.join("evidence.txt").is_file());
}

#[test]
fn should_share_common_tmp_and_never_remove_it() {
    let root = tempfile::tempdir().unwrap();
    let shared = root.path().join("shared");
    let seen = RefCell::new(Vec::new());

    let config = ZestConfig::new().common_tmp(&shared);
    run(
        &config,
        vec![Test::new("outer", |z: &mut Zest<'_>| -> TestResult {
            seen.borrow_mut().push(z.work_dir().to_path_buf());
            let mut s = z.scope();
            s.test("it_writes", |z: &mut Zest<'_>| -> TestResult {
                seen.borrow_mut().push(z.work_dir().to_path_buf());
                std::fs::write(z.work_dir().join("note.txt"), "shared")?;
                Ok(())
            });
            s.run()?;
            Ok(())
        })],
    );

    let seen = seen.into_inner();
    assert_eq!(seen, [shared.clone(), shared.clone()]);
    assert!(shared.join("note.txt").is_file());
}

#[test]
fn should_enter_work_dir_and_restore_cwd() {
    let root = tempfile::tempdir().unwrap();
    let before = std::env::current_dir().unwrap();
    let inside = RefCell::new(None);

    let config = ZestConfig::new().tmp_root(root.path()).chdir(true);
    run(
        &config,
        vec![Test::new("it_moves", |z: &mut Zest<'_>| {
            let cwd = std::env::current_dir().unwrap().canonicalize().unwrap();
            *inside.borrow_mut() = Some((cwd, z.work_dir().canonicalize().unwrap()));
        })],
    );

    let (cwd, work_dir) = inside.into_inner().unwrap();
    assert_eq!(cwd, work_dir);
    assert_eq!(std::env::current_dir().unwrap(), before);
}
