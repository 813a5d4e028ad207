//! End-to-end behaviour of nested runs.

use std::cell::{Cell, RefCell};
use std::io::Write;
use zest::capture::LogSink;
use zest::mock::Seam;
use zest::raises::raises;
use zest::report::{EventStreamReporter, Silent};
use zest::runner::expand_allow_list;
use zest::{
    call, AllowList, Engine, Failure, Reporter, Test, TestResult, Zest, ZestConfig, ZestError,
    ZestResult,
};

#[derive(Default)]
struct Recorder {
    starts: RefCell<Vec<ZestResult>>,
    stops: RefCell<Vec<ZestResult>>,
}

impl Recorder {
    fn stop(&self, full_name: &str) -> ZestResult {
        self.stops
            .borrow()
            .iter()
            .find(|r| r.full_name == full_name)
            .cloned()
            .unwrap_or_else(|| panic!("no stop record for {}", full_name))
    }
}

impl Reporter for Recorder {
    fn test_start(&self, record: &ZestResult) {
        self.starts.borrow_mut().push(record.clone());
    }

    fn test_stop(&self, record: &ZestResult) {
        self.stops.borrow_mut().push(record.clone());
    }
}

fn ten_children(z: &mut Zest<'_>) -> TestResult {
    let mut s = z.scope();
    for i in 0..10 {
        s.test(&format!("it_{}", i), |_z: &mut Zest<'_>| {});
    }
    s.run()?;
    Ok(())
}

fn order_of(config: &ZestConfig) -> Vec<String> {
    let mut engine = Engine::new(config);
    engine
        .run(vec![Test::new("zest_order", ten_children)], &Silent, &AllowList::All)
        .unwrap();
    engine.call_log().to_vec()
}

#[test]
fn should_shuffle_children_between_runs() {
    let orders: Vec<Vec<String>> = (0..5).map(|_| order_of(&ZestConfig::new())).collect();
    assert!(orders.iter().any(|o| *o != orders[0]));
    for order in &orders {
        assert_eq!(order.len(), 11);
        assert_eq!(order[0], "zest_order");
    }
}

#[test]
fn should_keep_declaration_order_when_shuffle_disabled() {
    let config = ZestConfig::new().disable_shuffle(true);
    let expected: Vec<String> = std::iter::once("zest_order".to_string())
        .chain((0..10).map(|i| format!("zest_order.it_{}", i)))
        .collect();
    for _ in 0..5 {
        assert_eq!(order_of(&config), expected);
    }
}

#[test]
fn should_repeat_order_with_same_seed() {
    let config = ZestConfig::new().seed(42);
    assert_eq!(order_of(&config), order_of(&config));
}

#[test]
fn should_report_call_stack_at_every_depth() {
    let recorder = Recorder::default();
    let mut engine = Engine::new(&ZestConfig::new());
    let tests = vec![Test::new("outer", |z: &mut Zest<'_>| -> TestResult {
        assert_eq!(z.call_depth(), 1);
        let mut s = z.scope();
        s.test("middle", |z: &mut Zest<'_>| -> TestResult {
            assert_eq!(z.call_stack(), ["outer", "middle"]);
            let mut s = z.scope();
            s.test("inner", |z: &mut Zest<'_>| {
                assert_eq!(z.current_test_name(), Some("inner"));
                assert_eq!(z.current_test_full_name(), "outer.middle.inner");
                assert_eq!(z.call_depth(), z.mock_depth());
            });
            s.run()?;
            Ok(())
        });
        s.run()?;
        Ok(())
    })];
    engine.run(tests, &recorder, &AllowList::All).unwrap();

    let starts = recorder.starts.borrow();
    let depths: Vec<usize> = starts.iter().map(|r| r.call_stack.len()).collect();
    assert_eq!(depths, [1, 2, 3]);
    assert!(starts.iter().all(|r| r.is_running && r.is_starting));

    // inner tests stop first
    let stops = recorder.stops.borrow();
    let names: Vec<&str> = stops.iter().map(|r| r.full_name.as_str()).collect();
    assert_eq!(names, ["outer.middle.inner", "outer.middle", "outer"]);
    assert!(stops.iter().all(|r| !r.is_running && r.error.is_none()));
    assert_eq!(engine.call_depth(), 0);
}

#[test]
fn should_unwind_stacks_after_nested_panic() {
    let recorder = Recorder::default();
    let seam = Seam::new("lookup", ["key"], |_c| Ok(0));
    let mut engine = Engine::new(&ZestConfig::new().capture(true));
    let tests = vec![Test::new("outer", |z: &mut Zest<'_>| -> TestResult {
        let mut s = z.scope();
        s.test::<()>("boom", |z: &mut Zest<'_>| {
            let m = z.stack_mock(&seam, false);
            m.returns(7);
            panic!("deep failure");
        });
        s.test("after_boom", |z: &mut Zest<'_>| {
            assert_eq!(z.call_depth(), 2);
            assert!(!seam.is_mocked());
        });
        s.run()?;
        Ok(())
    })];
    engine.run(tests, &recorder, &AllowList::All).unwrap();

    let boom = recorder.stop("outer.boom");
    let error = boom.error.expect("panic recorded");
    assert_eq!(error.kind, "Panic");
    assert!(error.message.contains("deep failure"));
    assert!(recorder.stop("outer.after_boom").error.is_none());
    assert!(!seam.is_mocked());
    assert_eq!(engine.call_depth(), 0);
    assert_eq!(engine.mock_depth(), 0);
}

#[test]
fn should_reject_begin_hook_and_suggest_before() {
    let mut engine = Engine::new(&ZestConfig::new());
    let trapped_message = RefCell::new(String::new());
    let tests = vec![Test::new("zest_begin", |z: &mut Zest<'_>| -> TestResult {
        let trapped = raises::<ZestError>().in_args("_before").run(|| {
            let mut s = z.scope();
            s.test("_begin", |_z: &mut Zest<'_>| {});
            s.test("it_never_runs", |_z: &mut Zest<'_>| {});
            s.run()
        })?;
        *trapped_message.borrow_mut() = trapped.to_string();
        Ok(())
    })];
    engine.run(tests, &Silent, &AllowList::All).unwrap();

    assert!(trapped_message.borrow().contains("Maybe you meant _before?"));
    assert_eq!(engine.call_log(), ["zest_begin"]);
}

#[test]
fn should_run_before_for_each_test_once() {
    let befores = Cell::new(0);
    let runs = RefCell::new(Vec::new());
    let mut engine = Engine::new(&ZestConfig::new());
    let tests = vec![Test::new("zest_counter", |z: &mut Zest<'_>| -> TestResult {
        let mut s = z.scope();
        s.test("_before", |_z: &mut Zest<'_>| befores.set(befores.get() + 1));
        s.test("it_one", |_z: &mut Zest<'_>| runs.borrow_mut().push("one"));
        s.test("it_two", |_z: &mut Zest<'_>| runs.borrow_mut().push("two"));
        s.run()?;
        Ok(())
    })];
    engine.run(tests, &Silent, &AllowList::All).unwrap();

    assert_eq!(befores.get(), 2);
    let mut runs = runs.into_inner();
    runs.sort_unstable();
    assert_eq!(runs, ["one", "two"]);
}

fn nested_tree(z: &mut Zest<'_>) -> TestResult {
    let mut s = z.scope();
    s.test("level_one", |z: &mut Zest<'_>| -> TestResult {
        let mut s = z.scope();
        s.test("level_two", |z: &mut Zest<'_>| -> TestResult {
            let mut s = z.scope();
            s.test("leaf", |_z: &mut Zest<'_>| {});
            s.run()?;
            Ok(())
        });
        s.test("sibling_two", |_z: &mut Zest<'_>| {});
        s.run()?;
        Ok(())
    });
    s.test("sibling_one", |_z: &mut Zest<'_>| {});
    s.run()?;
    Ok(())
}

#[test]
fn should_run_only_allowed_branch_of_nested_tree() {
    let allow = expand_allow_list(&ZestConfig::new().allow_to_run("outer.level_one.level_two"));
    let mut engine = Engine::new(&ZestConfig::new().disable_shuffle(true));
    engine
        .run(vec![Test::new("outer", nested_tree)], &Silent, &allow)
        .unwrap();

    assert_eq!(
        engine.call_log(),
        [
            "outer",
            "outer.level_one",
            "outer.level_one.level_two",
            "outer.level_one.level_two.leaf"
        ]
    );
}

#[test]
fn should_apply_scoped_allow_list() {
    let mut engine = Engine::new(&ZestConfig::new().disable_shuffle(true));
    let tests = vec![Test::new("outer", |z: &mut Zest<'_>| -> TestResult {
        let mut s = z.scope();
        s.allow_to_run(AllowList::from_names(["outer.kept"]));
        s.test("kept", |_z: &mut Zest<'_>| {});
        s.test("dropped", |_z: &mut Zest<'_>| {});
        s.run()?;
        Ok(())
    })];
    engine.run(tests, &Silent, &AllowList::All).unwrap();
    assert_eq!(engine.call_log(), ["outer", "outer.kept"]);
}

#[test]
fn should_record_skip_from_body() {
    let recorder = Recorder::default();
    let mut engine = Engine::new(&ZestConfig::new());
    let tests = vec![Test::new("zest_skip", |_z: &mut Zest<'_>| -> TestResult {
        Err(Failure::skip("not on this platform"))
    })];
    engine.run(tests, &recorder, &AllowList::All).unwrap();

    let record = recorder.stop("zest_skip");
    assert_eq!(record.skip.as_deref(), Some("not on this platform"));
    assert!(!record.is_error());
}

#[test]
fn should_capture_stdout_and_logs_per_test() {
    let recorder = Recorder::default();
    let mut engine = Engine::new(&ZestConfig::new().capture(true));
    let subscriber = tracing_subscriber::fmt()
        .with_writer(LogSink)
        .with_ansi(false)
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let tests = vec![Test::new("outer", |z: &mut Zest<'_>| -> TestResult {
            writeln!(z.stdout(), "outer line")?;
            let mut s = z.scope();
            s.test("inner", |z: &mut Zest<'_>| -> TestResult {
                writeln!(z.stdout(), "inner line")?;
                writeln!(z.stderr(), "inner warning")?;
                tracing::info!("inner log line");
                Ok(())
            });
            s.run()?;
            Ok(())
        })];
        engine.run(tests, &recorder, &AllowList::All).unwrap();
    });

    let inner = recorder.stop("outer.inner");
    assert_eq!(inner.stdout.as_deref(), Some("inner line\n"));
    assert_eq!(inner.stderr.as_deref(), Some("inner warning\n"));
    assert!(inner.logs.as_deref().unwrap_or_default().contains("inner log line"));

    let outer = recorder.stop("outer");
    let outer_stdout = outer.stdout.unwrap_or_default();
    assert!(outer_stdout.contains("outer line"));
    assert!(!outer_stdout.contains("inner line"));
}

#[test]
fn should_override_callbacks_for_scope() {
    let outer_reporter = Recorder::default();
    let scoped_stops = RefCell::new(Vec::new());
    let mut engine = Engine::new(&ZestConfig::new());
    let tests = vec![Test::new("outer", |z: &mut Zest<'_>| -> TestResult {
        let mut s = z.scope();
        s.on_test_stop(|r: &ZestResult| scoped_stops.borrow_mut().push(r.full_name.clone()));
        s.test("child", |_z: &mut Zest<'_>| {});
        s.run()?;
        Ok(())
    })];
    engine.run(tests, &outer_reporter, &AllowList::All).unwrap();

    assert_eq!(scoped_stops.into_inner(), ["outer.child"]);
    let reported: Vec<String> = outer_reporter
        .stops
        .borrow()
        .iter()
        .map(|r| r.full_name.clone())
        .collect();
    assert_eq!(reported, ["outer"]);
    // start callback was not overridden
    assert_eq!(outer_reporter.starts.borrow().len(), 2);
}

#[test]
fn should_expose_test_error_to_after_hook() {
    let seen = RefCell::new(Vec::new());
    let mut engine = Engine::new(&ZestConfig::new().disable_shuffle(true));
    let tests = vec![Test::new("outer", |z: &mut Zest<'_>| -> TestResult {
        let mut s = z.scope();
        s.after(|z: &mut Zest<'_>| {
            let error = z.current_test_error().map(|e| e.message.clone());
            seen.borrow_mut().push(error);
        });
        s.test("it_fails", |_z: &mut Zest<'_>| -> TestResult { Err(Failure::msg("broken")) });
        s.test("it_passes", |_z: &mut Zest<'_>| {});
        s.run()?;
        Ok(())
    })];
    engine.run(tests, &Silent, &AllowList::All).unwrap();

    assert_eq!(seen.into_inner(), [Some("broken".to_string()), None]);
}

#[test]
fn should_warn_when_before_hook_fails() {
    let recorder = Recorder::default();
    let mut engine = Engine::new(&ZestConfig::new());
    let tests = vec![Test::new("outer", |z: &mut Zest<'_>| -> TestResult {
        let mut s = z.scope();
        s.before(|_z: &mut Zest<'_>| -> TestResult { Err(Failure::msg("setup broke")) });
        s.test("child", |_z: &mut Zest<'_>| {});
        s.run()?;
        Ok(())
    })];
    engine.run(tests, &recorder, &AllowList::All).unwrap();

    assert_eq!(engine.warnings().len(), 1);
    assert!(engine.warnings()[0].contains("'_before()' in test 'outer.child'"));
    // the test itself still runs
    assert!(recorder.stop("outer.child").error.is_none());
}

#[test]
fn should_warn_and_still_run_when_before_hook_skips() {
    let ran = Cell::new(false);
    let recorder = Recorder::default();
    let mut engine = Engine::new(&ZestConfig::new());
    let tests = vec![Test::new("outer", |z: &mut Zest<'_>| -> TestResult {
        let mut s = z.scope();
        s.before(|_z: &mut Zest<'_>| -> TestResult { Err(Failure::Skip("not ready".into())) });
        s.test("child", |_z: &mut Zest<'_>| ran.set(true));
        s.run()?;
        Ok(())
    })];
    engine.run(tests, &recorder, &AllowList::All).unwrap();

    assert!(ran.get());
    assert_eq!(engine.warnings().len(), 1);
    assert!(engine.warnings()[0].contains("'outer.child' asked to skip (not ready)"));
    assert!(recorder.stop("outer.child").skip.is_none());
}

#[test]
fn should_restore_mocks_between_siblings() {
    let seam = Seam::new("lookup", ["key", "default"], |_c| Ok(-1i64));
    let mut engine = Engine::new(&ZestConfig::new().disable_shuffle(true));
    let tests = vec![Test::new("outer", |z: &mut Zest<'_>| -> TestResult {
        let mut s = z.scope();
        s.test("a_mocks", |z: &mut Zest<'_>| -> anyhow::Result<()> {
            let m = z.stack_mock(&seam, false);
            m.returns(5);
            assert_eq!(seam.call(call!("k"; default = 3))?, 5);
            let normalized = m.normalized_calls()?;
            assert_eq!(normalized[0]["key"], "k");
            assert_eq!(normalized[0]["default"], 3);
            Ok(())
        });
        s.test("b_sees_real", |_z: &mut Zest<'_>| -> anyhow::Result<()> {
            assert_eq!(seam.call(call!("k"))?, -1);
            Ok(())
        });
        s.run()?;
        Ok(())
    })];
    let recorder = Recorder::default();
    engine.run(tests, &recorder, &AllowList::All).unwrap();

    assert!(recorder.stop("outer.a_mocks").error.is_none());
    assert!(recorder.stop("outer.b_sees_real").error.is_none());
}

#[test]
fn should_fail_test_when_raises_finds_nothing() {
    let recorder = Recorder::default();
    let mut engine = Engine::new(&ZestConfig::new());
    let tests = vec![Test::new("zest_raises", |_z: &mut Zest<'_>| -> TestResult {
        raises::<ZestError>().run(|| Ok::<(), ZestError>(()))?;
        Ok(())
    })];
    engine.run(tests, &recorder, &AllowList::All).unwrap();

    let error = recorder.stop("zest_raises").error.expect("raises failure recorded");
    assert_eq!(error.message, "expected ZestError but nothing was raised.");
}

#[test]
fn should_write_event_files_and_find_failures() {
    let dir = tempfile::tempdir().unwrap();
    let reporter = EventStreamReporter::new(dir.path());
    let mut engine = Engine::new(&ZestConfig::new());
    let tests = vec![Test::new("zest_events", |z: &mut Zest<'_>| -> TestResult {
        let mut s = z.scope();
        s.test("it_passes", |_z: &mut Zest<'_>| {});
        s.test("it_fails", |_z: &mut Zest<'_>| -> TestResult { Err(Failure::msg("nope")) });
        s.run()?;
        Ok(())
    })];
    engine.run(tests, &reporter, &AllowList::All).unwrap();

    let events = std::fs::read_to_string(dir.path().join("zest_events.evt")).unwrap();
    let records: Vec<ZestResult> = events.lines().map(|l| ZestResult::loads(l).unwrap()).collect();
    // a start and a stop per test
    assert_eq!(records.len(), 6);
    assert!(records[0].is_starting);

    let failed = zest::load_previous_failures(dir.path()).unwrap();
    assert_eq!(failed, ["zest_events.it_fails"]);
}
