// SPDX-License-Identifier: MIT

use super::*;
use crate::meth::Method;
use crate::runq::RunHandler;
use cw_core::Invocation as Inv;

const NOW: i64 = 1_700_000_000;

struct NullHandler;

impl RunHandler for NullHandler {
    fn start_of_run(&mut self, _inv: &Inv) -> i32 {
        0
    }
    fn command(&mut self, _inv: &Inv) -> i32 {
        0
    }
    fn is_running(&self, _inv: &Inv) -> bool {
        false
    }
    fn end_of_run(&mut self, _inv: &Inv) -> i32 {
        0
    }
}

fn registry() -> Registry {
    let mut reg = Registry::new();
    reg.register(Method::none("exec", "stub")).unwrap();
    reg.register(Method::none("sh", "stub")).unwrap();
    reg
}

fn spec(key: &str) -> JobSpec {
    JobSpec {
        start: 5,
        interval: 5,
        phase: 0,
        count: 1,
        key: key.to_string(),
        origin: "test".to_string(),
        result_url: "stdout:".to_string(),
        error_url: "stderr:".to_string(),
        keep: 100,
        method: "exec".to_string(),
        command: "echo hello".to_string(),
    }
}

fn cx() -> cw_route::ExpandContext {
    cw_route::ExpandContext {
        host: "host1".into(),
        job: String::new(),
        interval: 0,
        lib_dir: "/lib".into(),
        var_dir: "/var".into(),
    }
}

#[test]
fn add_requires_a_known_method() {
    let mut jobs = JobTable::new(NOW);
    let mut runq = RunQueue::new(NOW);
    let reg = registry();

    let mut bad = spec("j1");
    bad.method = String::new();
    assert!(matches!(
        jobs.add(&mut runq, &reg, NOW, bad),
        Err(JobError::NoMethod(_))
    ));

    let mut unknown = spec("j2");
    unknown.method = "mystery".to_string();
    assert!(matches!(
        jobs.add(&mut runq, &reg, NOW, unknown),
        Err(JobError::UnknownMethod { .. })
    ));
    assert!(jobs.is_empty());
}

#[test]
fn add_schedules_and_rows_track_work_ids() {
    let mut jobs = JobTable::new(NOW);
    let mut runq = RunQueue::new(NOW);
    let reg = registry();

    let JobAdded::Scheduled(id) = jobs.add(&mut runq, &reg, NOW, spec("j1")).unwrap() else {
        panic!("expected scheduled");
    };
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs.rows()[0].work, id);
    assert_eq!(jobs.rows()[0].invoke.key, "j1");

    let row = jobs.remove_row(id).unwrap();
    assert_eq!(row.origin, "test");
    assert!(jobs.is_empty());
    assert!(jobs.remove_row(id).is_none());
}

#[test]
fn exhausted_schedule_leaves_no_row() {
    let mut jobs = JobTable::new(NOW);
    let mut runq = RunQueue::new(NOW);
    let reg = registry();

    let mut past = spec("gone");
    past.start = -1000;
    past.count = 2;
    let added = jobs.add(&mut runq, &reg, NOW, past).unwrap();
    assert_eq!(added, JobAdded::Completed);
    assert!(jobs.is_empty());
}

fn load(text: &str) -> (JobTable, RunQueue, usize) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.jobs");
    std::fs::write(&path, text).unwrap();
    let router = cw_route::Router::new(dir.path().to_path_buf(), "host1");

    let mut jobs = JobTable::new(NOW);
    let mut runq = RunQueue::new(NOW);
    let reg = registry();
    let n = jobs
        .load_route(
            &mut runq,
            &reg,
            &router,
            &cx(),
            &format!("file:{}", path.display()),
            NOW,
        )
        .unwrap();
    (jobs, runq, n)
}

#[test]
fn load_route_accepts_well_formed_rows() {
    let (jobs, runq, n) = load(
        "job 1\n\
         0 60 0 0 cpu internal stdout: stderr: 100 exec uptime -p\n\
         0 300 1 0 disk internal stdout: stderr: 50 sh df -h /\n",
    );
    assert_eq!(n, 2);
    assert_eq!(jobs.len(), 2);
    assert_eq!(runq.scheduled(), 2);
    // The command keeps its embedded whitespace.
    assert_eq!(jobs.rows()[0].invoke.command, "uptime -p");
    assert_eq!(jobs.rows()[1].invoke.command, "df -h /");
}

#[test]
fn load_route_skips_bad_rows_and_continues() {
    let (jobs, _runq, n) = load(
        "job 1\n\
         0 sixty 0 0 bad1 internal stdout: stderr: 100 exec uptime\n\
         0 60 0 0 bad2 internal stdout: stderr: 100 mystery uptime\n\
         0 60 0 0 short internal stdout:\n\
         0 60 0 0 good internal stdout: stderr: 100 exec uptime\n",
    );
    assert_eq!(n, 1);
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs.rows()[0].invoke.key, "good");
}

#[test]
fn load_route_expands_templates() {
    let (jobs, _runq, n) = load(
        "job 1\n\
         0 60 0 0 probe.%h internal local:%j stderr: 100 exec echo %i\n",
    );
    assert_eq!(n, 1);
    let inv = &jobs.rows()[0].invoke;
    assert_eq!(inv.key, "probe.host1");
    assert_eq!(inv.result_url, "local:probe.host1");
    assert_eq!(inv.command, "echo 60");
}

#[test]
fn load_route_requires_magic() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.jobs");
    std::fs::write(&path, "not a job table\n").unwrap();
    let router = cw_route::Router::new(dir.path().to_path_buf(), "h");

    let mut jobs = JobTable::new(NOW);
    let mut runq = RunQueue::new(NOW);
    let err = jobs
        .load_route(
            &mut runq,
            &registry(),
            &router,
            &cx(),
            &format!("file:{}", path.display()),
            NOW,
        )
        .unwrap_err();
    assert!(matches!(err, JobError::BadMagic(_)));
}

#[test]
fn load_route_reports_unreadable_tables() {
    let dir = tempfile::tempdir().unwrap();
    let router = cw_route::Router::new(dir.path().to_path_buf(), "h");
    let mut jobs = JobTable::new(NOW);
    let mut runq = RunQueue::new(NOW);
    let err = jobs
        .load_route(
            &mut runq,
            &registry(),
            &router,
            &cx(),
            &format!("file:{}/absent.jobs", dir.path().display()),
            NOW,
        )
        .unwrap_err();
    assert!(matches!(err, JobError::Unreadable { .. }));
}

#[test]
fn loaded_methods_stay_present() {
    // Presence of each row's method is idempotent across repeated asks.
    let reg = registry();
    for _ in 0..3 {
        assert!(reg.check("exec"));
        assert!(reg.check("sh"));
        assert!(!reg.check("mystery"));
    }
}

#[test]
fn expired_work_drops_its_row_through_dispatch() {
    let mut jobs = JobTable::new(NOW);
    let mut runq = RunQueue::new(NOW);
    let reg = registry();

    let mut one = spec("brief");
    one.start = 2;
    one.interval = 2;
    let JobAdded::Scheduled(id) = jobs.add(&mut runq, &reg, NOW, one).unwrap() else {
        panic!("expected scheduled");
    };

    let mut h = NullHandler;
    let outcome = runq.dispatch(NOW + 2, &mut h).unwrap();
    assert_eq!(outcome.expired, vec![id]);
    // The engine's runq.expired handler does this on raise.
    jobs.remove_row(id);
    assert!(jobs.is_empty());
}
