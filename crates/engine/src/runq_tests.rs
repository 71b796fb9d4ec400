// SPDX-License-Identifier: MIT

use super::*;
use std::collections::HashSet;

const NOW: i64 = 1_700_000_000;

/// Recording handler standing in for the method executor.
#[derive(Default)]
struct FakeHandler {
    calls: Vec<String>,
    running: HashSet<String>,
}

impl RunHandler for FakeHandler {
    fn start_of_run(&mut self, inv: &Invocation) -> i32 {
        self.calls.push(format!("start:{}", inv.key));
        0
    }

    fn command(&mut self, inv: &Invocation) -> i32 {
        self.calls.push(format!("cmd:{}", inv.key));
        0
    }

    fn is_running(&self, inv: &Invocation) -> bool {
        self.running.contains(&inv.key)
    }

    fn end_of_run(&mut self, inv: &Invocation) -> i32 {
        self.calls.push(format!("end:{}", inv.key));
        0
    }
}

fn spec(key: &str, start: i64, interval: i64, phase: i64, count: i64) -> WorkSpec {
    WorkSpec {
        start,
        interval,
        phase,
        count,
        key: key.to_string(),
        hooks: HookSet::all(),
        invoke: Invocation::new(key, "exec", "echo hi", "stdout:", "stderr:", 0),
    }
}

#[test]
fn add_rejects_bad_parameters() {
    let mut q = RunQueue::new(NOW);
    assert!(q.add(spec("neg", NOW, -5, 0, 1), NOW).is_err());
    assert!(q.add(spec("neg2", NOW, 5, -1, 1), NOW).is_err());

    let mut no_cmd = spec("nocmd", NOW, 5, 0, 1);
    no_cmd.hooks.command = false;
    assert!(q.add(no_cmd, NOW).is_err());
    assert_eq!(q.table_len(), 0);
}

#[test]
fn future_single_job_queued_at_start() {
    let mut q = RunQueue::new(NOW);
    let added = q.add(spec("1a", NOW + 5, 5, 0, 1), NOW).unwrap();
    assert!(matches!(added, Added::Scheduled(_)));
    assert_eq!(q.event_times(), vec![NOW + 5]);
}

#[test]
fn two_future_jobs_share_a_time() {
    let mut q = RunQueue::new(NOW);
    q.add(spec("1b1", NOW + 5, 5, 0, 1), NOW).unwrap();
    q.add(spec("1b2", NOW + 5, 5, 0, 1), NOW).unwrap();
    assert_eq!(q.event_times(), vec![NOW + 5, NOW + 5]);
}

#[test]
fn events_order_by_time() {
    let mut q = RunQueue::new(NOW);
    q.add(spec("1c1", NOW + 6, 6, 0, 1), NOW).unwrap();
    q.add(spec("1c2", NOW + 5, 5, 0, 1), NOW).unwrap();
    assert_eq!(q.event_times(), vec![NOW + 5, NOW + 6]);
}

#[test]
fn continuous_past_work_lands_within_one_interval() {
    // Property 2: next event strictly in (now, now + interval].
    let mut q = RunQueue::new(NOW);
    q.add(spec("1d", NOW - 2, 5, 0, 0), NOW).unwrap();
    assert_eq!(q.event_times(), vec![NOW + 3]);
}

#[test]
fn two_continuous_past_jobs_schedule_independently() {
    let mut q = RunQueue::new(NOW);
    q.add(spec("1e1", NOW - 2, 6, 0, 0), NOW).unwrap();
    q.add(spec("1e2", NOW - 3, 5, 0, 0), NOW).unwrap();
    assert_eq!(q.event_times(), vec![NOW + 2, NOW + 4]);
}

#[test]
fn overlapping_finite_windows_coexist_in_event_list() {
    // Two five-run jobs started 10s ago with different periods each pick
    // their own next due time.
    let mut q = RunQueue::new(NOW);
    q.add(spec("1f1", NOW - 10, 6, 0, 5), NOW).unwrap();
    q.add(spec("1f2", NOW - 10, 5, 0, 5), NOW).unwrap();
    assert_eq!(q.event_times(), vec![NOW + 2, NOW + 5]);
    assert_eq!(q.scheduled(), 2);
}

#[test]
fn entirely_past_finite_work_enters_table_without_event() {
    // Property 1 / the "completed immediately" add outcome.
    let mut q = RunQueue::new(NOW);
    let added = q.add(spec("1g", NOW - 100, 6, 0, 5), NOW).unwrap();
    assert_eq!(added, Added::Completed);
    assert!(q.event_times().is_empty());
    assert_eq!(q.table_len(), 1);
    assert_eq!(q.scheduled(), 0);

    // And dispatching runs nothing.
    let mut h = FakeHandler::default();
    let outcome = q.dispatch(NOW, &mut h).unwrap();
    assert!(outcome.ran.is_empty());
    assert!(h.calls.is_empty());
}

#[test]
fn same_second_fires_in_phase_order() {
    // Property 3: lower phase first within one dispatch pass.
    let mut q = RunQueue::new(NOW);
    q.add(spec("high", NOW + 5, 5, 1, 1), NOW).unwrap();
    q.add(spec("low", NOW + 5, 5, 0, 1), NOW).unwrap();

    let mut h = FakeHandler::default();
    q.dispatch(NOW + 5, &mut h).unwrap();
    let cmds: Vec<&String> = h.calls.iter().filter(|c| c.starts_with("cmd:")).collect();
    assert_eq!(cmds, ["cmd:low", "cmd:high"]);
}

#[test]
fn start_of_run_once_then_commands_then_end_once() {
    // Properties 4 and 5 across a three-run series.
    let mut q = RunQueue::new(NOW);
    let Added::Scheduled(id) = q.add(spec("series", NOW + 5, 5, 0, 3), NOW).unwrap() else {
        panic!("expected scheduled");
    };

    let mut h = FakeHandler::default();
    q.dispatch(NOW + 5, &mut h).unwrap();
    q.dispatch(NOW + 10, &mut h).unwrap();
    let outcome = q.dispatch(NOW + 15, &mut h).unwrap();

    assert_eq!(
        h.calls,
        [
            "start:series",
            "cmd:series",
            "cmd:series",
            "cmd:series",
            "end:series"
        ]
    );
    assert_eq!(outcome.expired, vec![id]);
    assert_eq!(q.table_len(), 0);
}

#[test]
fn count_one_job_fires_exactly_once() {
    let mut q = RunQueue::new(NOW);
    let Added::Scheduled(id) = q.add(spec("once", NOW + 5, 5, 0, 1), NOW).unwrap() else {
        panic!("expected scheduled");
    };

    let mut h = FakeHandler::default();
    let first = q.dispatch(NOW + 5, &mut h).unwrap();
    assert_eq!(first.ran, vec![id]);
    assert_eq!(first.expired, vec![id]);
    assert!(q.event_times().is_empty());
    assert_eq!(q.table_len(), 0);

    // Later passes find nothing.
    let later = q.dispatch(NOW + 10, &mut h).unwrap();
    assert!(later.ran.is_empty());
    assert_eq!(
        h.calls.iter().filter(|c| c.starts_with("cmd:")).count(),
        1
    );
}

#[test]
fn zero_interval_is_reformed_to_single_run() {
    // Property 10: interval 0 stores as 1 and the record fires once.
    let mut q = RunQueue::new(NOW);
    let Added::Scheduled(id) = q.add(spec("zero", NOW + 1, 0, 0, 1), NOW).unwrap() else {
        panic!("expected scheduled");
    };
    assert_eq!(q.event_times(), vec![NOW + 1]);

    let mut h = FakeHandler::default();
    let outcome = q.dispatch(NOW + 1, &mut h).unwrap();
    assert_eq!(outcome.ran, vec![id]);
    assert_eq!(outcome.expired, vec![id]);
    assert_eq!(h.calls, ["start:zero", "cmd:zero", "end:zero"]);
}

#[test]
fn zero_interval_with_other_count_is_forced_single() {
    let mut q = RunQueue::new(NOW);
    q.add(spec("forced", NOW + 1, 0, 0, 7), NOW).unwrap();

    let mut h = FakeHandler::default();
    q.dispatch(NOW + 1, &mut h).unwrap();
    // Count was forced to 1: exhausted after the single run.
    assert_eq!(q.table_len(), 0);
}

#[test]
fn command_only_work_skips_optional_hooks() {
    let mut q = RunQueue::new(NOW);
    let mut bare = spec("bare", NOW + 5, 5, 0, 1);
    bare.hooks = HookSet::command_only();
    q.add(bare, NOW).unwrap();

    let mut h = FakeHandler::default();
    q.dispatch(NOW + 5, &mut h).unwrap();
    assert_eq!(h.calls, ["cmd:bare"]);
    assert_eq!(q.table_len(), 0);
}

#[test]
fn expired_work_waits_for_running_method() {
    // Property 5: end-of-run only after the method has been reaped.
    let mut q = RunQueue::new(NOW);
    let Added::Scheduled(id) = q.add(spec("slow", NOW + 5, 5, 0, 1), NOW).unwrap() else {
        panic!("expected scheduled");
    };

    let mut h = FakeHandler::default();
    h.running.insert("slow".to_string());
    let outcome = q.dispatch(NOW + 5, &mut h).unwrap();
    assert_eq!(outcome.ran, vec![id]);
    assert!(outcome.expired.is_empty(), "record must wait for the child");
    assert_eq!(q.is_expired(id), Some(true));
    assert!(!h.calls.contains(&"end:slow".to_string()));

    // Child reaped; the finished callback finalises it.
    h.running.clear();
    let finished = q.on_method_finished("slow", &mut h);
    assert_eq!(finished, vec![id]);
    assert!(h.calls.contains(&"end:slow".to_string()));
    assert_eq!(q.table_len(), 0);
}

#[test]
fn on_method_finished_ignores_unexpired_and_foreign_keys() {
    let mut q = RunQueue::new(NOW);
    q.add(spec("alive", NOW + 5, 5, 0, 0), NOW).unwrap();

    let mut h = FakeHandler::default();
    assert!(q.on_method_finished("alive", &mut h).is_empty());
    assert!(q.on_method_finished("stranger", &mut h).is_empty());
    assert_eq!(q.table_len(), 1);
}

#[test]
fn disable_empties_schedule_and_enable_restores_it() {
    // Property 6.
    let mut q = RunQueue::new(NOW);
    q.add(spec("a", NOW + 5, 5, 0, 0), NOW).unwrap();
    q.add(spec("b", NOW + 7, 7, 0, 0), NOW).unwrap();
    assert_eq!(q.scheduled(), 2);

    q.disable();
    assert_eq!(q.scheduled(), 0);
    assert_eq!(q.active_work(), 2);

    let mut h = FakeHandler::default();
    let outcome = q.dispatch(NOW + 20, &mut h).unwrap();
    assert!(outcome.ran.is_empty());
    assert!(h.calls.is_empty());

    q.enable(NOW + 20);
    assert_eq!(q.scheduled(), 2, "exactly the table records come back");
}

#[test]
fn remove_defers_cleanup_while_running() {
    let mut q = RunQueue::new(NOW);
    let Added::Scheduled(id) = q.add(spec("victim", NOW + 5, 5, 0, 0), NOW).unwrap() else {
        panic!("expected scheduled");
    };

    let mut h = FakeHandler::default();
    q.dispatch(NOW + 5, &mut h).unwrap();

    h.running.insert("victim".to_string());
    assert!(q.remove(id, NOW + 6, &mut h));
    assert_eq!(q.is_expired(id), Some(true));
    // A clean-up attempt is parked EXPIRE_WAIT_SECS out.
    assert_eq!(q.event_times(), vec![NOW + 6 + EXPIRE_WAIT_SECS]);

    // The clean-up pass finds it no longer running.
    h.running.clear();
    let outcome = q.dispatch(NOW + 6 + EXPIRE_WAIT_SECS, &mut h).unwrap();
    assert_eq!(outcome.expired, vec![id]);
    assert!(h.calls.contains(&"end:victim".to_string()));
    assert_eq!(q.table_len(), 0);
}

#[test]
fn remove_idle_work_finalises_immediately() {
    let mut q = RunQueue::new(NOW);
    let Added::Scheduled(id) = q.add(spec("idle", NOW + 5, 5, 0, 0), NOW).unwrap() else {
        panic!("expected scheduled");
    };

    let mut h = FakeHandler::default();
    assert!(q.remove(id, NOW, &mut h));
    assert_eq!(q.table_len(), 0);
    // Never ran, so no end-of-run.
    assert!(h.calls.is_empty());

    assert!(!q.remove(id, NOW, &mut h), "second removal reports false");
}

#[test]
fn next_delta_has_a_one_second_floor() {
    let mut q = RunQueue::new(NOW);
    assert_eq!(q.next_delta(NOW), None);

    q.add(spec("d", NOW + 30, 30, 0, 0), NOW).unwrap();
    assert_eq!(q.next_delta(NOW), Some(30));
    assert_eq!(q.next_delta(NOW + 30), Some(1));
    assert_eq!(q.next_delta(NOW + 99), Some(1));
}

#[test]
fn missed_deadlines_run_as_soon_as_possible() {
    let mut q = RunQueue::new(NOW);
    q.add(spec("late", NOW + 5, 5, 0, 0), NOW).unwrap();

    // The tick arrives well past the due time; the work still runs.
    let mut h = FakeHandler::default();
    let outcome = q.dispatch(NOW + 17, &mut h).unwrap();
    assert_eq!(outcome.ran.len(), 1);
    // And the reschedule lands in the future, not the past.
    let times = q.event_times();
    assert_eq!(times.len(), 1);
    assert!(times[0] > NOW + 17);
}
