use std::sync::{Arc, Mutex};

use warden::breaker::detect::{is_trivial_output, jaccard_similarity, normalize_error, word_set};
use warden::breaker::{CircuitBreaker, CycleRecord, TripLevel, TripReason};
use warden::config::BreakerConfig;
use warden::errors::WardenError;
use warden_test_utils::init_tracing;

fn breaker(soft: u32, hard: u32) -> CircuitBreaker {
    CircuitBreaker::new(BreakerConfig {
        soft_failure_threshold: soft,
        hard_failure_threshold: hard,
        ..BreakerConfig::default()
    })
}

const CAUSES: [&str; 8] = [
    "disk", "network", "parse", "auth", "quota", "lock", "schema", "permission",
];

/// Failures with distinct messages so only the streak detector fires.
fn fail(b: &mut CircuitBreaker, n: usize) -> TripLevel {
    let mut level = b.level();
    for _ in 0..n {
        let cause = CAUSES[b.records().count() % CAUSES.len()];
        level = b.record_cycle(CycleRecord::failure(None, format!("{cause} problem"), 10));
    }
    level
}

fn ok(b: &mut CircuitBreaker) -> TripLevel {
    b.record_cycle(CycleRecord::success(None, "", 10))
}

#[test]
fn failure_streak_opens_soft_then_hard() {
    init_tracing();
    let mut b = breaker(3, 5);

    assert_eq!(fail(&mut b, 2), TripLevel::Closed);
    assert_eq!(fail(&mut b, 1), TripLevel::SoftOpen);
    assert!(b.should_warn());
    assert_eq!(fail(&mut b, 1), TripLevel::SoftOpen);
    assert_eq!(fail(&mut b, 1), TripLevel::HardOpen);
    assert!(b.should_block());

    let last = b.last_trip().unwrap();
    assert_eq!(last.reason, TripReason::ConsecutiveFailures);
    assert_eq!(last.level, TripLevel::HardOpen);
}

#[test]
fn success_resets_the_failure_streak() {
    let mut b = breaker(3, 5);
    fail(&mut b, 2);
    ok(&mut b);
    assert_eq!(b.consecutive_failures(), 0);
    assert_eq!(fail(&mut b, 2), TripLevel::Closed);
}

#[test]
fn success_closes_soft_open_but_not_hard_open() {
    let mut b = breaker(2, 4);
    fail(&mut b, 2);
    assert_eq!(b.level(), TripLevel::SoftOpen);
    assert_eq!(ok(&mut b), TripLevel::Closed);

    fail(&mut b, 4);
    assert_eq!(b.level(), TripLevel::HardOpen);
    assert_eq!(ok(&mut b), TripLevel::HardOpen);
}

#[test]
fn level_never_drops_on_a_lower_trip() {
    let mut b = breaker(3, 5);
    b.trip(TripLevel::HardOpen, TripReason::Manual, "operator");
    b.trip(TripLevel::SoftOpen, TripReason::RepeatedOutput, "loop");
    assert_eq!(b.level(), TripLevel::HardOpen);
    assert_eq!(b.trips().count(), 2);
    assert_eq!(b.last_trip().unwrap().level, TripLevel::HardOpen);
}

#[test]
fn token_budget_trips_hard() {
    let mut b = CircuitBreaker::new(BreakerConfig {
        max_tokens_per_task: 100,
        ..BreakerConfig::default()
    });
    b.start_task("A");
    assert_eq!(b.add_tokens(60), TripLevel::Closed);
    assert_eq!(b.add_tokens(50), TripLevel::HardOpen);

    let trip = b.last_trip().unwrap();
    assert_eq!(trip.reason, TripReason::TokenBudget);
    assert_eq!(trip.task_id.as_deref(), Some("A"));

    b.reset();
    b.start_task("B");
    assert_eq!(b.add_tokens(60), TripLevel::Closed, "budget is per task");
}

#[test]
fn overlong_task_trips_hard() {
    let mut b = CircuitBreaker::new(BreakerConfig {
        max_task_duration_secs: 1,
        ..BreakerConfig::default()
    });
    b.start_task("slow");
    let level = b.record_cycle(CycleRecord::success(
        Some("slow".into()),
        "finished eventually",
        5_000,
    ));
    assert_eq!(level, TripLevel::HardOpen);
    assert_eq!(b.last_trip().unwrap().reason, TripReason::TaskTimeout);
}

#[test]
fn duration_of_another_task_is_not_held_against_the_tracked_one() {
    let mut b = CircuitBreaker::new(BreakerConfig {
        max_task_duration_secs: 1,
        ..BreakerConfig::default()
    });
    b.start_task("A");
    let level = b.record_cycle(CycleRecord::success(
        Some("OTHER".into()),
        "finished elsewhere",
        5_000,
    ));
    assert_eq!(level, TripLevel::Closed);

    let level = b.record_cycle(CycleRecord::success(None, "no task attached", 5_000));
    assert_eq!(level, TripLevel::Closed);
    assert!(b.last_trip().is_none());
}

#[test]
fn repeated_output_trips_soft() {
    let mut b = breaker(3, 5);
    let output = "compiled crate and ran the same test suite again";

    assert_eq!(
        b.record_cycle(CycleRecord::success(None, output, 10)),
        TripLevel::Closed
    );
    assert_eq!(
        b.record_cycle(CycleRecord::success(None, output, 10)),
        TripLevel::Closed
    );
    assert_eq!(
        b.record_cycle(CycleRecord::success(None, output, 10)),
        TripLevel::SoftOpen
    );
    assert_eq!(b.last_trip().unwrap().reason, TripReason::RepeatedOutput);
}

#[test]
fn trivial_or_different_outputs_do_not_trip() {
    let mut b = breaker(3, 5);
    for _ in 0..5 {
        b.record_cycle(CycleRecord::success(None, "ok", 10));
    }
    assert_eq!(b.level(), TripLevel::Closed);

    for text in [
        "parsed the configuration file successfully",
        "uploaded three artifacts to the bucket",
        "rebuilt the search index from scratch",
    ] {
        b.record_cycle(CycleRecord::success(None, text, 10));
    }
    assert_eq!(b.level(), TripLevel::Closed);
}

#[test]
fn repeated_error_trips_soft_despite_volatile_details() {
    let mut b = CircuitBreaker::new(BreakerConfig {
        soft_failure_threshold: 10,
        hard_failure_threshold: 20,
        same_error_threshold: 3,
        ..BreakerConfig::default()
    });

    let errors = [
        "timeout after 31 seconds reading /tmp/run-1/out.log:12",
        "timeout after 45 seconds reading /tmp/run-2/out.log:97",
        "timeout after 12 seconds reading /var/tmp/x/out.log:3",
    ];
    let mut level = TripLevel::Closed;
    for (i, e) in errors.iter().enumerate() {
        level = b.record_cycle(CycleRecord::failure(None, *e, 10));
        if i < 2 {
            assert_eq!(level, TripLevel::Closed);
        }
    }
    assert_eq!(level, TripLevel::SoftOpen);
    assert_eq!(b.last_trip().unwrap().reason, TripReason::RepeatedError);
}

#[test]
fn reset_closes_and_clears_the_window() {
    let mut b = breaker(2, 3);
    fail(&mut b, 3);
    assert!(b.should_block());

    b.reset();
    assert_eq!(b.level(), TripLevel::Closed);
    assert_eq!(b.consecutive_failures(), 0);
    assert_eq!(b.records().count(), 0);
    assert_eq!(b.trips().count(), 2, "trip history survives a reset");
    assert!(b.ensure_can_execute().is_ok());
}

#[test]
fn hard_open_refuses_execution() {
    let mut b = breaker(1, 2);
    fail(&mut b, 2);
    match b.ensure_can_execute() {
        Err(WardenError::CircuitOpen { level, reason }) => {
            assert_eq!(level, TripLevel::HardOpen);
            assert!(reason.contains("consecutive failures"));
        }
        other => panic!("expected CircuitOpen, got {other:?}"),
    }

    let status = b.status();
    assert_eq!(status.level, TripLevel::HardOpen);
    assert_eq!(status.consecutive_failures, 2);
    assert_eq!(status.total_trips, 2);
}

#[test]
fn trip_callback_receives_events() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut b = breaker(1, 3);
    {
        let seen = seen.clone();
        b.on_trip(Box::new(move |event| {
            seen.lock().unwrap().push((event.level, event.reason));
        }));
    }
    fail(&mut b, 1);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![(TripLevel::SoftOpen, TripReason::ConsecutiveFailures)]
    );
}

#[test]
fn jaccard_similarity_fixtures() {
    assert_eq!(jaccard_similarity("", ""), 1.0);
    assert_eq!(jaccard_similarity("a b c", "A, B; C!"), 1.0);
    assert_eq!(jaccard_similarity("alpha beta", "gamma delta"), 0.0);
    let half = jaccard_similarity("one two three", "one two four");
    assert!((half - 0.5).abs() < 1e-9, "got {half}");
}

#[test]
fn word_set_lowercases_and_splits_on_punctuation() {
    let words = word_set("Hello, world! hello-World");
    assert_eq!(words.len(), 2);
    assert!(words.contains("hello"));
    assert!(words.contains("world"));
}

#[test]
fn normalize_error_strips_volatile_parts() {
    assert_eq!(
        normalize_error("Panic at /src/app/main.rs:42:7"),
        "panic at <path>:<line>"
    );
    assert_eq!(
        normalize_error("request 550e8400-e29b-41d4-a716-446655440000 failed"),
        "request <uuid> failed"
    );
    assert_eq!(
        normalize_error("segfault at 0xDEADBEEF after 3 retries"),
        "segfault at <hex> after <n> retries"
    );
    assert_eq!(
        normalize_error("2024-05-01T10:00:00Z   disk   full"),
        "<time> disk full"
    );
}

#[test]
fn trivial_output_threshold() {
    assert!(is_trivial_output("   done   "));
    assert!(!is_trivial_output("this output is long enough"));
}
