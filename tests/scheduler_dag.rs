mod common;

use std::collections::HashSet;

use common::{
    TestResult, complete, fail_once, fan_out_goal, ready_ids, scheduler_with, status_of,
};
use warden::dag::{GoalDeclaration, GoalStatus, Scheduler, TaskOutcome, TaskStatus};
use warden::errors::WardenError;
use warden_test_utils::builders::{GoalBuilder, TaskBuilder, legacy_goal};
use warden_test_utils::init_tracing;

#[test]
fn fan_out_goal_runs_to_completion() -> TestResult {
    init_tracing();
    let mut scheduler = scheduler_with(fan_out_goal());

    assert_eq!(ready_ids(&scheduler, "g1"), vec!["A"]);
    assert_eq!(status_of(&scheduler, "g1", "B"), TaskStatus::Pending);
    assert_eq!(status_of(&scheduler, "g1", "C"), TaskStatus::Pending);

    scheduler.start_task("g1", "A")?;
    assert_eq!(status_of(&scheduler, "g1", "A"), TaskStatus::Running);
    assert!(scheduler.task("g1", "A").unwrap().started_at.is_some());

    let step = scheduler.record_result("g1", "A", TaskOutcome::success("built", 12))?;
    assert_eq!(step.task_status, TaskStatus::Completed);
    assert_eq!(step.newly_ready, vec!["B".to_string(), "C".to_string()]);
    assert_eq!(ready_ids(&scheduler, "g1"), vec!["B", "C"]);
    assert_eq!(scheduler.goal("g1").unwrap().progress, 33);

    let a = scheduler.task("g1", "A").unwrap();
    assert_eq!(a.result.as_deref(), Some("built"));
    assert_eq!(a.actual_duration_ms, Some(12));
    assert!(a.completed_at.is_some());

    complete(&mut scheduler, "g1", "B");
    assert_eq!(scheduler.goal("g1").unwrap().status, GoalStatus::Active);

    scheduler.start_task("g1", "C")?;
    let step = scheduler.record_result("g1", "C", TaskOutcome::success("ok", 1))?;
    assert!(step.goal_just_finished());
    assert_eq!(step.goal_status, GoalStatus::Completed);

    let goal = scheduler.goal("g1").unwrap();
    assert_eq!(goal.status, GoalStatus::Completed);
    assert_eq!(goal.progress, 100);
    assert!(scheduler.next_ready().is_none());
    Ok(())
}

#[test]
fn cyclic_declaration_is_rejected_with_all_nodes() {
    init_tracing();
    let decl = GoalBuilder::new("loop")
        .task(TaskBuilder::new("A").after("C"))
        .task(TaskBuilder::new("B").after("A"))
        .task(TaskBuilder::new("C").after("B"))
        .build();

    let mut scheduler = Scheduler::in_memory(3);
    let err = scheduler.load(decl).unwrap_err();

    let WardenError::DagCycle(nodes) = &err else {
        panic!("expected a cycle error, got {err:?}");
    };
    assert_eq!(nodes.len(), 4, "cycle is closed by repeating its first node");
    assert_eq!(nodes.first(), nodes.last());
    let members: HashSet<&str> = nodes.iter().map(String::as_str).collect();
    assert_eq!(members, HashSet::from(["A", "B", "C"]));
    assert!(err.is_fatal());
    assert!(scheduler.goal("loop").is_none(), "nothing is installed");
}

#[test]
fn self_dependency_is_a_cycle() {
    let decl = GoalBuilder::new("g").task(TaskBuilder::new("A").after("A")).build();
    let err = Scheduler::in_memory(3).load(decl).unwrap_err();
    assert!(matches!(err, WardenError::DagCycle(ref nodes) if nodes == &["A", "A"]));
}

#[test]
fn malformed_declarations_are_rejected() {
    let mut scheduler = Scheduler::in_memory(3);

    let unknown = GoalBuilder::new("g")
        .task(TaskBuilder::new("A").after("missing"))
        .build();
    let err = scheduler.load(unknown).unwrap_err();
    assert!(matches!(err, WardenError::GraphError(ref m) if m.contains("missing")));

    let duplicate = GoalBuilder::new("g")
        .task(TaskBuilder::new("A"))
        .task(TaskBuilder::new("A"))
        .build();
    assert!(matches!(
        scheduler.load(duplicate),
        Err(WardenError::GraphError(_))
    ));

    let empty = GoalBuilder::new("g").build();
    assert!(matches!(scheduler.load(empty), Err(WardenError::GraphError(_))));

    assert!(scheduler.goals().is_empty());
}

#[test]
fn ready_tasks_are_ordered_by_priority_then_declaration() {
    let decl = GoalBuilder::new("g")
        .task(TaskBuilder::new("P").priority(5))
        .task(TaskBuilder::new("Q").priority(1))
        .task(TaskBuilder::new("R").priority(1))
        .build();
    let scheduler = scheduler_with(decl);

    assert_eq!(ready_ids(&scheduler, "g"), vec!["Q", "R", "P"]);
    assert_eq!(scheduler.next_task("g").unwrap().id, "Q");
}

#[test]
fn failures_retry_until_the_ceiling_then_block_dependents() -> TestResult {
    let decl = GoalBuilder::new("g")
        .task(TaskBuilder::new("A").max_retries(3))
        .task(TaskBuilder::new("B").after("A"))
        .build();
    let mut scheduler = scheduler_with(decl);

    for attempt in 1..=2u32 {
        scheduler.start_task("g", "A")?;
        let step = scheduler.record_result("g", "A", TaskOutcome::failure("boom", 3))?;
        assert!(step.will_retry);
        assert_eq!(step.task_status, TaskStatus::Ready);
        assert_eq!(scheduler.task("g", "A").unwrap().retry_count, attempt);
        assert_eq!(status_of(&scheduler, "g", "B"), TaskStatus::Pending);
    }

    scheduler.start_task("g", "A")?;
    let step = scheduler.record_result("g", "A", TaskOutcome::failure("boom", 3))?;
    assert!(!step.will_retry);
    assert_eq!(step.task_status, TaskStatus::Failed);
    assert_eq!(step.newly_blocked, vec!["B".to_string()]);
    assert_eq!(scheduler.task("g", "A").unwrap().error.as_deref(), Some("boom"));

    assert_eq!(status_of(&scheduler, "g", "B"), TaskStatus::Blocked);
    assert_eq!(step.goal_status, GoalStatus::Failed);
    assert!(step.goal_just_finished());
    Ok(())
}

#[test]
fn non_retryable_failure_fails_immediately() -> TestResult {
    let decl = GoalBuilder::new("g")
        .task(TaskBuilder::new("A").max_retries(5))
        .build();
    let mut scheduler = scheduler_with(decl);

    scheduler.start_task("g", "A")?;
    let outcome = TaskOutcome::Failure {
        error: "exceeded maximum runtime".into(),
        duration_ms: 10,
        retryable: false,
    };
    let step = scheduler.record_result("g", "A", outcome)?;

    assert_eq!(step.task_status, TaskStatus::Failed);
    assert_eq!(scheduler.task("g", "A").unwrap().retry_count, 1);
    Ok(())
}

#[test]
fn failed_branch_leaves_sibling_runnable() {
    let decl = GoalBuilder::new("g1")
        .task(TaskBuilder::new("A"))
        .task(TaskBuilder::new("B").after("A").max_retries(1))
        .task(TaskBuilder::new("C").after("A"))
        .build();
    let mut scheduler = scheduler_with(decl);

    complete(&mut scheduler, "g1", "A");
    fail_once(&mut scheduler, "g1", "B", "compile error");

    assert_eq!(status_of(&scheduler, "g1", "B"), TaskStatus::Failed);
    assert_eq!(status_of(&scheduler, "g1", "C"), TaskStatus::Ready);
    assert_eq!(
        scheduler.next_task("g1").map(|t| t.id.as_str()),
        Some("C")
    );
    assert_eq!(scheduler.goal("g1").unwrap().status, GoalStatus::Active);
    assert!(scheduler.has_active_goals());
}

#[test]
fn goal_fails_when_only_blocked_work_remains() {
    let decl = GoalBuilder::new("g")
        .task(TaskBuilder::new("A").max_retries(1))
        .task(TaskBuilder::new("B").after("A"))
        .task(TaskBuilder::new("C"))
        .build();
    let mut scheduler = scheduler_with(decl);

    complete(&mut scheduler, "g", "C");
    assert_eq!(scheduler.goal("g").unwrap().status, GoalStatus::Active);

    fail_once(&mut scheduler, "g", "A", "no such file");
    assert_eq!(status_of(&scheduler, "g", "B"), TaskStatus::Blocked);

    let goal = scheduler.goal("g").unwrap();
    assert_eq!(goal.status, GoalStatus::Failed);
    assert_eq!(goal.progress, 33);
    assert!(!scheduler.has_active_goals());
}

#[test]
fn blocking_is_transitive() {
    let decl = GoalBuilder::new("g")
        .task(TaskBuilder::new("A").max_retries(1))
        .task(TaskBuilder::new("B").after("A"))
        .task(TaskBuilder::new("C").after("B"))
        .task(TaskBuilder::new("D").after("C"))
        .build();
    let mut scheduler = scheduler_with(decl);

    fail_once(&mut scheduler, "g", "A", "boom");

    for id in ["B", "C", "D"] {
        assert_eq!(status_of(&scheduler, "g", id), TaskStatus::Blocked, "{id}");
    }
}

#[test]
fn skip_satisfies_dependents() -> TestResult {
    let mut scheduler = scheduler_with(fan_out_goal());

    let step = scheduler.skip("g1", "A", "done by hand")?;
    assert_eq!(step.task_status, TaskStatus::Skipped);
    assert_eq!(ready_ids(&scheduler, "g1"), vec!["B", "C"]);
    assert_eq!(
        scheduler.task("g1", "A").unwrap().result.as_deref(),
        Some("skipped: done by hand")
    );

    let err = scheduler.skip("g1", "A", "again").unwrap_err();
    assert!(matches!(err, WardenError::InvalidTaskState { .. }));
    Ok(())
}

#[test]
fn skipping_every_task_completes_the_goal() -> TestResult {
    let mut scheduler = scheduler_with(fan_out_goal());
    for id in ["C", "B", "A"] {
        scheduler.skip("g1", id, "not needed")?;
    }
    let goal = scheduler.goal("g1").unwrap();
    assert_eq!(goal.status, GoalStatus::Completed);
    assert_eq!(goal.progress, 100);
    Ok(())
}

#[test]
fn unblock_revives_a_failed_goal() -> TestResult {
    let decl = GoalBuilder::new("g")
        .task(TaskBuilder::new("A").max_retries(1))
        .task(TaskBuilder::new("B").after("A"))
        .build();
    let mut scheduler = scheduler_with(decl);
    fail_once(&mut scheduler, "g", "A", "boom");
    assert_eq!(scheduler.goal("g").unwrap().status, GoalStatus::Failed);

    // Unblocking the dependent alone changes nothing: its dependency still failed.
    let step = scheduler.unblock("g", "B")?;
    assert_eq!(step.task_status, TaskStatus::Blocked);

    let step = scheduler.unblock("g", "A")?;
    assert_eq!(step.task_status, TaskStatus::Ready);
    assert_eq!(step.goal_status, GoalStatus::Active);

    let a = scheduler.task("g", "A").unwrap();
    assert_eq!(a.retry_count, 0);
    assert!(a.error.is_none());
    assert_eq!(status_of(&scheduler, "g", "B"), TaskStatus::Pending);

    complete(&mut scheduler, "g", "A");
    complete(&mut scheduler, "g", "B");
    assert_eq!(scheduler.goal("g").unwrap().status, GoalStatus::Completed);

    let err = scheduler.unblock("g", "A").unwrap_err();
    assert!(matches!(err, WardenError::InvalidTaskState { .. }));
    Ok(())
}

#[test]
fn paused_goals_are_not_selected() -> TestResult {
    let mut scheduler = scheduler_with(fan_out_goal());

    scheduler.pause_goal("g1")?;
    assert_eq!(scheduler.goal("g1").unwrap().status, GoalStatus::Paused);
    assert!(scheduler.next_ready().is_none());
    assert!(scheduler.pause_goal("g1").is_err());

    scheduler.resume_goal("g1")?;
    let (goal, task) = scheduler.next_ready().expect("work after resume");
    assert_eq!((goal.id.as_str(), task.id.as_str()), ("g1", "A"));
    assert!(scheduler.resume_goal("g1").is_err());
    Ok(())
}

#[test]
fn next_ready_prefers_the_earliest_loaded_goal() {
    let mut scheduler = Scheduler::in_memory(3);
    scheduler
        .load(GoalBuilder::new("zeta").task(TaskBuilder::new("z1")).build())
        .unwrap();
    scheduler
        .load(GoalBuilder::new("alpha").task(TaskBuilder::new("a1")).build())
        .unwrap();

    let (goal, task) = scheduler.next_ready().unwrap();
    assert_eq!(goal.id, "zeta");
    assert_eq!(task.id, "z1");

    complete(&mut scheduler, "zeta", "z1");
    let (goal, _) = scheduler.next_ready().unwrap();
    assert_eq!(goal.id, "alpha");
}

#[test]
fn reloading_a_goal_supersedes_its_tasks() {
    let mut scheduler = scheduler_with(fan_out_goal());
    complete(&mut scheduler, "g1", "A");
    assert_eq!(ready_ids(&scheduler, "g1"), vec!["B", "C"]);

    scheduler.load(fan_out_goal()).unwrap();
    assert_eq!(ready_ids(&scheduler, "g1"), vec!["A"]);
    assert_eq!(scheduler.goals().len(), 1);
}

#[test]
fn interrupted_tasks_are_requeued_without_spending_a_retry() -> TestResult {
    let mut scheduler = scheduler_with(fan_out_goal());
    scheduler.start_task("g1", "A")?;

    let requeued = scheduler.requeue_interrupted();
    assert_eq!(requeued, vec![("g1".to_string(), "A".to_string())]);

    let a = scheduler.task("g1", "A").unwrap();
    assert_eq!(a.status, TaskStatus::Ready);
    assert_eq!(a.retry_count, 0);
    assert!(scheduler.requeue_interrupted().is_empty());
    Ok(())
}

#[test]
fn invalid_operations_report_useful_errors() {
    let mut scheduler = scheduler_with(fan_out_goal());

    let err = scheduler
        .record_result("g1", "B", TaskOutcome::success("early", 1))
        .unwrap_err();
    assert!(matches!(
        err,
        WardenError::InvalidTaskState { ref task, .. } if task == "B"
    ));

    assert!(matches!(
        scheduler.start_task("nope", "A"),
        Err(WardenError::GoalNotFound(_))
    ));
    assert!(matches!(
        scheduler.start_task("g1", "nope"),
        Err(WardenError::TaskNotFound(_))
    ));
    assert!(matches!(
        scheduler.start_task("g1", "B"),
        Err(WardenError::InvalidTaskState { .. })
    ));
}

#[test]
fn critical_path_follows_the_longest_estimate_chain() -> TestResult {
    let decl = GoalBuilder::new("g")
        .task(TaskBuilder::new("A").estimate_ms(10))
        .task(TaskBuilder::new("B").after("A").estimate_ms(100))
        .task(TaskBuilder::new("C").after("A").estimate_ms(20))
        .task(TaskBuilder::new("D").after("B").after("C").estimate_ms(5))
        .build();
    let mut scheduler = scheduler_with(decl);

    let path = scheduler.critical_path("g")?;
    assert_eq!(path.tasks, vec!["A", "B", "D"]);
    assert_eq!(path.total_estimated_ms, 115);

    complete(&mut scheduler, "g", "A");
    let path = scheduler.critical_path("g")?;
    assert_eq!(path.tasks, vec!["B", "D"]);
    assert_eq!(path.total_estimated_ms, 105);

    assert!(matches!(
        scheduler.critical_path("missing"),
        Err(WardenError::GoalNotFound(_))
    ));
    Ok(())
}

#[test]
fn legacy_objectives_become_sequential_chains() {
    let decl = legacy_goal(None, &[("docs", &["outline", "draft"]), ("code", &["impl"])]);
    assert_eq!(decl.goal_id(), "objectives:docs+code");

    let mut scheduler = scheduler_with(decl);
    let goal_id = "objectives:docs+code";

    assert_eq!(ready_ids(&scheduler, goal_id), vec!["docs-1", "code-1"]);
    let draft = scheduler.task(goal_id, "docs-2").unwrap();
    assert_eq!(draft.name, "draft");
    assert_eq!(draft.dependencies, vec!["docs-1"]);
    assert_eq!(draft.status, TaskStatus::Pending);

    complete(&mut scheduler, goal_id, "docs-1");
    assert_eq!(ready_ids(&scheduler, goal_id), vec!["docs-2", "code-1"]);
}

#[test]
fn declarations_parse_from_toml_and_json() -> TestResult {
    let toml = r#"
        id = "release"
        name = "Ship it"
        deadline = "2030-01-01T00:00:00Z"

        [[tasks]]
        id = "build"
        name = "Build"
        estimated_duration_ms = 1000

        [[tasks]]
        id = "publish"
        name = "Publish"
        dependencies = ["build"]
        max_retries = 2
        command = "make publish"
    "#;
    let decl = GoalDeclaration::from_toml_str(toml)?;
    assert!(matches!(decl, GoalDeclaration::Structured(_)));

    let json = r#"{
        "id": "notes",
        "objectives": [{"id": "o", "name": "Notes", "tasks": ["a", "b"]}]
    }"#;
    let legacy = GoalDeclaration::from_json_str(json)?;
    assert!(matches!(legacy, GoalDeclaration::Legacy(_)));

    let mut scheduler = Scheduler::in_memory(3);
    scheduler.load(decl)?;
    scheduler.load(legacy)?;

    let publish = scheduler.task("release", "publish").unwrap();
    assert_eq!(publish.max_retries, 2);
    assert_eq!(publish.command.as_deref(), Some("make publish"));
    assert_eq!(scheduler.task("release", "build").unwrap().max_retries, 3);
    assert!(scheduler.goal("release").unwrap().deadline.is_some());
    assert_eq!(ready_ids(&scheduler, "notes"), vec!["o-1"]);
    Ok(())
}
