mod common;

use std::sync::Arc;

use common::{TestResult, complete, fail_once, fan_out_goal};
use warden::dag::store::GOALS_FILE;
use warden::dag::{FileGoalStore, GoalStatus, Scheduler, TaskStatus};
use warden::fs::{FileSystem, RealFileSystem};
use warden::journal::{JOURNAL_FILE, Journal};
use warden::lifecycle::checkpoint::CHECKPOINT_FILE;
use warden::lifecycle::{AgentState, FileCheckpointStore, StateMachine};
use warden_test_utils::init_tracing;

fn real_fs() -> Arc<dyn FileSystem> {
    Arc::new(RealFileSystem)
}

#[test]
fn restored_goal_keeps_progress_unless_reloaded() -> TestResult {
    let dir = tempfile::tempdir()?;

    {
        let store = FileGoalStore::new(real_fs(), dir.path());
        let mut scheduler = Scheduler::restore(Box::new(store), 3)?;
        scheduler.load(fan_out_goal())?;
        complete(&mut scheduler, "g1", "A");
    }

    let store = FileGoalStore::new(real_fs(), dir.path());
    let mut scheduler = Scheduler::restore(Box::new(store), 3)?;
    assert_eq!(scheduler.load_if_new(fan_out_goal())?, None);
    assert_eq!(
        scheduler.task("g1", "A").unwrap().status,
        TaskStatus::Completed
    );

    assert_eq!(scheduler.load(fan_out_goal())?, "g1");
    assert_eq!(scheduler.task("g1", "A").unwrap().status, TaskStatus::Ready);
    assert_eq!(scheduler.goal("g1").unwrap().progress, 0);
    Ok(())
}

#[test]
fn scheduler_survives_a_restart() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;

    {
        let store = FileGoalStore::new(real_fs(), dir.path());
        let mut scheduler = Scheduler::restore(Box::new(store), 3)?;
        scheduler.load(fan_out_goal())?;
        complete(&mut scheduler, "g1", "A");
        fail_once(&mut scheduler, "g1", "B", "flaky network");
        scheduler.start_task("g1", "C")?;
    }

    assert!(dir.path().join(GOALS_FILE).exists());
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");

    let store = FileGoalStore::new(real_fs(), dir.path());
    let mut scheduler = Scheduler::restore(Box::new(store), 3)?;

    let goal = scheduler.goal("g1").expect("goal restored");
    assert_eq!(goal.status, GoalStatus::Active);
    assert_eq!(goal.task("A").unwrap().status, TaskStatus::Completed);
    let b = goal.task("B").unwrap();
    assert_eq!(b.status, TaskStatus::Ready);
    assert_eq!(b.retry_count, 1);
    assert_eq!(b.error.as_deref(), Some("flaky network"));
    assert_eq!(goal.task("C").unwrap().status, TaskStatus::Running);

    let requeued = scheduler.requeue_interrupted();
    assert_eq!(requeued, vec![("g1".to_string(), "C".to_string())]);
    assert_eq!(
        scheduler.task("g1", "C").unwrap().status,
        TaskStatus::Ready
    );
    Ok(())
}

#[test]
fn checkpoint_files_land_in_the_state_dir() -> TestResult {
    let dir = tempfile::tempdir()?;
    let mut machine = StateMachine::new(
        Box::new(FileCheckpointStore::new(real_fs(), dir.path())),
        10,
    );
    machine.transition(AgentState::Planning, "plan")?;
    machine.transition(AgentState::Executing, "run")?;
    machine.checkpoint()?;
    machine.save_snapshot("mid-run")?;

    assert!(dir.path().join(CHECKPOINT_FILE).exists());
    assert!(dir.path().join("snapshots").join("mid-run.json").exists());

    let restored = StateMachine::recover_from_store(
        Box::new(FileCheckpointStore::new(real_fs(), dir.path())),
        10,
    )?;
    assert_eq!(restored.state(), AgentState::Error);
    Ok(())
}

#[test]
fn journal_appends_one_line_per_record() -> TestResult {
    let dir = tempfile::tempdir()?;
    let journal = Journal::new(real_fs(), dir.path());

    journal.record("trip", "hard_open: 5 consecutive failures");
    journal.record("alert", "deadline in 1.5h\nsecond line");

    assert_eq!(journal.path(), dir.path().join(JOURNAL_FILE));
    let contents = std::fs::read_to_string(journal.path())?;
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("[trip] hard_open: 5 consecutive failures"));
    assert!(lines[1].contains("[alert] deadline in 1.5h second line"));
    Ok(())
}
