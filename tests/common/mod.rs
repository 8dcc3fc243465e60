#![allow(dead_code)]

use warden::dag::{GoalDeclaration, Scheduler, TaskOutcome, TaskStatus};
use warden_test_utils::builders::{GoalBuilder, TaskBuilder};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// `A`, then `B` and `C` both after `A`.
pub fn fan_out_goal() -> GoalDeclaration {
    GoalBuilder::new("g1")
        .task(TaskBuilder::new("A"))
        .task(TaskBuilder::new("B").after("A"))
        .task(TaskBuilder::new("C").after("A"))
        .build()
}

pub fn scheduler_with(decl: GoalDeclaration) -> Scheduler {
    let mut scheduler = Scheduler::in_memory(3);
    scheduler.load(decl).expect("goal should load");
    scheduler
}

pub fn ready_ids(scheduler: &Scheduler, goal: &str) -> Vec<String> {
    scheduler
        .ready_tasks(goal)
        .into_iter()
        .map(|t| t.id.clone())
        .collect()
}

pub fn status_of(scheduler: &Scheduler, goal: &str, task: &str) -> TaskStatus {
    scheduler.task(goal, task).expect("task exists").status
}

/// Start and complete `task` successfully.
pub fn complete(scheduler: &mut Scheduler, goal: &str, task: &str) {
    scheduler.start_task(goal, task).expect("task should start");
    scheduler
        .record_result(goal, task, TaskOutcome::success(format!("{task} done"), 5))
        .expect("result should record");
}

/// Start `task` and record a retryable failure.
pub fn fail_once(scheduler: &mut Scheduler, goal: &str, task: &str, error: &str) {
    scheduler.start_task(goal, task).expect("task should start");
    scheduler
        .record_result(goal, task, TaskOutcome::failure(error, 5))
        .expect("result should record");
}
