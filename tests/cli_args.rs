use clap::Parser;
use warden::cli::{CliArgs, parse_task_ref};
use warden::config::default_config_path;
use warden::types::StorageMode;

#[test]
fn defaults_point_at_the_project_config() {
    let args = CliArgs::try_parse_from(["warden"]).unwrap();

    assert_eq!(args.config, default_config_path());
    assert!(args.goals.is_empty());
    assert!(!args.reload);
    assert!(!args.once);
    assert!(args.storage.is_none());
}

#[test]
fn goal_flags_and_overrides_parse() {
    let args = CliArgs::try_parse_from([
        "warden",
        "--goal",
        "build.toml",
        "--goal",
        "docs.json",
        "--reload",
        "--storage",
        "memory",
        "--unblock",
        "g1/B",
    ])
    .unwrap();

    assert_eq!(args.goals.len(), 2);
    assert!(args.reload);
    assert_eq!(args.storage, Some(StorageMode::Memory));
    assert_eq!(args.unblock, vec!["g1/B"]);
}

#[test]
fn unknown_storage_mode_is_rejected() {
    assert!(CliArgs::try_parse_from(["warden", "--storage", "cloud"]).is_err());
}

#[test]
fn task_refs_split_at_the_last_slash() {
    assert_eq!(
        parse_task_ref("objectives:docs+code/docs-1"),
        Some(("objectives:docs+code", "docs-1"))
    );
    assert_eq!(parse_task_ref("a/b/c"), Some(("a/b", "c")));
    assert_eq!(parse_task_ref("no-slash"), None);
    assert_eq!(parse_task_ref("/B"), None);
    assert_eq!(parse_task_ref("g1/"), None);
}
