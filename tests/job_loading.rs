use std::io::Write;

use promptline_core::PromptlineError;
use promptline_engine::{Job, Planner, Task, Workflow};
use promptline_test_utils::{temp_workspace, write_files};

#[test]
fn test_load_job_file_with_env_expansion() {
    std::env::set_var("PROMPTLINE_TEST_AUDIENCE", "engineers");
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
name = "announce"

[variables]
audience = "${{PROMPTLINE_TEST_AUDIENCE}}"

[workflow]
kind = "serial"

[[workflow.tasks]]
type = "instruct"
system = "You write release notes."
prompt = "Announce the release to {{{{audience}}}}."
output = {{ headline = "string", highlights = "string-list" }}
"#
    )
    .unwrap();

    let job = Job::load(file.path()).unwrap();
    assert_eq!(job.name, "announce");
    assert_eq!(job.variables.get_str("audience"), Some("engineers"));

    let Workflow::Planned { planner, tasks } = &job.workflow else {
        panic!("expected a planned workflow");
    };
    assert!(planner.is_serial());
    let Task::Instruct(instruct) = &tasks[0] else {
        panic!("expected an instruct task");
    };
    assert_eq!(instruct.system.as_deref(), Some("You write release notes."));
    assert_eq!(instruct.contract.fields().len(), 2);
    assert_eq!(instruct.contract.fields()[0].0, "headline");
}

#[test]
fn test_missing_job_file() {
    let dir = temp_workspace();
    assert!(Job::load(&dir.path().join("nope.toml")).is_err());
}

#[test]
fn test_multi_source_job() {
    let job = Job::from_toml_str(
        r#"
name = "compare"

[workflow]
kind = "multi"
sources = [
    { source = "left/*.txt", bind = "left" },
    { source = "right/*.txt", bind = "right", skip = [{ matches = "draft" }] },
]

[[workflow.tasks]]
type = "instruct"
prompt = "Compare {{left}} with {{right}}"
"#,
    )
    .unwrap();

    let Workflow::Planned { planner: Planner::MultiSource(batches), .. } = &job.workflow else {
        panic!("expected a multi-source planner");
    };
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[1].bind, "right");
    assert_eq!(batches[1].skip.len(), 1);
}

#[tokio::test]
async fn test_loaded_batch_job_plans_against_disk() {
    let dir = temp_workspace();
    write_files(
        dir.path(),
        &[
            ("notes/one.txt", "1"),
            ("notes/two.txt", "2"),
            ("notes/skip-me.txt", "3"),
        ],
    );
    let job = Job::from_toml_str(
        r#"
name = "notes"

[workflow]
kind = "batch"
source = "notes/*.txt"
skip = [{ matches = "skip-" }]

[[workflow.tasks]]
type = "instruct"
prompt = "Read {{file}} from {{file.path}}"
"#,
    )
    .unwrap();

    let Workflow::Planned { planner, tasks } = &job.workflow else {
        panic!("expected a planned workflow");
    };
    let fs = promptline_engine::LocalFs::new(dir.path());
    let runs = planner.plan(tasks, &job.variables, &fs).await.unwrap();

    assert_eq!(runs.len(), 2);
    let stems: Vec<&str> = runs
        .iter()
        .map(|r| r.variables.get_str("file.stem").unwrap())
        .collect();
    assert_eq!(stems, vec!["one", "two"]);
    assert_eq!(runs[0].variables.get_str("file"), Some("1"));
}

#[test]
fn test_dag_cycle_is_a_planning_error() {
    let err = Job::from_toml_str(
        r#"
name = "loop"

[workflow]
kind = "dag"

[[workflow.nodes]]
name = "a"
depends_on = ["b"]
task = { type = "instruct", prompt = "A" }

[[workflow.nodes]]
name = "b"
depends_on = ["a"]
task = { type = "instruct", prompt = "B" }
"#,
    )
    .unwrap_err();

    assert!(matches!(err, PromptlineError::Planning(_)));
}

#[test]
fn test_unknown_keys_are_rejected() {
    let err = Job::from_toml_str(
        "name = \"x\"\nretries = 3\n[workflow]\nkind = \"serial\"\ntasks = [{ type = \"instruct\", prompt = \"p\" }]",
    )
    .unwrap_err();
    assert!(matches!(err, PromptlineError::Planning(_)));
}
