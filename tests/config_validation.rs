use std::error::Error;
use std::time::Duration;

use serde_json::json;

use dagkernel::config::{
    build_app, kernel_options, load_and_validate, parse_and_validate, ArgRef, ChannelConfig,
    ExecutorKind, ExecutorSpec, IMPLICIT_EXECUTOR,
};
use dagkernel::errors::KernelError;
use dagkernel::provider::SchedulerKind;
use dagkernel::types::ExecutorHint;
use dagkernel_test_utils::builders::{ConfigBuilder, TaskBuilder};

type TestResult = Result<(), Box<dyn Error>>;

fn config_error(builder: &ConfigBuilder) -> String {
    match builder.try_build() {
        Err(KernelError::ConfigError(msg)) => msg,
        Err(other) => panic!("expected ConfigError, got {other:?}"),
        Ok(_) => panic!("expected ConfigError, config was accepted"),
    }
}

const SLURM_EXECUTOR: &str = r#"
[executor.cluster]
kind = "batch"
max_workers = 10
poll_interval = "2s"
max_held = "10m"

[executor.cluster.provider]
scheduler = "slurm"
script_dir = "/scratch/me/jobs"
walltime = "01:30:00"
nodes = 2
queue = "debug"

[executor.cluster.provider.channel]
kind = "ssh"
host = "login.cluster.org"
user = "me"
"#;

#[test]
fn minimal_config_gets_an_implicit_local_executor() -> TestResult {
    let config = ConfigBuilder::new()
        .task("A", TaskBuilder::new("echo 5"))
        .try_build()?;

    let implicit = config.executors.get(IMPLICIT_EXECUTOR).expect("implicit executor");
    assert_eq!(implicit.kind(), ExecutorKind::Local);
    assert!(implicit.max_workers() >= 1);

    assert_eq!(config.kernel.run_dir, std::path::PathBuf::from("runinfo"));
    assert_eq!(config.kernel.retries, 0);
    assert_eq!(config.kernel.shutdown_timeout, Duration::from_secs(30));
    assert!(!config.kernel.fail_fast);
    Ok(())
}

#[test]
fn batch_executor_section_is_fully_parsed() -> TestResult {
    let config = ConfigBuilder::new()
        .section(SLURM_EXECUTOR)
        .task("sim", TaskBuilder::new("./sim").walltime("10m"))
        .try_build()?;

    let Some(ExecutorSpec::Batch {
        max_workers,
        settings,
        provider,
    }) = config.executors.get("cluster")
    else {
        panic!("cluster should be a batch executor");
    };
    assert_eq!(*max_workers, 10);
    assert_eq!(settings.poll_interval, Duration::from_secs(2));
    assert_eq!(settings.max_held, Some(Duration::from_secs(600)));
    assert_eq!(settings.status_retries, 3);

    assert_eq!(provider.scheduler, SchedulerKind::Slurm);
    assert_eq!(provider.resources.walltime, Some(Duration::from_secs(5400)));
    assert_eq!(provider.resources.nodes, 2);
    assert_eq!(provider.resources.tasks_per_node, 1);
    assert_eq!(provider.resources.queue.as_deref(), Some("debug"));
    assert_eq!(
        provider.channel,
        ChannelConfig::Ssh {
            host: "login.cluster.org".to_string(),
            user: Some("me".to_string()),
            port: None,
        }
    );

    assert_eq!(
        config.tasks["sim"].walltime,
        Some(Duration::from_secs(600))
    );
    Ok(())
}

#[test]
fn kernel_section_becomes_kernel_options() -> TestResult {
    let config = ConfigBuilder::new()
        .kernel("run_dir", "\"out/runs\"")
        .kernel("retries", "2")
        .kernel("retry_delay", "\"500ms\"")
        .kernel("shutdown_timeout", "\"5s\"")
        .kernel("fail_fast", "true")
        .task("A", TaskBuilder::new("true"))
        .try_build()?;

    let options = kernel_options(&config);
    assert_eq!(options.run_dir, std::path::PathBuf::from("out/runs"));
    assert_eq!(options.retry.default_retries, 2);
    assert_eq!(options.retry.backoff.base, Duration::from_millis(500));
    assert_eq!(options.retry.backoff.max, Duration::from_secs(60));
    assert_eq!(options.shutdown_timeout, Duration::from_secs(5));
    assert!(options.fail_fast);
    Ok(())
}

#[test]
fn argument_references_are_decoded() -> TestResult {
    let config = ConfigBuilder::new()
        .task("A", TaskBuilder::new("echo 1").outputs(&["a.txt"]))
        .task(
            "B",
            TaskBuilder::new("cat {data} {x} {n} {lit}")
                .arg_from("x", "A")
                .arg("data", "\"@A:a.txt\"")
                .arg("n", "3")
                .arg("lit", "\"@@home\""),
        )
        .try_build()?;

    let b = &config.tasks["B"];
    assert_eq!(b.args["x"], ArgRef::Task("A".to_string()));
    assert_eq!(
        b.args["data"],
        ArgRef::Output {
            task: "A".to_string(),
            file: "a.txt".to_string(),
        }
    );
    assert_eq!(b.args["n"], ArgRef::Value(json!(3)));
    assert_eq!(b.args["lit"], ArgRef::Value(json!("@home")));
    assert_eq!(b.dependencies(), vec!["A"]);
    Ok(())
}

#[test]
fn topological_order_puts_dependencies_first() -> TestResult {
    let config = ConfigBuilder::new()
        .task("report", TaskBuilder::new("echo {x}").arg_from("x", "merge"))
        .task(
            "merge",
            TaskBuilder::new("echo {a} {b}")
                .arg_from("a", "left")
                .arg_from("b", "right"),
        )
        .task("left", TaskBuilder::new("echo 1"))
        .task("right", TaskBuilder::new("echo 2").after(&["left"]))
        .try_build()?;

    let order = config.topological_order();
    let pos = |name: &str| order.iter().position(|n| n == name).expect("task in order");
    assert_eq!(order.len(), 4);
    assert!(pos("left") < pos("right"));
    assert!(pos("right") < pos("merge"));
    assert!(pos("left") < pos("merge"));
    assert!(pos("merge") < pos("report"));
    Ok(())
}

#[test]
fn cycle_is_reported_as_dag_cycle() {
    let builder = ConfigBuilder::new()
        .task("A", TaskBuilder::new("echo").after(&["C"]))
        .task("B", TaskBuilder::new("echo").arg_from("x", "A"))
        .task("C", TaskBuilder::new("echo").arg_from("x", "B"));

    match builder.try_build() {
        Err(KernelError::DagCycle(msg)) => assert!(msg.contains("cycle detected")),
        other => panic!("expected DagCycle, got {other:?}"),
    }
}

#[test]
fn self_dependency_is_rejected() {
    let builder = ConfigBuilder::new().task("A", TaskBuilder::new("echo").after(&["A"]));
    assert!(config_error(&builder).contains("cannot depend on itself"));
}

#[test]
fn unknown_dependency_is_rejected() {
    let builder = ConfigBuilder::new().task("A", TaskBuilder::new("echo {x}").arg_from("x", "ghost"));
    assert_eq!(
        config_error(&builder),
        "task 'A' has unknown dependency 'ghost'"
    );
}

#[test]
fn reference_to_an_undeclared_output_is_rejected() {
    let builder = ConfigBuilder::new()
        .task("A", TaskBuilder::new("echo").outputs(&["a.txt"]))
        .task("B", TaskBuilder::new("cat {f}").arg("f", "\"@A:b.txt\""));
    assert!(config_error(&builder).contains("output 'b.txt'"));
}

#[test]
fn unknown_executor_is_rejected() {
    let builder = ConfigBuilder::new()
        .local_executor("local", 2)
        .task("A", TaskBuilder::new("echo").executor("gpu"));
    match builder.try_build() {
        Err(KernelError::UnknownExecutor(name)) => assert_eq!(name, "gpu"),
        other => panic!("expected UnknownExecutor, got {other:?}"),
    }

    let builder = ConfigBuilder::new()
        .kernel("default_executor", "\"nowhere\"")
        .task("A", TaskBuilder::new("echo"));
    assert!(matches!(
        builder.try_build(),
        Err(KernelError::UnknownExecutor(name)) if name == "nowhere"
    ));
}

#[test]
fn executor_lists_are_accepted_when_every_name_exists() -> TestResult {
    let config = ConfigBuilder::new()
        .local_executor("a", 1)
        .local_executor("b", 1)
        .kernel("default_executor", "\"a\"")
        .section("[task.T]\ncmd = \"true\"\nexecutor = [\"a\", \"b\"]\n")
        .task("U", TaskBuilder::new("true"))
        .try_build()?;

    assert_eq!(
        config.tasks["T"].executor,
        ExecutorHint::AnyOf(vec!["a".to_string(), "b".to_string()])
    );
    assert_eq!(config.tasks["U"].executor, ExecutorHint::Default);
    Ok(())
}

#[test]
fn ambiguous_default_executor_is_rejected() {
    let builder = ConfigBuilder::new()
        .local_executor("a", 1)
        .local_executor("b", 1)
        .task("A", TaskBuilder::new("echo"));
    assert!(config_error(&builder).contains("default_executor"));
}

#[test]
fn invalid_executor_sections_are_rejected() {
    let zero_workers = ConfigBuilder::new()
        .local_executor("local", 0)
        .task("A", TaskBuilder::new("echo"));
    assert!(config_error(&zero_workers).contains("max_workers"));

    let batch_without_provider = ConfigBuilder::new()
        .section("[executor.hpc]\nkind = \"batch\"\n")
        .task("A", TaskBuilder::new("echo"));
    assert!(config_error(&batch_without_provider).contains("needs a [executor.hpc.provider]"));

    let local_with_provider = ConfigBuilder::new()
        .section("[executor.l]\nkind = \"local\"\n\n[executor.l.provider]\nscheduler = \"slurm\"\n")
        .task("A", TaskBuilder::new("echo"));
    assert!(config_error(&local_with_provider).contains("cannot have a provider"));

    let zero_poll = ConfigBuilder::new()
        .section(&SLURM_EXECUTOR.replace("\"2s\"", "\"0s\""))
        .task("A", TaskBuilder::new("echo"));
    assert!(config_error(&zero_poll).contains("poll_interval"));
}

#[test]
fn bad_durations_name_the_offending_field() {
    let builder = ConfigBuilder::new().task("A", TaskBuilder::new("echo").walltime("ten minutes"));
    assert!(config_error(&builder).contains("[task.A].walltime"));

    let builder = ConfigBuilder::new()
        .kernel("shutdown_timeout", "\"5 parsecs\"")
        .task("A", TaskBuilder::new("echo"));
    assert!(config_error(&builder).contains("[kernel].shutdown_timeout"));
}

#[test]
fn empty_workflows_and_commands_are_rejected() {
    assert!(config_error(&ConfigBuilder::new().local_executor("l", 1)).contains("at least one"));

    let builder = ConfigBuilder::new().task("A", TaskBuilder::new("   "));
    assert!(config_error(&builder).contains("empty `cmd`"));
}

#[test]
fn unknown_keys_are_a_toml_error() {
    let result = parse_and_validate("[task.A]\ncmd = \"echo\"\nretires = 3\n");
    assert!(matches!(result, Err(KernelError::TomlError(_))));
}

#[test]
fn task_becomes_a_shell_app() -> TestResult {
    let config = ConfigBuilder::new()
        .task(
            "A",
            TaskBuilder::new("touch {outputs}")
                .outputs(&["x.dat"])
                .retries(2)
                .walltime("30s"),
        )
        .try_build()?;

    let app = build_app(&config.tasks["A"]);
    assert!(app.is_shell());
    assert_eq!(app.name, "A");
    assert_eq!(app.outputs, vec!["x.dat".to_string()]);
    assert_eq!(app.retries, Some(2));
    assert_eq!(app.walltime, Some(Duration::from_secs(30)));
    Ok(())
}

#[test]
fn config_files_are_loaded_from_disk() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let path = ConfigBuilder::new()
        .local_executor("local", 3)
        .task("A", TaskBuilder::new("echo 1"))
        .write_to(tmp.path());

    let config = load_and_validate(&path)?;
    assert_eq!(config.executors["local"].max_workers(), 3);

    assert!(matches!(
        load_and_validate(tmp.path().join("missing.toml")),
        Err(KernelError::IoError(_))
    ));
    Ok(())
}
