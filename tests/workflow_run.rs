use std::error::Error;
use std::path::Path;
use std::time::Duration;

use clap::Parser;
use serde_json::json;
use tracing::Level;

use dagkernel::cli::{CliArgs, LogLevel};
use dagkernel::logging::resolve_level;
use dagkernel::workflow::{run_workflow, submit_all};
use dagkernel::DataFlowKernel;
use dagkernel_test_utils::builders::{ConfigBuilder, TaskBuilder};
use dagkernel_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

/// Config rooted in `dir`: run directories and task working directory both
/// live there.
fn base_config(dir: &Path) -> ConfigBuilder {
    ConfigBuilder::new()
        .kernel(
            "run_dir",
            &format!("{:?}", dir.join("runinfo").display().to_string()),
        )
        .section(&format!(
            "[executor.local]\nkind = \"local\"\nmax_workers = 2\nworkdir = {:?}\n",
            dir.display().to_string()
        ))
}

#[tokio::test]
async fn values_and_files_flow_between_configured_tasks() -> TestResult {
    init_tracing();
    let tmp = tempfile::tempdir()?;
    let config = base_config(tmp.path())
        .task("A", TaskBuilder::new("echo 5"))
        .task("B", TaskBuilder::new("echo $(( {x} + 1 ))").arg_from("x", "A"))
        .task(
            "C",
            TaskBuilder::new("echo hello > {outputs}").outputs(&["c.txt"]),
        )
        .task("D", TaskBuilder::new("cat {f}").arg("f", "\"@C:c.txt\""))
        .task("E", TaskBuilder::new("echo {label} {n}").arg("label", "\"run\"").arg("n", "7"))
        .build();

    let kernel = DataFlowKernel::from_config(&config)?;
    let report = with_timeout(run_workflow(&kernel, &config)).await?;

    assert!(report.all_succeeded());
    assert_eq!(report.results.len(), 5);
    let value = |name: &str| {
        report
            .get(name)
            .and_then(|r| r.outcome.as_ref().ok())
            .map(|v| v.value.clone())
    };
    assert_eq!(value("A"), Some(json!(5)));
    assert_eq!(value("B"), Some(json!(6)));
    assert_eq!(value("D"), Some(json!("hello")));
    assert_eq!(value("E"), Some(json!("run 7")));

    let c = report.get("C").expect("C ran");
    let staged = &c.outcome.as_ref().map_err(Clone::clone)?.outputs[0];
    assert!(staged.starts_with(kernel.run_dir()));
    assert!(c.to_string().contains("c.txt"));

    kernel.shutdown(None).await?;
    Ok(())
}

#[tokio::test]
async fn failure_marks_downstream_tasks_and_spares_the_rest() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let config = base_config(tmp.path())
        .task("broken", TaskBuilder::new("exit 4"))
        .task("after_broken", TaskBuilder::new("echo never").after(&["broken"]))
        .task("uses_broken", TaskBuilder::new("echo {x}").arg_from("x", "broken"))
        .task("fine", TaskBuilder::new("echo ok"))
        .build();

    let kernel = DataFlowKernel::from_config(&config)?;
    let report = with_timeout(run_workflow(&kernel, &config)).await?;

    let failed: Vec<&str> = report.failed().map(|r| r.name.as_str()).collect();
    assert_eq!(failed.len(), 3);
    assert!(!failed.contains(&"fine"));

    let kind = |name: &str| {
        report
            .get(name)
            .and_then(|r| r.outcome.as_ref().err())
            .map(|e| e.kind())
    };
    assert_eq!(kind("broken"), Some("execution_failed"));
    assert_eq!(kind("after_broken"), Some("dependency_failed"));
    assert_eq!(kind("uses_broken"), Some("dependency_failed"));
    assert!(report.get("broken").unwrap().to_string().contains("failed"));

    let status = kernel.status().await?;
    assert_eq!(status.failed, 1);
    assert_eq!(status.dep_failed, 2);
    assert_eq!(status.completed, 1);

    kernel.shutdown(None).await?;
    Ok(())
}

#[tokio::test]
async fn configured_retries_apply_to_tasks() -> TestResult {
    let tmp = tempfile::tempdir()?;
    // Fails on the first run, succeeds once the marker exists.
    let config = base_config(tmp.path())
        .task(
            "flaky",
            TaskBuilder::new("if [ -e marker ]; then echo recovered; else touch marker; exit 1; fi")
                .retries(1),
        )
        .build();

    let kernel = DataFlowKernel::from_config(&config)?;
    let submitted = submit_all(&kernel, &config)?;
    let (_, future) = &submitted[0];
    assert_eq!(with_timeout(future.result()).await?, json!("recovered"));

    let snapshot = kernel.task(future.task_id()).await?.expect("known");
    assert_eq!(snapshot.attempts, 2);

    kernel.shutdown(None).await?;
    Ok(())
}

#[tokio::test]
async fn run_reports_failure_through_its_return_value() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let ok_path = base_config(tmp.path())
        .task("A", TaskBuilder::new("true"))
        .write_to(tmp.path());

    let args = CliArgs::try_parse_from(["dagkernel", "--config", &ok_path.display().to_string()])?;
    assert!(dagkernel::run(args).await?);

    let failing_dir = tmp.path().join("failing");
    std::fs::create_dir_all(&failing_dir)?;
    let failing_path = base_config(&failing_dir)
        .task("A", TaskBuilder::new("exit 1"))
        .write_to(&failing_dir);
    let args = CliArgs::try_parse_from([
        "dagkernel",
        "--config",
        &failing_path.display().to_string(),
        "--shutdown-timeout",
        "2s",
    ])?;
    assert!(!dagkernel::run(args).await?);
    Ok(())
}

#[tokio::test]
async fn fail_fast_workflow_stops_long_running_siblings() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let config = base_config(tmp.path())
        .kernel("fail_fast", "true")
        .task("A", TaskBuilder::new("exit 1"))
        .task("B", TaskBuilder::new("sleep 30"))
        .task("C", TaskBuilder::new("echo {x}").arg_from("x", "B"))
        .build();

    let kernel = DataFlowKernel::from_config(&config)?;
    let report = with_timeout(run_workflow(&kernel, &config)).await?;

    let kind = |name: &str| {
        report
            .get(name)
            .and_then(|r| r.outcome.as_ref().err())
            .map(|e| e.kind())
    };
    assert_eq!(kind("A"), Some("execution_failed"));
    assert_eq!(kind("B"), Some("run_aborted"));
    assert_eq!(kind("C"), Some("run_aborted"));

    kernel.shutdown(Some(Duration::from_secs(2))).await?;
    Ok(())
}

#[tokio::test]
async fn dry_run_executes_nothing() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let path = base_config(tmp.path())
        .task("A", TaskBuilder::new("touch should-not-exist"))
        .write_to(tmp.path());

    let args = CliArgs::try_parse_from([
        "dagkernel",
        "--config",
        &path.display().to_string(),
        "--dry-run",
    ])?;
    assert!(dagkernel::run(args).await?);
    assert!(!tmp.path().join("should-not-exist").exists());
    assert!(!tmp.path().join("runinfo").exists());
    Ok(())
}

#[tokio::test]
async fn invalid_config_is_an_error() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let path = ConfigBuilder::new()
        .task("A", TaskBuilder::new("echo").after(&["missing"]))
        .write_to(tmp.path());

    let args = CliArgs::try_parse_from(["dagkernel", "--config", &path.display().to_string()])?;
    let err = dagkernel::run(args).await.unwrap_err();
    assert!(err.to_string().contains("unknown dependency 'missing'"));
    Ok(())
}

#[test]
fn cli_defaults_and_flags() -> TestResult {
    let args = CliArgs::try_parse_from(["dagkernel"])?;
    assert_eq!(args.config, "dagkernel.toml");
    assert!(!args.dry_run);
    assert!(args.log_level.is_none());
    assert!(args.shutdown_timeout.is_none());
    assert!(!args.fail_fast);

    let args = CliArgs::try_parse_from([
        "dagkernel",
        "--log-level",
        "debug",
        "--shutdown-timeout",
        "5m",
        "--fail-fast",
    ])?;
    assert!(matches!(args.log_level, Some(LogLevel::Debug)));
    assert!(args.fail_fast);
    assert_eq!(args.shutdown_timeout, Some(Duration::from_secs(300)));

    assert!(CliArgs::try_parse_from(["dagkernel", "--shutdown-timeout", "soon"]).is_err());
    Ok(())
}

#[test]
fn log_level_prefers_the_flag_over_the_environment() {
    assert_eq!(resolve_level(Some(LogLevel::Warn), Some("trace")), Level::WARN);
    assert_eq!(resolve_level(None, Some("DEBUG")), Level::DEBUG);
    assert_eq!(resolve_level(None, Some("warning")), Level::WARN);
    assert_eq!(resolve_level(None, Some("loud")), Level::INFO);
    assert_eq!(resolve_level(None, None), Level::INFO);
}
