use std::error::Error;
use std::path::Path;
use std::time::Duration;

use dagkernel::channel::{Channel, LocalChannel, SshChannel};
use dagkernel::errors::ChannelError;
use dagkernel::retry::{Backoff, RetryPolicy};
use dagkernel::rundir::{make_rundir, outputs_dir};
use dagkernel::types::{format_walltime, parse_duration};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn local_channel_runs_commands_in_its_directory() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let channel = LocalChannel::in_dir(tmp.path());

    let out = channel.execute("pwd && echo oops >&2 && exit 3").await?;
    assert_eq!(out.exit_code, 3);
    assert!(!out.success());
    assert!(out.stdout.trim().ends_with(&*tmp.path().file_name().unwrap().to_string_lossy()));
    assert_eq!(out.stderr.trim(), "oops");
    assert_eq!(channel.label(), "local");
    Ok(())
}

#[tokio::test]
async fn local_channel_copies_files_relative_to_its_directory() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let source = tmp.path().join("source.txt");
    std::fs::write(&source, "payload")?;

    let channel = LocalChannel::in_dir(tmp.path().join("remote"));
    channel.push_file(&source, Path::new("nested/copy.txt")).await?;
    assert_eq!(
        std::fs::read_to_string(tmp.path().join("remote/nested/copy.txt"))?,
        "payload"
    );

    let back = tmp.path().join("back/out.txt");
    channel.pull_file(Path::new("nested/copy.txt"), &back).await?;
    assert_eq!(std::fs::read_to_string(&back)?, "payload");

    let err = channel
        .pull_file(Path::new("missing.txt"), &back)
        .await
        .unwrap_err();
    assert!(matches!(err, ChannelError::Transfer { .. }));
    channel.close().await?;
    Ok(())
}

#[test]
fn ssh_channel_is_labelled_by_host() {
    let channel = SshChannel::new("login.cluster.org", Some("me".to_string()), Some(2222));
    assert_eq!(channel.label(), "ssh:login.cluster.org");
}

#[test]
fn ssh_channels_to_one_host_use_separate_control_sockets() {
    let first = SshChannel::new("login.cluster.org", Some("me".to_string()), None);
    let second = SshChannel::new("login.cluster.org", Some("me".to_string()), None);
    assert_ne!(first.control_path(), second.control_path());
    assert!(first.control_path().starts_with(std::env::temp_dir()));
}

#[test]
fn run_directories_are_numbered_in_sequence() -> TestResult {
    let tmp = tempfile::tempdir()?;
    std::fs::create_dir(tmp.path().join("007"))?;
    std::fs::create_dir(tmp.path().join("notes"))?;

    let first = make_rundir(tmp.path())?;
    let second = make_rundir(tmp.path())?;
    assert_eq!(first, tmp.path().join("008"));
    assert_eq!(second, tmp.path().join("009"));
    assert!(first.is_dir());

    assert_eq!(
        outputs_dir(&first, 12),
        tmp.path().join("008/outputs/task_12")
    );
    Ok(())
}

#[test]
fn durations_accept_units_and_walltimes() {
    assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
    assert_eq!(parse_duration(" 3s "), Ok(Duration::from_secs(3)));
    assert_eq!(parse_duration("10m"), Ok(Duration::from_secs(600)));
    assert_eq!(parse_duration("2h"), Ok(Duration::from_secs(7200)));
    assert_eq!(parse_duration("01:02:03"), Ok(Duration::from_secs(3723)));
    assert_eq!(parse_duration("05:00"), Ok(Duration::from_secs(300)));

    for bad in ["", "10", "5d", "1:2:3:4", "a:b"] {
        assert!(parse_duration(bad).is_err(), "{bad:?} should be rejected");
    }
}

#[test]
fn walltimes_render_as_hours_minutes_seconds() {
    assert_eq!(format_walltime(Duration::from_secs(59)), "00:00:59");
    assert_eq!(format_walltime(Duration::from_secs(3723)), "01:02:03");
    assert_eq!(format_walltime(Duration::from_secs(100 * 3600)), "100:00:00");
}

#[test]
fn backoff_doubles_until_capped() {
    let backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1));
    assert_eq!(backoff.delay(0), Duration::ZERO);
    assert_eq!(backoff.delay(1), Duration::from_millis(100));
    assert_eq!(backoff.delay(2), Duration::from_millis(200));
    assert_eq!(backoff.delay(4), Duration::from_millis(800));
    assert_eq!(backoff.delay(5), Duration::from_secs(1));
    assert_eq!(backoff.delay(64), Duration::from_secs(1));

    let policy = RetryPolicy::with_retries(2);
    assert_eq!(policy.budget(None), 2);
    assert_eq!(policy.budget(Some(0)), 0);
    assert_eq!(policy.delay_after(3), Duration::ZERO);
}
