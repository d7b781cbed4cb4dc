use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use dagkernel::channel::CommandOutput;
use dagkernel::provider::{BatchProvider, JobId, JobRequest, JobState, ResourceSpec, SchedulerKind};
use dagkernel_test_utils::scripted_channel::{exit, ok, ScriptedChannel};

type TestResult = Result<(), Box<dyn Error>>;

fn provider(kind: SchedulerKind, resources: ResourceSpec) -> BatchProvider {
    BatchProvider::new(
        kind,
        resources,
        PathBuf::from("/home/me/scripts"),
        Box::new(ScriptedChannel::new()),
    )
}

fn request(walltime: Option<Duration>) -> JobRequest {
    JobRequest {
        job_name: "dagkernel_sim_3_1".to_string(),
        command: "./simulate --steps 10".to_string(),
        walltime,
    }
}

fn render(p: &BatchProvider, req: &JobRequest) -> Result<(Vec<(String, String)>, String), Box<dyn Error>> {
    let job = p.job_paths(&req.job_name);
    Ok(p.render_job(req, &job)?)
}

#[test]
fn slurm_script_carries_resource_directives() -> TestResult {
    let p = provider(
        SchedulerKind::Slurm,
        ResourceSpec {
            walltime: Some(Duration::from_secs(3600)),
            nodes: 2,
            tasks_per_node: 8,
            queue: Some("debug".to_string()),
            account: Some("proj42".to_string()),
            scheduler_options: Some("#SBATCH --exclusive".to_string()),
        },
    );
    let (files, submit) = render(&p, &request(None))?;

    assert_eq!(submit, "dagkernel_sim_3_1.sh");
    assert_eq!(files.len(), 1);
    let script = &files[0].1;
    for line in [
        "#SBATCH --job-name=dagkernel_sim_3_1",
        "#SBATCH --nodes=2",
        "#SBATCH --ntasks-per-node=8",
        "#SBATCH --time=01:00:00",
        "#SBATCH --partition=debug",
        "#SBATCH --account=proj42",
        "#SBATCH --exclusive",
        "cd /home/me/scripts/dagkernel_sim_3_1 || exit 1",
        "( ./simulate --steps 10 ) > /home/me/scripts/dagkernel_sim_3_1.stdout 2> /home/me/scripts/dagkernel_sim_3_1.stderr",
        "echo $? > /home/me/scripts/dagkernel_sim_3_1.ec",
    ] {
        assert!(script.lines().any(|l| l == line), "missing {line:?} in:\n{script}");
    }
    Ok(())
}

#[test]
fn task_walltime_overrides_the_provider_default() -> TestResult {
    let p = provider(
        SchedulerKind::Torque,
        ResourceSpec {
            walltime: Some(Duration::from_secs(3600)),
            ..ResourceSpec::default()
        },
    );
    let (files, _) = render(&p, &request(Some(Duration::from_secs(90))))?;
    let script = &files[0].1;

    assert!(script.contains("#PBS -N dagkernel_sim_3_1"));
    assert!(script.contains("#PBS -l nodes=1:ppn=1"));
    assert!(script.contains("#PBS -l walltime=00:01:30"));
    assert!(!script.contains("#PBS -q"));
    Ok(())
}

#[test]
fn optional_directives_are_omitted() -> TestResult {
    let p = provider(SchedulerKind::Cobalt, ResourceSpec::default());
    let (files, _) = render(&p, &request(None))?;
    let script = &files[0].1;

    assert!(script.contains("#COBALT -n 1"));
    assert!(!script.contains("#COBALT -t"));
    assert!(!script.contains("#COBALT -A"));
    Ok(())
}

#[test]
fn condor_renders_a_description_and_an_executable() -> TestResult {
    let p = provider(
        SchedulerKind::Condor,
        ResourceSpec {
            walltime: Some(Duration::from_secs(120)),
            tasks_per_node: 4,
            ..ResourceSpec::default()
        },
    );
    let (files, submit) = render(&p, &request(None))?;

    assert_eq!(submit, "dagkernel_sim_3_1.submit");
    let names: Vec<&str> = files.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["dagkernel_sim_3_1.sh", "dagkernel_sim_3_1.submit"]);

    let executable = &files[0].1;
    assert!(executable.starts_with("#!/bin/sh"));
    assert!(executable.contains("./simulate --steps 10"));

    let description = &files[1].1;
    assert!(description.contains("executable = /home/me/scripts/dagkernel_sim_3_1.sh"));
    assert!(description.contains("request_cpus = 4"));
    assert!(description.contains("> 120"));
    assert!(description.trim_end().ends_with("queue 1"));
    Ok(())
}

#[test]
fn custom_template_replaces_the_default() -> TestResult {
    let p = provider(SchedulerKind::Slurm, ResourceSpec::default())
        .with_template("#!/bin/sh\n# {{ job_name }} on {{ nodes }} node(s)\n{{ body }}");
    let (files, _) = render(&p, &request(None))?;
    let script = &files[0].1;

    assert!(script.contains("# dagkernel_sim_3_1 on 1 node(s)"));
    assert!(!script.contains("#SBATCH"));
    Ok(())
}

#[test]
fn template_referencing_an_unknown_field_is_an_error() {
    let p = provider(SchedulerKind::Slurm, ResourceSpec::default())
        .with_template("{{ no_such_field }}");
    assert!(render(&p, &request(None)).is_err());
}

#[test]
fn job_ids_are_parsed_per_scheduler() {
    let cases = [
        (SchedulerKind::Slurm, "Submitted batch job 123456\n", Some("123456")),
        (
            SchedulerKind::Condor,
            "Submitting job(s).\n1 job(s) submitted to cluster 88.\n",
            Some("88"),
        ),
        (SchedulerKind::Torque, "4711.pbs-server.example.org\n", Some("4711.pbs-server.example.org")),
        (SchedulerKind::Cobalt, "  991\n", Some("991")),
        (SchedulerKind::Local, "31337\n", Some("31337")),
        (SchedulerKind::Slurm, "sbatch: error: Batch job submission failed", None),
    ];
    for (kind, stdout, expected) in cases {
        assert_eq!(
            kind.parse_job_id(stdout).map(|j| j.0),
            expected.map(str::to_string),
            "{kind}: {stdout:?}"
        );
    }
}

#[test]
fn slurm_status_codes_map_to_job_states() {
    let job = JobId("42".to_string());
    let cases = [
        (ok("PD Priority"), JobState::Queued),
        (ok("PD (JobHeldAdmin)"), JobState::Held),
        (ok("R None"), JobState::Running),
        (ok("CG None"), JobState::Running),
        (ok("S None"), JobState::Held),
        (ok("CD None"), JobState::Done),
        (ok("TO None"), JobState::Failed),
        (ok("OOM None"), JobState::Failed),
        (ok(""), JobState::Done),
        (exit(1, "slurm_load_jobs error: Invalid job id specified"), JobState::Done),
        (exit(1, "slurm_load_jobs error: Socket timed out"), JobState::Unknown),
        (ok("XX None"), JobState::Unknown),
    ];
    for (out, expected) in cases {
        assert_eq!(
            SchedulerKind::Slurm.parse_status(&job, &out),
            expected,
            "{out:?}"
        );
    }
}

#[test]
fn condor_torque_and_cobalt_status_parsing() {
    let job = JobId("55".to_string());

    let condor = |stdout: &str| SchedulerKind::Condor.parse_status(&job, &ok(stdout));
    assert_eq!(condor("1"), JobState::Queued);
    assert_eq!(condor("2"), JobState::Running);
    assert_eq!(condor("5"), JobState::Held);
    assert_eq!(condor("3"), JobState::Failed);
    assert_eq!(condor("4"), JobState::Done);
    assert_eq!(condor(""), JobState::Done);

    let torque = |out: CommandOutput| SchedulerKind::Torque.parse_status(&job, &out);
    assert_eq!(
        torque(ok("Job Id: 55.server\n    job_state = R\n    queue = batch\n")),
        JobState::Running
    );
    assert_eq!(torque(ok("    job_state = H\n")), JobState::Held);
    assert_eq!(torque(ok("    job_state = C\n")), JobState::Done);
    assert_eq!(torque(exit(153, "qstat: Unknown Job Id 55.server")), JobState::Done);
    assert_eq!(torque(ok("garbage")), JobState::Unknown);

    let cobalt = |stdout: &str| SchedulerKind::Cobalt.parse_status(&job, &ok(stdout));
    let header = "JobID  User  WallTime  Nodes  State  Location\n======\n";
    assert_eq!(cobalt(&format!("{header}55  me  00:10:00  1  queued  None\n")), JobState::Queued);
    assert_eq!(cobalt(&format!("{header}55  me  00:10:00  1  running  n01\n")), JobState::Running);
    assert_eq!(cobalt(&format!("{header}55  me  00:10:00  1  user_hold  None\n")), JobState::Held);
    assert_eq!(cobalt(header), JobState::Done);
}

#[test]
fn local_process_status_comes_from_ps() {
    let job = JobId("1234".to_string());
    let ps = |out: CommandOutput| SchedulerKind::Local.parse_status(&job, &out);
    assert_eq!(ps(ok("S+\n")), JobState::Running);
    assert_eq!(ps(ok("T\n")), JobState::Held);
    assert_eq!(ps(ok("Z\n")), JobState::Done);
    assert_eq!(ps(exit(1, "")), JobState::Done);
}

#[test]
fn commands_quote_their_arguments() {
    let job = JobId("12; rm -rf /".to_string());
    assert_eq!(
        SchedulerKind::Slurm.cancel_command(&job),
        "scancel '12; rm -rf /'"
    );
    assert_eq!(
        SchedulerKind::Torque.status_command(&JobId("7.srv".to_string())),
        "qstat -f 7.srv"
    );
    assert_eq!(
        SchedulerKind::Condor.submit_command("/tmp/job one.submit"),
        "condor_submit '/tmp/job one.submit'"
    );
}

#[tokio::test]
async fn launch_creates_directories_then_submits() -> TestResult {
    use dagkernel::provider::Provider;

    let tmp = tempfile::tempdir()?;
    let channel = ScriptedChannel::new().on("qsub", vec![ok("88.server\n")]);
    let p = BatchProvider::new(
        SchedulerKind::Torque,
        ResourceSpec::default(),
        PathBuf::from("/remote/scripts"),
        Box::new(channel.clone()),
    );
    p.set_local_dir(tmp.path().to_path_buf());

    let job = p.launch(&request(None)).await?;
    assert_eq!(job.id, JobId("88.server".to_string()));
    assert_eq!(job.exitcode, PathBuf::from("/remote/scripts/dagkernel_sim_3_1.ec"));
    assert_eq!(
        channel.commands(),
        vec![
            "mkdir -p /remote/scripts /remote/scripts/dagkernel_sim_3_1".to_string(),
            "qsub /remote/scripts/dagkernel_sim_3_1.sh".to_string(),
        ]
    );
    assert!(tmp.path().join("dagkernel_sim_3_1.sh").is_file());
    assert_eq!(p.label(), "torque@scripted");
    Ok(())
}

#[tokio::test]
async fn unparseable_submit_output_is_an_error() {
    use dagkernel::provider::Provider;

    let tmp = tempfile::tempdir().unwrap();
    let channel = ScriptedChannel::new().on("sbatch", vec![ok("queued somewhere")]);
    let p = BatchProvider::new(
        SchedulerKind::Slurm,
        ResourceSpec::default(),
        PathBuf::from("/s"),
        Box::new(channel),
    );
    p.set_local_dir(tmp.path().to_path_buf());

    let err = p.launch(&request(None)).await.unwrap_err();
    assert!(err.to_string().contains("could not parse slurm job id"));
}
