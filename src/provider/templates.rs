// src/provider/templates.rs

//! Submit script templates, rendered with minijinja.
//!
//! Every template sees the [`JobContext`](crate::provider::resources::JobContext)
//! fields plus `body` (the wrapper that runs the command), `script_path` and
//! `scheduler_stdout` / `scheduler_stderr`.

use minijinja::Environment;
use serde::Serialize;

use crate::errors::Result;
use crate::provider::resources::JobContext;

/// Runs the command in `workdir` and records its exit code next to the
/// captured output.
pub const WRAPPER_BODY: &str = "\
cd {{ workdir }} || exit 1
( {{ command }} ) > {{ stdout }} 2> {{ stderr }}
echo $? > {{ exitcode }}
";

pub const SLURM_TEMPLATE: &str = "\
#!/bin/bash
#SBATCH --job-name={{ job_name }}
#SBATCH --nodes={{ nodes }}
#SBATCH --ntasks-per-node={{ tasks_per_node }}
{% if walltime %}
#SBATCH --time={{ walltime }}
{% endif %}
{% if queue %}
#SBATCH --partition={{ queue }}
{% endif %}
{% if account %}
#SBATCH --account={{ account }}
{% endif %}
#SBATCH --output={{ scheduler_stdout }}
#SBATCH --error={{ scheduler_stderr }}
{% if scheduler_options %}
{{ scheduler_options }}
{% endif %}

{{ body }}";

pub const TORQUE_TEMPLATE: &str = "\
#!/bin/bash
#PBS -N {{ job_name }}
#PBS -l nodes={{ nodes }}:ppn={{ tasks_per_node }}
{% if walltime %}
#PBS -l walltime={{ walltime }}
{% endif %}
{% if queue %}
#PBS -q {{ queue }}
{% endif %}
{% if account %}
#PBS -A {{ account }}
{% endif %}
#PBS -o {{ scheduler_stdout }}
#PBS -e {{ scheduler_stderr }}
{% if scheduler_options %}
{{ scheduler_options }}
{% endif %}

{{ body }}";

pub const COBALT_TEMPLATE: &str = "\
#!/bin/bash
#COBALT -n {{ nodes }}
{% if walltime %}
#COBALT -t {{ walltime }}
{% endif %}
{% if queue %}
#COBALT -q {{ queue }}
{% endif %}
{% if account %}
#COBALT -A {{ account }}
{% endif %}
#COBALT -o {{ scheduler_stdout }}
#COBALT -e {{ scheduler_stderr }}
{% if scheduler_options %}
{{ scheduler_options }}
{% endif %}

{{ body }}";

/// HTCondor wants a submit description plus a separate executable; this is
/// the description, the executable is [`PLAIN_SCRIPT`].
pub const CONDOR_TEMPLATE: &str = "\
universe = vanilla
executable = {{ script_path }}
output = {{ scheduler_stdout }}
error = {{ scheduler_stderr }}
log = {{ script_path }}.log
request_cpus = {{ tasks_per_node }}
{% if walltime_seconds %}
periodic_remove = (JobStatus == 2) && (time() - EnteredCurrentStatus) > {{ walltime_seconds }}
{% endif %}
{% if scheduler_options %}
{{ scheduler_options }}
{% endif %}
queue 1
";

pub const LOCAL_TEMPLATE: &str = "\
#!/bin/sh
{{ body }}";

pub const PLAIN_SCRIPT: &str = LOCAL_TEMPLATE;

#[derive(Debug, Serialize)]
struct WrapperContext<'a> {
    workdir: &'a str,
    command: &'a str,
    stdout: &'a str,
    stderr: &'a str,
    exitcode: &'a str,
}

/// Everything a scheduler template can reference.
#[derive(Debug, Serialize)]
pub struct ScriptContext<'a> {
    #[serde(flatten)]
    pub job: JobContext<'a>,
    pub walltime_seconds: Option<u64>,
    pub body: String,
    pub script_path: String,
    pub scheduler_stdout: String,
    pub scheduler_stderr: String,
}

fn environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.set_undefined_behavior(minijinja::UndefinedBehavior::Strict);
    env
}

/// Render the wrapper body. Paths and the command are inserted as given;
/// the caller quotes them.
pub fn render_wrapper(
    workdir: &str,
    command: &str,
    stdout: &str,
    stderr: &str,
    exitcode: &str,
) -> Result<String> {
    let ctx = WrapperContext {
        workdir,
        command,
        stdout,
        stderr,
        exitcode,
    };
    Ok(environment().render_str(WRAPPER_BODY, ctx)?)
}

/// Render a scheduler template.
pub fn render_script(template: &str, ctx: &ScriptContext<'_>) -> Result<String> {
    Ok(environment().render_str(template, ctx)?)
}
