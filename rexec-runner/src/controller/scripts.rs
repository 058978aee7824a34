//! Remote script bundle
//!
//! Three scripts are staged next to every job's primary script:
//! - `env.sh`: job-scoped values, sourced by the other two
//! - `control.sh`: lets the job signal init-finished, push updates, finish
//! - `retrieve.sh`: prints `RUNNING` or `DONE <code>` and the new output
//!
//! The control and retrieval scripts are static and compiled into the
//! binary; `env.sh` is rendered per job and is the only place job values
//! reach the remote environment.

use rexec_core::domain::job::JobSpec;

use crate::config::UserMethod;
use crate::shell::{assignment, quote};

pub const CONTROL_SCRIPT: &str = include_str!("../../scripts/control.sh");
pub const RETRIEVE_SCRIPT: &str = include_str!("../../scripts/retrieve.sh");

pub const ENV_FILE: &str = "env.sh";
pub const CONTROL_FILE: &str = "control.sh";
pub const RETRIEVE_FILE: &str = "retrieve.sh";

const SCRIPT_FILE: &str = "script";
const OUTPUT_FILE: &str = "output";
const INIT_EXIT_CODE_FILE: &str = "init_exit_code";
const PID_FILE: &str = "pid";

/// File layout of one job's remote working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayout {
    base_dir: String,
}

impl RemoteLayout {
    pub fn new(working_dir: &str, task_id: &str) -> Self {
        Self {
            base_dir: format!("{}/rexec-cmd-{}", working_dir.trim_end_matches('/'), task_id),
        }
    }

    pub fn base_dir(&self) -> &str {
        &self.base_dir
    }

    pub fn file(&self, name: &str) -> String {
        format!("{}/{}", self.base_dir, name)
    }

    pub fn script(&self) -> String {
        self.file(SCRIPT_FILE)
    }

    pub fn output(&self) -> String {
        self.file(OUTPUT_FILE)
    }

    pub fn init_exit_code(&self) -> String {
        self.file(INIT_EXIT_CODE_FILE)
    }

    pub fn pid(&self) -> String {
        self.file(PID_FILE)
    }
}

/// Remote paths of the staged control scripts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedBundle {
    pub control_script: String,
    pub retrieval_script: String,
}

/// Renders `env.sh` for a job
pub fn env_script(spec: &JobSpec, credential: &str) -> String {
    [
        ("CALLBACK_HOST", spec.callback_host.as_str()),
        ("TASK_ID", spec.task_id.as_str()),
        ("STEP_ID", spec.step_id.as_str()),
        ("OTP", credential),
    ]
    .iter()
    .map(|(name, value)| assignment(name, value) + "\n")
    .collect()
}

/// Builds the command line that launches the primary script
///
/// The script runs in a background shell with stdin closed and both output
/// streams captured in the output file. Its exit code lands in
/// `init_exit_code`, the shell's PID in `pid`, and the control script is told
/// once the script has finished. The command returns as soon as the
/// background shell is started.
pub fn initialization_script(
    layout: &RemoteLayout,
    bundle: &StagedBundle,
    user_method: &UserMethod,
) -> String {
    let control = quote(&bundle.control_script);

    let main_script = format!(
        "echo $$ > {pid}; ({script} < /dev/null 2>&1; echo $? > {exit_code}) >> {output}",
        pid = quote(&layout.pid()),
        script = quote(&layout.script()),
        exit_code = quote(&layout.init_exit_code()),
        output = quote(&layout.output()),
    );
    let background = format!("{}; {} init-script-finish", main_script, control);

    let mut lines = vec![format!("export CONTROL_SCRIPT={}", control)];
    if let Some(user) = user_method.effective_user() {
        lines.push(format!(
            "chown -R {} {}",
            quote(user),
            quote(layout.base_dir())
        ));
    }
    lines.push(format!(
        "{}sh -c {} < /dev/null > /dev/null 2> /dev/null &",
        user_method.cli_command_prefix(),
        quote(&background)
    ));

    lines.join("\n") + "\n"
}
