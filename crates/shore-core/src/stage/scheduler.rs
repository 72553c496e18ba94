//! Helpers de scheduler: cómo se envía un job script, cómo se lee el handle
//! y cómo se sondea su estado.
//!
//! El sondeo combina la cola del scheduler con el centinela que el job
//! script escribe al final del log: un job que ya salió de la cola terminó
//! bien solo si el centinela está presente.

use serde::{Deserialize, Serialize};

use super::{JobHandle, RemoteJobState};
use crate::constants::COMPLETION_SENTINEL;
use crate::errors::OrchestratorError;
use crate::remote::CommandOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheduler {
    /// Envío con `sbatch`, estado con `squeue`.
    #[default]
    Slurm,
    /// El script corre en background en el nodo de login; el handle es el pid.
    Direct,
}

impl std::str::FromStr for Scheduler {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "slurm" => Ok(Self::Slurm),
            "direct" => Ok(Self::Direct),
            other => Err(OrchestratorError::InvalidInput(format!("unknown scheduler '{other}'"))),
        }
    }
}

/// Comilla simple para shell si el texto no es trivialmente seguro.
pub fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
               && s.chars()
                   .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '~' | '=' | ':' | '+' | ','));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

impl Scheduler {
    /// Script completo: cabecera, exports, comando con su log y centinela.
    pub fn job_script(&self,
                      job_name: &str,
                      ncores: u32,
                      exports: &[(String, String)],
                      command: &str,
                      log_file: &str)
                      -> String {
        let mut s = String::new();
        match self {
            Self::Slurm => {
                s.push_str("#!/bin/bash\n");
                s.push_str(&format!("#SBATCH --job-name={job_name}\n"));
                s.push_str(&format!("#SBATCH --ntasks={}\n", ncores.max(1)));
                s.push_str("#SBATCH --output=out\n");
                s.push_str("#SBATCH --error=err\n");
            }
            Self::Direct => s.push_str("#!/bin/sh\n"),
        }
        s.push('\n');
        for (k, v) in exports {
            s.push_str(&format!("export {k}={}\n", shell_quote(v)));
        }
        s.push_str(&format!("{command} > {log_file} 2>&1 && echo '{COMPLETION_SENTINEL}' >> {log_file}\n"));
        s
    }

    /// Archivos donde el scheduler deja stdout/stderr del job.
    pub fn output_files(&self) -> &'static [&'static str] {
        match self {
            Self::Slurm => &["out", "err"],
            Self::Direct => &["nohup.out"],
        }
    }

    pub fn submit_command(&self, remote_dir: &str, script: &str) -> String {
        let dir = shell_quote(remote_dir);
        match self {
            Self::Slurm => format!("cd {dir} && sbatch {script}"),
            Self::Direct => format!("cd {dir} && nohup sh {script} > nohup.out 2>&1 & echo $!"),
        }
    }

    pub fn parse_submission(&self, output: &CommandOutput) -> Result<JobHandle, OrchestratorError> {
        let id = match self {
            Self::Slurm => output.stdout
                                 .lines()
                                 .find(|l| l.contains("Submitted batch job"))
                                 .and_then(|l| l.split_whitespace().last())
                                 .filter(|tok| tok.chars().all(|c| c.is_ascii_digit())),
            Self::Direct => output.stdout
                                  .lines()
                                  .map(str::trim)
                                  .rfind(|l| !l.is_empty() && l.chars().all(|c| c.is_ascii_digit())),
        };
        match id {
            Some(id) if output.success() => Ok(JobHandle::new(id)),
            _ => Err(OrchestratorError::RemoteCommand { command: "submit".into(),
                                                        exit_code: output.exit_code,
                                                        stderr: format!("unexpected submission output: {}",
                                                                        output.stdout.trim()) }),
        }
    }

    pub fn status_command(&self, job: &JobHandle, remote_dir: &str, log_file: &str) -> String {
        let log = format!("{}/{}", remote_dir.trim_end_matches('/'), log_file);
        let done = format!("elif grep -qF '{COMPLETION_SENTINEL}' {} 2>/dev/null; then echo COMPLETED; else echo FAILED; fi",
                           shell_quote(&log));
        match self {
            Self::Slurm => format!("state=$(squeue -h -j {} -o %T 2>/dev/null); if [ -n \"$state\" ]; then echo \"$state\"; {done}",
                                   job.id),
            Self::Direct => format!("if kill -0 {} 2>/dev/null; then echo RUNNING; {done}", job.id),
        }
    }

    /// Lee la primera línea no vacía del sondeo.
    pub fn parse_status(&self, output: &CommandOutput) -> RemoteJobState {
        if !output.success() {
            return RemoteJobState::Unknown;
        }
        let state = output.stdout
                          .lines()
                          .map(str::trim)
                          .find(|l| !l.is_empty())
                          .unwrap_or("")
                          .to_ascii_uppercase();
        match state.as_str() {
            "PENDING" | "CONFIGURING" | "REQUEUED" | "RESV_DEL_HOLD" | "SUSPENDED" => RemoteJobState::Queued,
            "RUNNING" | "COMPLETING" | "STAGE_OUT" => RemoteJobState::Running,
            "COMPLETED" => RemoteJobState::Completed,
            "FAILED" | "CANCELLED" | "TIMEOUT" | "NODE_FAIL" | "OUT_OF_MEMORY" | "BOOT_FAIL" | "DEADLINE"
            | "PREEMPTED" => RemoteJobState::Failed(state),
            _ => RemoteJobState::Unknown,
        }
    }
}
