//! Ejecución de procesos locales (`ssh`, `scp`, `sshpass`).
//!
//! `CommandRunner` es la costura que usa `Connection`. `ProcessRunner` lanza
//! el proceso real con deadline; `RecordingRunner` registra invocaciones y
//! devuelve respuestas preparadas para los tests.

use std::collections::VecDeque;
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use shore_core::remote::CommandOutput;
use thiserror::Error;

/// Programa, argumentos y variables de entorno extra. Las variables no
/// aparecen en `command_line` (ahí viaja el password de `sshpass -e`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(program: &str) -> Self {
        Self { program: program.to_string(), args: Vec::new(), env: Vec::new() }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
        where I: IntoIterator<Item = S>,
              S: Into<String>
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str))
                                              .collect::<Vec<_>>()
                                              .join(" ")
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RunnerError {
    #[error("failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },
    #[error("process timed out")]
    TimedOut,
}

pub trait CommandRunner: Send + Sync {
    fn run(&self, invocation: &Invocation, timeout: Duration) -> Result<CommandOutput, RunnerError>;
}

/// Runner de producción: proceso hijo con stdin cerrado, stdout/stderr
/// leídos en hilos y `kill` al vencer el deadline.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut p) = pipe {
            let _ = p.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

impl CommandRunner for ProcessRunner {
    fn run(&self, invocation: &Invocation, timeout: Duration) -> Result<CommandOutput, RunnerError> {
        let spawn_err = |e: std::io::Error| RunnerError::Spawn { program: invocation.program.clone(), reason: e.to_string() };
        let mut child = Command::new(&invocation.program).args(&invocation.args)
                                                         .envs(invocation.env.iter().map(|(k, v)| (k, v)))
                                                         .stdin(Stdio::null())
                                                         .stdout(Stdio::piped())
                                                         .stderr(Stdio::piped())
                                                         .spawn()
                                                         .map_err(spawn_err)?;
        let out = drain(child.stdout.take());
        let err = drain(child.stderr.take());
        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait().map_err(spawn_err)? {
                Some(status) => break status,
                None if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(RunnerError::TimedOut);
                }
                None => thread::sleep(POLL_INTERVAL),
            }
        };
        Ok(CommandOutput { exit_code: status.code().unwrap_or(-1),
                           stdout: out.join().unwrap_or_default(),
                           stderr: err.join().unwrap_or_default() })
    }
}

/// Doble de tests: registra cada invocación y responde primero por regla
/// (subcadena de la línea de comando, gana la última) y si no, de la cola.
#[derive(Default)]
pub struct RecordingRunner {
    rules: Mutex<Vec<(String, Result<CommandOutput, RunnerError>)>>,
    queue: Mutex<VecDeque<Result<CommandOutput, RunnerError>>>,
    calls: Mutex<Vec<Invocation>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(responses: Vec<Result<CommandOutput, RunnerError>>) -> Self {
        let runner = Self::default();
        runner.queue.lock().extend(responses);
        runner
    }

    pub fn on(&self, pattern: &str, response: Result<CommandOutput, RunnerError>) {
        self.rules.lock().push((pattern.to_string(), response));
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().clone()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.calls.lock().iter().map(Invocation::command_line).collect()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, invocation: &Invocation, _timeout: Duration) -> Result<CommandOutput, RunnerError> {
        self.calls.lock().push(invocation.clone());
        let line = invocation.command_line();
        if let Some((_, response)) = self.rules.lock().iter().rev().find(|(p, _)| line.contains(p.as_str())) {
            return response.clone();
        }
        self.queue.lock().pop_front().unwrap_or_else(|| Ok(CommandOutput::default()))
    }
}
