use std::sync::Arc;
use std::time::Duration;

use shore_core::errors::OrchestratorError;
use shore_core::remote::{CommandOutput, RemoteFile, RemoteSession};
use shore_remote::{create, CommandRunner, Connection, RecordingRunner, RunnerError, Secret, SshOptions};

fn options() -> SshOptions {
    SshOptions { control_dir: std::env::temp_dir(), ..SshOptions::default() }
}

fn open_agent(runner: &Arc<RecordingRunner>) -> Result<Connection, OrchestratorError> {
    let cred = create("hpc.example.org", "alice", Secret::Agent).unwrap();
    let dyn_runner: Arc<dyn CommandRunner> = runner.clone();
    Connection::open_with_runner(cred, options(), dyn_runner)
}

#[test]
fn open_checks_with_batch_mode_and_control_master() {
    let runner = Arc::new(RecordingRunner::new());
    let conn = open_agent(&runner).unwrap();
    assert!(conn.is_open());

    let handshake = &runner.command_lines()[0];
    assert!(handshake.starts_with("ssh "));
    assert!(handshake.contains("BatchMode=yes"));
    assert!(handshake.contains("ControlMaster=auto"));
    assert!(handshake.contains("ControlPath="));
    assert!(handshake.ends_with("alice@hpc.example.org true"));
}

#[test]
fn password_goes_through_sshpass_environment() {
    let runner = Arc::new(RecordingRunner::new());
    let cred = create("hpc", "bob", Secret::Password("hunter2".into())).unwrap().with_port(2222);
    let dyn_runner: Arc<dyn CommandRunner> = runner.clone();
    let _conn = Connection::open_with_runner(cred, options(), dyn_runner).unwrap();

    let call = &runner.calls()[0];
    assert_eq!(call.program, "sshpass");
    assert_eq!(&call.args[..2], &["-e".to_string(), "ssh".to_string()]);
    assert!(call.env.contains(&("SSHPASS".to_string(), "hunter2".to_string())));
    assert!(!call.command_line().contains("hunter2"));
    assert!(!call.command_line().contains("BatchMode"));
    assert!(call.command_line().contains("-p 2222"));
}

#[test]
fn rejected_credentials_are_an_authentication_error() {
    let runner = Arc::new(RecordingRunner::with_responses(vec![Ok(CommandOutput::failed(255,
                                                                                           "alice@hpc: Permission denied (publickey)."))]));
    match open_agent(&runner) {
        Err(OrchestratorError::Authentication { user, .. }) => assert_eq!(user, "alice"),
        other => panic!("expected authentication error, got {other:?}"),
    }
}

#[test]
fn sshpass_wrong_password_exit_code_is_authentication() {
    let runner = Arc::new(RecordingRunner::with_responses(vec![Ok(CommandOutput::failed(5, ""))]));
    let cred = create("hpc", "bob", Secret::Password("nope".into())).unwrap();
    let dyn_runner: Arc<dyn CommandRunner> = runner.clone();
    let err = Connection::open_with_runner(cred, options(), dyn_runner).unwrap_err();
    assert!(matches!(err, OrchestratorError::Authentication { .. }));
}

#[test]
fn unreachable_host_is_reported() {
    let runner = Arc::new(RecordingRunner::with_responses(vec![Ok(CommandOutput::failed(255,
                                                                                           "ssh: Could not resolve hostname hpc"))]));
    assert!(matches!(open_agent(&runner), Err(OrchestratorError::UnreachableHost { .. })));

    let runner = Arc::new(RecordingRunner::with_responses(vec![Err(RunnerError::TimedOut)]));
    assert!(matches!(open_agent(&runner), Err(OrchestratorError::UnreachableHost { .. })));
}

#[test]
fn execute_passes_remote_exit_codes_through() {
    let runner = Arc::new(RecordingRunner::new());
    let conn = open_agent(&runner).unwrap();
    runner.on("squeue", Ok(CommandOutput::ok("RUNNING\n")));
    runner.on("false", Ok(CommandOutput::failed(1, "")));

    let out = conn.execute("squeue -h -j 12", Duration::from_secs(5)).unwrap();
    assert_eq!(out.stdout.trim(), "RUNNING");
    let out = conn.execute("false", Duration::from_secs(5)).unwrap();
    assert_eq!(out.exit_code, 1);
    assert!(matches!(conn.execute_checked("false", Duration::from_secs(5)),
                     Err(OrchestratorError::RemoteCommand { exit_code: 1, .. })));
}

#[test]
fn timeout_leaves_connection_usable() {
    let runner = Arc::new(RecordingRunner::new());
    let conn = open_agent(&runner).unwrap();
    runner.on("sleep", Err(RunnerError::TimedOut));

    let err = conn.execute("sleep 100", Duration::from_millis(250)).unwrap_err();
    assert_eq!(err,
               OrchestratorError::CommandTimeout { command: "sleep 100".into(), timeout_ms: 250 });
    assert!(conn.is_open());
    assert!(conn.execute("hostname", Duration::from_secs(1)).is_ok());
}

#[test]
fn dropped_master_during_execute_is_unreachable() {
    let runner = Arc::new(RecordingRunner::new());
    let conn = open_agent(&runner).unwrap();
    runner.on("hostname", Ok(CommandOutput::failed(255, "Connection closed by remote host")));
    assert!(matches!(conn.execute("hostname", Duration::from_secs(1)),
                     Err(OrchestratorError::UnreachableHost { .. })));
}

#[test]
fn remote_exit_255_is_a_command_result() {
    let runner = Arc::new(RecordingRunner::new());
    let conn = open_agent(&runner).unwrap();
    runner.on("ocean.pl", Ok(CommandOutput::failed(255, "ocean.pl: fatal error in input\n")));

    let out = conn.execute("ocean.pl ocean.in", Duration::from_secs(1)).unwrap();
    assert_eq!(out.exit_code, 255);
    assert!(conn.is_open());
    assert!(matches!(conn.execute_checked("ocean.pl ocean.in", Duration::from_secs(1)),
                     Err(OrchestratorError::RemoteCommand { exit_code: 255, .. })));

    runner.on("hostname", Ok(CommandOutput::failed(255, "ssh: connect to host hpc port 22: Connection refused")));
    assert!(matches!(conn.execute("hostname", Duration::from_secs(1)),
                     Err(OrchestratorError::UnreachableHost { .. })));
}

#[test]
fn transfer_reports_each_file() {
    let runner = Arc::new(RecordingRunner::new());
    let conn = open_agent(&runner).unwrap();
    runner.on("run/b.dat", Ok(CommandOutput::failed(1, "scp: run/b.dat: No such file or directory")));

    let dir = tempfile::tempdir().unwrap();
    let files = vec![RemoteFile::new("run/a.dat", "a.dat"),
                     RemoteFile::new("run/b.dat", "b.dat"),
                     RemoteFile::new("run/c.dat", "sub/c.dat")];
    let report = conn.transfer(&files, dir.path(), Duration::from_secs(30)).unwrap();

    assert_eq!(report.outcomes.len(), 3);
    assert_eq!(report.failed_paths(), vec!["run/b.dat".to_string()]);
    assert_eq!(report.succeeded().count(), 2);
    assert!(dir.path().join("sub").is_dir());

    let scp: Vec<_> = runner.command_lines().into_iter().filter(|l| l.starts_with("scp")).collect();
    assert_eq!(scp.len(), 3);
    assert!(scp[0].contains("alice@hpc.example.org:run/a.dat"));
}

#[test]
fn zero_deadline_fails_every_file_without_copying() {
    let runner = Arc::new(RecordingRunner::new());
    let conn = open_agent(&runner).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let files = vec![RemoteFile::new("x", "x"), RemoteFile::new("y", "y")];
    let report = conn.transfer(&files, dir.path(), Duration::ZERO).unwrap();
    assert_eq!(report.failed().count(), 2);
    assert!(!runner.command_lines().iter().any(|l| l.starts_with("scp")));
}

#[test]
fn upload_targets_remote_paths() {
    let runner = Arc::new(RecordingRunner::new());
    let conn = open_agent(&runner).unwrap();
    let report = conn.upload(&[RemoteFile::new("shore/calc/job.sh", "/tmp/job.sh")], Duration::from_secs(5))
                     .unwrap();
    assert!(report.is_complete());
    let last = runner.command_lines().pop().unwrap();
    assert!(last.ends_with("/tmp/job.sh alice@hpc.example.org:shore/calc/job.sh"));
}

#[test]
fn close_is_idempotent_and_blocks_further_calls() {
    let runner = Arc::new(RecordingRunner::new());
    let conn = open_agent(&runner).unwrap();
    conn.close().unwrap();
    conn.close().unwrap();
    assert!(!conn.is_open());

    let exits = runner.command_lines().iter().filter(|l| l.contains("-O exit")).count();
    assert_eq!(exits, 1);
    assert!(matches!(conn.execute("true", Duration::from_secs(1)),
                     Err(OrchestratorError::UnreachableHost { .. })));
}
