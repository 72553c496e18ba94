use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use shore_core::calculation::CalculationRecord;
use shore_core::event::CalculationEventKind;
use shore_core::{Calculation, CalculationConfig, CalculationState, CancellationToken, CommandOutput, CommandStage,
                 InMemoryRemote, InputSpecification, OrchestratorError, Pipeline, PipelinePlan, RemoteFile, RemoteSession,
                 RunOptions, StageStatus, TransferReport, TransferStatus, Vocabulary};
use tempfile::TempDir;

fn vocab() -> Arc<Vocabulary> {
    Arc::new(Vocabulary::new().option("ecut", "dft", "cutoff", Some(json!(30)))
                              .option("scfac", "cnbse", "scaling", Some(json!(0.8))))
}

fn plan() -> PipelinePlan {
    PipelinePlan::builder().stage(CommandStage::new("A", "run-a").categories(&["dft"]).artifact("a.out"))
                           .stage(CommandStage::new("B", "run-b").after("A").categories(&["cnbse"]).artifact("b.out"))
                           .build()
                           .unwrap()
}

struct Fixture {
    _dir: TempDir,
    remote: Arc<InMemoryRemote>,
    pipeline: Arc<Pipeline>,
    config: CalculationConfig,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(InMemoryRemote::new("hpc.example.org"));
    let pipeline = Pipeline::new(remote.clone());
    let config = CalculationConfig::new(dir.path().join("jar"), "shore");
    Fixture { _dir: dir, remote, pipeline, config }
}

fn calc(f: &Fixture, name: &str) -> Calculation {
    let input = InputSpecification::new(name, vocab(), Vec::<(String, Value)>::new()).unwrap();
    Calculation::new(input, plan(), f.pipeline.clone(), f.config.clone()).unwrap()
}

#[test]
fn dependent_stage_submits_after_dependency_is_done() {
    let f = fixture();
    let mut c = calc(&f, "x");
    f.pipeline.mark("x/A", StageStatus::Done, false).unwrap();
    assert_eq!(f.pipeline.ready_stages(), vec!["x/B".to_string()]);

    let report = c.run(false).unwrap();
    assert_eq!(report.submitted, vec!["B".to_string()]);
    assert_eq!(c.stage_status("B"), Some(StageStatus::Submitted));
    assert_eq!(c.state(), CalculationState::AwaitingRemote);
    assert!(f.remote.file("shore/x/B/job.sh").is_some());

    let job = c.job("B").unwrap().id.clone();
    f.remote.set_job_state(&job, "COMPLETED");
    let status = c.get_status().unwrap();
    assert_eq!(status.changes.len(), 1);
    assert_eq!(c.stage_status("B"), Some(StageStatus::Done));

    for file in ["shore/x/A/log", "shore/x/A/a.out", "shore/x/B/log", "shore/x/B/b.out"] {
        f.remote.put_file(file, "1 2\n");
    }
    let sync = c.sync().unwrap();
    let mut stages: Vec<_> = sync.retrieved.iter().map(|r| r.stage.as_str()).collect();
    stages.dedup();
    assert_eq!(stages, vec!["A", "B"]);
    assert!(sync.is_complete());
    assert_eq!(c.state(), CalculationState::Complete);
    assert!(c.local_dir().join("B/b.out").exists());
    assert_eq!(sync.retrieved[0].sha256.len(), 64);
}

#[test]
fn repeated_run_submits_once() {
    let f = fixture();
    let mut c = calc(&f, "x");
    c.run(false).unwrap();
    let second = c.run(false).unwrap();
    assert!(second.is_noop());
    assert_eq!(f.remote.count_executed("sbatch"), 1);
    assert_eq!(c.stage_status("A"), Some(StageStatus::Submitted));
    assert_eq!(c.stage_status("B"), Some(StageStatus::Pending));
}

#[test]
fn poll_is_a_snapshot_and_advance_moves_the_frontier() {
    let f = fixture();
    let mut c = calc(&f, "x");
    c.run(false).unwrap();
    let job = c.job("A").unwrap().id.clone();

    f.remote.set_job_state(&job, "PENDING");
    assert!(c.get_status().unwrap().changes.is_empty());
    f.remote.set_job_state(&job, "RUNNING");
    c.get_status().unwrap();
    assert_eq!(c.stage_status("A"), Some(StageStatus::Running));
    // un reporte viejo no hace retroceder el stage
    f.remote.set_job_state(&job, "PENDING");
    c.get_status().unwrap();
    assert_eq!(c.stage_status("A"), Some(StageStatus::Running));

    f.remote.set_job_state(&job, "COMPLETED");
    let (status, run) = c.advance().unwrap();
    assert_eq!(status.changes[0].to, StageStatus::Done);
    assert_eq!(run.submitted, vec!["B".to_string()]);
}

#[test]
fn submission_timeout_leaves_stage_pending() {
    let f = fixture();
    let mut c = calc(&f, "x");
    f.remote.time_out("sbatch");
    let err = c.run(false).unwrap_err();
    assert!(matches!(err, OrchestratorError::CommandTimeout { .. }));
    assert!(err.is_retryable());
    assert_eq!(c.stage_status("A"), Some(StageStatus::Pending));
    assert!(c.job("A").is_none());

    f.remote.clear_timeouts();
    assert_eq!(c.run(false).unwrap().submitted, vec!["A".to_string()]);
}

#[test]
fn rejected_submission_propagates_unmodified() {
    let f = fixture();
    let mut c = calc(&f, "x");
    f.remote.respond("sbatch", shore_core::CommandOutput::failed(1, "sbatch: error: invalid account"));
    let err = c.run(false).unwrap_err();
    assert_eq!(err,
               OrchestratorError::RemoteCommand { command: "cd shore/x/A && sbatch job.sh".into(),
                                                  exit_code: 1,
                                                  stderr: "sbatch: error: invalid account".into() });
    assert_eq!(c.stage_status("A"), Some(StageStatus::Pending));
}

#[test]
fn cancelled_run_has_no_side_effects() {
    let f = fixture();
    let mut c = calc(&f, "x");
    let token = CancellationToken::new();
    token.cancel();
    let err = c.run_with(RunOptions::default().with_cancel(token)).unwrap_err();
    assert_eq!(err, OrchestratorError::Cancelled);
    assert!(f.remote.executed().is_empty());
    assert_eq!(c.state(), CalculationState::NotStarted);
    assert_eq!(c.stage_status("A"), Some(StageStatus::Pending));
}

#[test]
fn failed_job_fails_the_calculation() {
    let f = fixture();
    let mut c = calc(&f, "x");
    c.run(false).unwrap();
    let job = c.job("A").unwrap().id.clone();
    f.remote.set_job_state(&job, "FAILED");
    let status = c.get_status().unwrap();
    assert_eq!(status.state, CalculationState::Failed);
    assert_eq!(c.stage_status("A"), Some(StageStatus::Failed));
    assert!(c.run(false).unwrap().is_noop());
}

#[test]
fn interrupted_poll_still_settles_polled_stages() {
    let f = fixture();
    let plan = PipelinePlan::builder().stage(CommandStage::new("A", "run-a").categories(&["dft"]))
                                      .stage(CommandStage::new("C", "run-c").categories(&["cnbse"]))
                                      .build()
                                      .unwrap();
    let input = InputSpecification::new("x", vocab(), Vec::<(String, Value)>::new()).unwrap();
    let mut c = Calculation::new(input, plan, f.pipeline.clone(), f.config.clone()).unwrap();
    assert_eq!(c.run(false).unwrap().submitted.len(), 2);
    let a = c.job("A").unwrap().id.clone();
    let other = c.job("C").unwrap().id.clone();
    f.remote.set_job_state(&a, "FAILED");
    f.remote.time_out(&format!("-j {other} "));

    let err = c.get_status().unwrap_err();
    assert!(matches!(err, OrchestratorError::CommandTimeout { .. }));
    assert_eq!(c.stage_status("A"), Some(StageStatus::Failed));
    assert_eq!(c.state(), CalculationState::Failed);
    assert!(c.events()
             .iter()
             .any(|e| matches!(e.kind, CalculationEventKind::StateChanged { to: CalculationState::Failed, .. })));
}

#[test]
fn failed_stage_diagnostics_are_fetched_on_demand() {
    let f = fixture();
    let mut c = calc(&f, "x");
    c.run(false).unwrap();
    let job = c.job("A").unwrap().id.clone();
    f.remote.set_job_state(&job, "FAILED");
    c.get_status().unwrap();
    f.remote.put_file("shore/x/A/log", "reading input\nabort: bad k-grid\n\n");
    f.remote.put_file("shore/x/A/err", "srun: error: task 0 exited\n");

    let diag = c.fetch_diagnostics("A").unwrap();
    assert_eq!(diag.tail("log", 1), vec!["abort: bad k-grid"]);
    assert_eq!(diag.file("err"), Some("srun: error: task 0 exited\n"));
    assert_eq!(diag.missing.len(), 1);
    assert_eq!(diag.missing[0].remote, "shore/x/A/out");
    assert!(c.local_dir().join("A/logs/err").exists());
    assert_eq!(c.retrieved().count(), 0);

    let attempts = f.remote.transfer_attempts().len();
    let pending = c.fetch_diagnostics("B").unwrap();
    assert!(pending.files.is_empty() && pending.missing.is_empty());
    assert_eq!(f.remote.transfer_attempts().len(), attempts);
}

#[test]
fn overwrite_resets_and_resubmits() {
    let f = fixture();
    let mut c = calc(&f, "x");
    f.pipeline.mark("x/A", StageStatus::Done, false).unwrap();
    f.pipeline.mark("x/B", StageStatus::Done, false).unwrap();

    let report = c.run(true).unwrap();
    assert_eq!(report.reset, vec!["A".to_string(), "B".to_string()]);
    assert_eq!(report.submitted, vec!["A".to_string()]);
    assert_eq!(c.stage_status("B"), Some(StageStatus::Pending));
    assert!(c.events().iter().any(|e| matches!(&e.kind, CalculationEventKind::StageReset { stages } if stages.len() == 2)));
}

#[test]
fn sync_before_completion_changes_nothing() {
    let f = fixture();
    let mut c = calc(&f, "x");
    c.run(false).unwrap();
    let state = c.state();
    let sync = c.sync().unwrap();
    assert!(sync.retrieved.is_empty());
    assert_eq!(sync.outstanding_stages, vec!["A".to_string(), "B".to_string()]);
    assert_eq!(c.state(), state);
    assert!(f.remote.transfer_attempts().is_empty());
}

#[test]
fn sync_is_incremental() {
    let f = fixture();
    let mut c = calc(&f, "x");
    c.run(false).unwrap();
    f.remote.set_job_state(&c.job("A").unwrap().id.clone(), "COMPLETED");
    c.advance().unwrap();
    f.remote.put_file("shore/x/A/log", "ok");
    f.remote.put_file("shore/x/A/a.out", "1 2");

    let first = c.sync().unwrap();
    assert_eq!(first.retrieved.len(), 2);
    assert_eq!(first.outstanding_stages, vec!["B".to_string()]);
    assert_eq!(c.state(), CalculationState::Syncing);

    f.remote.set_job_state(&c.job("B").unwrap().id.clone(), "COMPLETED");
    c.get_status().unwrap();
    f.remote.put_file("shore/x/B/log", "ok");
    f.remote.put_file("shore/x/B/b.out", "3 4");
    let second = c.sync().unwrap();
    assert!(second.retrieved.iter().all(|r| r.stage == "B"));
    assert_eq!(second.retrieved.len(), 2);
    assert_eq!(f.remote.transfer_attempts().len(), 4);
    assert_eq!(c.state(), CalculationState::Complete);
}

#[test]
fn partial_transfer_is_retried_file_by_file() {
    let f = fixture();
    let plan = PipelinePlan::builder().stage(CommandStage::new("A", "run-a").artifact("f1")
                                                                            .artifact("f2")
                                                                            .artifact("f3")
                                                                            .artifact("f4"))
                                      .build()
                                      .unwrap();
    let input = InputSpecification::new("x", vocab(), Vec::<(String, Value)>::new()).unwrap();
    let mut c = Calculation::new(input, plan, f.pipeline.clone(), f.config.clone()).unwrap();
    f.pipeline.mark("x/A", StageStatus::Done, false).unwrap();
    for file in ["log", "f1", "f2", "f3", "f4"] {
        f.remote.put_file(&format!("shore/x/A/{file}"), file);
    }
    f.remote.fail_transfer("shore/x/A/f2", 1);

    let first = c.sync().unwrap();
    assert_eq!(first.retrieved.len(), 4);
    assert_eq!(first.failed.len(), 1);
    assert_eq!(first.partial_error(),
               Some(OrchestratorError::PartialSync { failed: vec!["shore/x/A/f2".to_string()] }));
    assert_eq!(first.outstanding_stages, vec!["A".to_string()]);
    assert_eq!(c.state(), CalculationState::Syncing);

    let second = c.sync().unwrap();
    assert_eq!(second.retrieved.len(), 1);
    assert_eq!(second.retrieved[0].file, "f2");
    let attempts = f.remote.transfer_attempts();
    assert_eq!(attempts.len(), 6);
    assert_eq!(attempts[5], "shore/x/A/f2");
    assert_eq!(c.state(), CalculationState::Complete);
}

/// Sesión que reporta mal las descargas: omite `b.out` y da por copiado
/// `a.out` aunque no exista.
struct MisreportingRemote(Arc<InMemoryRemote>);

impl RemoteSession for MisreportingRemote {
    fn host(&self) -> &str {
        self.0.host()
    }

    fn execute(&self, command: &str, timeout: Duration) -> Result<CommandOutput, OrchestratorError> {
        self.0.execute(command, timeout)
    }

    fn transfer(&self,
                files: &[RemoteFile],
                local_dir: &Path,
                timeout: Duration)
                -> Result<TransferReport, OrchestratorError> {
        let mut report = self.0.transfer(files, local_dir, timeout)?;
        report.outcomes.retain(|o| !o.remote.ends_with("b.out"));
        for o in report.outcomes.iter_mut().filter(|o| o.remote.ends_with("a.out")) {
            o.status = TransferStatus::Copied { bytes: 5 };
        }
        Ok(report)
    }

    fn upload(&self, files: &[RemoteFile], timeout: Duration) -> Result<TransferReport, OrchestratorError> {
        self.0.upload(files, timeout)
    }

    fn close(&self) -> Result<(), OrchestratorError> {
        self.0.close()
    }

    fn is_open(&self) -> bool {
        self.0.is_open()
    }
}

#[test]
fn misreported_transfers_are_failures_not_gaps() {
    let f = fixture();
    let pipeline = Pipeline::new(Arc::new(MisreportingRemote(f.remote.clone())));
    let input = InputSpecification::new("x", vocab(), Vec::<(String, Value)>::new()).unwrap();
    let mut c = Calculation::new(input, plan(), pipeline.clone(), f.config.clone()).unwrap();
    pipeline.mark("x/A", StageStatus::Done, false).unwrap();
    pipeline.mark("x/B", StageStatus::Done, false).unwrap();
    for file in ["shore/x/A/log", "shore/x/B/log", "shore/x/B/b.out"] {
        f.remote.put_file(file, "1 2\n");
    }

    let sync = c.sync().unwrap();
    let retrieved: Vec<_> = c.retrieved().cloned().collect();
    assert_eq!(retrieved, vec!["A/log".to_string(), "B/log".to_string()]);
    let mut failed: Vec<_> = sync.failed.iter().map(|a| a.remote.as_str()).collect();
    failed.sort();
    assert_eq!(failed, vec!["shore/x/A/a.out", "shore/x/B/b.out"]);
    assert!(sync.failed[0].reason.contains("hashing"));
    assert!(matches!(sync.partial_error(), Some(OrchestratorError::PartialSync { .. })));
    assert_ne!(c.state(), CalculationState::Complete);
}

#[test]
fn local_stage_runs_synchronously() {
    let f = fixture();
    let plan = PipelinePlan::builder().stage(CommandStage::new("A", "run-a"))
                                      .stage(CommandStage::new("plot", "").after("A").local(|ctx| {
                                                                                std::fs::create_dir_all(&ctx.local_dir)?;
                                                                                std::fs::write(ctx.local_dir.join("done"), "")?;
                                                                                Ok(())
                                                                            }))
                                      .build()
                                      .unwrap();
    let input = InputSpecification::new("x", vocab(), Vec::<(String, Value)>::new()).unwrap();
    let mut c = Calculation::new(input, plan, f.pipeline.clone(), f.config.clone()).unwrap();
    f.pipeline.mark("x/A", StageStatus::Done, false).unwrap();
    let report = c.run(false).unwrap();
    assert_eq!(report.completed_locally, vec!["plot".to_string()]);
    assert!(report.submitted.is_empty());
    assert!(c.local_dir().join("plot/done").exists());
    assert_eq!(c.stage_status("plot"), Some(StageStatus::Done));
}

#[test]
fn saved_state_resumes_on_a_fresh_graph() {
    let f = fixture();
    let mut c = calc(&f, "x");
    c.run(false).unwrap();
    let job = c.job("A").unwrap().clone();
    let path = c.save_state().unwrap();
    assert!(path.ends_with(".x_state.json"));

    let pipeline = Pipeline::new(f.remote.clone());
    let record = CalculationRecord::read(&path).unwrap();
    let mut back = Calculation::resume(record, vocab(), plan(), pipeline, f.config.clone()).unwrap();
    assert_eq!(back.id(), c.id());
    assert_eq!(back.job("A"), Some(&job));
    assert_eq!(back.stage_status("A"), Some(StageStatus::Submitted));
    assert_eq!(back.state(), CalculationState::AwaitingRemote);

    f.remote.set_job_state(&job.id, "COMPLETED");
    back.get_status().unwrap();
    assert_eq!(back.stage_status("A"), Some(StageStatus::Done));
}

/// `x` con A terminado y B en vuelo, guardado en disco.
fn saved_midway(f: &Fixture) {
    let mut c = calc(f, "x");
    c.run(false).unwrap();
    let job = c.job("A").unwrap().id.clone();
    f.remote.set_job_state(&job, "COMPLETED");
    c.advance().unwrap();
    assert_eq!(c.stage_status("B"), Some(StageStatus::Submitted));
    c.save_state().unwrap();
}

#[test]
fn edited_input_is_not_resumed_silently() {
    let f = fixture();
    saved_midway(&f);

    let edited = InputSpecification::new("x", vocab(), [("scfac".to_string(), json!(1.2))]).unwrap();
    let err = Calculation::open_or_create(edited, plan(), Pipeline::new(f.remote.clone()), f.config.clone()).unwrap_err();
    match err {
        OrchestratorError::InvalidInput(msg) => assert!(msg.contains("affects B)"), "{msg}"),
        other => panic!("unexpected {other:?}"),
    }

    // un default escrito explícitamente no cambia ningún fingerprint
    let same = InputSpecification::new("x", vocab(), [("ecut".to_string(), json!(30))]).unwrap();
    let back = Calculation::open_or_create(same, plan(), Pipeline::new(f.remote.clone()), f.config.clone()).unwrap();
    assert_eq!(back.stage_status("A"), Some(StageStatus::Done));
    assert_eq!(back.stage_status("B"), Some(StageStatus::Submitted));
}

#[test]
fn replacing_input_restarts_only_affected_stages() {
    let f = fixture();
    saved_midway(&f);

    let edited = InputSpecification::new("x", vocab(), [("scfac".to_string(), json!(1.2))]).unwrap();
    let mut c = Calculation::open_replacing(edited, plan(), Pipeline::new(f.remote.clone()), f.config.clone()).unwrap();
    assert_eq!(c.stage_status("A"), Some(StageStatus::Done));
    assert_eq!(c.stage_status("B"), Some(StageStatus::Pending));
    assert!(c.job("B").is_none());
    assert_eq!(c.input().value("scfac"), Some(&json!(1.2)));

    let report = c.run(false).unwrap();
    assert_eq!(report.submitted, vec!["B".to_string()]);
    assert_eq!(f.remote.count_executed("sbatch"), 3);
}

#[test]
fn state_file_with_other_version_is_rejected() {
    let f = fixture();
    let c = calc(&f, "x");
    let path = c.save_state().unwrap();
    let text = std::fs::read_to_string(&path).unwrap().replace("\"format_version\": 1", "\"format_version\": 7");
    std::fs::write(&path, text).unwrap();
    assert!(matches!(CalculationRecord::read(&path), Err(OrchestratorError::CorruptSnapshot(_))));
}

#[test]
fn calculation_names_are_unique_in_a_graph() {
    let f = fixture();
    let _c = calc(&f, "x");
    let input = InputSpecification::new("x", vocab(), Vec::<(String, Value)>::new()).unwrap();
    let err = Calculation::new(input, plan(), f.pipeline.clone(), f.config.clone()).unwrap_err();
    assert_eq!(err, OrchestratorError::DuplicateStage("x/A".into()));
    assert_eq!(f.pipeline.render().stages.len(), 2);
}
