use std::fs;
use std::sync::Arc;

use serde_json::{json, Value};
use shore_core::stage::Scheduler;
use shore_core::{Calculation, CalculationConfig, CalculationState, InMemoryRemote, InputSpecification, Pipeline,
                 StageStatus};
use shore_ocean::{load_spectra, ocean_plan, ocean_vocabulary, OceanStageKind};
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    remote: Arc<InMemoryRemote>,
    pipeline: Arc<Pipeline>,
    config: CalculationConfig,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(InMemoryRemote::new("hpc"));
    let pipeline = Pipeline::new(remote.clone());
    let config = CalculationConfig::new(dir.path().join("jar"), "shore");
    Fixture { _dir: dir, remote, pipeline, config }
}

fn tio2() -> InputSpecification {
    let params: Vec<(String, Value)> = vec![("acell".into(), json!([8.68, 8.68, 5.59])),
                                            ("znucl".into(), json!([22, 8])),
                                            ("element".into(), json!("Ti")),
                                            ("sites".into(), json!([1, 2])),
                                            ("polarizations".into(), json!([1, 3])),
                                            ("ncores".into(), json!(32))];
    InputSpecification::new("tio2", Arc::new(ocean_vocabulary()), params).unwrap()
}

/// Lleva el cálculo hasta que todos sus stages estén Done.
fn complete_all(f: &Fixture, c: &mut Calculation) {
    c.run(false).unwrap();
    for kind in OceanStageKind::ALL {
        let Some(job) = c.job(kind.id()).map(|j| j.id.clone()) else { continue };
        f.remote.set_job_state(&job, "COMPLETED");
        c.advance().unwrap();
    }
    assert!(c.stage_statuses().iter().all(|(_, s)| *s == StageStatus::Done));
}

#[test]
fn first_run_submits_parsing_with_ocean_input() {
    let f = fixture();
    let mut c = Calculation::new(tio2(), ocean_plan(Scheduler::Slurm).unwrap(), f.pipeline.clone(), f.config.clone())
        .unwrap();
    let report = c.run(false).unwrap();
    assert_eq!(report.submitted, vec!["parsing".to_string()]);

    let script = String::from_utf8(f.remote.file("shore/tio2/Common/job.sh").unwrap()).unwrap();
    assert!(script.contains("#SBATCH --job-name=tio2-parsing"));
    assert!(script.contains("#SBATCH --ntasks=32"));
    assert!(script.contains("ocean.pl --stage parsing ocean.in > log 2>&1"));
    let input = String::from_utf8(f.remote.file("shore/tio2/Common/ocean.in").unwrap()).unwrap();
    assert!(input.contains("znucl { 22 8 }"));
    assert!(!input.contains("ncores"));
}

#[test]
fn full_chain_syncs_spectra_into_results() {
    let f = fixture();
    let mut c = Calculation::new(tio2(), ocean_plan(Scheduler::Slurm).unwrap(), f.pipeline.clone(), f.config.clone())
        .unwrap();
    complete_all(&f, &mut c);

    let dft_script = String::from_utf8(f.remote.file("shore/tio2/DFT/job.sh").unwrap()).unwrap();
    assert!(dft_script.contains("export SHORE_OPF_DIR=shore/tio2/OPF"));

    for kind in OceanStageKind::ALL {
        f.remote.put_file(&format!("shore/tio2/{}/log", kind.directory()), "Ocean is done\n");
    }
    for file in ["scf.in", "scf.out", "nscf.in", "nscf.out"] {
        f.remote.put_file(&format!("shore/tio2/DFT/{file}"), "x");
    }
    f.remote.put_file("shore/tio2/SCREEN/mpi_avg.log", "x");
    f.remote.put_file("shore/tio2/CNBSE/ocean.log", "x");
    for site in ["0001", "0002"] {
        for pol in ["01", "03"] {
            f.remote.put_file(&format!("shore/tio2/CNBSE/absspct_Ti.{site}_1s_{pol}"),
                              "# energy intensity\n4960.0 0.1\n4961.0 0.25D0\n");
        }
    }

    let mut sync = c.sync().unwrap();
    assert!(sync.is_complete());
    assert_eq!(c.state(), CalculationState::Complete);
    assert!(c.local_dir().join("DFT/scf.out").exists());

    let loaded = load_spectra(&mut sync.results, c.input()).unwrap();
    assert_eq!(loaded, 4);
    let site2 = sync.results.select("Ti", Some(2));
    assert_eq!(site2.len(), 2);
    assert_eq!(site2[0].key.core_level, "1s");
    assert_eq!(site2[0].y, vec![0.1, 0.25]);
}

#[test]
fn spectra_not_yet_synced_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("CNBSE")).unwrap();
    fs::write(dir.path().join("CNBSE/absspct_Ti.0001_1s_01"), "1 2\n").unwrap();
    let mut handler = shore_core::ResultsHandler::open("tio2", dir.path());
    assert_eq!(load_spectra(&mut handler, &tio2()).unwrap(), 1);
    assert_eq!(handler.series()[0].key.polarization, 1);
}

#[test]
fn screening_fork_reuses_ground_state_stages() {
    let f = fixture();
    let plan = ocean_plan(Scheduler::Slurm).unwrap();
    let mut base = Calculation::new(tio2(), plan.clone(), f.pipeline.clone(), f.config.clone()).unwrap();
    complete_all(&f, &mut base);

    let fork = base.input().fork("tio2_nb200", [("screen.nbands".to_string(), json!(200))]).unwrap();
    let mut c = Calculation::new(fork, plan.clone(), f.pipeline.clone(), f.config.clone()).unwrap();
    let report = c.run(false).unwrap();
    let reused: Vec<_> = report.reused.iter().map(|r| r.stage.as_str()).collect();
    assert_eq!(reused, vec!["parsing", "opf", "dft", "prep"]);
    assert_eq!(report.submitted, vec!["screen".to_string()]);

    let script = String::from_utf8(f.remote.file("shore/tio2_nb200/SCREEN/job.sh").unwrap()).unwrap();
    assert!(script.contains("export SHORE_PREP_DIR=shore/tio2/PREP"));

    let cutoff = base.input().fork("tio2_ecut40", [("ecut".to_string(), json!(40))]).unwrap();
    let mut c = Calculation::new(cutoff, plan, f.pipeline.clone(), f.config.clone()).unwrap();
    let report = c.run(false).unwrap();
    assert!(report.reused.is_empty());
    assert_eq!(report.submitted, vec!["parsing".to_string()]);
}

#[test]
fn site_fork_reruns_screening_for_its_edges() {
    let f = fixture();
    let plan = ocean_plan(Scheduler::Slurm).unwrap();
    let mut base = Calculation::new(tio2(), plan.clone(), f.pipeline.clone(), f.config.clone()).unwrap();
    complete_all(&f, &mut base);

    let fork = base.input().fork("tio2_site3", [("sites".to_string(), json!([3]))]).unwrap();
    let mut c = Calculation::new(fork, plan.clone(), f.pipeline.clone(), f.config.clone()).unwrap();
    let report = c.run(false).unwrap();
    let reused: Vec<_> = report.reused.iter().map(|r| r.stage.as_str()).collect();
    assert_eq!(reused, vec!["parsing", "opf", "dft"]);
    assert_eq!(report.submitted, vec!["prep".to_string()]);

    let prep = c.job("prep").unwrap().id.clone();
    f.remote.set_job_state(&prep, "COMPLETED");
    let (_, run) = c.advance().unwrap();
    assert!(run.reused.is_empty());
    assert_eq!(run.submitted, vec!["screen".to_string()]);
    let input = String::from_utf8(f.remote.file("shore/tio2_site3/SCREEN/ocean.in").unwrap()).unwrap();
    assert!(input.contains("edges {\n  3 1 0\n}"));
    let script = String::from_utf8(f.remote.file("shore/tio2_site3/SCREEN/job.sh").unwrap()).unwrap();
    assert!(script.contains("export SHORE_PREP_DIR=shore/tio2_site3/PREP"));

    let pol = base.input().fork("tio2_pol2", [("polarizations".to_string(), json!([2]))]).unwrap();
    let mut c = Calculation::new(pol, plan, f.pipeline.clone(), f.config.clone()).unwrap();
    let report = c.run(false).unwrap();
    assert_eq!(report.reused.len(), 5);
    assert_eq!(report.submitted, vec!["cnbse".to_string()]);
}
