use serde_json::json;
use shore_core::input::Vocabulary;

/// Claves que usa el orquestador y que no van a `ocean.in`.
pub const ORCHESTRATION_KEYS: &[&str] = &["element", "edge", "sites", "polarizations", "ncores", "ocean_bin"];

/// Tabla de opciones reconocidas, agrupadas por categoría de stage.
pub fn ocean_vocabulary() -> Vocabulary {
    Vocabulary::new().option("acell", "structure", "lattice constants (Bohr)", None)
                     .option("rprim", "structure", "primitive vectors, one per row", None)
                     .option("xred", "structure", "reduced atomic positions, one per row", None)
                     .option("znucl", "structure", "atomic number of each type", None)
                     .option("typat", "structure", "type index of each atom", None)
                     .option("ecut", "dft", "plane-wave cutoff (Ry)", Some(json!(30)))
                     .option("ngkpt", "dft", "k-point grid of the final states", Some(json!([4, 4, 4])))
                     .option("nbands", "dft", "bands of the final states", None)
                     .option("toldfe", "dft", "SCF energy tolerance", Some(json!(1.0e-6)))
                     .option("screen.nkpt", "screen", "k-point grid for the screening", None)
                     .option("screen.nbands", "screen", "bands for the screening", None)
                     .option("screen.shells", "screen", "radii of the screening shells", Some(json!([4.0])))
                     .option("cnbse.rad", "cnbse", "radius of the BSE interaction", None)
                     .option("cnbse.niter", "cnbse", "Haydock iterations", Some(json!(100)))
                     .option("cnbse.broaden", "cnbse", "spectral broadening (eV)", Some(json!(0.1)))
                     .option("cnbse.spect_range", "cnbse", "points, lower and upper energy", None)
                     .option("scfac", "cnbse", "Slater integral scaling", Some(json!(0.8)))
                     .option("element", "xas", "absorbing element symbol", None)
                     .option("edge", "xas", "absorption edge (K, L)", Some(json!("K")))
                     .option("sites", "xas", "absorbing site indices", Some(json!([1])))
                     .option("polarizations", "xas", "photon polarization indices", Some(json!([1, 2, 3])))
                     .option("ncores", "run", "tasks requested from the scheduler", Some(json!(1)))
                     .option("ocean_bin", "run", "solver executable on the remote host", Some(json!("ocean.pl")))
}
