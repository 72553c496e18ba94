//! shore-ocean: adaptador para el solver de espectroscopía de niveles de core
//! OCEAN. Define las opciones reconocidas, escribe `ocean.in`, arma el plan
//! de stages (parsing → opf → dft → prep → screen → cnbse) y carga los
//! espectros que deja CNBSE.
pub mod input;
pub mod plan;
pub mod spectra;
pub mod stage;
pub mod vocabulary;

pub use input::write_ocean_input;
pub use plan::ocean_plan;
pub use spectra::{core_level, load_spectra, spectrum_file, XasTarget};
pub use stage::{OceanStage, OceanStageKind, StageProgress};
pub use vocabulary::{ocean_vocabulary, ORCHESTRATION_KEYS};
