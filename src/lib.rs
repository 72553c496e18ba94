//! shore: orquestación de cálculos multi-stage sobre un cluster remoto.
//!
//! Este crate reúne las tres librerías del workspace:
//! - el núcleo (`shore-core`) re-exportado en la raíz,
//! - `ssh`: credenciales, configuración y la conexión SSH (`shore-remote`),
//! - `ocean`: el adaptador del solver OCEAN (`shore-ocean`).

pub use shore_core::*;

pub mod ssh {
    pub use shore_remote::*;
}

pub mod ocean {
    pub use shore_ocean::*;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn facade_exposes_every_layer() {
        let plan = ocean::ocean_plan(stage::Scheduler::Direct).unwrap();
        assert_eq!(plan.stages().len(), 6);
        assert_eq!(ssh::CREDENTIAL_FORMAT_VERSION, 1);
        assert_eq!(OrchestratorError::Cancelled.to_string(),
                   "run cancelled before any remote command was issued");
    }
}
