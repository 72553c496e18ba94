//! Costura entre el orquestador y el entorno remoto.
//!
//! `RemoteSession` es todo lo que el driver de cálculos necesita de una
//! conexión: ejecutar un comando con deadline y mover archivos con un
//! reporte por archivo. La implementación SSH vive en `shore-remote`;
//! `InMemoryRemote` sirve para tests y dry runs.

mod memory;
mod types;

pub use memory::InMemoryRemote;
pub use types::{CommandOutput, FileOutcome, RemoteFile, RemoteSession, TransferReport, TransferStatus};
