//! Constantes del orquestador.
//!
//! Los valores que participan en el cálculo de fingerprints o en los formatos
//! persistidos viven aquí. Cambiar `ENGINE_VERSION` invalida todos los
//! fingerprints de stages previos (ningún stage podrá reutilizarse).

/// Versión lógica del motor. Forma parte del input de cada fingerprint de
/// stage.
pub const ENGINE_VERSION: &str = "S1.0";

/// Versión del snapshot persistido de una `Calculation`.
pub const CALCULATION_FORMAT_VERSION: u32 = 1;

/// Versión del snapshot de resultados (`results.json`).
pub const RESULTS_FORMAT_VERSION: u32 = 1;

/// Separador entre nombre de cálculo y stage en el grafo compartido.
pub const STAGE_SEPARATOR: char = '/';

/// Línea que los job scripts escriben al final del log cuando el stage
/// terminó bien. El sondeo de estado la busca cuando el job ya salió de la
/// cola.
pub const COMPLETION_SENTINEL: &str = "shore: stage complete";
