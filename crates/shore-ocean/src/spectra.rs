//! Nombres de los archivos de espectro de CNBSE y su carga en el Results
//! Handler.

use std::path::PathBuf;

use log::debug;
use serde_json::Value;
use shore_core::errors::OrchestratorError;
use shore_core::input::InputSpecification;
use shore_core::results::{ResultsHandler, SeriesKey};

use crate::stage::OceanStageKind;

/// Nivel de core de un borde: K → 1s, cualquier borde L → 2p.
pub fn core_level(edge: &str) -> Result<&'static str, OrchestratorError> {
    match edge.trim().to_ascii_uppercase().as_str() {
        "K" => Ok("1s"),
        "L" | "L1" | "L2" | "L3" | "L23" => Ok("2p"),
        other => Err(OrchestratorError::InvalidInput(format!("unsupported edge '{other}'"))),
    }
}

/// `absspct_<El>.<sitio:04>_<1s|2p>_<pol:02>`
pub fn spectrum_file(element: &str, site: u32, core_level: &str, polarization: u32) -> String {
    format!("absspct_{element}.{site:04}_{core_level}_{polarization:02}")
}

/// Elemento, borde, sitios y polarizaciones de un input, validados.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XasTarget {
    pub element: String,
    pub edge: String,
    pub core_level: String,
    pub sites: Vec<u32>,
    pub polarizations: Vec<u32>,
}

impl XasTarget {
    pub fn from_input(input: &InputSpecification) -> Result<Self, OrchestratorError> {
        let element = input.str_value("element")
                           .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphabetic()))
                           .ok_or_else(|| OrchestratorError::InvalidInput("element must be a chemical symbol".into()))?;
        let edge = input.str_value("edge").unwrap_or("K");
        let core_level = core_level(edge)?;
        Ok(Self { element: element.to_string(),
                  edge: edge.to_ascii_uppercase(),
                  core_level: core_level.to_string(),
                  sites: indices(input, "sites")?,
                  polarizations: indices(input, "polarizations")? })
    }

    /// Los archivos esperados, sitio por sitio.
    pub fn files(&self) -> Vec<(SeriesKey, String)> {
        let mut out = Vec::with_capacity(self.sites.len() * self.polarizations.len());
        for &site in &self.sites {
            for &pol in &self.polarizations {
                out.push((self.series_key(site, pol), spectrum_file(&self.element, site, &self.core_level, pol)));
            }
        }
        out
    }

    pub fn series_key(&self, site: u32, polarization: u32) -> SeriesKey {
        SeriesKey { element: self.element.clone(),
                    edge: self.edge.clone(),
                    core_level: self.core_level.clone(),
                    site,
                    polarization }
    }
}

/// Acepta un entero o una lista de enteros positivos.
fn indices(input: &InputSpecification, key: &str) -> Result<Vec<u32>, OrchestratorError> {
    let bad = || OrchestratorError::InvalidInput(format!("{key} must be positive integers"));
    let one = |v: &Value| v.as_u64().filter(|n| *n > 0).and_then(|n| u32::try_from(n).ok()).ok_or_else(bad);
    match input.value(key) {
        Some(Value::Array(items)) if !items.is_empty() => items.iter().map(one).collect(),
        Some(v @ Value::Number(_)) => Ok(vec![one(v)?]),
        _ => Err(bad()),
    }
}

/// Carga en `handler` los espectros de CNBSE ya presentes bajo su
/// directorio. Los que faltan (todavía sin sincronizar) se saltean.
pub fn load_spectra(handler: &mut ResultsHandler, input: &InputSpecification) -> Result<usize, OrchestratorError> {
    let target = XasTarget::from_input(input)?;
    let stage_dir = PathBuf::from(OceanStageKind::Cnbse.directory());
    let mut entries = Vec::new();
    for (key, file) in target.files() {
        let rel = stage_dir.join(&file);
        if handler.dir().join(&rel).is_file() {
            entries.push((key, rel));
        } else {
            debug!("spectrum {file} not present yet");
        }
    }
    if entries.is_empty() {
        return Ok(0);
    }
    handler.load_many(entries)
}
