//! Results Handler: artifacts sincronizados cargados en memoria.
//!
//! Cada serie es un par de columnas numéricas (energía, intensidad) con la
//! metadata que necesita un colaborador externo para seleccionarla y
//! graficarla sin recomputar. `save`/`load` usan un snapshot versionado.

mod series;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub use series::{parse_columns, Series, SeriesKey};

use crate::constants::RESULTS_FORMAT_VERSION;
use crate::errors::OrchestratorError;

pub const RESULTS_FILE: &str = "results.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsSnapshot {
    pub format_version: u32,
    pub calculation: String,
    pub saved_at: DateTime<Utc>,
    pub series: Vec<Series>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultsHandler {
    calculation: String,
    dir: PathBuf,
    series: Vec<Series>,
}

impl ResultsHandler {
    /// Handler vacío sobre un directorio de artifacts.
    pub fn open(calculation: &str, dir: &Path) -> Self {
        Self { calculation: calculation.to_string(), dir: dir.to_path_buf(), series: Vec::new() }
    }

    pub fn calculation(&self) -> &str {
        &self.calculation
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn series(&self) -> &[Series] {
        &self.series
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Carga un archivo de columnas. `path` relativo se resuelve contra el
    /// directorio del handler. Una serie con la misma clave se reemplaza.
    pub fn load_series(&mut self, key: SeriesKey, path: &Path) -> Result<(), OrchestratorError> {
        let full = self.dir.join(path);
        let (x, y) = parse_columns(&full)?;
        self.insert(Series { key, x, y, source: full });
        Ok(())
    }

    /// Carga varios archivos en paralelo. Falla con el primer error (en orden
    /// de entrada) sin modificar el dataset.
    pub fn load_many(&mut self, entries: Vec<(SeriesKey, PathBuf)>) -> Result<usize, OrchestratorError> {
        let dir = self.dir.clone();
        let parsed: Vec<Result<Series, OrchestratorError>> =
            entries.into_par_iter()
                   .map(|(key, path)| {
                       let full = dir.join(path);
                       parse_columns(&full).map(|(x, y)| Series { key, x, y, source: full })
                   })
                   .collect();
        let series = parsed.into_iter().collect::<Result<Vec<_>, _>>()?;
        let n = series.len();
        for s in series {
            self.insert(s);
        }
        debug!("results {}: loaded {n} series", self.calculation);
        Ok(n)
    }

    fn insert(&mut self, series: Series) {
        match self.series.iter_mut().find(|s| s.key == series.key) {
            Some(existing) => *existing = series,
            None => self.series.push(series),
        }
    }

    /// Series de un elemento, opcionalmente de un único sitio.
    pub fn select(&self, element: &str, site: Option<u32>) -> Vec<&Series> {
        self.series
            .iter()
            .filter(|s| s.key.element == element && site.map(|n| s.key.site == n).unwrap_or(true))
            .collect()
    }

    pub fn snapshot(&self) -> ResultsSnapshot {
        ResultsSnapshot { format_version: RESULTS_FORMAT_VERSION,
                          calculation: self.calculation.clone(),
                          saved_at: Utc::now(),
                          series: self.series.clone() }
    }

    /// Escribe `<dir>/results.json`.
    pub fn save(&self) -> Result<PathBuf, OrchestratorError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(RESULTS_FILE);
        let json = serde_json::to_string_pretty(&self.snapshot()).map_err(|e| OrchestratorError::Internal(e.to_string()))?;
        fs::write(&path, json)?;
        info!("results {}: saved {} series to {}", self.calculation, self.series.len(), path.display());
        Ok(path)
    }

    /// Lee un snapshot; el directorio del handler es el del archivo.
    pub fn load(path: &Path) -> Result<Self, OrchestratorError> {
        let text = fs::read_to_string(path)?;
        let snap: ResultsSnapshot = serde_json::from_str(&text)?;
        if snap.format_version != RESULTS_FORMAT_VERSION {
            return Err(OrchestratorError::CorruptSnapshot(format!("{}: format_version {}, expected {RESULTS_FORMAT_VERSION}",
                                                                  path.display(),
                                                                  snap.format_version)));
        }
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(Self { calculation: snap.calculation, dir, series: snap.series })
    }
}
