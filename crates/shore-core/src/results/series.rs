use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;

/// Metadata que identifica una serie: elemento absorbente, borde, nivel de
/// core, índice de sitio y polarización.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub element: String,
    pub edge: String,
    pub core_level: String,
    pub site: u32,
    pub polarization: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub key: SeriesKey,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub source: PathBuf,
}

/// Lee las dos primeras columnas de un archivo de texto. Líneas vacías o que
/// empiezan con `#` se ignoran; acepta exponentes Fortran (`1.0D-3`).
pub fn parse_columns(path: &Path) -> Result<(Vec<f64>, Vec<f64>), OrchestratorError> {
    let text = fs::read_to_string(path)?;
    let mut x = Vec::new();
    let mut y = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut cols = line.split_whitespace().map(parse_number);
        match (cols.next(), cols.next()) {
            (Some(Some(a)), Some(Some(b))) => {
                x.push(a);
                y.push(b);
            }
            _ => {
                return Err(OrchestratorError::InvalidInput(format!("{}:{}: expected two numeric columns",
                                                                   path.display(),
                                                                   n + 1)))
            }
        }
    }
    Ok((x, y))
}

fn parse_number(tok: &str) -> Option<f64> {
    tok.parse::<f64>().ok().or_else(|| tok.replace(['D', 'd'], "E").parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fortran_exponents_and_comments() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("absspct");
        fs::write(&p, "#  omega  mu\n\n 1.0D+01  2.5D-01  9.9\n 11.0 0.5\n").unwrap();
        let (x, y) = parse_columns(&p).unwrap();
        assert_eq!(x, vec![10.0, 11.0]);
        assert_eq!(y, vec![0.25, 0.5]);
    }

    #[test]
    fn malformed_line_names_location() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("bad");
        fs::write(&p, "1 2\nnot numbers\n").unwrap();
        let err = parse_columns(&p).unwrap_err();
        assert!(err.to_string().contains(":2:"));
    }
}
