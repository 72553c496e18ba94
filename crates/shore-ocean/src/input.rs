//! Escritura de `ocean.in`.
//!
//! Formato de bloques `clave { valor }`. Listas planas van en una línea;
//! listas de listas (`rprim`, `xred`) una fila por línea. Las claves de
//! orquestación no se escriben; el borde sí, como bloque `edges`.

use serde_json::Value;
use shore_core::errors::OrchestratorError;
use shore_core::input::InputSpecification;

use crate::spectra::XasTarget;
use crate::vocabulary::ORCHESTRATION_KEYS;

pub const OCEAN_INPUT: &str = "ocean.in";

pub fn write_ocean_input(input: &InputSpecification) -> Result<String, OrchestratorError> {
    let target = XasTarget::from_input(input)?;
    let mut out = String::new();
    for opt in input.vocabulary().iter() {
        if ORCHESTRATION_KEYS.contains(&opt.key.as_str()) {
            continue;
        }
        match input.value(&opt.key) {
            None | Some(Value::Null) => continue,
            Some(v) => out.push_str(&block(&opt.key, v)?),
        }
    }
    let (n, l) = if target.core_level == "1s" { (1, 0) } else { (2, 1) };
    out.push_str("edges {\n");
    for site in &target.sites {
        out.push_str(&format!("  {site} {n} {l}\n"));
    }
    out.push_str("}\n");
    Ok(out)
}

fn block(key: &str, value: &Value) -> Result<String, OrchestratorError> {
    match value {
        Value::Array(rows) if rows.iter().any(Value::is_array) => {
            let mut s = format!("{key} {{\n");
            for row in rows {
                s.push_str(&format!("  {}\n", scalars(key, row)?));
            }
            s.push_str("}\n");
            Ok(s)
        }
        other => Ok(format!("{key} {{ {} }}\n", scalars(key, other)?)),
    }
}

fn scalars(key: &str, value: &Value) -> Result<String, OrchestratorError> {
    match value {
        Value::Array(items) => items.iter().map(|v| scalar(key, v)).collect::<Result<Vec<_>, _>>().map(|v| v.join(" ")),
        other => scalar(key, other),
    }
}

fn scalar(key: &str, value: &Value) -> Result<String, OrchestratorError> {
    match value {
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(s.clone()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(OrchestratorError::InvalidInput(format!("{key}: unsupported value {value}"))),
    }
}
