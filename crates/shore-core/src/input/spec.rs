//! `InputSpecification`: bolsa inmutable de parámetros validados contra un
//! `Vocabulary`. La identidad es el nombre (más un `Uuid` fresco por
//! instancia); dos specs con los mismos parámetros no se deduplican.
//!
//! `fork` es puro: copia, aplica overrides y devuelve un spec nuevo con
//! linaje hacia el padre. El fingerprint de un subconjunto de claves es lo
//! que permite a un cálculo derivado reutilizar stages del padre.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::Vocabulary;
use crate::errors::OrchestratorError;
use crate::hashing::{hash_value, to_canonical_json};

/// Referencia al spec del que se derivó otro.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    pub id: Uuid,
    pub name: String,
}

/// Forma persistible de un `InputSpecification` (sin el vocabulario).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputRecord {
    pub id: Uuid,
    pub name: String,
    pub params: BTreeMap<String, Value>,
    #[serde(default)]
    pub parent: Option<Lineage>,
}

#[derive(Debug, Clone)]
pub struct InputSpecification {
    id: Uuid,
    name: String,
    params: BTreeMap<String, Value>,
    parent: Option<Lineage>,
    vocabulary: Arc<Vocabulary>,
}

fn check_name(name: &str) -> Result<(), OrchestratorError> {
    if name.trim().is_empty() {
        return Err(OrchestratorError::InvalidInput("input name must not be empty".into()));
    }
    if name.contains(crate::constants::STAGE_SEPARATOR) || name.contains(char::is_whitespace) {
        return Err(OrchestratorError::InvalidInput(format!("input name '{name}' must not contain '/' or whitespace")));
    }
    Ok(())
}

impl InputSpecification {
    pub fn new<I>(name: &str, vocabulary: Arc<Vocabulary>, params: I) -> Result<Self, OrchestratorError>
        where I: IntoIterator<Item = (String, Value)>
    {
        check_name(name)?;
        let mut map = BTreeMap::new();
        for (k, v) in params {
            vocabulary.check(&k)?;
            map.insert(k, v);
        }
        Ok(Self { id: Uuid::new_v4(),
                  name: name.to_string(),
                  params: map,
                  parent: None,
                  vocabulary })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&Lineage> {
        self.parent.as_ref()
    }

    pub fn vocabulary(&self) -> &Arc<Vocabulary> {
        &self.vocabulary
    }

    /// Parámetros dados explícitamente (sin defaults).
    pub fn params(&self) -> &BTreeMap<String, Value> {
        &self.params
    }

    /// Valor efectivo de una clave: explícito o el default de la tabla.
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.params.get(key).or_else(|| self.vocabulary.default_of(key))
    }

    pub fn str_value(&self, key: &str) -> Option<&str> {
        self.value(key).and_then(Value::as_str)
    }

    /// Deriva un spec nuevo. El padre no se modifica; una clave fuera del
    /// vocabulario falla antes de construir nada.
    pub fn fork<I>(&self, name: &str, overrides: I) -> Result<Self, OrchestratorError>
        where I: IntoIterator<Item = (String, Value)>
    {
        check_name(name)?;
        if name == self.name {
            return Err(OrchestratorError::InvalidInput(format!("fork of '{name}' needs a new name")));
        }
        let mut params = self.params.clone();
        for (k, v) in overrides {
            self.vocabulary.check(&k)?;
            params.insert(k, v);
        }
        Ok(Self { id: Uuid::new_v4(),
                  name: name.to_string(),
                  params,
                  parent: Some(Lineage { id: self.id, name: self.name.clone() }),
                  vocabulary: Arc::clone(&self.vocabulary) })
    }

    /// Un fork por valor, nombrados `<nombre>_<valor>` (barridos de
    /// convergencia).
    pub fn sweep(&self, key: &str, values: &[Value]) -> Result<Vec<Self>, OrchestratorError> {
        self.vocabulary.check(key)?;
        values.iter()
              .map(|v| {
                  let name = format!("{}_{}", self.name, value_label(v));
                  self.fork(&name, [(key.to_string(), v.clone())])
              })
              .collect()
    }

    /// Fingerprint de un subconjunto de claves (defaults aplicados, ausentes
    /// como `null`). Independiente del nombre y del orden de las claves; un
    /// float entero (`30.0`) cuenta igual que el entero.
    pub fn fingerprint<S: AsRef<str>>(&self, keys: &[S]) -> String {
        let mut subset = Map::new();
        for k in keys {
            let k = k.as_ref();
            subset.insert(k.to_string(), self.value(k).map(normalize_numbers).unwrap_or(Value::Null));
        }
        hash_value(&Value::Object(subset))
    }

    pub fn to_record(&self) -> InputRecord {
        InputRecord { id: self.id,
                      name: self.name.clone(),
                      params: self.params.clone(),
                      parent: self.parent.clone() }
    }

    pub fn from_record(record: InputRecord, vocabulary: Arc<Vocabulary>) -> Result<Self, OrchestratorError> {
        check_name(&record.name)?;
        for k in record.params.keys() {
            vocabulary.check(k)?;
        }
        Ok(Self { id: record.id,
                  name: record.name,
                  params: record.params,
                  parent: record.parent,
                  vocabulary })
    }
}

/// Etiqueta apta para nombre: espacios y separadores pasan a `_`.
fn value_label(v: &Value) -> String {
    let raw = match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => to_canonical_json(other).chars()
                                         .filter(|c| !matches!(c, '[' | ']' | '{' | '}' | '"'))
                                         .collect(),
    };
    let label: String = raw.trim()
                           .chars()
                           .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
                           .collect();
    if label.is_empty() {
        "_".to_string()
    } else {
        label
    }
}

const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

fn normalize_numbers(v: &Value) -> Value {
    match v {
        Value::Number(n) if n.is_f64() => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() <= MAX_EXACT_INT => Value::from(f as i64),
            _ => v.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(normalize_numbers).collect()),
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), normalize_numbers(v))).collect()),
        other => other.clone(),
    }
}
