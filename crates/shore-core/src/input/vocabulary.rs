use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::OrchestratorError;

/// Una opción reconocida: clave, categoría de stage a la que pertenece y
/// valor por defecto (si lo hay).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamOption {
    pub key: String,
    pub category: String,
    pub description: String,
    pub default: Option<Value>,
}

/// Tabla ordenada de opciones reconocidas. Cualquier clave fuera de la tabla
/// se rechaza con `UnknownParameter`.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    options: IndexMap<String, ParamOption>,
}

impl Vocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: agrega una opción (reemplaza si la clave ya existía).
    pub fn option(mut self, key: &str, category: &str, description: &str, default: Option<Value>) -> Self {
        self.options.insert(key.to_string(),
                            ParamOption { key: key.to_string(),
                                          category: category.to_string(),
                                          description: description.to_string(),
                                          default });
        self
    }

    pub fn get(&self, key: &str) -> Option<&ParamOption> {
        self.options.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.options.contains_key(key)
    }

    pub fn check(&self, key: &str) -> Result<(), OrchestratorError> {
        if self.contains(key) {
            Ok(())
        } else {
            Err(OrchestratorError::UnknownParameter(key.to_string()))
        }
    }

    pub fn default_of(&self, key: &str) -> Option<&Value> {
        self.options.get(key).and_then(|o| o.default.as_ref())
    }

    /// Claves de las categorías dadas, en orden de la tabla.
    pub fn keys_in(&self, categories: &[&str]) -> Vec<String> {
        self.options
            .values()
            .filter(|o| categories.contains(&o.category.as_str()))
            .map(|o| o.key.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParamOption> {
        self.options.values()
    }
}
