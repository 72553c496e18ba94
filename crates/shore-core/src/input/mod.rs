//! Especificación de input de un cálculo y su tabla de opciones reconocidas.

mod spec;
mod vocabulary;

pub use spec::{InputRecord, InputSpecification, Lineage};
pub use vocabulary::{ParamOption, Vocabulary};
