use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;

use super::{CalculationEvent, CalculationEventKind};

/// Almacenamiento de eventos append-only.
pub trait EventStore: Send {
    /// Agrega un evento a partir de su kind y devuelve el evento completo (con seq y ts).
    fn append_kind(&mut self, calculation_id: Uuid, kind: CalculationEventKind) -> CalculationEvent;
    /// Lista eventos de un cálculo (orden ascendente por seq).
    fn list(&self, calculation_id: Uuid) -> Vec<CalculationEvent>;
}

#[derive(Default)]
pub struct InMemoryEventStore {
    inner: HashMap<Uuid, Vec<CalculationEvent>>,
}

impl EventStore for InMemoryEventStore {
    fn append_kind(&mut self, calculation_id: Uuid, kind: CalculationEventKind) -> CalculationEvent {
        let vec = self.inner.entry(calculation_id).or_default();
        let ev = CalculationEvent { seq: vec.len() as u64, calculation_id, kind, ts: Utc::now() };
        vec.push(ev.clone());
        ev
    }

    fn list(&self, calculation_id: Uuid) -> Vec<CalculationEvent> {
        self.inner.get(&calculation_id).cloned().unwrap_or_default()
    }
}
