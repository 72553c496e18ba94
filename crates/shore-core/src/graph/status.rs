use serde::{Deserialize, Serialize};

/// Estado de un stage dentro del grafo.
///
/// Las transiciones válidas avanzan en este orden:
/// - `Pending` -> `Submitted`
/// - `Submitted` -> `Running`
/// - `Running` -> `Done` | `Failed`
///
/// Saltar hacia adelante está permitido (un poll puede observar un job que ya
/// terminó sin haberlo visto correr). Retroceder solo es posible con `force`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageStatus {
    /// Esperando dependencias o envío.
    Pending,
    /// Enviado al scheduler remoto, aún en cola.
    Submitted,
    /// En ejecución.
    Running,
    /// Terminó bien; sus artifacts pueden sincronizarse.
    Done,
    /// Terminó con error.
    Failed,
}

impl StageStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Submitted => 1,
            Self::Running => 2,
            Self::Done | Self::Failed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Un stage "en vuelo" es uno que el sondeo de estado debe consultar.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Submitted | Self::Running)
    }

    /// Transición no forzada: igual estado (no-op) o estrictamente hacia
    /// adelante desde un estado no terminal.
    pub fn can_advance_to(self, next: StageStatus) -> bool {
        if self == next {
            return true;
        }
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dónde se ejecuta el trabajo de un stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionTarget {
    Local,
    Remote,
}

impl std::fmt::Display for ExecutionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote => f.write_str("remote"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::StageStatus::*;

    #[test]
    fn forward_moves_only() {
        assert!(Pending.can_advance_to(Submitted));
        assert!(Pending.can_advance_to(Done));
        assert!(Submitted.can_advance_to(Running));
        assert!(Running.can_advance_to(Failed));
        assert!(Running.can_advance_to(Running));
        assert!(!Running.can_advance_to(Submitted));
        assert!(!Done.can_advance_to(Pending));
        assert!(!Done.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(Done));
    }
}
