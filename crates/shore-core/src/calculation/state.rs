use serde::{Deserialize, Serialize};

/// Estado agregado de un cálculo.
///
/// `NotStarted -> Submitting -> AwaitingRemote -> Syncing -> Complete`, con
/// `Failed` alcanzable desde cualquier estado no terminal (un stage propio
/// terminó en `Failed`). Solo `run(overwrite = true)` saca a un cálculo de
/// `Failed` o `Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CalculationState {
    NotStarted,
    Submitting,
    AwaitingRemote,
    Syncing,
    Complete,
    Failed,
}

impl CalculationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl std::fmt::Display for CalculationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotStarted => "not started",
            Self::Submitting => "submitting",
            Self::AwaitingRemote => "awaiting remote",
            Self::Syncing => "syncing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}
