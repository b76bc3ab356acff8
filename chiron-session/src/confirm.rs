//! Confirmation of destructive actions
//!
//! Operations that would discard something the user can see (selected
//! applications, a loss history) ask the caller first. The session never
//! confirms on its own.

use chiron_core::domain::application::AppKey;

/// A destructive action awaiting the caller's decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestructiveAction {
    /// Disconnecting a worker that hosts selected applications
    DisconnectWorker {
        worker_id: String,
        selected_orchestrator: bool,
        selected_trainers: usize,
    },
    /// Removing an orchestrator whose training history is on display
    RemoveOrchestrator { key: AppKey, history_rounds: u32 },
    /// Switching away from an orchestrator whose training history is on display
    SwitchOrchestrator { from: AppKey, to: Option<AppKey> },
}

impl std::fmt::Display for DestructiveAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DestructiveAction::DisconnectWorker {
                worker_id,
                selected_orchestrator,
                selected_trainers,
            } => {
                write!(f, "Disconnect worker '{}'?", worker_id)?;
                if *selected_orchestrator {
                    write!(f, " The selected orchestrator will be deselected.")?;
                }
                if *selected_trainers > 0 {
                    write!(
                        f,
                        " {} selected trainer(s) will be unregistered.",
                        selected_trainers
                    )?;
                }
                Ok(())
            }
            DestructiveAction::RemoveOrchestrator {
                key,
                history_rounds,
            } => write!(
                f,
                "Remove orchestrator '{}'? Its training history ({} round(s)) will be lost.",
                key, history_rounds
            ),
            DestructiveAction::SwitchOrchestrator { from, .. } => write!(
                f,
                "Switch away from orchestrator '{}'? Its training history will no longer be shown.",
                from
            ),
        }
    }
}

/// Yes/no decision point for destructive actions
pub trait Confirm: Send + Sync {
    fn confirm(&self, action: &DestructiveAction) -> bool;
}

impl<F> Confirm for F
where
    F: Fn(&DestructiveAction) -> bool + Send + Sync,
{
    fn confirm(&self, action: &DestructiveAction) -> bool {
        self(action)
    }
}

/// Accepts every action
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysConfirm;

impl Confirm for AlwaysConfirm {
    fn confirm(&self, _action: &DestructiveAction) -> bool {
        true
    }
}

/// Declines every action
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverConfirm;

impl Confirm for NeverConfirm {
    fn confirm(&self, _action: &DestructiveAction) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_confirm() {
        let action = DestructiveAction::SwitchOrchestrator {
            from: AppKey::orchestrator("acme/abc:chiron-manager"),
            to: None,
        };
        let only_switches =
            |a: &DestructiveAction| matches!(a, DestructiveAction::SwitchOrchestrator { .. });

        assert!(only_switches.confirm(&action));
        assert!(AlwaysConfirm.confirm(&action));
        assert!(!NeverConfirm.confirm(&action));
    }

    #[test]
    fn test_disconnect_prompt() {
        let action = DestructiveAction::DisconnectWorker {
            worker_id: "acme/abc:chiron-manager".to_string(),
            selected_orchestrator: true,
            selected_trainers: 2,
        };
        let prompt = action.to_string();
        assert!(prompt.contains("deselected"));
        assert!(prompt.contains("2 selected trainer(s)"));
    }
}
