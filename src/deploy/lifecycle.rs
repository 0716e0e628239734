use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    Pending,
    Initializing,
    Ready,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentEvent {
    Initialize,
    Loaded,
    LoadFailed,
    Stop,
}

impl DeploymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    /// State reached by applying `event`, or an error if the pair is not a
    /// legal transition.
    pub fn next(self, event: DeploymentEvent) -> Result<Self> {
        let next = match (self, event) {
            (Self::Pending, DeploymentEvent::Initialize) => Self::Initializing,
            (Self::Initializing, DeploymentEvent::Loaded) => Self::Ready,
            (Self::Initializing, DeploymentEvent::LoadFailed) => Self::Failed,
            (Self::Ready, DeploymentEvent::Stop) | (Self::Pending, DeploymentEvent::Stop) => {
                Self::Stopped
            }
            (state, event) => {
                warn!("Invalid deployment transition from {:?} with {:?}", state, event);
                return Err(Error::InvalidTransition {
                    current: state.to_string(),
                    requested: format!("{event:?}"),
                });
            }
        };
        Ok(next)
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "initializing" => Ok(Self::Initializing),
            "ready" => Ok(Self::Ready),
            "stopped" => Ok(Self::Stopped),
            "failed" => Ok(Self::Failed),
            other => Err(Error::internal(format!("unknown deployment state '{other}'"))),
        }
    }
}

/// Tracks one deployment through its lifecycle.
#[derive(Debug)]
pub struct DeploymentLifecycle {
    app_name: String,
    state: DeploymentState,
}

impl DeploymentLifecycle {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            state: DeploymentState::Pending,
        }
    }

    pub fn state(&self) -> DeploymentState {
        self.state
    }

    pub fn transition(&mut self, event: DeploymentEvent) -> Result<DeploymentState> {
        let old_state = self.state;
        let new_state = old_state.next(event)?;
        if old_state != new_state {
            info!(
                "Deployment {} state transition: {} -> {} (event: {:?})",
                self.app_name, old_state, new_state, event
            );
        } else {
            debug!("Deployment {} stays {}", self.app_name, old_state);
        }
        self.state = new_state;
        Ok(new_state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_happy_path() {
        let mut lifecycle = DeploymentLifecycle::new("llm");
        assert_eq!(lifecycle.state(), DeploymentState::Pending);
        lifecycle.transition(DeploymentEvent::Initialize).unwrap();
        lifecycle.transition(DeploymentEvent::Loaded).unwrap();
        assert_eq!(lifecycle.state(), DeploymentState::Ready);
        lifecycle.transition(DeploymentEvent::Stop).unwrap();
        assert_eq!(lifecycle.state(), DeploymentState::Stopped);
        assert!(lifecycle.state().is_terminal());
    }

    #[test]
    fn test_load_failure() {
        let mut lifecycle = DeploymentLifecycle::new("llm");
        lifecycle.transition(DeploymentEvent::Initialize).unwrap();
        lifecycle.transition(DeploymentEvent::LoadFailed).unwrap();
        assert_eq!(lifecycle.state(), DeploymentState::Failed);
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(DeploymentState::Pending.next(DeploymentEvent::Loaded).is_err());
        assert!(DeploymentState::Ready.next(DeploymentEvent::Initialize).is_err());
        assert!(DeploymentState::Stopped.next(DeploymentEvent::Stop).is_err());
        assert!(DeploymentState::Failed.next(DeploymentEvent::Stop).is_err());

        let err = DeploymentState::Initializing
            .next(DeploymentEvent::Stop)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid state transition: initializing -> Stop"
        );
    }

    #[test]
    fn test_state_string_round_trip() {
        for state in [
            DeploymentState::Pending,
            DeploymentState::Initializing,
            DeploymentState::Ready,
            DeploymentState::Stopped,
            DeploymentState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<DeploymentState>().unwrap(), state);
        }
    }
}
