use crate::CoreError;
use serde::Serialize;
use std::fmt;

/// Where an environment is in its life. Never persisted: each invocation
/// walks the states it drives and validates every step it takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvState {
    Requested,
    Resolved,
    Provisioning,
    Active,
    TearingDown,
    RollingBack,
    Removed,
}

impl fmt::Display for EnvState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnvState::Requested => "requested",
            EnvState::Resolved => "resolved",
            EnvState::Provisioning => "provisioning",
            EnvState::Active => "active",
            EnvState::TearingDown => "tearing_down",
            EnvState::RollingBack => "rolling_back",
            EnvState::Removed => "removed",
        };
        f.write_str(s)
    }
}

pub fn validate_transition(from: EnvState, to: EnvState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (EnvState::Requested, EnvState::Resolved)
            | (EnvState::Resolved, EnvState::Provisioning)
            | (EnvState::Provisioning, EnvState::Active | EnvState::RollingBack)
            | (EnvState::Active, EnvState::TearingDown)
            | (EnvState::TearingDown | EnvState::RollingBack, EnvState::Removed)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Tracks the current state of one invocation's environment.
#[derive(Debug)]
pub struct Lifecycle {
    state: EnvState,
}

impl Lifecycle {
    pub fn new(state: EnvState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> EnvState {
        self.state
    }

    pub fn advance(&mut self, to: EnvState) -> Result<(), CoreError> {
        validate_transition(self.state, to)?;
        tracing::debug!("lifecycle {} -> {to}", self.state);
        self.state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        assert!(validate_transition(EnvState::Requested, EnvState::Resolved).is_ok());
        assert!(validate_transition(EnvState::Resolved, EnvState::Provisioning).is_ok());
        assert!(validate_transition(EnvState::Provisioning, EnvState::Active).is_ok());
        assert!(validate_transition(EnvState::Provisioning, EnvState::RollingBack).is_ok());
        assert!(validate_transition(EnvState::RollingBack, EnvState::Removed).is_ok());
        assert!(validate_transition(EnvState::Active, EnvState::TearingDown).is_ok());
        assert!(validate_transition(EnvState::TearingDown, EnvState::Removed).is_ok());
    }

    #[test]
    fn invalid_transitions() {
        assert!(validate_transition(EnvState::Requested, EnvState::Active).is_err());
        assert!(validate_transition(EnvState::Active, EnvState::RollingBack).is_err());
        assert!(validate_transition(EnvState::Removed, EnvState::Active).is_err());
        assert!(validate_transition(EnvState::Resolved, EnvState::TearingDown).is_err());
        assert!(validate_transition(EnvState::TearingDown, EnvState::Active).is_err());
    }

    #[test]
    fn lifecycle_walks_the_happy_path() {
        let mut lc = Lifecycle::new(EnvState::Requested);
        for next in [
            EnvState::Resolved,
            EnvState::Provisioning,
            EnvState::Active,
            EnvState::TearingDown,
            EnvState::Removed,
        ] {
            lc.advance(next).unwrap();
        }
        assert_eq!(lc.state(), EnvState::Removed);
        assert!(lc.advance(EnvState::Active).is_err());
    }
}
