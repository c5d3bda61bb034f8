//! Conductor state machine.
//!
//! `Constructed -> Armed -> Running -> Stopped`. `Armed -> Running` is driven
//! by the substrate's run-start signal, never by the caller directly. A run
//! may also end before it started (`Constructed`/`Armed -> Stopped`).

use serde::Serialize;

use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConductorState {
    /// Configuration validated, identity allocated, nothing wired.
    Constructed,
    /// Engines wired to the population; worker registered but not running.
    Armed,
    /// Worker alive, channel slots flowing.
    Running,
    /// Worker joined, bus released.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LifecycleEvent {
    Arm,
    RunStarted,
    RunStopped,
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: ConductorState,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: ConductorState::Constructed,
        }
    }

    pub fn state(&self) -> ConductorState {
        self.state
    }

    /// The state `event` would lead to, without applying it.
    pub fn peek(&self, event: LifecycleEvent) -> Result<ConductorState> {
        use ConductorState::*;
        use LifecycleEvent::*;
        let next = match (self.state, event) {
            (Constructed, Arm) => Armed,
            (Armed, RunStarted) => Running,
            (Constructed | Armed | Running, RunStopped) => Stopped,
            (from, event) => return Err(BridgeError::InvalidTransition { from, event }),
        };
        Ok(next)
    }

    pub fn apply(&mut self, event: LifecycleEvent) -> Result<ConductorState> {
        let next = self.peek(event)?;
        self.state = next;
        Ok(next)
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConductorState::*;
    use LifecycleEvent::*;

    #[test]
    fn happy_path() {
        let mut l = Lifecycle::new();
        assert_eq!(l.apply(Arm).unwrap(), Armed);
        assert_eq!(l.apply(RunStarted).unwrap(), Running);
        assert_eq!(l.apply(RunStopped).unwrap(), Stopped);
    }

    #[test]
    fn run_start_requires_arming() {
        let mut l = Lifecycle::new();
        assert!(matches!(
            l.apply(RunStarted),
            Err(BridgeError::InvalidTransition { from: Constructed, event: RunStarted })
        ));
        assert_eq!(l.state(), Constructed);
    }

    #[test]
    fn worker_starts_at_most_once() {
        let mut l = Lifecycle::new();
        l.apply(Arm).unwrap();
        l.apply(RunStarted).unwrap();
        assert!(l.apply(RunStarted).is_err());
        assert!(l.apply(Arm).is_err());
    }

    #[test]
    fn stopped_is_terminal() {
        let mut l = Lifecycle::new();
        l.apply(Arm).unwrap();
        l.apply(RunStopped).unwrap();
        for ev in [Arm, RunStarted, RunStopped] {
            assert!(l.peek(ev).is_err());
        }
    }
}
