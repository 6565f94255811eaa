//! Lifecycle management for rover components

use crate::error::{Result, RoverError};
use std::any::Any;

/// Trait for components that follow a lifecycle pattern
pub trait LifecycleNode: Send {
    /// Component name, for logs
    fn name(&self) -> &str;

    /// Configure the node
    fn on_configure(&mut self) -> Result<()>;

    /// Activate the node
    fn on_activate(&mut self) -> Result<()>;

    /// Deactivate the node
    fn on_deactivate(&mut self) -> Result<()>;

    /// Clean up the node
    fn on_cleanup(&mut self) -> Result<()>;

    /// Convert to Any for downcasting
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Base implementation for lifecycle nodes
#[derive(Debug)]
pub struct LifecycleNodeBase {
    pub name: String,
    state: State,
}

/// State of a lifecycle node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unconfigured,
    Inactive,
    Active,
    Finalized,
}

impl LifecycleNodeBase {
    /// Create a new lifecycle node base
    pub fn new(name: &str) -> Self {
        LifecycleNodeBase {
            name: name.to_string(),
            state: State::Unconfigured,
        }
    }

    /// Get the current state
    pub fn get_state(&self) -> State {
        self.state
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow
    pub fn transition(&mut self, next: State) -> Result<()> {
        let allowed = matches!(
            (self.state, next),
            (State::Unconfigured, State::Inactive)
                | (State::Inactive, State::Active)
                | (State::Active, State::Inactive)
                | (State::Inactive, State::Unconfigured)
                | (_, State::Finalized)
        );
        if !allowed {
            return Err(RoverError::Lifecycle(format!(
                "{}: cannot go from {:?} to {:?}",
                self.name, self.state, next
            )));
        }
        log::info!("{}: {:?} -> {:?}", self.name, self.state, next);
        self.state = next;
        Ok(())
    }

    pub fn require(&self, state: State) -> Result<()> {
        if self.state != state {
            return Err(RoverError::Lifecycle(format!(
                "{} is {:?}, expected {:?}",
                self.name, self.state, state
            )));
        }
        Ok(())
    }
}
