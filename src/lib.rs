pub mod common;
pub mod config;
pub mod control;
pub mod error;
pub mod hardware;
pub mod lifecycle;
pub mod perception;

pub use crate::error::{Result, RoverError};

use crate::config::RoverConfig;
use crate::control::controllers::PoseRegulator;
use crate::control::ControlStack;
use crate::hardware::{Clock, MotorInterface};
use crate::lifecycle::LifecycleNode;
use crate::perception::localization::EkfLocalizer;
use crate::perception::odometry::{OdometryStack, WheelSampler};
use crate::perception::state::{PoseLog, SharedEstimate};
use crate::perception::PerceptionStack;
use std::sync::Arc;

/// Core functionality for the rover
pub struct RoverCore {
    components: Vec<Box<dyn LifecycleNode>>,
}

impl RoverCore {
    /// Create a new instance of RoverCore
    pub fn new() -> Self {
        RoverCore {
            components: Vec::new(),
        }
    }

    /// Odometry, perception and control stacks sharing one estimate.
    ///
    /// The estimate starts at the configured initial pose and appends to the
    /// configured pose log, if any.
    pub fn with_stacks(
        config: &RoverConfig,
        motors: Arc<dyn MotorInterface>,
        clock: Arc<dyn Clock>,
    ) -> Result<(Self, SharedEstimate)> {
        config.validate()?;
        let ekf = EkfLocalizer::new(config.ekf.clone());
        let log = match config.odometry.pose_log.as_deref() {
            Some(path) => PoseLog::append_to(path)?,
            None => PoseLog::disabled(),
        };
        let shared = SharedEstimate::new(config.drive.initial_pose, ekf.initial_covariance(), log)?;
        let sampler = WheelSampler::new(motors, clock, config.drive.clone());

        let mut core = RoverCore::new();
        core.register(OdometryStack::new(
            sampler.clone(),
            shared.clone(),
            ekf.clone(),
            config.odometry.clone(),
        ));
        core.register(PerceptionStack::new(
            config.ransac.clone(),
            config.landmarks.clone(),
            ekf,
            shared.clone(),
        ));
        core.register(ControlStack::new(
            PoseRegulator::new(config.controller.clone()),
            sampler,
            shared.clone(),
        ));
        Ok((core, shared))
    }

    /// Register a component with the core
    pub fn register<T: LifecycleNode + 'static>(&mut self, component: T) {
        self.components.push(Box::new(component));
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Configure and activate all registered components, in registration order
    pub fn init(&mut self) -> Result<()> {
        for component in &mut self.components {
            component.on_configure()?;
            component.on_activate()?;
        }
        Ok(())
    }

    /// Deactivate and clean up all components in reverse order.
    ///
    /// Every component is shut down even if an earlier one fails; the first
    /// error is returned. Components that were never activated refuse and
    /// stay where they are.
    pub fn shutdown(&mut self) -> Result<()> {
        let mut first_error = None;
        for component in self.components.iter_mut().rev() {
            let result = component
                .on_deactivate()
                .and_then(|_| component.on_cleanup());
            if let Err(e) = result {
                log::error!("{} failed to shut down: {}", component.name(), e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// First registered component of type `T`
    pub fn component_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.components
            .iter_mut()
            .find_map(|component| component.as_any_mut().downcast_mut::<T>())
    }
}

impl Default for RoverCore {
    fn default() -> Self {
        Self::new()
    }
}
