//! Control module for the rover
pub mod controllers;
pub mod goals;
pub mod motion;

use self::controllers::PoseRegulator;
use self::goals::GoalQueue;
use self::motion::{Motion, MotionGoal, MotionStatus};
use crate::error::{Result, RoverError};
use crate::lifecycle::{LifecycleNode, LifecycleNodeBase, State};
use crate::perception::odometry::WheelSampler;
use crate::perception::state::SharedEstimate;
use std::any::Any;
use std::collections::HashMap;

/// Outcome of one control step
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlEvent {
    /// No goals queued
    Idle,
    Pursuing(MotionGoal),
    /// The goal was reached and removed from the queue
    Reached(MotionGoal),
}

/// Control stack for the rover
pub struct ControlStack {
    base: LifecycleNodeBase,
    regulator: PoseRegulator,
    sampler: WheelSampler,
    shared: SharedEstimate,
    queue: GoalQueue,
    motion: Option<Motion>,
    pursuing: bool,
}

impl ControlStack {
    /// Create a new control stack
    pub fn new(regulator: PoseRegulator, sampler: WheelSampler, shared: SharedEstimate) -> Self {
        ControlStack {
            base: LifecycleNodeBase::new("control_stack"),
            regulator,
            sampler,
            shared,
            queue: GoalQueue::new(),
            motion: None,
            pursuing: false,
        }
    }

    /// Configure the regulator; applies from the next goal on
    pub fn configure_regulator(&mut self, params: &HashMap<String, f64>) -> Result<()> {
        self.regulator.configure(params)
    }

    pub fn regulator(&self) -> &PoseRegulator {
        &self.regulator
    }

    pub fn push_goal(&mut self, goal: MotionGoal) {
        self.queue.push(goal);
    }

    pub fn extend_goals(&mut self, goals: GoalQueue) {
        let mut goals = goals;
        while let Some(goal) = goals.advance() {
            self.queue.push(goal);
        }
    }

    pub fn pending_goals(&self) -> usize {
        self.queue.len()
    }

    /// Poll the current goal once, starting the next queued goal if idle
    pub fn step(&mut self) -> Result<ControlEvent> {
        self.base.require(State::Active)?;

        if !self.pursuing {
            let Some(&goal) = self.queue.current() else {
                return Ok(ControlEvent::Idle);
            };
            match self.motion.as_mut() {
                Some(motion) => {
                    motion.set_regulator(self.regulator.clone());
                    motion.retarget(goal);
                }
                None => {
                    self.motion = Some(Motion::new(
                        goal,
                        self.regulator.clone(),
                        self.sampler.clone(),
                        self.shared.clone(),
                    ))
                }
            }
            self.pursuing = true;
        }

        let Some(motion) = self.motion.as_mut() else {
            return Ok(ControlEvent::Idle);
        };
        let goal = motion.goal();
        match motion.poll() {
            Ok(MotionStatus::Pursuing) => Ok(ControlEvent::Pursuing(goal)),
            Ok(MotionStatus::Reached) => {
                self.queue.advance();
                self.pursuing = false;
                log::info!("goal {:?} done, {} remaining", goal, self.queue.len());
                Ok(ControlEvent::Reached(goal))
            }
            Err(e) => {
                self.pursuing = false;
                Err(e)
            }
        }
    }

    /// Work through the queue. Each goal gets at most `max_polls` steps.
    /// Returns the number of goals reached.
    pub fn run_goals(&mut self, max_polls: usize) -> Result<usize> {
        let mut reached = 0;
        let mut polls = 0;
        loop {
            match self.step()? {
                ControlEvent::Idle => return Ok(reached),
                ControlEvent::Reached(_) => {
                    reached += 1;
                    polls = 0;
                }
                ControlEvent::Pursuing(_) => {
                    polls += 1;
                    if polls >= max_polls {
                        self.halt()?;
                        return Err(RoverError::GoalTimeout { polls });
                    }
                }
            }
            std::thread::yield_now();
        }
    }

    /// Stop the wheels and abandon the current goal (it stays queued)
    pub fn halt(&mut self) -> Result<()> {
        self.pursuing = false;
        self.sampler.motors().stop()
    }
}

impl LifecycleNode for ControlStack {
    fn name(&self) -> &str {
        &self.base.name
    }

    fn on_configure(&mut self) -> Result<()> {
        self.base.require(State::Unconfigured)?;
        self.regulator.config().validate()?;
        self.base.transition(State::Inactive)
    }

    fn on_activate(&mut self) -> Result<()> {
        self.base.require(State::Inactive)?;
        self.base.transition(State::Active)
    }

    fn on_deactivate(&mut self) -> Result<()> {
        self.base.require(State::Active)?;
        self.halt()?;
        self.base.transition(State::Inactive)
    }

    fn on_cleanup(&mut self) -> Result<()> {
        self.base.require(State::Inactive)?;
        self.queue.clear();
        self.motion = None;
        self.base.transition(State::Unconfigured)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::linalg::Matrix;
    use crate::common::{Point2D, Pose2D};
    use crate::config::{ControllerConfig, DriveConfig};
    use crate::hardware::{ManualClock, SimulatedDrive};
    use crate::perception::state::PoseLog;
    use std::f64::consts::FRAC_PI_2;
    use std::sync::Arc;

    fn stack() -> (Arc<SimulatedDrive>, ControlStack) {
        let clock = Arc::new(ManualClock::new());
        let drive_config = DriveConfig {
            initial_pose: Pose2D::new(0.0, 0.0, 0.0),
            ..DriveConfig::default()
        };
        let drive = Arc::new(SimulatedDrive::new(clock.clone(), drive_config.clone()));
        let sampler = WheelSampler::new(drive.clone(), clock, drive_config.clone());
        let shared = SharedEstimate::new(
            drive_config.initial_pose,
            Matrix::diagonal(&[0.1, 0.1, 0.1]),
            PoseLog::disabled(),
        )
        .unwrap();
        let regulator = PoseRegulator::new(ControllerConfig {
            sample_period_s: 0.01,
            ..ControllerConfig::default()
        });
        (drive, ControlStack::new(regulator, sampler, shared))
    }

    #[test]
    fn test_idle_without_goals() {
        let (_drive, mut stack) = stack();
        assert!(stack.step().is_err());
        stack.on_configure().unwrap();
        stack.on_activate().unwrap();
        assert_eq!(stack.step().unwrap(), ControlEvent::Idle);
    }

    #[test]
    fn test_runs_queue_in_order() {
        let (drive, mut stack) = stack();
        stack.on_configure().unwrap();
        stack.on_activate().unwrap();
        stack.push_goal(MotionGoal::Heading(FRAC_PI_2));
        stack.push_goal(MotionGoal::Point {
            target: Point2D::new(0.0, 100.0),
            heading: None,
        });
        assert_eq!(stack.run_goals(5000).unwrap(), 2);
        assert_eq!(stack.pending_goals(), 0);

        let truth = drive.true_pose();
        assert!(truth.position().distance(&Point2D::new(0.0, 100.0)) < 12.0);
        assert_eq!(drive.wheel_speeds(), (0.0, 0.0));
    }

    #[test]
    fn test_deactivate_halts() {
        let (drive, mut stack) = stack();
        stack.on_configure().unwrap();
        stack.on_activate().unwrap();
        stack.push_goal(MotionGoal::Heading(FRAC_PI_2));
        assert!(matches!(stack.step().unwrap(), ControlEvent::Pursuing(_)));
        assert_ne!(drive.wheel_speeds(), (0.0, 0.0));
        stack.on_deactivate().unwrap();
        assert_eq!(drive.wheel_speeds(), (0.0, 0.0));
        assert_eq!(stack.pending_goals(), 1);
    }

    #[test]
    fn test_deactivate_requires_active() {
        let (_drive, mut stack) = stack();
        assert!(matches!(stack.on_deactivate(), Err(RoverError::Lifecycle(_))));
        assert!(matches!(stack.on_cleanup(), Err(RoverError::Lifecycle(_))));
        assert_eq!(stack.base.get_state(), State::Unconfigured);

        stack.on_configure().unwrap();
        assert!(stack.on_deactivate().is_err());
        assert_eq!(stack.base.get_state(), State::Inactive);
        stack.on_activate().unwrap();
        assert!(stack.on_activate().is_err());
        stack.on_deactivate().unwrap();
        stack.on_cleanup().unwrap();
        assert_eq!(stack.base.get_state(), State::Unconfigured);
    }
}
