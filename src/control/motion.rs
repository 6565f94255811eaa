//! Goal pursuit as an explicit `Pursuing -> Reached` state machine
//!
//! Each poll checks termination against a locally predicted pose, commands the
//! wheels, then samples the encoders for one control period and integrates the
//! prediction. Whenever the shared estimate has been written since the last
//! poll, the prediction restarts from it and the local steps taken after its
//! stamp are replayed on top.

use super::controllers::PoseRegulator;
use crate::common::{Point2D, Pose2D};
use crate::error::{Result, RoverError};
use crate::hardware::Wheel;
use crate::perception::odometry::{integrate, WheelSampler};
use crate::perception::state::SharedEstimate;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Local steps kept individually; older ones are folded into one motion
const MAX_PENDING_STEPS: usize = 256;

/// What a motion is trying to achieve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MotionGoal {
    /// Turn in place to an absolute heading
    Heading(f64),
    /// Drive to a point, then optionally turn to a final heading
    Point { target: Point2D, heading: Option<f64> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionStatus {
    Pursuing,
    Reached,
}

/// One sampled control step, in the robot frame
#[derive(Debug, Clone, Copy)]
struct LocalStep {
    end: Duration,
    dt: f64,
    linear: f64,
    angular: f64,
}

impl LocalStep {
    fn relative(&self, dt: f64) -> Pose2D {
        Pose2D::new(self.linear * dt, 0.0, self.angular * dt)
    }
}

pub struct Motion {
    goal: MotionGoal,
    phase: MotionGoal,
    regulator: PoseRegulator,
    sampler: WheelSampler,
    shared: SharedEstimate,
    prediction: Pose2D,
    synced_generation: u64,
    /// Steps not yet covered by the shared estimate's stamp
    pending: VecDeque<LocalStep>,
    /// Steps dropped from `pending`, composed, with the end of the last one
    folded: Option<(Duration, Pose2D)>,
    status: MotionStatus,
    polls: usize,
}

impl Motion {
    pub fn new(
        goal: MotionGoal,
        regulator: PoseRegulator,
        sampler: WheelSampler,
        shared: SharedEstimate,
    ) -> Self {
        let snapshot = shared.snapshot();
        log::info!("pursuing {:?} from {:?}", goal, snapshot.pose);
        Motion {
            goal,
            phase: goal,
            regulator,
            sampler,
            shared,
            prediction: snapshot.pose,
            synced_generation: snapshot.generation,
            pending: VecDeque::new(),
            folded: None,
            status: MotionStatus::Pursuing,
            polls: 0,
        }
    }

    /// Start on a new goal, keeping the current prediction
    pub fn retarget(&mut self, goal: MotionGoal) {
        log::info!("pursuing {:?} from {:?}", goal, self.prediction);
        self.goal = goal;
        self.phase = goal;
        self.status = MotionStatus::Pursuing;
        self.polls = 0;
    }

    pub fn set_regulator(&mut self, regulator: PoseRegulator) {
        self.regulator = regulator;
    }

    pub fn goal(&self) -> MotionGoal {
        self.goal
    }

    pub fn status(&self) -> MotionStatus {
        self.status
    }

    /// Pose the controller currently believes
    pub fn prediction(&self) -> Pose2D {
        self.prediction
    }

    pub fn polls(&self) -> usize {
        self.polls
    }

    /// Advance one control step.
    ///
    /// Blocks for one sampling period while pursuing. On a sensor fault the
    /// wheels are stopped before the error is returned.
    pub fn poll(&mut self) -> Result<MotionStatus> {
        if self.status == MotionStatus::Reached {
            return Ok(MotionStatus::Reached);
        }
        self.resync();

        if self.phase_reached() {
            match self.phase {
                MotionGoal::Point {
                    heading: Some(heading),
                    ..
                } => {
                    log::debug!("point reached, turning to final heading {:.3}", heading);
                    self.phase = MotionGoal::Heading(heading);
                    return self.poll();
                }
                _ => {
                    self.sampler.motors().stop()?;
                    self.status = MotionStatus::Reached;
                    log::info!(
                        "reached {:?} after {} steps at {:?}",
                        self.goal,
                        self.polls,
                        self.prediction
                    );
                    return Ok(MotionStatus::Reached);
                }
            }
        }

        if let Err(e) = self.step() {
            if let Err(stop_error) = self.sampler.motors().stop() {
                log::error!("failed to stop wheels after fault: {}", stop_error);
            }
            return Err(e);
        }
        self.polls += 1;
        Ok(MotionStatus::Pursuing)
    }

    /// Poll until reached, yielding between polls; gives up after `max_polls`
    pub fn wait_until_reached(&mut self, max_polls: usize) -> Result<usize> {
        let start = self.polls;
        while self.poll()? == MotionStatus::Pursuing {
            if self.polls - start >= max_polls {
                self.sampler.motors().stop()?;
                return Err(RoverError::GoalTimeout { polls: max_polls });
            }
            std::thread::yield_now();
        }
        Ok(self.polls - start)
    }

    /// Restart from a newer shared estimate, replaying local motion after its stamp
    fn resync(&mut self) {
        let snapshot = self.shared.snapshot();
        if snapshot.generation == self.synced_generation {
            return;
        }
        self.synced_generation = snapshot.generation;
        let stamp = snapshot.stamp;

        if matches!(self.folded, Some((end, _)) if end <= stamp) {
            self.folded = None;
        }
        while self.pending.front().map_or(false, |step| step.end <= stamp) {
            self.pending.pop_front();
        }

        let mut pose = snapshot.pose;
        if let Some((_, relative)) = self.folded {
            pose = pose.compose(&relative);
        }
        for step in &self.pending {
            // only the part of a straddling step after the stamp
            let dt = step.dt.min(step.end.saturating_sub(stamp).as_secs_f64());
            pose = pose.compose(&step.relative(dt));
        }
        self.prediction = pose;
    }

    fn record(&mut self, step: LocalStep) {
        self.pending.push_back(step);
        if self.pending.len() > MAX_PENDING_STEPS {
            if let Some(oldest) = self.pending.pop_front() {
                let relative = oldest.relative(oldest.dt);
                let composed = match self.folded {
                    Some((_, folded)) => folded.compose(&relative),
                    None => relative,
                };
                self.folded = Some((oldest.end, composed));
            }
        }
    }

    fn phase_reached(&self) -> bool {
        match self.phase {
            MotionGoal::Heading(heading) => {
                self.regulator.heading_reached(&self.prediction, heading)
            }
            MotionGoal::Point { target, .. } => {
                self.regulator.point_reached(&self.prediction, &target)
            }
        }
    }

    fn step(&mut self) -> Result<()> {
        let command = match self.phase {
            MotionGoal::Heading(heading) => self.regulator.rotate_toward(&self.prediction, heading),
            MotionGoal::Point { target, heading } => {
                self.regulator.navigate_to(&self.prediction, &target, heading)
            }
        };
        let motors = self.sampler.motors();
        motors.set_wheel_velocity(Wheel::Left, command.left)?;
        motors.set_wheel_velocity(Wheel::Right, command.right)?;

        let wheels = self.sampler.sample(self.regulator.config().sample_period())?;
        let step = LocalStep {
            end: wheels.end,
            dt: wheels.dt,
            linear: wheels.linear(),
            angular: wheels.angular(self.sampler.drive().base_width),
        };
        self.prediction = integrate(self.prediction, step.linear, step.angular, step.dt);
        self.record(step);
        log::debug!(
            "control step: cmd ({:.1}, {:.1}) -> ({:.2}, {:.2}, {:.3})",
            command.left,
            command.right,
            self.prediction.x,
            self.prediction.y,
            self.prediction.theta
        );
        Ok(())
    }
}
