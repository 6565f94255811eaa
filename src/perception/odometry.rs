//! Dead-reckoning odometry
//!
//! Samples the wheel encoders over a window, converts the count deltas into
//! wheel speeds and integrates a unicycle model. The background integrator owns
//! the authoritative pose and propagates the EKF covariance in the same commit.

use super::localization::EkfLocalizer;
use super::state::{Commit, EstimateSnapshot, SharedEstimate};
use crate::common::Pose2D;
use crate::config::{DriveConfig, OdometryConfig};
use crate::error::{Result, RoverError};
use crate::hardware::{Clock, MotorInterface, Wheel};
use crate::lifecycle::{LifecycleNode, LifecycleNodeBase, State};
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Wheel speeds measured over one sampling window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelVelocities {
    pub left: f64,
    pub right: f64,
    /// Measured window length in seconds
    pub dt: f64,
    /// Clock time at the end of the window
    pub end: Duration,
}

impl WheelVelocities {
    /// Forward speed of the body
    pub fn linear(&self) -> f64 {
        (self.left + self.right) / 2.0
    }

    /// Yaw rate for a given wheel separation
    pub fn angular(&self, base_width: f64) -> f64 {
        (self.right - self.left) / base_width
    }
}

/// Euler step of the unicycle model, using the heading from before the step
pub fn integrate(pose: Pose2D, linear: f64, angular: f64, dt: f64) -> Pose2D {
    Pose2D::new(
        pose.x + pose.theta.cos() * linear * dt,
        pose.y + pose.theta.sin() * linear * dt,
        pose.theta + angular * dt,
    )
}

/// Encoder-based wheel speed sampler
#[derive(Clone)]
pub struct WheelSampler {
    motors: Arc<dyn MotorInterface>,
    clock: Arc<dyn Clock>,
    drive: DriveConfig,
}

impl WheelSampler {
    pub fn new(
        motors: Arc<dyn MotorInterface>,
        clock: Arc<dyn Clock>,
        drive: DriveConfig,
    ) -> Self {
        WheelSampler {
            motors,
            clock,
            drive,
        }
    }

    pub fn drive(&self) -> &DriveConfig {
        &self.drive
    }

    pub fn motors(&self) -> &Arc<dyn MotorInterface> {
        &self.motors
    }

    /// Read both encoders, wait `window`, read again.
    ///
    /// Speeds are divided by the measured elapsed time, not the requested window.
    pub fn sample(&self, window: Duration) -> Result<WheelVelocities> {
        let start = self.clock.now();
        let left_before = self.motors.get_encoder_position(Wheel::Left)?;
        let right_before = self.motors.get_encoder_position(Wheel::Right)?;
        self.clock.sleep(window);
        let left_after = self.motors.get_encoder_position(Wheel::Left)?;
        let right_after = self.motors.get_encoder_position(Wheel::Right)?;
        let end = self.clock.now();

        let dt = end
            .checked_sub(start)
            .filter(|elapsed| !elapsed.is_zero())
            .ok_or_else(|| {
                RoverError::SensorFault(format!(
                    "non-monotonic clock: {:?} -> {:?}",
                    start, end
                ))
            })?
            .as_secs_f64();

        let left = self.drive.counts_to_distance(left_after - left_before) / dt;
        let right = self.drive.counts_to_distance(right_after - right_before) / dt;
        Ok(WheelVelocities {
            left,
            right,
            dt,
            end,
        })
    }
}

/// Periodic dead-reckoning task
pub struct OdometryIntegrator {
    sampler: WheelSampler,
    shared: SharedEstimate,
    ekf: EkfLocalizer,
    period: Duration,
}

impl OdometryIntegrator {
    pub fn new(
        sampler: WheelSampler,
        shared: SharedEstimate,
        ekf: EkfLocalizer,
        period: Duration,
    ) -> Self {
        OdometryIntegrator {
            sampler,
            shared,
            ekf,
            period,
        }
    }

    /// One sample-integrate-commit cycle.
    ///
    /// The encoder window is sampled outside the lock; the pose write, log
    /// append and covariance propagation happen in one transaction.
    pub fn tick(&self) -> Result<EstimateSnapshot> {
        let wheels = self.sampler.sample(self.period)?;
        let linear = wheels.linear();
        let angular = wheels.angular(self.sampler.drive().base_width);

        self.shared.transact(|current| {
            let pose = integrate(current.pose, linear, angular, wheels.dt);
            let mut commit = Commit::new(pose).stamped(wheels.end);
            if linear != 0.0 {
                commit = commit.with_covariance(self.ekf.propagate(
                    linear,
                    wheels.dt,
                    pose.theta,
                    &current.covariance,
                )?);
            }
            log::debug!(
                "odometry tick: v={:.2} w={:.3} dt={:.3} -> ({:.2}, {:.2}, {:.3})",
                linear,
                angular,
                wheels.dt,
                pose.x,
                pose.y,
                pose.theta
            );
            Ok(commit)
        })
    }

    /// Tick until `stop` is raised or a tick fails. Returns the tick count.
    pub fn run(&self, stop: &AtomicBool, ticks: &AtomicU64) -> Result<u64> {
        while !stop.load(Ordering::Acquire) {
            if let Err(e) = self.tick() {
                log::error!("odometry integrator stopped: {}", e);
                return Err(e);
            }
            ticks.fetch_add(1, Ordering::Relaxed);
        }
        Ok(ticks.load(Ordering::Relaxed))
    }

    /// Run on a dedicated thread
    pub fn spawn(self) -> Result<IntegratorHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let ticks = Arc::new(AtomicU64::new(0));
        let thread_stop = Arc::clone(&stop);
        let thread_ticks = Arc::clone(&ticks);
        let handle = std::thread::Builder::new()
            .name("odometry".to_string())
            .spawn(move || self.run(&thread_stop, &thread_ticks))?;
        Ok(IntegratorHandle {
            stop,
            ticks,
            handle: Some(handle),
        })
    }
}

/// Owner of a running integrator thread
pub struct IntegratorHandle {
    stop: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
    handle: Option<JoinHandle<Result<u64>>>,
}

impl IntegratorHandle {
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// True once the thread has exited, cleanly or on a fault
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Signal the thread and join it, surfacing any fault that ended it
    pub fn stop(mut self) -> Result<u64> {
        self.stop.store(true, Ordering::Release);
        self.join()
    }

    fn join(&mut self) -> Result<u64> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| RoverError::Lifecycle("odometry thread panicked".to_string()))?,
            None => Ok(self.ticks()),
        }
    }
}

impl Drop for IntegratorHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Err(e) = self.join() {
            log::warn!("odometry thread ended with error: {}", e);
        }
    }
}

/// Odometry component: owns the integrator thread across the lifecycle
pub struct OdometryStack {
    base: LifecycleNodeBase,
    sampler: WheelSampler,
    shared: SharedEstimate,
    ekf: EkfLocalizer,
    config: OdometryConfig,
    handle: Option<IntegratorHandle>,
}

impl OdometryStack {
    pub fn new(
        sampler: WheelSampler,
        shared: SharedEstimate,
        ekf: EkfLocalizer,
        config: OdometryConfig,
    ) -> Self {
        OdometryStack {
            base: LifecycleNodeBase::new("odometry_stack"),
            sampler,
            shared,
            ekf,
            config,
            handle: None,
        }
    }

    pub fn shared(&self) -> &SharedEstimate {
        &self.shared
    }

    /// Whether the integrator thread is alive
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    pub fn ticks(&self) -> u64 {
        self.handle.as_ref().map_or(0, IntegratorHandle::ticks)
    }
}

impl LifecycleNode for OdometryStack {
    fn name(&self) -> &str {
        &self.base.name
    }

    fn on_configure(&mut self) -> Result<()> {
        self.base.require(State::Unconfigured)?;
        self.config.validate()?;
        self.base.transition(State::Inactive)
    }

    fn on_activate(&mut self) -> Result<()> {
        self.base.require(State::Inactive)?;
        let integrator = OdometryIntegrator::new(
            self.sampler.clone(),
            self.shared.clone(),
            self.ekf.clone(),
            self.config.tick_period(),
        );
        self.handle = Some(integrator.spawn()?);
        self.base.transition(State::Active)
    }

    fn on_deactivate(&mut self) -> Result<()> {
        self.base.require(State::Active)?;
        let result = match self.handle.take() {
            Some(handle) => handle.stop().map(|ticks| {
                log::info!("odometry integrator stopped after {} ticks", ticks);
            }),
            None => Ok(()),
        };
        self.base.transition(State::Inactive)?;
        result
    }

    fn on_cleanup(&mut self) -> Result<()> {
        self.base.require(State::Inactive)?;
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
    use crate::config::EkfConfig;
    use crate::hardware::{ManualClock, SimulatedDrive};
    use crate::perception::state::PoseLog;
    use approx::assert_relative_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn rig(initial: Pose2D) -> (Arc<ManualClock>, Arc<SimulatedDrive>, WheelSampler) {
        let clock = Arc::new(ManualClock::new());
        let drive_config = DriveConfig {
            initial_pose: initial,
            ..DriveConfig::default()
        };
        let drive = Arc::new(SimulatedDrive::new(clock.clone(), drive_config.clone()));
        let sampler = WheelSampler::new(drive.clone(), clock.clone(), drive_config);
        (clock, drive, sampler)
    }

    fn shared_at(pose: Pose2D) -> SharedEstimate {
        SharedEstimate::new(pose, Matrix::diagonal(&[0.1, 0.1, 0.1]), PoseLog::disabled()).unwrap()
    }

    #[test]
    fn test_integrate_uses_pre_update_heading() {
        let pose = integrate(Pose2D::new(0.0, 0.0, 0.0), 10.0, FRAC_PI_2, 1.0);
        assert_relative_eq!(pose.x, 10.0, epsilon = 1e-12);
        assert_relative_eq!(pose.y, 0.0, epsilon = 1e-12);
        assert_relative_eq!(pose.theta, FRAC_PI_2, epsilon = 1e-12);

        let wrapped = integrate(Pose2D::new(0.0, 0.0, 3.0), 0.0, 1.0, 1.0);
        assert_relative_eq!(wrapped.theta, 4.0 - 2.0 * PI, epsilon = 1e-12);
    }

    #[test]
    fn test_sample_straight() {
        let (_clock, drive, sampler) = rig(Pose2D::new(0.0, 0.0, 0.0));
        let speed = 5.8 * PI; // one revolution per second
        drive.set_wheel_velocity(Wheel::Left, speed).unwrap();
        drive.set_wheel_velocity(Wheel::Right, speed).unwrap();
        let wheels = sampler.sample(Duration::from_millis(500)).unwrap();
        assert_relative_eq!(wheels.dt, 0.5, epsilon = 1e-12);
        assert_relative_eq!(wheels.left, speed, epsilon = 1e-9);
        assert_relative_eq!(wheels.angular(13.0), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_sample_rejects_stalled_clock() {
        let (clock, _drive, sampler) = rig(Pose2D::new(0.0, 0.0, 0.0));
        clock.set_frozen(true);
        assert!(matches!(
            sampler.sample(Duration::from_millis(100)),
            Err(RoverError::SensorFault(_))
        ));
    }

    #[test]
    fn test_tick_moves_pose_and_grows_covariance() {
        let start = Pose2D::new(40.0, 0.0, FRAC_PI_2);
        let (_clock, drive, sampler) = rig(start);
        let shared = shared_at(start);
        let integrator = OdometryIntegrator::new(
            sampler,
            shared.clone(),
            EkfLocalizer::new(EkfConfig::default()),
            Duration::from_millis(500),
        );
        let speed = 5.8 * PI;
        drive.set_wheel_velocity(Wheel::Left, speed).unwrap();
        drive.set_wheel_velocity(Wheel::Right, speed).unwrap();

        let snap = integrator.tick().unwrap();
        assert_eq!(snap.generation, 1);
        assert_eq!(snap.stamp, Duration::from_millis(500));
        assert_relative_eq!(snap.pose.x, 40.0, epsilon = 1e-9);
        assert_relative_eq!(snap.pose.y, speed * 0.5, epsilon = 1e-9);
        // heading north: heading uncertainty leaks into x
        assert!(snap.covariance.get(0, 0).unwrap() > 0.11);
    }

    #[test]
    fn test_stationary_tick_keeps_covariance() {
        let start = Pose2D::new(0.0, 0.0, 0.0);
        let (_clock, _drive, sampler) = rig(start);
        let shared = shared_at(start);
        let before = shared.covariance();
        let integrator = OdometryIntegrator::new(
            sampler,
            shared.clone(),
            EkfLocalizer::new(EkfConfig::default()),
            Duration::from_millis(500),
        );
        integrator.tick().unwrap();
        assert_eq!(shared.covariance(), before);
        assert_eq!(shared.generation(), 1);
    }

    #[test]
    fn test_encoder_fault_stops_task_without_corrupting_pose() {
        let start = Pose2D::new(1.0, 2.0, 0.5);
        let (_clock, drive, sampler) = rig(start);
        let shared = shared_at(start);
        let integrator = OdometryIntegrator::new(
            sampler,
            shared.clone(),
            EkfLocalizer::new(EkfConfig::default()),
            Duration::from_millis(100),
        );
        drive.set_wheel_velocity(Wheel::Left, 10.0).unwrap();
        drive.inject_encoder_fault(Wheel::Left);

        let handle = integrator.spawn().unwrap();
        for _ in 0..5000 {
            if handle.is_finished() {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(handle.is_finished());
        let result = handle.stop();
        assert!(matches!(result, Err(RoverError::SensorFault(_))));
        assert_eq!(shared.pose(), start);
        assert_eq!(shared.generation(), 0);
    }
}
