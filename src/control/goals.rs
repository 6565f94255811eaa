//! Ordered goal queue

use super::motion::MotionGoal;
use crate::common::Point2D;
use crate::error::{Result, RoverError};
use std::collections::VecDeque;
use std::f64::consts::FRAC_PI_2;
use std::path::Path;

/// Goals consumed one at a time, advanced once the current one is reached
#[derive(Debug, Clone, Default)]
pub struct GoalQueue {
    goals: VecDeque<MotionGoal>,
}

impl GoalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, goal: MotionGoal) {
        self.goals.push_back(goal);
    }

    pub fn current(&self) -> Option<&MotionGoal> {
        self.goals.front()
    }

    /// Drop the current goal, returning it
    pub fn advance(&mut self) -> Option<MotionGoal> {
        self.goals.pop_front()
    }

    pub fn len(&self) -> usize {
        self.goals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.goals.is_empty()
    }

    pub fn clear(&mut self) {
        self.goals.clear();
    }

    /// Parse one goal per line: `theta` turns in place, `x,y` drives to a
    /// point and `x,y,theta` also turns to a final heading. Angles are radians.
    pub fn parse(text: &str) -> Result<Self> {
        let mut queue = GoalQueue::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let values = line
                .split(',')
                .map(|field| {
                    field.trim().parse::<f64>().map_err(|e| RoverError::Parse {
                        line: index + 1,
                        message: format!("{:?}: {}", field.trim(), e),
                    })
                })
                .collect::<Result<Vec<f64>>>()?;
            let goal = match values.as_slice() {
                [theta] => MotionGoal::Heading(*theta),
                [x, y] => MotionGoal::Point {
                    target: Point2D::new(*x, *y),
                    heading: None,
                },
                [x, y, theta] => MotionGoal::Point {
                    target: Point2D::new(*x, *y),
                    heading: Some(*theta),
                },
                _ => {
                    return Err(RoverError::Parse {
                        line: index + 1,
                        message: format!("expected 1 to 3 fields, found {}", values.len()),
                    })
                }
            };
            queue.push(goal);
        }
        Ok(queue)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::parse(&std::fs::read_to_string(path.as_ref())?)
    }

    /// Square tour inside a square room of side `room`, at 0.3 and 0.7 of
    /// the side, ending with a turn to face the starting wall
    pub fn square_tour(room: f64) -> Self {
        let near = room * 0.3;
        let far = room * 0.7;
        let corner = |x: f64, y: f64, heading: Option<f64>| MotionGoal::Point {
            target: Point2D::new(x, y),
            heading,
        };
        [
            corner(near, near, None),
            corner(far, near, None),
            corner(far, far, None),
            corner(near, far, Some(-FRAC_PI_2)),
        ]
        .into_iter()
        .collect()
    }
}

impl FromIterator<MotionGoal> for GoalQueue {
    fn from_iter<I: IntoIterator<Item = MotionGoal>>(iter: I) -> Self {
        GoalQueue {
            goals: iter.into_iter().collect(),
        }
    }
}
