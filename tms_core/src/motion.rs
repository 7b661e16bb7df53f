//! Bounded, incremental stepping for one motor.
//!
//! A motion is started with [`MotionDriver::start`] and advanced one
//! increment at a time with [`MotionDriver::advance`], so the caller can poll
//! sensors between increments and abort by simply not advancing further.

use tms_traits::DigitalIo;

use crate::config::{Level, MotionCfg, MotorCfg};
use crate::error::Result;
use crate::hw_error::from_boxed;
use crate::util::{mm_to_steps, step_interval, steps_to_mm};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Towards the printer (or unwinding the spool).
    Forward,
    /// Back towards the spool (or rewinding it).
    Backward,
}

impl Direction {
    #[inline]
    pub fn sign(self) -> i64 {
        match self {
            Self::Forward => 1,
            Self::Backward => -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionRequest {
    pub distance_mm: f32,
    pub direction: Direction,
    pub speed_mm_s: f32,
}

impl MotionRequest {
    /// Negative or non-finite distances are treated as zero.
    pub fn new(distance_mm: f32, direction: Direction, speed_mm_s: f32) -> Self {
        let distance_mm = if distance_mm.is_finite() {
            distance_mm.max(0.0)
        } else {
            0.0
        };
        Self {
            distance_mm,
            direction,
            speed_mm_s,
        }
    }

    /// Whole steps for this request; every request re-quantizes on its own.
    pub fn steps(&self, steps_per_mm: f32) -> u32 {
        mm_to_steps(self.distance_mm, steps_per_mm)
    }
}

/// Progress of a motion after one increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Moving,
    Complete,
}

/// An in-flight bounded motion.
#[derive(Debug, Clone, PartialEq)]
pub struct Move {
    request: MotionRequest,
    steps_per_mm: f32,
    total_steps: u32,
    done_steps: u32,
}

impl Move {
    fn new(request: MotionRequest, steps_per_mm: f32) -> Self {
        Self {
            request,
            steps_per_mm,
            total_steps: request.steps(steps_per_mm),
            done_steps: 0,
        }
    }

    pub fn request(&self) -> &MotionRequest {
        &self.request
    }

    pub fn direction(&self) -> Direction {
        self.request.direction
    }

    pub fn total_steps(&self) -> u32 {
        self.total_steps
    }

    pub fn done_steps(&self) -> u32 {
        self.done_steps
    }

    pub fn is_complete(&self) -> bool {
        self.done_steps >= self.total_steps
    }

    pub fn travelled_mm(&self) -> f32 {
        steps_to_mm(i64::from(self.done_steps), self.steps_per_mm)
    }

    pub fn remaining_mm(&self) -> f32 {
        steps_to_mm(
            i64::from(self.total_steps - self.done_steps),
            self.steps_per_mm,
        )
    }
}

/// Drives one motor's enable, direction and step lines.
#[derive(Debug, Clone)]
pub struct MotionDriver {
    motor: MotorCfg,
    motor_on: Level,
    increment_steps: u32,
    enabled: bool,
    direction: Option<Direction>,
    position_steps: i64,
}

impl MotionDriver {
    pub fn new(motor: MotorCfg, motion: &MotionCfg) -> Self {
        let increment_steps = mm_to_steps(motion.move_read_distance_mm, motor.steps_per_mm).max(1);
        Self {
            motor,
            motor_on: motion.motor_on,
            increment_steps,
            enabled: false,
            direction: None,
            position_steps: 0,
        }
    }

    pub fn motor(&self) -> &MotorCfg {
        &self.motor
    }

    pub fn steps_per_mm(&self) -> f32 {
        self.motor.steps_per_mm
    }

    pub fn increment_steps(&self) -> u32 {
        self.increment_steps
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Net position since construction, in steps (positive = forward).
    pub fn position_steps(&self) -> i64 {
        self.position_steps
    }

    pub fn position_mm(&self) -> f32 {
        steps_to_mm(self.position_steps, self.motor.steps_per_mm)
    }

    /// Energize the driver and set the direction for a new motion.
    pub fn start(&mut self, io: &mut dyn DigitalIo, request: MotionRequest) -> Result<Move> {
        self.enable(io)?;
        self.set_direction(io, request.direction)?;
        let mv = Move::new(request, self.motor.steps_per_mm);
        tracing::trace!(
            step = %self.motor.step,
            steps = mv.total_steps,
            direction = ?request.direction,
            speed = request.speed_mm_s,
            "motion start"
        );
        Ok(mv)
    }

    /// Emit the next increment of `mv`.
    ///
    /// Re-asserts enable and direction when another user of the driver
    /// changed them since the motion started.
    pub fn advance(&mut self, io: &mut dyn DigitalIo, mv: &mut Move) -> Result<Progress> {
        if mv.is_complete() {
            return Ok(Progress::Complete);
        }
        self.enable(io)?;
        self.set_direction(io, mv.request.direction)?;
        let n = self.increment_steps.min(mv.total_steps - mv.done_steps);
        let interval = step_interval(mv.request.speed_mm_s, self.motor.steps_per_mm);
        io.pulse(self.motor.step, n, interval).map_err(from_boxed)?;
        mv.done_steps += n;
        self.position_steps += mv.request.direction.sign() * i64::from(n);
        Ok(if mv.is_complete() {
            Progress::Complete
        } else {
            Progress::Moving
        })
    }

    /// Bring `mv` up to `distance_mm` travelled (capped at its target), for a
    /// motor that runs in lockstep with another one.
    pub fn follow(
        &mut self,
        io: &mut dyn DigitalIo,
        mv: &mut Move,
        distance_mm: f32,
    ) -> Result<Progress> {
        let wanted = mm_to_steps(distance_mm, self.motor.steps_per_mm).min(mv.total_steps);
        if wanted > mv.done_steps {
            self.enable(io)?;
            self.set_direction(io, mv.request.direction)?;
            let n = wanted - mv.done_steps;
            let interval = step_interval(mv.request.speed_mm_s, self.motor.steps_per_mm);
            io.pulse(self.motor.step, n, interval).map_err(from_boxed)?;
            mv.done_steps = wanted;
            self.position_steps += mv.request.direction.sign() * i64::from(n);
        }
        Ok(if mv.is_complete() {
            Progress::Complete
        } else {
            Progress::Moving
        })
    }

    pub fn enable(&mut self, io: &mut dyn DigitalIo) -> Result<()> {
        if !self.enabled {
            io.write(self.motor.enable, self.motor_on.is_high())
                .map_err(from_boxed)?;
            self.enabled = true;
        }
        Ok(())
    }

    /// Release the driver. Always writes the line, so it is also safe to
    /// call after an I/O failure left the cached state uncertain.
    pub fn disable(&mut self, io: &mut dyn DigitalIo) -> Result<()> {
        self.enabled = false;
        io.write(self.motor.enable, self.motor_on.inverse().is_high())
            .map_err(from_boxed)
    }

    fn set_direction(&mut self, io: &mut dyn DigitalIo, direction: Direction) -> Result<()> {
        if self.direction != Some(direction) {
            let level = match direction {
                Direction::Forward => self.motor.feed_dir,
                Direction::Backward => self.motor.feed_dir.inverse(),
            };
            io.write(self.motor.dir, level.is_high()).map_err(from_boxed)?;
            self.direction = Some(direction);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::RecordingIo;
    use tms_traits::Line;

    fn driver() -> MotionDriver {
        MotionDriver::new(
            MotorCfg {
                enable: Line(1),
                dir: Line(2),
                step: Line(3),
                feed_dir: Level::High,
                steps_per_mm: 50.0,
            },
            &MotionCfg::default(),
        )
    }

    #[test]
    fn increments_are_bounded_by_move_read_distance() {
        let mut io = RecordingIo::default();
        let mut d = driver();
        let mut mv = d
            .start(&mut io, MotionRequest::new(2.5, Direction::Forward, 400.0))
            .unwrap();
        assert_eq!(mv.total_steps(), 125);
        assert_eq!(d.advance(&mut io, &mut mv).unwrap(), Progress::Moving);
        assert_eq!(d.advance(&mut io, &mut mv).unwrap(), Progress::Moving);
        assert_eq!(d.advance(&mut io, &mut mv).unwrap(), Progress::Complete);
        let counts: Vec<u32> = io.pulses.iter().map(|p| p.1).collect();
        assert_eq!(counts, vec![50, 50, 25]);
        assert_eq!(d.position_steps(), 125);
    }

    #[test]
    fn enable_and_direction_follow_polarity() {
        let mut io = RecordingIo::default();
        let mut d = driver();
        let _ = d
            .start(&mut io, MotionRequest::new(1.0, Direction::Backward, 400.0))
            .unwrap();
        // motor_on defaults to low, feed_dir is high
        assert_eq!(io.level(Line(1)), Some(false));
        assert_eq!(io.level(Line(2)), Some(false));
        d.disable(&mut io).unwrap();
        assert_eq!(io.level(Line(1)), Some(true));
        assert!(!d.is_enabled());
    }

    #[test]
    fn zero_distance_is_complete_without_pulses() {
        let mut io = RecordingIo::default();
        let mut d = driver();
        let mut mv = d
            .start(&mut io, MotionRequest::new(-4.0, Direction::Forward, 400.0))
            .unwrap();
        assert_eq!(d.advance(&mut io, &mut mv).unwrap(), Progress::Complete);
        assert!(io.pulses.is_empty());
    }
}
