//! Physically simulated motor for hardware-free testing
//!
//! Follows a first-order velocity model: commanding a duty cycle sets a
//! target speed the simulated rotor approaches exponentially with time
//! constant `MOTOR_TAU`. Positions are the closed-form integral of that
//! velocity, reported in degrees like the real driver.
//!
//! The device directory layout is the same as for sysfs motors (point the
//! registry at `./motors`), so discovery, naming and aliveness probing are
//! exercised unchanged.

use super::{Motor, TachoMotor};
use crate::error::Result;
use std::path::Path;
use std::time::Instant;

/// Velocity time constant in seconds.
const MOTOR_TAU: f64 = 100.0e-3;
/// Rotor speed at 100% duty cycle.
const MOTOR_MAX_RPM: f64 = 240.0;

pub struct MockMotor {
    /// Supplies the stable name and the aliveness probe.
    inner: TachoMotor,
    epoch: Instant,
    /// Position (revolutions) at the last duty cycle change.
    x0: f64,
    /// Velocity (revolutions per second) at the last duty cycle change.
    v0: f64,
    /// Time of the last duty cycle change, seconds since `epoch`.
    t0: f64,
    /// Target velocity the rotor converges to.
    v_target: f64,
    /// Position reading at the last reset.
    position_offset: f64,
}

impl MockMotor {
    pub fn open(dir: &Path) -> Result<Self> {
        Ok(Self {
            inner: TachoMotor::open(dir)?,
            epoch: Instant::now(),
            x0: 0.0,
            v0: 0.0,
            t0: 0.0,
            v_target: 0.0,
            position_offset: 0.0,
        })
    }

    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn velocity_at(&self, t: f64) -> f64 {
        let dt = t - self.t0;
        (-dt / MOTOR_TAU).exp() * (self.v0 - self.v_target) + self.v_target
    }

    fn position_at(&self, t: f64) -> f64 {
        let dt = t - self.t0;
        MOTOR_TAU * (self.v0 - (-dt / MOTOR_TAU).exp() * (self.v0 - self.v_target))
            + self.v_target * (dt - MOTOR_TAU)
            + self.x0
    }
}

impl Motor for MockMotor {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn position(&self) -> Result<i32> {
        Ok(((self.position_at(self.now()) - self.position_offset) * 360.0) as i32)
    }

    fn set_duty_cycle(&mut self, duty_cycle: i32) -> Result<()> {
        // Rebase the model at the current state before changing the target
        let t = self.now();
        self.v0 = self.velocity_at(t);
        self.x0 = self.position_at(t);
        self.t0 = t;

        let duty_cycle = duty_cycle.clamp(-100, 100);
        self.v_target = (f64::from(duty_cycle) / 100.0) * (MOTOR_MAX_RPM / 60.0);
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.set_duty_cycle(0)?;
        self.position_offset = self.position_at(self.now());
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.inner.is_alive()
    }
}
