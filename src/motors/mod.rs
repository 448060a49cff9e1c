//! Motor abstraction and directory-scan registry
//!
//! Each motor is one device directory containing attribute files
//! (`command`, `position`, `duty_cycle_sp`, `address`, `state`). The
//! registry rescans a root directory, dropping handles whose device has
//! vanished and probing new subdirectories. A motor's identity is its
//! stable name (`motor_<address>`), not the directory name, which the
//! kernel renumbers across replug.
//!
//! Building with the `mock` feature swaps the sysfs-backed motor for a
//! physically simulated one with the same directory layout.

mod tacho;

#[cfg(feature = "mock")]
mod mock;

pub use tacho::TachoMotor;

#[cfg(feature = "mock")]
pub use mock::MockMotor;

#[cfg(not(feature = "mock"))]
pub type DefaultMotor = TachoMotor;
#[cfg(feature = "mock")]
pub type DefaultMotor = MockMotor;

#[cfg(not(feature = "mock"))]
pub const DEFAULT_MOTOR_ROOT: &str = "/sys/class/tacho-motor";
#[cfg(feature = "mock")]
pub const DEFAULT_MOTOR_ROOT: &str = "./motors";

use crate::error::Result;
use std::path::PathBuf;

/// Capability set every motor variant provides.
pub trait Motor {
    /// Stable device name, identical across rescans of the same motor.
    fn name(&self) -> &str;

    /// Current position in degrees.
    fn position(&self) -> Result<i32>;

    /// Apply a duty cycle; values are clamped to [-100, 100].
    fn set_duty_cycle(&mut self, duty_cycle: i32) -> Result<()>;

    /// Return the motor to its idle running state.
    fn reset(&mut self) -> Result<()>;

    /// Whether the underlying device still exists.
    fn is_alive(&self) -> bool;
}

/// The live set of motors under one root directory.
pub struct MotorRegistry {
    root: PathBuf,
    motors: Vec<DefaultMotor>,
}

impl MotorRegistry {
    /// Create a registry and run an initial scan.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let mut registry = Self {
            root: root.into(),
            motors: Vec::new(),
        };
        registry.rescan();
        registry
    }

    /// Drop dead motors and probe the root directory for new ones.
    ///
    /// Probe failures are normal (a directory may not be a motor, or the
    /// device may be mid-removal) and only logged. An unreadable root
    /// leaves the registry empty; the node keeps running and retries on
    /// the next rescan.
    pub fn rescan(&mut self) {
        self.motors.retain(|m| {
            let alive = m.is_alive();
            if !alive {
                log::info!("motor {} disappeared", m.name());
            }
            alive
        });

        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("cannot scan {}: {}", self.root.display(), e);
                self.motors.clear();
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            match DefaultMotor::open(&path) {
                Ok(mut motor) => {
                    if !self.contains(motor.name()) {
                        if let Err(e) = motor.reset() {
                            log::debug!("probe of {} failed on reset: {}", path.display(), e);
                            continue;
                        }
                        log::info!("found motor {} at {}", motor.name(), path.display());
                        self.motors.push(motor);
                    }
                }
                Err(e) => {
                    log::debug!("skipping {}: {}", path.display(), e);
                }
            }
        }
    }

    pub fn find(&mut self, name: &str) -> Option<&mut DefaultMotor> {
        self.motors.iter_mut().find(|m| m.name() == name)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut DefaultMotor> {
        self.motors.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.motors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.motors.is_empty()
    }

    fn contains(&self, name: &str) -> bool {
        self.motors.iter().any(|m| m.name() == name)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::fs;
    use std::path::{Path, PathBuf};

    /// Lay out one motor device directory the way ev3dev does.
    pub fn fake_motor_dir(root: &Path, dir_name: &str, address: &str) -> PathBuf {
        let dir = root.join(dir_name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("command"), "").unwrap();
        fs::write(dir.join("position"), "0\n").unwrap();
        fs::write(dir.join("duty_cycle_sp"), "0\n").unwrap();
        fs::write(dir.join("address"), format!("{address}\n")).unwrap();
        fs::write(dir.join("state"), "running\n").unwrap();
        dir
    }
}
