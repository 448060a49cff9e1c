//! sysfs tacho motor
//!
//! The ev3dev kernel driver exposes each motor as a directory of attribute
//! files. Handles to the attributes are kept open across calls and accessed
//! pread/pwrite style at offset zero, so a rescan does not have to reopen
//! anything for motors that are still present.

use super::Motor;
use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

pub struct TachoMotor {
    name: String,
    command: File,
    position: File,
    duty_cycle_sp: File,
    state_path: PathBuf,
}

impl TachoMotor {
    /// Probe one device directory. Fails if any attribute file is missing,
    /// which is how non-motor directories get rejected during a rescan.
    pub fn open(dir: &Path) -> Result<Self> {
        let command = OpenOptions::new().write(true).open(dir.join("command"))?;
        let position = File::open(dir.join("position"))?;
        let duty_cycle_sp = OpenOptions::new()
            .write(true)
            .open(dir.join("duty_cycle_sp"))?;

        let mut address = String::new();
        File::open(dir.join("address"))?.read_to_string(&mut address)?;

        Ok(Self {
            name: format!("motor_{}", address.trim()),
            command,
            position,
            duty_cycle_sp,
            state_path: dir.join("state"),
        })
    }
}

impl Motor for TachoMotor {
    fn name(&self) -> &str {
        &self.name
    }

    fn position(&self) -> Result<i32> {
        let mut buf = [0u8; 16];
        let len = self.position.read_at(&mut buf, 0)?;
        let text = std::str::from_utf8(&buf[..len])
            .map_err(|_| Error::Attribute(format!("{}: position is not text", self.name)))?;
        text.trim()
            .parse()
            .map_err(|_| Error::Attribute(format!("{}: position {:?}", self.name, text.trim())))
    }

    fn set_duty_cycle(&mut self, duty_cycle: i32) -> Result<()> {
        let value = format!("{}\n", duty_cycle.clamp(-100, 100));
        self.duty_cycle_sp.write_at(value.as_bytes(), 0)?;
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.command.write_at(b"reset\n", 0)?;
        self.command.write_at(b"run-direct\n", 0)?;
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.state_path.exists()
    }
}
