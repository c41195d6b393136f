use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::DriveError;

/// A single digital output line.
pub trait OutputPin {
    fn set(&mut self, high: bool) -> Result<(), DriveError>;
}

/// GPIO line driven through the sysfs `value` file.
#[derive(Debug)]
pub struct SysfsPin {
    number: u32,
    value_path: PathBuf,
}

impl SysfsPin {
    pub const DEFAULT_ROOT: &'static str = "/sys/class/gpio";

    /// Export the line if needed, configure it as an output and drive it low.
    pub fn open(root: impl AsRef<Path>, number: u32) -> io::Result<Self> {
        let root = root.as_ref();
        let line = root.join(format!("gpio{number}"));
        if !line.exists() {
            fs::write(root.join("export"), number.to_string())?;
        }
        fs::write(line.join("direction"), "out")?;
        let value_path = line.join("value");
        fs::write(&value_path, "0")?;
        Ok(Self { number, value_path })
    }

    pub fn number(&self) -> u32 {
        self.number
    }
}

impl OutputPin for SysfsPin {
    fn set(&mut self, high: bool) -> Result<(), DriveError> {
        fs::write(&self.value_path, if high { "1" } else { "0" })?;
        Ok(())
    }
}

/// Stand-in for boards without GPIO: records level changes in the log.
#[derive(Debug)]
pub struct LogPin {
    name: String,
    level: bool,
}

impl LogPin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            level: false,
        }
    }

    pub fn level(&self) -> bool {
        self.level
    }
}

impl OutputPin for LogPin {
    fn set(&mut self, high: bool) -> Result<(), DriveError> {
        self.level = high;
        info!(pin = %self.name, high, "pin level changed");
        Ok(())
    }
}
