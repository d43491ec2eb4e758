//! Linux hwmon sensor sources
//!
//! The kernel jc42 driver exposes each device as a hwmon directory with a
//! `name` file and a `temp1_input` file in millidegrees Celsius.
//!
//! - [`Jc42`] opens a device directly by I2C bus and address.
//! - [`HwmonRegistry`] finds a device by its hwmon name.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::sensor::{SensorError, SensorRegistry, SensorSource};

/// Default sysfs mount point
pub const DEFAULT_SYSFS_ROOT: &str = "/sys";

/// Temperature channel read by every hwmon sensor
const TEMP_INPUT: &str = "temp1_input";

/// I2C location of a jc42 device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Jc42Params {
    pub bus: u8,
    pub addr: u16,
}

impl Default for Jc42Params {
    fn default() -> Self {
        Self { bus: 0, addr: 0x18 }
    }
}

/// A hwmon temperature channel
#[derive(Debug, Clone)]
pub struct HwmonSensor {
    name: String,
    input: PathBuf,
}

impl HwmonSensor {
    /// Open the hwmon device at `dir`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, SensorError> {
        let dir = dir.as_ref();
        let name = fs::read_to_string(dir.join("name"))?.trim().to_string();
        let input = dir.join(TEMP_INPUT);

        if !input.is_file() {
            return Err(SensorError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} has no {}", dir.display(), TEMP_INPUT),
            )));
        }

        Ok(Self { name, input })
    }

    pub fn input_path(&self) -> &Path {
        &self.input
    }
}

impl SensorSource for HwmonSensor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&mut self) -> Result<i16, SensorError> {
        let raw = tokio::fs::read_to_string(&self.input).await?;
        millis_to_centi(raw.trim())
    }
}

/// Convert a millidegree reading to hundredths, truncating
fn millis_to_centi(raw: &str) -> Result<i16, SensorError> {
    let millis: i64 = raw
        .parse()
        .map_err(|_| SensorError::Malformed(raw.to_string()))?;

    i16::try_from(millis / 10).map_err(|_| SensorError::OutOfRange(millis))
}

/// Direct jc42 access by bus and address
pub struct Jc42;

impl Jc42 {
    /// Open the jc42 device at `params` under the sysfs root
    pub fn open(sysfs_root: impl AsRef<Path>, params: Jc42Params) -> Result<HwmonSensor, SensorError> {
        let device = sysfs_root
            .as_ref()
            .join("bus/i2c/devices")
            .join(format!("{}-{:04x}", params.bus, params.addr))
            .join("hwmon");

        let mut entries: Vec<PathBuf> = fs::read_dir(&device)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_hwmon_dir(path))
            .collect();
        entries.sort();

        let dir = entries.into_iter().next().ok_or_else(|| {
            SensorError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no hwmon device under {}", device.display()),
            ))
        })?;

        debug!("jc42 {}-{:04x} at {}", params.bus, params.addr, dir.display());
        HwmonSensor::open(dir)
    }
}

/// Registry over `<sysfs>/class/hwmon`
#[derive(Debug, Clone)]
pub struct HwmonRegistry {
    root: PathBuf,
}

impl HwmonRegistry {
    pub fn new(sysfs_root: impl Into<PathBuf>) -> Self {
        Self {
            root: sysfs_root.into(),
        }
    }

    /// All readable hwmon sensors, ordered by device directory
    pub fn sensors(&self) -> Vec<HwmonSensor> {
        let class = self.root.join("class/hwmon");
        let mut dirs: Vec<PathBuf> = match fs::read_dir(&class) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| is_hwmon_dir(path))
                .collect(),
            Err(e) => {
                debug!("cannot list {}: {}", class.display(), e);
                return Vec::new();
            }
        };
        dirs.sort();

        dirs.into_iter()
            .filter_map(|dir| HwmonSensor::open(&dir).ok())
            .collect()
    }
}

impl Default for HwmonRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SYSFS_ROOT)
    }
}

impl SensorRegistry for HwmonRegistry {
    type Sensor = HwmonSensor;

    fn find_by_name(&self, name: &str) -> Option<HwmonSensor> {
        self.sensors().into_iter().find(|s| s.name == name)
    }
}

fn is_hwmon_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with("hwmon"))
        .unwrap_or(false)
}
