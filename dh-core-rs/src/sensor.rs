//! Sensor sources
//!
//! A [`SensorSource`] yields raw readings in hundredths of a degree Celsius.
//! A [`SensorRegistry`] resolves a source by name once at startup; the
//! returned handle stays valid for the lifetime of the process.
//!
//! # Implementing a sensor source
//!
//! ```ignore
//! struct MySensor;
//!
//! impl SensorSource for MySensor {
//!     fn name(&self) -> &str {
//!         "my-sensor"
//!     }
//!
//!     async fn read(&mut self) -> Result<i16, SensorError> {
//!         // Talk to the bus
//!     }
//! }
//! ```

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Errors from a single sensor read
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("sensor I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed reading: {0:?}")]
    Malformed(String),

    #[error("reading of {0} m°C is out of range")]
    OutOfRange(i64),

    #[error("no reading available")]
    Unavailable,
}

/// A source of temperature readings
pub trait SensorSource: Send {
    /// Name the source was registered under
    fn name(&self) -> &str;

    /// Take one reading in hundredths of a degree Celsius
    fn read(&mut self) -> impl Future<Output = Result<i16, SensorError>> + Send;
}

/// Name-based lookup of sensor sources
pub trait SensorRegistry {
    type Sensor: SensorSource;

    /// Find the first sensor registered under `name`
    fn find_by_name(&self, name: &str) -> Option<Self::Sensor>;
}

// ============================================================================
// Simulated sensors
// ============================================================================

/// Sensor that replays a script of readings
///
/// `None` entries are read failures. The script wraps around; an empty
/// script always fails.
#[derive(Debug, Clone)]
pub struct SimulatedSensor {
    name: String,
    script: Vec<Option<i16>>,
    cursor: usize,
    delay: Duration,
}

impl SimulatedSensor {
    /// Sensor that always reads `value`
    pub fn constant(name: impl Into<String>, value: i16) -> Self {
        Self::scripted(name, vec![Some(value)])
    }

    /// Sensor that replays `script`
    pub fn scripted(name: impl Into<String>, script: Vec<Option<i16>>) -> Self {
        Self {
            name: name.into(),
            script,
            cursor: 0,
            delay: Duration::ZERO,
        }
    }

    /// Make every read take `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl SensorSource for SimulatedSensor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&mut self) -> Result<i16, SensorError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.script.is_empty() {
            return Err(SensorError::Unavailable);
        }

        let reading = self.script[self.cursor % self.script.len()];
        self.cursor = self.cursor.wrapping_add(1);
        reading.ok_or(SensorError::Unavailable)
    }
}

/// In-memory registry of simulated sensors
#[derive(Debug, Clone, Default)]
pub struct SimulatedRegistry {
    sensors: Vec<SimulatedSensor>,
}

impl SimulatedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sensor
    pub fn with(mut self, sensor: SimulatedSensor) -> Self {
        self.sensors.push(sensor);
        self
    }
}

impl SensorRegistry for SimulatedRegistry {
    type Sensor = SimulatedSensor;

    fn find_by_name(&self, name: &str) -> Option<SimulatedSensor> {
        self.sensors.iter().find(|s| s.name == name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_sensor_wraps() {
        let mut sensor = SimulatedSensor::scripted("jc42", vec![Some(2345), None]);

        assert_eq!(sensor.read().await.unwrap(), 2345);
        assert!(matches!(sensor.read().await, Err(SensorError::Unavailable)));
        assert_eq!(sensor.read().await.unwrap(), 2345);
    }

    #[tokio::test]
    async fn test_empty_script_fails() {
        let mut sensor = SimulatedSensor::scripted("jc42", Vec::new());
        assert!(sensor.read().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_delay() {
        let mut sensor =
            SimulatedSensor::constant("jc42", 100).with_delay(Duration::from_millis(300));

        let start = tokio::time::Instant::now();
        sensor.read().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[test]
    fn test_registry_lookup() {
        let registry = SimulatedRegistry::new()
            .with(SimulatedSensor::constant("bmp180", 1800))
            .with(SimulatedSensor::constant("jc42", 2100));

        let found = registry.find_by_name("jc42").unwrap();
        assert_eq!(found.name(), "jc42");
        assert!(registry.find_by_name("hdc1000").is_none());
    }
}
