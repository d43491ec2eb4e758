//! Core types for Datahead nodes

use std::fmt;
use std::time::Duration;

/// Fixed-point scale of a raw reading (hundredths of a degree)
pub const CENTI_SCALE: i16 = 100;

/// Loop period of the networked variants
pub const NETWORK_PERIOD: Duration = Duration::from_secs(20);

/// Loop period of the local (driver and autodetect) variants
pub const LOCAL_PERIOD: Duration = Duration::from_secs(1);

/// A single temperature reading
///
/// `centi_celsius` is the raw fixed-point value with two implied decimal
/// digits. `iteration` is the loop iteration that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub centi_celsius: i16,
    pub iteration: u64,
}

impl Sample {
    pub fn new(centi_celsius: i16, iteration: u64) -> Self {
        Self {
            centi_celsius,
            iteration,
        }
    }

    /// Whole-degree part (`v / 100`)
    pub fn integer_part(&self) -> i16 {
        self.centi_celsius / CENTI_SCALE
    }

    /// Hundredths part (`v % 100`), keeps the sign of the reading
    pub fn fraction_part(&self) -> i16 {
        self.centi_celsius % CENTI_SCALE
    }

    /// Push payload: the raw reading as an unsigned 16-bit decimal
    pub fn payload(&self) -> String {
        (self.centi_celsius as u16).to_string()
    }
}

/// Renders `<v/100>.<v%100> C`.
///
/// Negative readings are not normalized: `-50` renders as `0.-50 C`.
impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02} C", self.integer_part(), self.fraction_part())
    }
}

/// Lifecycle of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Sensor lookup, listener registration, mesh bootstrap, greeting
    Initializing,
    /// Sample-and-publish loop
    Running,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Initializing => write!(f, "initializing"),
            NodeState::Running => write!(f, "running"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_reading() {
        let sample = Sample::new(2345, 0);
        assert_eq!(sample.to_string(), "23.45 C");
        assert_eq!(sample.payload(), "2345");
    }

    #[test]
    fn test_small_fraction_is_zero_padded() {
        assert_eq!(Sample::new(2305, 0).to_string(), "23.05 C");
        assert_eq!(Sample::new(7, 0).to_string(), "0.07 C");
        assert_eq!(Sample::new(0, 0).to_string(), "0.00 C");
    }

    #[test]
    fn test_negative_reading_keeps_division_semantics() {
        let sample = Sample::new(-50, 3);
        assert_eq!(sample.integer_part(), 0);
        assert_eq!(sample.fraction_part(), -50);
        assert_eq!(sample.to_string(), "0.-50 C");

        assert_eq!(Sample::new(-1234, 0).to_string(), "-12.-34 C");
        assert_eq!(Sample::new(-5, 0).to_string(), "0.-5 C");
    }

    #[test]
    fn test_negative_payload_is_unsigned() {
        assert_eq!(Sample::new(-50, 0).payload(), "65486");
        assert_eq!(Sample::new(-1, 0).payload(), "65535");
    }

    #[test]
    fn test_node_state_display() {
        assert_eq!(NodeState::Initializing.to_string(), "initializing");
        assert_eq!(NodeState::Running.to_string(), "running");
    }
}
