//! Link-layer configuration.
//!
//! One flat struct covers all three protocols. Every node on a bus must run
//! the same values: slot lengths, sync cadence, and UUID width are wire
//! contracts, not local tuning knobs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hard ceiling on [`LinkConfig::window_size`].
///
/// Sequence numbers are 8-bit; with more than 128 frames in flight a
/// retransmitted sequence number could alias a new one.
pub const MAX_WINDOW_SIZE: usize = 128;

/// Widest UUID the wire format carries.
pub const MAX_UUID_BYTES: usize = 16;

/// Tunables for one bus. See each field; times are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// On-wire width of a UUID, little-endian. All nodes must agree.
    pub uuid_bytes: usize,

    /// Upper bound of the randomized interval between enumeration frames.
    /// Large enough that two nodes rarely talk over each other; the larger
    /// it is, the longer discovery takes.
    pub max_time_between_enum_frames: f64,

    /// Discovery is declared finished after this many quiet multiples of
    /// `max_time_between_enum_frames` without a new UUID.
    pub finished_wait_multiplier: f64,

    /// Length of each node's transmit slot.
    pub time_per_node: f64,

    /// Maximum interval between sync packets from a node's own slot.
    pub time_between_sync_packets: f64,

    /// Propagation-delay compensation added to a received sync timestamp.
    pub time_for_tx_to_reach_rx: f64,

    /// Guard time at the end of each slot, covering clock skew plus
    /// whatever the transmit queue still has to drain onto the wire.
    pub time_margin: f64,

    /// Byte capacity of the direct (control/response) transmit buffer.
    pub tx_direct_buffer_size: usize,

    /// Byte capacity of the windowed (data) transmit buffer.
    pub tx_window_buffer_size: usize,

    /// Data frames in flight per pass of the sliding window.
    pub window_size: usize,

    /// Dwell between sliding-window passes; unacknowledged frames are
    /// retransmitted after each wrap.
    pub wrap_time: f64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            uuid_bytes: 1,
            max_time_between_enum_frames: 0.005,
            finished_wait_multiplier: 4.0,
            time_per_node: 0.002,
            time_between_sync_packets: 0.02,
            time_for_tx_to_reach_rx: 0.0,
            time_margin: 0.0002,
            tx_direct_buffer_size: 100_000,
            tx_window_buffer_size: 100_000,
            window_size: 10,
            wrap_time: 0.001,
        }
    }
}

/// Rejected configurations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// `window_size` outside `1..=128`.
    #[error("window_size must be in 1..={MAX_WINDOW_SIZE}, got {0}")]
    WindowSize(usize),

    /// `uuid_bytes` outside `1..=16`.
    #[error("uuid_bytes must be in 1..={MAX_UUID_BYTES}, got {0}")]
    UuidBytes(usize),

    /// A duration that must be strictly positive was not.
    #[error("{name} must be positive, got {value}")]
    NonPositiveTime {
        /// Offending field.
        name: &'static str,
        /// Offending value.
        value: f64,
    },

    /// A duration that must not be negative was.
    #[error("{name} must not be negative, got {value}")]
    NegativeTime {
        /// Offending field.
        name: &'static str,
        /// Offending value.
        value: f64,
    },

    /// A buffer capacity of zero can hold no frame.
    #[error("{0} must be non-zero")]
    ZeroCapacity(&'static str),

    /// The slot guard consumes the whole slot.
    #[error("time_margin ({margin}) leaves no usable slot within time_per_node ({slot})")]
    MarginConsumesSlot {
        /// Configured guard time.
        margin: f64,
        /// Configured slot length.
        slot: f64,
    },
}

impl LinkConfig {
    /// Validate cross-field constraints. Run once at node construction.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size == 0 || self.window_size > MAX_WINDOW_SIZE {
            return Err(ConfigError::WindowSize(self.window_size));
        }
        if self.uuid_bytes == 0 || self.uuid_bytes > MAX_UUID_BYTES {
            return Err(ConfigError::UuidBytes(self.uuid_bytes));
        }
        for (name, value) in [
            ("max_time_between_enum_frames", self.max_time_between_enum_frames),
            ("finished_wait_multiplier", self.finished_wait_multiplier),
            ("time_per_node", self.time_per_node),
            ("time_between_sync_packets", self.time_between_sync_packets),
            ("wrap_time", self.wrap_time),
        ] {
            if value.is_nan() || value <= 0.0 {
                return Err(ConfigError::NonPositiveTime { name, value });
            }
        }
        for (name, value) in [
            ("time_for_tx_to_reach_rx", self.time_for_tx_to_reach_rx),
            ("time_margin", self.time_margin),
        ] {
            if value.is_nan() || value < 0.0 {
                return Err(ConfigError::NegativeTime { name, value });
            }
        }
        if self.tx_direct_buffer_size == 0 {
            return Err(ConfigError::ZeroCapacity("tx_direct_buffer_size"));
        }
        if self.tx_window_buffer_size == 0 {
            return Err(ConfigError::ZeroCapacity("tx_window_buffer_size"));
        }
        if self.time_margin >= self.time_per_node {
            return Err(ConfigError::MarginConsumesSlot {
                margin: self.time_margin,
                slot: self.time_per_node,
            });
        }
        Ok(())
    }

    /// Quiet period after which discovery may finish.
    pub(crate) fn finished_wait(&self) -> f64 {
        self.finished_wait_multiplier * self.max_time_between_enum_frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert_eq!(LinkConfig::default().validate(), Ok(()));
    }

    #[test]
    fn window_size_is_bounded_by_sequence_space() {
        let mut config = LinkConfig { window_size: 128, ..LinkConfig::default() };
        assert_eq!(config.validate(), Ok(()));
        config.window_size = 129;
        assert_eq!(config.validate(), Err(ConfigError::WindowSize(129)));
        config.window_size = 0;
        assert_eq!(config.validate(), Err(ConfigError::WindowSize(0)));
    }

    #[test]
    fn uuid_width_is_bounded() {
        let mut config = LinkConfig { uuid_bytes: 16, ..LinkConfig::default() };
        assert_eq!(config.validate(), Ok(()));
        config.uuid_bytes = 17;
        assert_eq!(config.validate(), Err(ConfigError::UuidBytes(17)));
    }

    #[test]
    fn rejects_nonsense_times() {
        let config = LinkConfig { wrap_time: 0.0, ..LinkConfig::default() };
        assert!(matches!(config.validate(), Err(ConfigError::NonPositiveTime { .. })));

        let config = LinkConfig { time_margin: -0.1, ..LinkConfig::default() };
        assert!(matches!(config.validate(), Err(ConfigError::NegativeTime { .. })));

        let config = LinkConfig { max_time_between_enum_frames: f64::NAN, ..LinkConfig::default() };
        assert!(matches!(config.validate(), Err(ConfigError::NonPositiveTime { .. })));
    }

    #[test]
    fn rejects_margin_swallowing_the_slot() {
        let config =
            LinkConfig { time_per_node: 0.001, time_margin: 0.001, ..LinkConfig::default() };
        assert!(matches!(config.validate(), Err(ConfigError::MarginConsumesSlot { .. })));
    }
}
