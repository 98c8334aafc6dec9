use serde::Deserialize;

/// Serial parity setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum StopBits {
    #[default]
    #[serde(rename = "1")]
    One,
    #[serde(rename = "2")]
    Two,
}

/// Configuration of one serial or Modbus link.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub port: String,
    pub baud: u32,
    pub parity: Parity,
    pub data_bits: u8,
    pub stop_bits: StopBits,
    pub flow_control: bool,
    /// Reply timeout for request/response protocols.
    pub timeout_ms: u64,
    /// Reconnect attempts before the link gives up.
    pub max_retries: u32,
    /// Base of the exponential reconnect backoff.
    pub reconnect_base_delay_ms: u64,
    /// Modbus slave id; only meaningful for Modbus links.
    pub modbus_slave_id: u8,
    /// Poll period for poll-driven devices.
    pub poll_interval_ms: u64,
    /// Communication watchdog expiry.
    pub watchdog_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            port: String::new(),
            baud: 9600,
            parity: Parity::None,
            data_bits: 8,
            stop_bits: StopBits::One,
            flow_control: false,
            timeout_ms: 500,
            max_retries: 5,
            reconnect_base_delay_ms: 1000,
            modbus_slave_id: 1,
            poll_interval_ms: 50,
            watchdog_ms: 5000,
        }
    }
}

impl LinkConfig {
    /// Shorthand used by tests and the synthetic bench setups.
    pub fn for_port(port: &str, baud: u32) -> Self {
        LinkConfig {
            port: port.to_string(),
            baud,
            ..Default::default()
        }
    }

    /// Backoff delay before reconnect attempt `retry` (1-based).
    pub fn backoff_delay_ms(&self, retry: u32) -> u64 {
        self.reconnect_base_delay_ms << (retry.saturating_sub(1)).min(16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_retry() {
        let cfg = LinkConfig {
            reconnect_base_delay_ms: 250,
            ..Default::default()
        };
        assert_eq!(cfg.backoff_delay_ms(1), 250);
        assert_eq!(cfg.backoff_delay_ms(2), 500);
        assert_eq!(cfg.backoff_delay_ms(3), 1000);
        assert_eq!(cfg.backoff_delay_ms(4), 2000);
    }
}
