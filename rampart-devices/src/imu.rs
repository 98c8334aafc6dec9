//! SST810 inclinometer/IMU over Modbus RTU.
//!
//! One poll reads 18 input registers starting at 0x03E8, decoded as nine
//! big-endian IEEE-754 floats: pitch, roll, temperature x 10, then the
//! three accelerations and three angular rates.

use std::time::Duration;

use crossbeam_channel::Sender;
use tracing::{debug, warn};

use rampart_comms::{LinkConfig, ModbusLink, ModbusReply, RegisterType, Watchdog};
use rampart_types::ImuSample;

use crate::{send_event, DeviceEvent, Result};

pub const ALL_DATA_START_ADDR: u16 = 0x03E8;
pub const ALL_DATA_REG_COUNT: u16 = 18;

/// Decode one routed reply into a sample. Replies for other register
/// windows are ignored.
pub fn decode_reply(reply: &ModbusReply) -> Option<ImuSample> {
    if reply.register_type != RegisterType::InputRegisters
        || reply.start_address != ALL_DATA_START_ADDR
        || reply.registers.len() < ALL_DATA_REG_COUNT as usize
    {
        return None;
    }

    let f = |index: usize| -> f32 {
        let high = reply.registers[index] as u32;
        let low = reply.registers[index + 1] as u32;
        f32::from_bits((high << 16) | low)
    };

    Some(ImuSample {
        is_connected: true,
        pitch_deg: f(0),
        roll_deg: f(2),
        temperature_c: f(4) / 10.0,
        accel_x_g: f(6),
        accel_y_g: f(8),
        accel_z_g: f(10),
        gyro_x_dps: f(12),
        gyro_y_dps: f(14),
        gyro_z_dps: f(16),
        // The SST810 has no magnetic heading; yaw stays zero.
        yaw_deg: 0.0,
    })
}

pub async fn run(config: LinkConfig, events: Sender<DeviceEvent>) -> Result<()> {
    let mut link = ModbusLink::open(&config).await?;
    let mut watchdog = Watchdog::new(Duration::from_millis(config.watchdog_ms));
    let mut poll_tick = tokio::time::interval(Duration::from_millis(config.poll_interval_ms));
    let mut last_sample = ImuSample::default();

    debug!("IMU online on {}", config.port);

    loop {
        tokio::select! {
            _ = poll_tick.tick() => {
                match link
                    .read(RegisterType::InputRegisters, ALL_DATA_START_ADDR, ALL_DATA_REG_COUNT)
                    .await
                {
                    Ok(reply) => {
                        if let Some(sample) = decode_reply(&reply) {
                            watchdog.rearm();
                            if sample != last_sample {
                                last_sample = sample;
                                send_event(&events, DeviceEvent::Imu(sample))?;
                            }
                        }
                    }
                    Err(rampart_comms::Error::ReplyTimeout { .. }) => {
                        // Poll again on the next tick; the watchdog
                        // handles the disconnect transition.
                    }
                    Err(e) => {
                        warn!("IMU modbus error: {e}");
                        if !link.is_connected() {
                            link.reconnect_with_backoff().await?;
                        }
                    }
                }
            }
            _ = tokio::time::sleep_until(tokio::time::Instant::from_std(watchdog.deadline())) => {
                if watchdog.take_expiry() {
                    warn!("IMU communication timeout");
                    if last_sample.is_connected {
                        last_sample.is_connected = false;
                        send_event(&events, DeviceEvent::Imu(last_sample))?;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn registers_for(values: [f32; 9]) -> Vec<u16> {
        let mut registers = Vec::with_capacity(18);
        for v in values {
            let bits = v.to_bits();
            registers.push((bits >> 16) as u16);
            registers.push((bits & 0xFFFF) as u16);
        }
        registers
    }

    #[test]
    fn nine_floats_decode_in_order() {
        let reply = ModbusReply {
            register_type: RegisterType::InputRegisters,
            start_address: ALL_DATA_START_ADDR,
            bits: vec![],
            registers: registers_for([1.5, -2.5, 215.0, 0.01, 0.02, 0.98, 0.1, 0.2, 0.3]),
        };
        let sample = decode_reply(&reply).unwrap();
        assert_relative_eq!(sample.pitch_deg, 1.5);
        assert_relative_eq!(sample.roll_deg, -2.5);
        assert_relative_eq!(sample.temperature_c, 21.5);
        assert_relative_eq!(sample.accel_z_g, 0.98);
        assert_relative_eq!(sample.gyro_z_dps, 0.3);
        assert!(sample.is_connected);
    }

    #[test]
    fn wrong_window_is_ignored() {
        let reply = ModbusReply {
            register_type: RegisterType::HoldingRegisters,
            start_address: ALL_DATA_START_ADDR,
            bits: vec![],
            registers: vec![0; 18],
        };
        assert!(decode_reply(&reply).is_none());
    }
}
