//! Servo axis driver over Modbus RTU (one instance per axis).
//!
//! The poll cycle reads the 32-bit position every tick and the slower
//! temperature and alarm windows every few ticks. A non-zero alarm code
//! latches until the operator resets it.

use std::time::Duration;

use crossbeam_channel::Sender;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use rampart_comms::{LinkConfig, ModbusLink, ModbusReply, RegisterType, Watchdog};
use rampart_types::ServoAxisData;

use crate::{send_event, DeviceEvent, DeviceKind, Result};

pub const POSITION_START_ADDR: u16 = 0x00C6;
pub const POSITION_REG_COUNT: u16 = 2;
pub const TEMPERATURE_START_ADDR: u16 = 0x00F8;
pub const TEMPERATURE_REG_COUNT: u16 = 4;
pub const ALARM_STATUS_ADDR: u16 = 0x0080;
pub const ALARM_STATUS_COUNT: u16 = 2;
pub const ALARM_HISTORY_ADDR: u16 = 0x0084;
pub const ALARM_HISTORY_COUNT: u16 = 20;

/// How many position polls between temperature/alarm polls.
const SLOW_POLL_DIVIDER: u32 = 10;

/// Which axis this driver instance serves, for event routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServoAxis {
    Azimuth,
    Elevation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServoDriverCommand {
    ResetAlarm,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServoDriverMessage {
    Position { counts: f32 },
    Temperatures { driver_c: f32, motor_c: f32 },
    Alarm { code: u32, description: String },
    AlarmCleared,
    AlarmHistory { codes: Vec<u16> },
}

pub fn alarm_description(code: u32) -> String {
    match code {
        0x0001 => "Overcurrent Alarm".to_string(),
        0x0002 => "Overvoltage Alarm".to_string(),
        0x0003 => "Undervoltage Alarm".to_string(),
        0x0004 => "Overheat Alarm".to_string(),
        0x0005 => "Encoder Error".to_string(),
        0x0006 => "Communication Error".to_string(),
        other => format!("Unknown Alarm: 0x{other:04x}"),
    }
}

/// Route one reply by start address into a typed message.
pub fn decode_reply(reply: &ModbusReply) -> Option<ServoDriverMessage> {
    if reply.register_type != RegisterType::HoldingRegisters
        && reply.register_type != RegisterType::InputRegisters
    {
        return None;
    }
    let reg = |i: usize| reply.registers.get(i).copied().unwrap_or(0);
    match reply.start_address {
        POSITION_START_ADDR if reply.registers.len() >= POSITION_REG_COUNT as usize => {
            let raw = (((reg(0) as u32) << 16) | reg(1) as u32) as i32;
            Some(ServoDriverMessage::Position { counts: raw as f32 })
        }
        TEMPERATURE_START_ADDR if reply.registers.len() >= TEMPERATURE_REG_COUNT as usize => {
            let driver_raw = (((reg(0) as u32) << 16) | reg(1) as u32) as i32;
            let motor_raw = (((reg(2) as u32) << 16) | reg(3) as u32) as i32;
            Some(ServoDriverMessage::Temperatures {
                driver_c: driver_raw as f32 * 0.1,
                motor_c: motor_raw as f32 * 0.1,
            })
        }
        ALARM_STATUS_ADDR if reply.registers.len() >= ALARM_STATUS_COUNT as usize => {
            let code = ((reg(0) as u32) << 16) | reg(1) as u32;
            if code != 0 {
                Some(ServoDriverMessage::Alarm {
                    code,
                    description: alarm_description(code),
                })
            } else {
                Some(ServoDriverMessage::AlarmCleared)
            }
        }
        ALARM_HISTORY_ADDR => {
            let mut codes = Vec::new();
            for pair in reply.registers.chunks_exact(2) {
                let code = ((pair[0] as u32) << 16) | pair[1] as u32;
                if code != 0 {
                    codes.push(code as u16);
                }
            }
            Some(ServoDriverMessage::AlarmHistory { codes })
        }
        other => {
            warn!("servo driver reply for unknown register 0x{other:04x}");
            None
        }
    }
}

#[derive(Debug, Default)]
pub struct ServoDriverDevice {
    snapshot: ServoAxisData,
}

impl ServoDriverDevice {
    pub fn snapshot(&self) -> ServoAxisData {
        self.snapshot.clone()
    }

    pub fn merge(&mut self, msg: &ServoDriverMessage) -> Option<ServoAxisData> {
        let mut next = self.snapshot.clone();
        next.is_connected = true;
        match msg {
            ServoDriverMessage::Position { counts } => {
                next.position_counts = *counts;
            }
            ServoDriverMessage::Temperatures { driver_c, motor_c } => {
                next.driver_temp_c = *driver_c;
                next.motor_temp_c = *motor_c;
            }
            ServoDriverMessage::Alarm { code, description } => {
                next.alarm_code = *code;
                next.alarm_text = description.clone();
                // Latched until the operator resets the alarm.
                next.fault = true;
            }
            ServoDriverMessage::AlarmCleared => {
                next.alarm_code = 0;
            }
            ServoDriverMessage::AlarmHistory { codes } => {
                next.alarm_history = codes.clone();
            }
        }
        self.publish(next)
    }

    /// Operator alarm reset clears the latched fault.
    pub fn clear_fault(&mut self) -> Option<ServoAxisData> {
        let mut next = self.snapshot.clone();
        next.fault = false;
        next.alarm_code = 0;
        next.alarm_text.clear();
        self.publish(next)
    }

    pub fn set_connected(&mut self, connected: bool) -> Option<ServoAxisData> {
        let mut next = self.snapshot.clone();
        next.is_connected = connected;
        self.publish(next)
    }

    fn publish(&mut self, next: ServoAxisData) -> Option<ServoAxisData> {
        if next != self.snapshot {
            self.snapshot = next;
            Some(self.snapshot.clone())
        } else {
            None
        }
    }
}

fn axis_event(axis: ServoAxis, snapshot: ServoAxisData) -> DeviceEvent {
    match axis {
        ServoAxis::Azimuth => DeviceEvent::ServoAz(snapshot),
        ServoAxis::Elevation => DeviceEvent::ServoEl(snapshot),
    }
}

pub async fn run(
    axis: ServoAxis,
    config: LinkConfig,
    mut commands: mpsc::Receiver<ServoDriverCommand>,
    events: Sender<DeviceEvent>,
) -> Result<()> {
    let mut link = ModbusLink::open(&config).await?;
    let mut device = ServoDriverDevice::default();
    let mut watchdog = Watchdog::new(Duration::from_millis(config.watchdog_ms));
    let mut poll_tick = tokio::time::interval(Duration::from_millis(config.poll_interval_ms));
    let mut cycle: u32 = 0;

    debug!("servo driver {axis:?} online on {}", config.port);

    loop {
        tokio::select! {
            _ = poll_tick.tick() => {
                cycle = cycle.wrapping_add(1);
                let mut reads = vec![(POSITION_START_ADDR, POSITION_REG_COUNT)];
                if cycle % SLOW_POLL_DIVIDER == 0 {
                    reads.push((TEMPERATURE_START_ADDR, TEMPERATURE_REG_COUNT));
                    reads.push((ALARM_STATUS_ADDR, ALARM_STATUS_COUNT));
                }
                for (start, count) in reads {
                    match link.read(RegisterType::HoldingRegisters, start, count).await {
                        Ok(reply) => {
                            if let Some(msg) = decode_reply(&reply) {
                                watchdog.rearm();
                                if let ServoDriverMessage::Alarm { code, description } = &msg {
                                    send_event(&events, DeviceEvent::Fault {
                                        device: match axis {
                                            ServoAxis::Azimuth => DeviceKind::ServoAz,
                                            ServoAxis::Elevation => DeviceKind::ServoEl,
                                        },
                                        message: format!("alarm 0x{code:04x}: {description}"),
                                    })?;
                                }
                                if let Some(snapshot) = device.merge(&msg) {
                                    send_event(&events, axis_event(axis, snapshot))?;
                                }
                            }
                        }
                        Err(rampart_comms::Error::ReplyTimeout { .. }) => break,
                        Err(e) => {
                            warn!("servo driver {axis:?} modbus error: {e}");
                            if !link.is_connected() {
                                link.reconnect_with_backoff().await?;
                            }
                            break;
                        }
                    }
                }
            }
            _ = tokio::time::sleep_until(tokio::time::Instant::from_std(watchdog.deadline())) => {
                if watchdog.take_expiry() {
                    warn!("servo driver {axis:?} communication timeout");
                    if let Some(snapshot) = device.set_connected(false) {
                        send_event(&events, axis_event(axis, snapshot))?;
                    }
                }
            }
            cmd = commands.recv() => {
                match cmd {
                    Some(ServoDriverCommand::ResetAlarm) => {
                        if let Err(e) = link.write_register(0x0180, 1).await {
                            warn!("servo driver {axis:?} alarm reset failed: {e}");
                        } else if let Some(snapshot) = device.clear_fault() {
                            send_event(&events, axis_event(axis, snapshot))?;
                        }
                    }
                    None => return Ok(()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holding(start: u16, registers: Vec<u16>) -> ModbusReply {
        ModbusReply {
            register_type: RegisterType::HoldingRegisters,
            start_address: start,
            bits: vec![],
            registers,
        }
    }

    #[test]
    fn position_is_signed_32_bit() {
        // -10000 counts across two registers.
        let raw = (-10000i32) as u32;
        let reply = holding(
            POSITION_START_ADDR,
            vec![(raw >> 16) as u16, (raw & 0xFFFF) as u16],
        );
        match decode_reply(&reply).unwrap() {
            ServoDriverMessage::Position { counts } => assert_eq!(counts, -10000.0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn temperatures_scale_by_tenth() {
        let reply = holding(TEMPERATURE_START_ADDR, vec![0, 425, 0, 610]);
        match decode_reply(&reply).unwrap() {
            ServoDriverMessage::Temperatures { driver_c, motor_c } => {
                approx::assert_relative_eq!(driver_c, 42.5);
                approx::assert_relative_eq!(motor_c, 61.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn alarm_latches_until_cleared() {
        let mut device = ServoDriverDevice::default();
        let alarm = decode_reply(&holding(ALARM_STATUS_ADDR, vec![0, 4])).unwrap();
        let snapshot = device.merge(&alarm).unwrap();
        assert!(snapshot.fault);
        assert_eq!(snapshot.alarm_text, "Overheat Alarm");

        // Alarm register reads zero, but the fault stays latched.
        let cleared = decode_reply(&holding(ALARM_STATUS_ADDR, vec![0, 0])).unwrap();
        let snapshot = device.merge(&cleared).unwrap();
        assert!(snapshot.fault);
        assert_eq!(snapshot.alarm_code, 0);

        let snapshot = device.clear_fault().unwrap();
        assert!(!snapshot.fault);
    }

    #[test]
    fn alarm_history_skips_zero_entries() {
        let reply = holding(ALARM_HISTORY_ADDR, vec![0, 1, 0, 0, 0, 4, 0, 0]);
        match decode_reply(&reply).unwrap() {
            ServoDriverMessage::AlarmHistory { codes } => assert_eq!(codes, vec![1, 4]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn merge_preserves_position_across_temperature_reads() {
        let mut device = ServoDriverDevice::default();
        device.merge(&ServoDriverMessage::Position { counts: 5000.0 });
        let snapshot = device
            .merge(&ServoDriverMessage::Temperatures {
                driver_c: 40.0,
                motor_c: 50.0,
            })
            .unwrap();
        assert_eq!(snapshot.position_counts, 5000.0);
        assert_eq!(snapshot.driver_temp_c, 40.0);
    }
}
