//! PLC42: the station IO PLC. Discrete inputs carry limit sensors, the
//! E-stop and the solenoid feedback; ten holding registers carry the
//! solenoid and gimbal command state, written back by the controllers.

use std::time::Duration;

use crossbeam_channel::Sender;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use rampart_comms::{LinkConfig, ModbusLink, ModbusReply, RegisterType, Watchdog};
use rampart_types::Plc42Io;

use crate::{send_event, DeviceEvent, DeviceKind, Result};

pub const DIGITAL_INPUTS_START_ADDR: u16 = 0x0000;
pub const DIGITAL_INPUTS_COUNT: u16 = 8;
pub const HOLDING_REGISTERS_START_ADDR: u16 = 0x0000;
pub const HOLDING_REGISTERS_COUNT: u16 = 10;

// Holding-register layout.
pub const REG_SOLENOID_MODE: u16 = 0;
pub const REG_GIMBAL_OP_MODE: u16 = 1;
pub const REG_AZ_SPEED_LOW: u16 = 2;
pub const REG_EL_SPEED_LOW: u16 = 4;
pub const REG_AZ_DIRECTION: u16 = 6;
pub const REG_EL_DIRECTION: u16 = 7;
pub const REG_SOLENOID_STATE: u16 = 8;
pub const REG_RESET_ALARM: u16 = 9;

/// Writes the controllers may issue to the station PLC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plc42Command {
    SetSolenoidMode(u16),
    SetSolenoidState(u16),
    SetGimbalOpMode(u16),
    SetAzimuthSpeed(u32),
    SetElevationSpeed(u32),
    SetAzimuthDirection(u16),
    SetElevationDirection(u16),
    ResetAlarm,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Plc42Message {
    Digital {
        station_upper_sensor: bool,
        station_lower_sensor: bool,
        emergency_stop_active: bool,
        ammunition_level: bool,
        station_input1: bool,
        station_input2: bool,
        station_input3: bool,
        solenoid_active: bool,
    },
    Holding {
        solenoid_mode: u16,
        gimbal_op_mode: u16,
        azimuth_speed: u32,
        elevation_speed: u32,
        azimuth_direction: u16,
        elevation_direction: u16,
        solenoid_state: u16,
        reset_alarm: u16,
    },
}

pub fn decode_reply(reply: &ModbusReply) -> Option<Plc42Message> {
    match (reply.register_type, reply.start_address) {
        (RegisterType::DiscreteInputs, DIGITAL_INPUTS_START_ADDR)
            if reply.bits.len() >= DIGITAL_INPUTS_COUNT as usize =>
        {
            Some(Plc42Message::Digital {
                station_upper_sensor: reply.bits[0],
                station_lower_sensor: reply.bits[1],
                emergency_stop_active: reply.bits[2],
                ammunition_level: reply.bits[3],
                station_input1: reply.bits[4],
                station_input2: reply.bits[5],
                station_input3: reply.bits[6],
                solenoid_active: reply.bits[7],
            })
        }
        (RegisterType::HoldingRegisters, HOLDING_REGISTERS_START_ADDR)
            if reply.registers.len() >= 7 =>
        {
            let reg = |i: usize| reply.registers.get(i).copied().unwrap_or(0);
            // Speeds are 32-bit pairs, low word first.
            let az_speed = ((reg(3) as u32) << 16) | reg(2) as u32;
            let el_speed = ((reg(5) as u32) << 16) | reg(4) as u32;
            Some(Plc42Message::Holding {
                solenoid_mode: reg(0),
                gimbal_op_mode: reg(1),
                azimuth_speed: az_speed,
                elevation_speed: el_speed,
                azimuth_direction: reg(6),
                elevation_direction: reg(7),
                solenoid_state: reg(8),
                reset_alarm: reg(9),
            })
        }
        _ => None,
    }
}

#[derive(Debug, Default)]
pub struct Plc42Device {
    snapshot: Plc42Io,
}

impl Plc42Device {
    pub fn snapshot(&self) -> Plc42Io {
        self.snapshot
    }

    pub fn merge(&mut self, msg: &Plc42Message) -> Option<Plc42Io> {
        let mut next = self.snapshot;
        next.is_connected = true;
        match msg {
            Plc42Message::Digital {
                station_upper_sensor,
                station_lower_sensor,
                emergency_stop_active,
                ammunition_level,
                station_input1,
                station_input2,
                station_input3,
                solenoid_active,
            } => {
                next.station_upper_sensor = *station_upper_sensor;
                next.station_lower_sensor = *station_lower_sensor;
                next.emergency_stop_active = *emergency_stop_active;
                next.ammunition_level = *ammunition_level;
                next.station_input1 = *station_input1;
                next.station_input2 = *station_input2;
                next.station_input3 = *station_input3;
                next.solenoid_active = *solenoid_active;
            }
            Plc42Message::Holding {
                solenoid_mode,
                gimbal_op_mode,
                azimuth_speed,
                elevation_speed,
                azimuth_direction,
                elevation_direction,
                solenoid_state,
                reset_alarm,
            } => {
                next.solenoid_mode = *solenoid_mode;
                next.gimbal_op_mode = *gimbal_op_mode;
                next.azimuth_speed = *azimuth_speed;
                next.elevation_speed = *elevation_speed;
                next.azimuth_direction = *azimuth_direction;
                next.elevation_direction = *elevation_direction;
                next.solenoid_state = *solenoid_state;
                next.reset_alarm = *reset_alarm;
            }
        }
        self.publish(next)
    }

    pub fn set_connected(&mut self, connected: bool) -> Option<Plc42Io> {
        let mut next = self.snapshot;
        next.is_connected = connected;
        self.publish(next)
    }

    fn publish(&mut self, next: Plc42Io) -> Option<Plc42Io> {
        if next != self.snapshot {
            self.snapshot = next;
            Some(next)
        } else {
            None
        }
    }
}

async fn apply_command(link: &mut ModbusLink, command: Plc42Command) -> rampart_comms::Result<()> {
    match command {
        Plc42Command::SetSolenoidMode(mode) => link.write_register(REG_SOLENOID_MODE, mode).await,
        Plc42Command::SetSolenoidState(state) => {
            link.write_register(REG_SOLENOID_STATE, state).await
        }
        Plc42Command::SetGimbalOpMode(mode) => link.write_register(REG_GIMBAL_OP_MODE, mode).await,
        Plc42Command::SetAzimuthSpeed(speed) => {
            let words = [(speed & 0xFFFF) as u16, (speed >> 16) as u16];
            link.write_registers(REG_AZ_SPEED_LOW, &words).await
        }
        Plc42Command::SetElevationSpeed(speed) => {
            let words = [(speed & 0xFFFF) as u16, (speed >> 16) as u16];
            link.write_registers(REG_EL_SPEED_LOW, &words).await
        }
        Plc42Command::SetAzimuthDirection(dir) => link.write_register(REG_AZ_DIRECTION, dir).await,
        Plc42Command::SetElevationDirection(dir) => {
            link.write_register(REG_EL_DIRECTION, dir).await
        }
        Plc42Command::ResetAlarm => link.write_register(REG_RESET_ALARM, 1).await,
    }
}

pub async fn run(
    config: LinkConfig,
    mut commands: mpsc::Receiver<Plc42Command>,
    events: Sender<DeviceEvent>,
) -> Result<()> {
    let mut link = ModbusLink::open(&config).await?;
    let mut device = Plc42Device::default();
    let mut watchdog = Watchdog::new(Duration::from_millis(config.watchdog_ms));
    let mut poll_tick = tokio::time::interval(Duration::from_millis(config.poll_interval_ms));

    debug!("PLC42 online on {}", config.port);

    loop {
        tokio::select! {
            _ = poll_tick.tick() => {
                let reads = [
                    (RegisterType::DiscreteInputs, DIGITAL_INPUTS_START_ADDR, DIGITAL_INPUTS_COUNT),
                    (RegisterType::HoldingRegisters, HOLDING_REGISTERS_START_ADDR, HOLDING_REGISTERS_COUNT),
                ];
                for (register_type, start, count) in reads {
                    match link.read(register_type, start, count).await {
                        Ok(reply) => {
                            if let Some(msg) = decode_reply(&reply) {
                                watchdog.rearm();
                                if let Some(snapshot) = device.merge(&msg) {
                                    send_event(&events, DeviceEvent::Plc42(snapshot))?;
                                }
                            }
                        }
                        Err(rampart_comms::Error::ReplyTimeout { .. }) => break,
                        Err(e) => {
                            warn!("PLC42 modbus error: {e}");
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
                    warn!("PLC42 communication timeout");
                    if let Some(snapshot) = device.set_connected(false) {
                        send_event(&events, DeviceEvent::Plc42(snapshot))?;
                    }
                }
            }
            cmd = commands.recv() => {
                match cmd {
                    Some(command) => {
                        if let Err(e) = apply_command(&mut link, command).await {
                            warn!("PLC42 write failed: {e}");
                            send_event(&events, DeviceEvent::Fault {
                                device: DeviceKind::Plc42,
                                message: e.to_string(),
                            })?;
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

    #[test]
    fn estop_bit_decodes() {
        let reply = ModbusReply {
            register_type: RegisterType::DiscreteInputs,
            start_address: DIGITAL_INPUTS_START_ADDR,
            bits: vec![false, false, true, false, false, false, false, false],
            registers: vec![],
        };
        match decode_reply(&reply).unwrap() {
            Plc42Message::Digital {
                emergency_stop_active,
                ..
            } => assert!(emergency_stop_active),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn speed_words_combine_low_first() {
        let reply = ModbusReply {
            register_type: RegisterType::HoldingRegisters,
            start_address: HOLDING_REGISTERS_START_ADDR,
            bits: vec![],
            registers: vec![1, 0, 0x5678, 0x1234, 0xFFFF, 0x0000, 0, 1, 0, 0],
        };
        match decode_reply(&reply).unwrap() {
            Plc42Message::Holding {
                azimuth_speed,
                elevation_speed,
                ..
            } => {
                assert_eq!(azimuth_speed, 0x12345678);
                assert_eq!(elevation_speed, 0x0000FFFF);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn digital_and_holding_merge_disjointly() {
        let mut device = Plc42Device::default();
        device.merge(&Plc42Message::Digital {
            station_upper_sensor: true,
            station_lower_sensor: false,
            emergency_stop_active: false,
            ammunition_level: true,
            station_input1: false,
            station_input2: false,
            station_input3: false,
            solenoid_active: false,
        });
        let snapshot = device
            .merge(&Plc42Message::Holding {
                solenoid_mode: 2,
                gimbal_op_mode: 1,
                azimuth_speed: 1000,
                elevation_speed: 2000,
                azimuth_direction: 0,
                elevation_direction: 1,
                solenoid_state: 0,
                reset_alarm: 0,
            })
            .unwrap();
        assert!(snapshot.station_upper_sensor);
        assert!(snapshot.ammunition_level);
        assert_eq!(snapshot.solenoid_mode, 2);
        assert_eq!(snapshot.elevation_speed, 2000);
    }
}
