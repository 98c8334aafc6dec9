//! PLC21: the operator panel PLC. Discrete inputs carry the panel
//! switches; three holding registers carry fire mode, speed switch and
//! panel temperature.

use std::time::Duration;

use crossbeam_channel::Sender;
use tracing::{debug, warn};

use rampart_comms::{LinkConfig, ModbusLink, ModbusReply, RegisterType, Watchdog};
use rampart_types::Plc21Panel;

use crate::{send_event, DeviceEvent, Result};

pub const DIGITAL_INPUTS_START_ADDR: u16 = 0x0000;
pub const DIGITAL_INPUTS_COUNT: u16 = 11;
pub const ANALOG_INPUTS_START_ADDR: u16 = 0x0000;
pub const ANALOG_INPUTS_COUNT: u16 = 3;

/// Partial update from one read.
#[derive(Debug, Clone, PartialEq)]
pub enum Plc21Message {
    Digital {
        authorize_sw: bool,
        menu_val_sw: bool,
        menu_down_sw: bool,
        menu_up_sw: bool,
        switch_camera_sw: bool,
        enable_stabilization_sw: bool,
        home_position_sw: bool,
        load_ammunition_sw: bool,
        arm_gun_sw: bool,
        enable_station_sw: bool,
    },
    Analog {
        fire_mode_raw: u16,
        speed_sw: u16,
        panel_temperature: u16,
    },
}

/// Route a reply by register type and start address.
pub fn decode_reply(reply: &ModbusReply) -> Option<Plc21Message> {
    match (reply.register_type, reply.start_address) {
        (RegisterType::DiscreteInputs, DIGITAL_INPUTS_START_ADDR) => {
            let bit = |i: usize| reply.bits.get(i).copied().unwrap_or(false);
            Some(Plc21Message::Digital {
                authorize_sw: bit(0),
                menu_val_sw: bit(1),
                menu_down_sw: bit(2),
                menu_up_sw: bit(3),
                switch_camera_sw: bit(4),
                enable_stabilization_sw: bit(5),
                home_position_sw: bit(6),
                load_ammunition_sw: bit(8),
                arm_gun_sw: bit(9),
                enable_station_sw: bit(10),
            })
        }
        (RegisterType::HoldingRegisters, ANALOG_INPUTS_START_ADDR) => {
            let reg = |i: usize| reply.registers.get(i).copied().unwrap_or(0);
            Some(Plc21Message::Analog {
                fire_mode_raw: reg(0),
                speed_sw: reg(1),
                panel_temperature: reg(2),
            })
        }
        _ => None,
    }
}

#[derive(Debug, Default)]
pub struct Plc21Device {
    snapshot: Plc21Panel,
}

impl Plc21Device {
    pub fn snapshot(&self) -> Plc21Panel {
        self.snapshot
    }

    pub fn merge(&mut self, msg: &Plc21Message) -> Option<Plc21Panel> {
        let mut next = self.snapshot;
        next.is_connected = true;
        match msg {
            Plc21Message::Digital {
                authorize_sw,
                menu_val_sw,
                menu_down_sw,
                menu_up_sw,
                switch_camera_sw,
                enable_stabilization_sw,
                home_position_sw,
                load_ammunition_sw,
                arm_gun_sw,
                enable_station_sw,
            } => {
                next.authorize_sw = *authorize_sw;
                next.menu_val_sw = *menu_val_sw;
                next.menu_down_sw = *menu_down_sw;
                next.menu_up_sw = *menu_up_sw;
                next.switch_camera_sw = *switch_camera_sw;
                next.enable_stabilization_sw = *enable_stabilization_sw;
                next.home_position_sw = *home_position_sw;
                next.load_ammunition_sw = *load_ammunition_sw;
                next.arm_gun_sw = *arm_gun_sw;
                next.enable_station_sw = *enable_station_sw;
            }
            Plc21Message::Analog {
                fire_mode_raw,
                speed_sw,
                panel_temperature,
            } => {
                next.fire_mode_raw = *fire_mode_raw;
                next.speed_sw = *speed_sw;
                next.panel_temperature = *panel_temperature;
            }
        }
        self.publish(next)
    }

    pub fn set_connected(&mut self, connected: bool) -> Option<Plc21Panel> {
        let mut next = self.snapshot;
        next.is_connected = connected;
        self.publish(next)
    }

    fn publish(&mut self, next: Plc21Panel) -> Option<Plc21Panel> {
        if next != self.snapshot {
            self.snapshot = next;
            Some(next)
        } else {
            None
        }
    }
}

pub async fn run(config: LinkConfig, events: Sender<DeviceEvent>) -> Result<()> {
    let mut link = ModbusLink::open(&config).await?;
    let mut device = Plc21Device::default();
    let mut watchdog = Watchdog::new(Duration::from_millis(config.watchdog_ms));
    let mut poll_tick = tokio::time::interval(Duration::from_millis(config.poll_interval_ms));

    debug!("PLC21 online on {}", config.port);

    loop {
        tokio::select! {
            _ = poll_tick.tick() => {
                // One poll cycle: switches first, then the selectors.
                let reads = [
                    (RegisterType::DiscreteInputs, DIGITAL_INPUTS_START_ADDR, DIGITAL_INPUTS_COUNT),
                    (RegisterType::HoldingRegisters, ANALOG_INPUTS_START_ADDR, ANALOG_INPUTS_COUNT),
                ];
                for (register_type, start, count) in reads {
                    match link.read(register_type, start, count).await {
                        Ok(reply) => {
                            if let Some(msg) = decode_reply(&reply) {
                                watchdog.rearm();
                                if let Some(snapshot) = device.merge(&msg) {
                                    send_event(&events, DeviceEvent::Plc21(snapshot))?;
                                }
                            }
                        }
                        Err(rampart_comms::Error::ReplyTimeout { .. }) => break,
                        Err(e) => {
                            warn!("PLC21 modbus error: {e}");
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
                    warn!("PLC21 communication timeout");
                    if let Some(snapshot) = device.set_connected(false) {
                        send_event(&events, DeviceEvent::Plc21(snapshot))?;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digital_bits_map_to_switches() {
        let mut bits = vec![false; 11];
        bits[3] = true; // menu up
        bits[9] = true; // arm gun
        bits[10] = true; // enable station
        let reply = ModbusReply {
            register_type: RegisterType::DiscreteInputs,
            start_address: DIGITAL_INPUTS_START_ADDR,
            bits,
            registers: vec![],
        };
        let msg = decode_reply(&reply).unwrap();
        let mut device = Plc21Device::default();
        let snapshot = device.merge(&msg).unwrap();
        assert!(snapshot.menu_up_sw);
        assert!(snapshot.arm_gun_sw);
        assert!(snapshot.enable_station_sw);
        assert!(!snapshot.load_ammunition_sw);
    }

    #[test]
    fn analog_registers_merge_without_clobbering_switches() {
        let mut device = Plc21Device::default();
        let digital = decode_reply(&ModbusReply {
            register_type: RegisterType::DiscreteInputs,
            start_address: DIGITAL_INPUTS_START_ADDR,
            bits: {
                let mut b = vec![false; 11];
                b[10] = true;
                b
            },
            registers: vec![],
        })
        .unwrap();
        device.merge(&digital).unwrap();

        let analog = decode_reply(&ModbusReply {
            register_type: RegisterType::HoldingRegisters,
            start_address: ANALOG_INPUTS_START_ADDR,
            bits: vec![],
            registers: vec![2, 5, 31],
        })
        .unwrap();
        let snapshot = device.merge(&analog).unwrap();

        assert!(snapshot.enable_station_sw);
        assert_eq!(snapshot.fire_mode_raw, 2);
        assert_eq!(snapshot.speed_sw, 5);
        assert_eq!(snapshot.panel_temperature, 31);
    }

    #[test]
    fn disjoint_merges_commute() {
        let digital = Plc21Message::Digital {
            authorize_sw: true,
            menu_val_sw: false,
            menu_down_sw: false,
            menu_up_sw: false,
            switch_camera_sw: true,
            enable_stabilization_sw: false,
            home_position_sw: false,
            load_ammunition_sw: false,
            arm_gun_sw: true,
            enable_station_sw: true,
        };
        let analog = Plc21Message::Analog {
            fire_mode_raw: 1,
            speed_sw: 3,
            panel_temperature: 28,
        };

        let mut forward = Plc21Device::default();
        forward.merge(&digital);
        forward.merge(&analog);

        let mut reverse = Plc21Device::default();
        reverse.merge(&analog);
        reverse.merge(&digital);

        assert_eq!(forward.snapshot(), reverse.snapshot());
    }
}
