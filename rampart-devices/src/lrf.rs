//! Jioptics laser range finder: fixed 9-byte frames on a plain serial
//! link, polled with a periodic self-check.
//!
//! Frame layout: `EE 07 <cmd> <d0> <d1> <d2> <d3> <d4> <cs>` where the
//! checksum is the byte sum of the six body bytes (cmd + data).

use std::time::Duration;

use crossbeam_channel::Sender;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use rampart_comms::{LinkConfig, ProtocolParser, SerialLink, Watchdog};
use rampart_types::LrfData;

use crate::{send_event, DeviceEvent, DeviceKind, Result};

const FRAME_HEADER: u8 = 0xEE;
const DEVICE_CODE: u8 = 0x07;
const PACKET_SIZE: usize = 9;

/// Command codes understood by the rangefinder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LrfCommand {
    SelfCheck,
    SingleRanging,
    ContinuousRanging1Hz,
    ContinuousRanging5Hz,
    ContinuousRanging10Hz,
    StopRanging,
    QueryAccumulatedLaserCount,
    QueryProductInfo,
    QueryTemperature,
}

impl LrfCommand {
    pub fn code(&self) -> u8 {
        match self {
            LrfCommand::SelfCheck => 0x01,
            LrfCommand::SingleRanging => 0x0B,
            LrfCommand::ContinuousRanging1Hz => 0x0C,
            LrfCommand::ContinuousRanging5Hz => 0x02,
            LrfCommand::ContinuousRanging10Hz => 0x04,
            LrfCommand::StopRanging => 0x05,
            LrfCommand::QueryAccumulatedLaserCount => 0x0A,
            LrfCommand::QueryProductInfo => 0x10,
            LrfCommand::QueryTemperature => 0x06,
        }
    }
}

/// Decoded rangefinder replies. Each variant carries only the fields
/// that read actually reported.
#[derive(Debug, Clone, PartialEq)]
pub enum LrfMessage {
    SelfCheck {
        is_fault: bool,
        no_echo: bool,
        laser_not_out: bool,
        is_over_temperature: bool,
        raw_status: u8,
    },
    Ranging {
        distance_m: u16,
        is_valid: bool,
        pulse_count: u8,
        is_fault: bool,
        no_echo: bool,
        laser_not_out: bool,
        is_over_temperature: bool,
        raw_status: u8,
    },
    AccumulatedPulses {
        laser_count: u32,
    },
    ProductInfo {
        product_id: u8,
        version: String,
    },
    Temperature {
        temperature_c: i8,
    },
}

/// Build one command frame with zero-padded parameters and checksum.
pub fn build_command(command: LrfCommand) -> [u8; PACKET_SIZE] {
    let mut frame = [0u8; PACKET_SIZE];
    frame[0] = FRAME_HEADER;
    frame[1] = DEVICE_CODE;
    frame[2] = command.code();
    frame[8] = body_checksum(&frame);
    frame
}

fn body_checksum(frame: &[u8]) -> u8 {
    frame[2..8]
        .iter()
        .fold(0u8, |sum, &b| sum.wrapping_add(b))
}

/// Stateful frame decoder.
#[derive(Debug, Default)]
pub struct LrfParser {
    buffer: Vec<u8>,
}

impl ProtocolParser for LrfParser {
    type Msg = LrfMessage;

    fn parse(&mut self, raw: &[u8]) -> Vec<LrfMessage> {
        self.buffer.extend_from_slice(raw);
        let mut out = Vec::new();

        while self.buffer.len() >= PACKET_SIZE {
            if self.buffer[0] != FRAME_HEADER || self.buffer[1] != DEVICE_CODE {
                self.buffer.remove(0);
                continue;
            }
            if self.buffer[8] != body_checksum(&self.buffer[..PACKET_SIZE]) {
                warn!("LRF checksum mismatch, resynchronising");
                self.buffer.remove(0);
                continue;
            }
            let packet: Vec<u8> = self.buffer.drain(..PACKET_SIZE).collect();
            if let Some(msg) = decode_packet(&packet) {
                out.push(msg);
            }
        }
        out
    }
}

fn decode_packet(packet: &[u8]) -> Option<LrfMessage> {
    let code = packet[2];
    match code {
        0x01 => {
            let status1 = packet[3];
            let status0 = packet[4];
            Some(LrfMessage::SelfCheck {
                is_fault: status1 == 0x01,
                no_echo: status0 & 0x08 != 0,
                laser_not_out: status0 & 0x10 != 0,
                is_over_temperature: status0 & 0x20 != 0,
                raw_status: status0,
            })
        }
        0x0B | 0x0C | 0x02 | 0x04 => {
            let status0 = packet[3];
            let is_fault = status0 == 0x01;
            let no_echo = status0 & 0x08 != 0;
            let distance = ((packet[5] as u16) << 8) | packet[6] as u16;
            Some(LrfMessage::Ranging {
                distance_m: distance,
                is_valid: distance > 0 && !no_echo && !is_fault,
                pulse_count: packet[7],
                is_fault,
                no_echo,
                laser_not_out: status0 & 0x10 != 0,
                is_over_temperature: status0 & 0x20 != 0,
                raw_status: status0,
            })
        }
        0x0A => {
            let base = ((packet[6] as u16) << 8) | packet[5] as u16;
            Some(LrfMessage::AccumulatedPulses {
                laser_count: base as u32 * 100,
            })
        }
        0x10 => {
            let version_byte = packet[4];
            Some(LrfMessage::ProductInfo {
                product_id: packet[3],
                version: format!("{}.{}", (version_byte & 0xF0) >> 4, version_byte & 0x0F),
            })
        }
        0x06 => {
            let raw = packet[4];
            let magnitude = (raw & 0x7F) as i8;
            let temperature = if raw & 0x80 != 0 {
                -magnitude
            } else {
                magnitude
            };
            Some(LrfMessage::Temperature {
                temperature_c: temperature,
            })
        }
        // Stop-ranging ack carries no data.
        0x05 => None,
        other => {
            warn!("LRF unknown response code 0x{other:02x}");
            None
        }
    }
}

/// Snapshot holder with the per-message merge policy.
#[derive(Debug, Default)]
pub struct LrfDevice {
    snapshot: LrfData,
}

impl LrfDevice {
    pub fn snapshot(&self) -> LrfData {
        self.snapshot
    }

    /// Merge one message. Returns the new snapshot when any field
    /// actually changed.
    pub fn merge(&mut self, msg: &LrfMessage) -> Option<LrfData> {
        let mut next = self.snapshot;
        next.is_connected = true;
        match msg {
            LrfMessage::SelfCheck {
                is_fault,
                no_echo,
                laser_not_out,
                is_over_temperature,
                raw_status,
            } => {
                next.is_fault = *is_fault;
                next.no_echo = *no_echo;
                next.laser_not_out = *laser_not_out;
                next.is_over_temperature = *is_over_temperature;
                next.raw_status_byte = *raw_status;
            }
            LrfMessage::Ranging {
                distance_m,
                is_valid,
                pulse_count,
                is_fault,
                no_echo,
                laser_not_out,
                is_over_temperature,
                raw_status,
            } => {
                next.last_distance_m = *distance_m;
                next.is_last_ranging_valid = *is_valid;
                next.pulse_count = *pulse_count;
                next.is_fault = *is_fault;
                next.no_echo = *no_echo;
                next.laser_not_out = *laser_not_out;
                next.is_over_temperature = *is_over_temperature;
                next.raw_status_byte = *raw_status;
            }
            LrfMessage::AccumulatedPulses { laser_count } => {
                next.laser_count = *laser_count;
            }
            LrfMessage::Temperature { temperature_c } => {
                next.temperature_c = *temperature_c;
                next.is_temp_valid = true;
            }
            LrfMessage::ProductInfo { .. } => return None,
        }
        self.publish(next)
    }

    pub fn set_connected(&mut self, connected: bool) -> Option<LrfData> {
        let mut next = self.snapshot;
        next.is_connected = connected;
        self.publish(next)
    }

    fn publish(&mut self, next: LrfData) -> Option<LrfData> {
        if next != self.snapshot {
            self.snapshot = next;
            Some(next)
        } else {
            None
        }
    }
}

/// Device task: owns the link, parser and snapshot; emits typed events.
pub async fn run(
    config: LinkConfig,
    mut commands: mpsc::Receiver<LrfCommand>,
    events: Sender<DeviceEvent>,
) -> Result<()> {
    let mut link = SerialLink::open(&config).await?;
    let mut parser = LrfParser::default();
    let mut device = LrfDevice::default();
    let mut watchdog = Watchdog::new(Duration::from_millis(config.watchdog_ms));
    // Periodic self-check doubles as the keep-alive poll.
    let mut status_tick = tokio::time::interval(Duration::from_secs(5));

    debug!("LRF device online on {}", config.port);

    loop {
        tokio::select! {
            chunk = link.recv() => {
                match chunk {
                    Ok(Some(bytes)) => {
                        let messages = parser.parse(&bytes);
                        if !messages.is_empty() {
                            watchdog.rearm();
                        }
                        for msg in &messages {
                            if let LrfMessage::ProductInfo { product_id, version } = msg {
                                send_event(&events, DeviceEvent::LrfInfo {
                                    product_id: *product_id,
                                    version: version.clone(),
                                })?;
                            }
                            if let Some(snapshot) = device.merge(msg) {
                                send_event(&events, DeviceEvent::Lrf(snapshot))?;
                            }
                        }
                    }
                    Ok(None) | Err(_) => {
                        if let Some(snapshot) = device.set_connected(false) {
                            send_event(&events, DeviceEvent::Lrf(snapshot))?;
                        }
                        link.reconnect_with_backoff().await?;
                    }
                }
            }
            _ = status_tick.tick() => {
                let frame = build_command(LrfCommand::SelfCheck);
                if let Err(e) = link.send(&frame).await {
                    warn!("LRF self-check send failed: {e}");
                }
            }
            _ = tokio::time::sleep_until(tokio::time::Instant::from_std(watchdog.deadline())) => {
                if watchdog.take_expiry() {
                    warn!("LRF communication timeout");
                    if let Some(snapshot) = device.set_connected(false) {
                        send_event(&events, DeviceEvent::Lrf(snapshot))?;
                    }
                }
            }
            cmd = commands.recv() => {
                match cmd {
                    Some(command) => {
                        let frame = build_command(command);
                        if let Err(e) = link.send(&frame).await {
                            warn!("LRF command send failed: {e}");
                            send_event(&events, DeviceEvent::Fault {
                                device: DeviceKind::Lrf,
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

    fn ranging_frame(distance: u16) -> [u8; PACKET_SIZE] {
        let mut frame = [0u8; PACKET_SIZE];
        frame[0] = FRAME_HEADER;
        frame[1] = DEVICE_CODE;
        frame[2] = 0x0B;
        frame[3] = 0x00;
        frame[5] = (distance >> 8) as u8;
        frame[6] = (distance & 0xFF) as u8;
        frame[7] = 3;
        frame[8] = body_checksum(&frame);
        frame
    }

    #[test]
    fn ranging_reply_decodes_distance() {
        let mut parser = LrfParser::default();
        let messages = parser.parse(&ranging_frame(1500));
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            LrfMessage::Ranging {
                distance_m,
                is_valid,
                pulse_count,
                ..
            } => {
                assert_eq!(*distance_m, 1500);
                assert!(*is_valid);
                assert_eq!(*pulse_count, 3);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn parser_resyncs_past_garbage_and_keeps_trailing_bytes() {
        let mut parser = LrfParser::default();
        let mut stream = vec![0x00, 0xFF, 0x12];
        stream.extend_from_slice(&ranging_frame(250));
        // Half of the next frame arrives in the same chunk.
        stream.extend_from_slice(&ranging_frame(300)[..4]);

        let messages = parser.parse(&stream);
        assert_eq!(messages.len(), 1);

        // The rest of the second frame completes it.
        let messages = parser.parse(&ranging_frame(300)[4..]);
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            LrfMessage::Ranging { distance_m, .. } => assert_eq!(*distance_m, 300),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn bad_checksum_drops_frame() {
        let mut frame = ranging_frame(100);
        frame[8] ^= 0xA5;
        let mut parser = LrfParser::default();
        assert!(parser.parse(&frame).is_empty());
    }

    #[test]
    fn command_frames_carry_valid_checksum() {
        let frame = build_command(LrfCommand::QueryTemperature);
        assert_eq!(frame[0], FRAME_HEADER);
        assert_eq!(frame[2], 0x06);
        assert_eq!(frame[8], body_checksum(&frame));
    }

    #[test]
    fn merge_keeps_unrelated_fields() {
        let mut device = LrfDevice::default();
        device
            .merge(&LrfMessage::Temperature { temperature_c: 21 })
            .unwrap();
        let snapshot = device
            .merge(&LrfMessage::AccumulatedPulses { laser_count: 4200 })
            .unwrap();
        assert_eq!(snapshot.temperature_c, 21);
        assert_eq!(snapshot.laser_count, 4200);
        assert!(snapshot.is_connected);
    }

    #[test]
    fn duplicate_message_does_not_republish() {
        let mut device = LrfDevice::default();
        let msg = LrfMessage::Temperature { temperature_c: 21 };
        assert!(device.merge(&msg).is_some());
        assert!(device.merge(&msg).is_none());
    }

    #[test]
    fn negative_temperature_uses_sign_bit() {
        let mut frame = [0u8; PACKET_SIZE];
        frame[0] = FRAME_HEADER;
        frame[1] = DEVICE_CODE;
        frame[2] = 0x06;
        frame[4] = 0x85; // sign bit + 5
        frame[8] = body_checksum(&frame);
        let mut parser = LrfParser::default();
        match &parser.parse(&frame)[0] {
            LrfMessage::Temperature { temperature_c } => assert_eq!(*temperature_c, -5),
            other => panic!("unexpected message {other:?}"),
        }
    }
}
