//! Thermal night camera: 0x6E-prefixed variable-length frames with a
//! header CRC over the first six bytes and a full-packet CRC, both
//! CRC-16/XMODEM (poly 0x1021, init 0x0000).
//!
//! Packet layout: `6E <status> <rsvd> <fn> <count_hi> <count_lo>
//! <crc1_hi> <crc1_lo> <payload...> <crc2_hi> <crc2_lo>`.

use std::time::Duration;

use crossbeam_channel::Sender;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use rampart_comms::{LinkConfig, ProtocolParser, SerialLink, Watchdog};
use rampart_types::NightCameraData;

use crate::{send_event, DeviceEvent, DeviceKind, Result};

const SYNC: u8 = 0x6E;
const MIN_PACKET: usize = 10;

const FN_STATUS: u8 = 0x06;
const FN_DO_FFC: u8 = 0x0C;
const FN_VIDEO_MODE: u8 = 0x0F;
const FN_LUT: u8 = 0x10;
const FN_READ_TEMP: u8 = 0x20;
const FN_PAN_TILT: u8 = 0x70;

/// Widest HFOV of the thermal optic; digital zoom halves it per step.
const BASE_HFOV_DEG: f32 = 10.6;
/// LUT index ceiling (the palette table has 13 entries).
pub const MAX_LUT_INDEX: u8 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NightCameraCommand {
    QueryStatus,
    DoFfc,
    SetVideoMode(u8),
    SetLut(u8),
    ReadFpaTemperature,
    SetPanTilt { pan: i16, tilt: i16 },
    SetDigitalZoom(u8),
}

/// CRC-16/XMODEM.
pub fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0x0000;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Build one command packet with both CRCs.
pub fn build_command(command: NightCameraCommand) -> Vec<u8> {
    let (function, payload): (u8, Vec<u8>) = match command {
        NightCameraCommand::QueryStatus => (FN_STATUS, vec![]),
        NightCameraCommand::DoFfc => (FN_DO_FFC, vec![]),
        NightCameraCommand::SetVideoMode(mode) => (FN_VIDEO_MODE, vec![mode]),
        NightCameraCommand::SetLut(index) => (FN_LUT, vec![index.min(MAX_LUT_INDEX)]),
        NightCameraCommand::ReadFpaTemperature => (FN_READ_TEMP, vec![]),
        NightCameraCommand::SetPanTilt { pan, tilt } => {
            let mut data = Vec::with_capacity(4);
            data.extend_from_slice(&tilt.to_be_bytes());
            data.extend_from_slice(&pan.to_be_bytes());
            (FN_PAN_TILT, data)
        }
        NightCameraCommand::SetDigitalZoom(level) => (FN_VIDEO_MODE, vec![0x40 | level.min(3)]),
    };

    let mut packet = vec![SYNC, 0x00, 0x00, function];
    packet.push((payload.len() as u16 >> 8) as u8);
    packet.push((payload.len() & 0xFF) as u8);
    let crc1 = crc16_xmodem(&packet[..6]);
    packet.push((crc1 >> 8) as u8);
    packet.push((crc1 & 0xFF) as u8);
    packet.extend_from_slice(&payload);
    let crc2 = crc16_xmodem(&packet);
    packet.push((crc2 >> 8) as u8);
    packet.push((crc2 & 0xFF) as u8);
    packet
}

#[derive(Debug, Clone, PartialEq)]
pub enum NightCameraMessage {
    Status { camera_status: u8, error_state: u8 },
    FfcComplete,
    FpaTemperature { raw: i16 },
    PanTilt { pan: i16, tilt: i16 },
    Ack { function: u8 },
}

#[derive(Debug, Default)]
pub struct NightCameraParser {
    buffer: Vec<u8>,
}

impl ProtocolParser for NightCameraParser {
    type Msg = NightCameraMessage;

    fn parse(&mut self, raw: &[u8]) -> Vec<NightCameraMessage> {
        self.buffer.extend_from_slice(raw);
        let mut out = Vec::new();

        loop {
            if self.buffer.len() < MIN_PACKET {
                break;
            }
            if self.buffer[0] != SYNC {
                self.buffer.remove(0);
                continue;
            }
            let byte_count = ((self.buffer[4] as usize) << 8) | self.buffer[5] as usize;
            let total = 6 + 2 + byte_count + 2;
            if byte_count > 512 {
                // Absurd length: treat the sync byte as noise.
                self.buffer.remove(0);
                continue;
            }
            if self.buffer.len() < total {
                break;
            }
            if !verify_crcs(&self.buffer[..total]) {
                warn!("night camera CRC mismatch, resynchronising");
                self.buffer.remove(0);
                continue;
            }
            let packet: Vec<u8> = self.buffer.drain(..total).collect();
            if let Some(msg) = decode_packet(&packet, byte_count) {
                out.push(msg);
            }
        }
        out
    }
}

fn verify_crcs(packet: &[u8]) -> bool {
    let crc1 = ((packet[6] as u16) << 8) | packet[7] as u16;
    let crc2 = ((packet[packet.len() - 2] as u16) << 8) | packet[packet.len() - 1] as u16;
    crc16_xmodem(&packet[..6]) == crc1 && crc16_xmodem(&packet[..packet.len() - 2]) == crc2
}

fn decode_packet(packet: &[u8], byte_count: usize) -> Option<NightCameraMessage> {
    let error_state = packet[1];
    let function = packet[3];
    let payload = &packet[8..8 + byte_count];

    match function {
        FN_STATUS if !payload.is_empty() => Some(NightCameraMessage::Status {
            camera_status: payload[0],
            error_state,
        }),
        FN_DO_FFC => Some(NightCameraMessage::FfcComplete),
        FN_READ_TEMP if payload.len() >= 2 => Some(NightCameraMessage::FpaTemperature {
            raw: i16::from_be_bytes([payload[0], payload[1]]),
        }),
        FN_PAN_TILT if payload.len() >= 4 => Some(NightCameraMessage::PanTilt {
            tilt: i16::from_be_bytes([payload[0], payload[1]]),
            pan: i16::from_be_bytes([payload[2], payload[3]]),
        }),
        _ => Some(NightCameraMessage::Ack { function }),
    }
}

#[derive(Debug, Default)]
pub struct NightCameraDevice {
    snapshot: NightCameraData,
}

impl NightCameraDevice {
    pub fn snapshot(&self) -> NightCameraData {
        self.snapshot
    }

    pub fn merge(&mut self, msg: &NightCameraMessage) -> Option<NightCameraData> {
        let mut next = self.snapshot;
        next.is_connected = true;
        match msg {
            NightCameraMessage::Status {
                camera_status,
                error_state,
            } => {
                next.camera_status = *camera_status;
                next.error_state = *error_state;
            }
            NightCameraMessage::FfcComplete => {
                next.ffc_in_progress = false;
            }
            NightCameraMessage::FpaTemperature { raw } => {
                next.fpa_temperature_raw = *raw;
            }
            NightCameraMessage::PanTilt { pan, tilt } => {
                next.pan_position = *pan;
                next.tilt_position = *tilt;
            }
            NightCameraMessage::Ack { .. } => {}
        }
        self.publish(next)
    }

    /// Track a command we just issued: FFC latches the in-progress flag,
    /// LUT and digital zoom update the commanded values.
    pub fn note_command(&mut self, command: NightCameraCommand) -> Option<NightCameraData> {
        let mut next = self.snapshot;
        match command {
            NightCameraCommand::DoFfc => next.ffc_in_progress = true,
            NightCameraCommand::SetLut(index) => next.lut_index = index.min(MAX_LUT_INDEX),
            NightCameraCommand::SetDigitalZoom(level) => {
                let level = level.min(3);
                next.digital_zoom_level = level;
                next.current_hfov_deg = BASE_HFOV_DEG / (1 << level) as f32;
            }
            _ => return None,
        }
        self.publish(next)
    }

    pub fn set_connected(&mut self, connected: bool) -> Option<NightCameraData> {
        let mut next = self.snapshot;
        next.is_connected = connected;
        self.publish(next)
    }

    fn publish(&mut self, next: NightCameraData) -> Option<NightCameraData> {
        if next != self.snapshot {
            self.snapshot = next;
            Some(next)
        } else {
            None
        }
    }
}

pub async fn run(
    config: LinkConfig,
    mut commands: mpsc::Receiver<NightCameraCommand>,
    events: Sender<DeviceEvent>,
) -> Result<()> {
    let mut link = SerialLink::open(&config).await?;
    let mut parser = NightCameraParser::default();
    let mut device = NightCameraDevice {
        snapshot: NightCameraData {
            current_hfov_deg: BASE_HFOV_DEG,
            ..Default::default()
        },
    };
    let mut watchdog = Watchdog::new(Duration::from_millis(config.watchdog_ms));
    let mut status_tick =
        tokio::time::interval(Duration::from_millis(config.poll_interval_ms.max(500)));
    let mut poll_temp = false;

    debug!("night camera online on {}", config.port);

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
                            if let Some(snapshot) = device.merge(msg) {
                                send_event(&events, DeviceEvent::NightCamera(snapshot))?;
                            }
                        }
                    }
                    Ok(None) | Err(_) => {
                        if let Some(snapshot) = device.set_connected(false) {
                            send_event(&events, DeviceEvent::NightCamera(snapshot))?;
                        }
                        link.reconnect_with_backoff().await?;
                    }
                }
            }
            _ = status_tick.tick() => {
                let query = if poll_temp {
                    NightCameraCommand::ReadFpaTemperature
                } else {
                    NightCameraCommand::QueryStatus
                };
                poll_temp = !poll_temp;
                if let Err(e) = link.send(&build_command(query)).await {
                    warn!("night camera poll send failed: {e}");
                }
            }
            _ = tokio::time::sleep_until(tokio::time::Instant::from_std(watchdog.deadline())) => {
                if watchdog.take_expiry() {
                    warn!("night camera communication timeout");
                    if let Some(snapshot) = device.set_connected(false) {
                        send_event(&events, DeviceEvent::NightCamera(snapshot))?;
                    }
                }
            }
            cmd = commands.recv() => {
                match cmd {
                    Some(command) => {
                        if let Some(snapshot) = device.note_command(command) {
                            send_event(&events, DeviceEvent::NightCamera(snapshot))?;
                        }
                        if let Err(e) = link.send(&build_command(command)).await {
                            warn!("night camera command send failed: {e}");
                            send_event(&events, DeviceEvent::Fault {
                                device: DeviceKind::NightCamera,
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

    /// Build a reply the way the camera would: same framing as commands
    /// but with a status byte and payload.
    fn reply(function: u8, status: u8, payload: &[u8]) -> Vec<u8> {
        let mut packet = vec![SYNC, status, 0x00, function];
        packet.push((payload.len() as u16 >> 8) as u8);
        packet.push((payload.len() & 0xFF) as u8);
        let crc1 = crc16_xmodem(&packet[..6]);
        packet.push((crc1 >> 8) as u8);
        packet.push((crc1 & 0xFF) as u8);
        packet.extend_from_slice(payload);
        let crc2 = crc16_xmodem(&packet);
        packet.push((crc2 >> 8) as u8);
        packet.push((crc2 & 0xFF) as u8);
        packet
    }

    #[test]
    fn xmodem_crc_known_vector() {
        // "123456789" -> 0x31C3 is the canonical XMODEM check value.
        assert_eq!(crc16_xmodem(b"123456789"), 0x31C3);
    }

    #[test]
    fn status_reply_parses() {
        let mut parser = NightCameraParser::default();
        let messages = parser.parse(&reply(FN_STATUS, 0x00, &[0x07]));
        assert_eq!(
            messages,
            vec![NightCameraMessage::Status {
                camera_status: 0x07,
                error_state: 0x00
            }]
        );
    }

    #[test]
    fn ffc_reply_clears_in_progress() {
        let mut device = NightCameraDevice::default();
        device.note_command(NightCameraCommand::DoFfc);
        assert!(device.snapshot().ffc_in_progress);
        let snapshot = device.merge(&NightCameraMessage::FfcComplete).unwrap();
        assert!(!snapshot.ffc_in_progress);
    }

    #[test]
    fn lut_index_clamps_to_twelve() {
        let mut device = NightCameraDevice::default();
        let snapshot = device
            .note_command(NightCameraCommand::SetLut(200))
            .unwrap();
        assert_eq!(snapshot.lut_index, MAX_LUT_INDEX);

        let frame = build_command(NightCameraCommand::SetLut(99));
        // Payload byte carries the clamped index.
        assert_eq!(frame[8], MAX_LUT_INDEX);
    }

    #[test]
    fn fpa_temperature_is_signed_big_endian() {
        let mut parser = NightCameraParser::default();
        let messages = parser.parse(&reply(FN_READ_TEMP, 0, &[0xFF, 0x38]));
        assert_eq!(
            messages,
            vec![NightCameraMessage::FpaTemperature { raw: -200 }]
        );
    }

    #[test]
    fn corrupted_packet_is_dropped_and_stream_recovers() {
        let mut bad = reply(FN_STATUS, 0, &[1]);
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        let good = reply(FN_READ_TEMP, 0, &[0x01, 0x2C]);

        let mut parser = NightCameraParser::default();
        let mut stream = bad;
        stream.extend_from_slice(&good);
        let messages = parser.parse(&stream);
        assert_eq!(messages, vec![NightCameraMessage::FpaTemperature { raw: 300 }]);
    }

    #[test]
    fn digital_zoom_narrows_hfov() {
        let mut device = NightCameraDevice::default();
        let snapshot = device
            .note_command(NightCameraCommand::SetDigitalZoom(2))
            .unwrap();
        assert_eq!(snapshot.digital_zoom_level, 2);
        approx::assert_relative_eq!(snapshot.current_hfov_deg, BASE_HFOV_DEG / 4.0);
    }
}
