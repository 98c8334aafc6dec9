//! Day camera control over Pelco-D: 7-byte frames at 9600 8-N-1 with a
//! modulo-256 checksum over bytes 1..5.
//!
//! The camera reports zoom position (response 0xA7) and focus position
//! (response 0x63); HFOV is interpolated from the zoom position.

use std::time::Duration;

use crossbeam_channel::Sender;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use rampart_comms::{LinkConfig, ProtocolParser, SerialLink, Watchdog};
use rampart_types::DayCameraData;

use crate::{send_event, DeviceEvent, DeviceKind, Result};

const SYNC: u8 = 0xFF;
const CAMERA_ADDRESS: u8 = 0x01;
const FRAME_SIZE: usize = 7;

const ZOOM_RESPONSE: u8 = 0xA7;
const FOCUS_RESPONSE: u8 = 0x63;

const MAX_ZOOM: u16 = 0x4000;
const WIDE_HFOV_DEG: f32 = 63.7;
const TELE_HFOV_DEG: f32 = 2.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayCameraCommand {
    ZoomIn,
    ZoomOut,
    ZoomStop,
    SetZoomPosition(u16),
    FocusNear,
    FocusFar,
    FocusStop,
    SetAutoFocus(bool),
    SetFocusPosition(u16),
    QueryZoomPosition,
    QueryFocusPosition,
}

/// Build one Pelco-D frame for this command.
pub fn build_command(command: DayCameraCommand) -> [u8; FRAME_SIZE] {
    let (cmd1, cmd2, data1, data2) = match command {
        DayCameraCommand::ZoomIn => (0x00, 0x20, 0, 0),
        DayCameraCommand::ZoomOut => (0x00, 0x40, 0, 0),
        DayCameraCommand::ZoomStop => (0x00, 0x00, 0, 0),
        DayCameraCommand::SetZoomPosition(p) => {
            (0x00, ZOOM_RESPONSE, (p >> 8) as u8, (p & 0xFF) as u8)
        }
        DayCameraCommand::FocusNear => (0x01, 0x00, 0, 0),
        DayCameraCommand::FocusFar => (0x00, 0x02, 0, 0),
        DayCameraCommand::FocusStop => (0x00, 0x00, 0, 0),
        DayCameraCommand::SetAutoFocus(enabled) => {
            (0x01, if enabled { 0x63 } else { 0x64 }, 0, 0)
        }
        DayCameraCommand::SetFocusPosition(p) => {
            (0x00, FOCUS_RESPONSE, (p >> 8) as u8, (p & 0xFF) as u8)
        }
        DayCameraCommand::QueryZoomPosition => (0x00, ZOOM_RESPONSE, 0, 0),
        DayCameraCommand::QueryFocusPosition => (0x00, FOCUS_RESPONSE, 0, 0),
    };
    let checksum = (CAMERA_ADDRESS as u16 + cmd1 as u16 + cmd2 as u16 + data1 as u16 + data2 as u16)
        as u8;
    [SYNC, CAMERA_ADDRESS, cmd1, cmd2, data1, data2, checksum]
}

/// HFOV from zoom position: linear wide-to-tele over the zoom travel.
pub fn hfov_from_zoom(zoom_position: u16) -> f32 {
    let fraction = (zoom_position as f32 / MAX_ZOOM as f32).min(1.0);
    WIDE_HFOV_DEG - (WIDE_HFOV_DEG - TELE_HFOV_DEG) * fraction
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DayCameraMessage {
    ZoomPosition { position: u16, hfov_deg: f32 },
    FocusPosition { position: u16 },
}

#[derive(Debug, Default)]
pub struct DayCameraParser {
    buffer: Vec<u8>,
}

impl ProtocolParser for DayCameraParser {
    type Msg = DayCameraMessage;

    fn parse(&mut self, raw: &[u8]) -> Vec<DayCameraMessage> {
        self.buffer.extend_from_slice(raw);
        let mut out = Vec::new();

        while self.buffer.len() >= FRAME_SIZE {
            if self.buffer[0] != SYNC {
                self.buffer.remove(0);
                continue;
            }
            let sum = (self.buffer[1] as u16
                + self.buffer[2] as u16
                + self.buffer[3] as u16
                + self.buffer[4] as u16
                + self.buffer[5] as u16) as u8;
            if self.buffer[6] != sum {
                warn!("day camera checksum mismatch, resynchronising");
                self.buffer.remove(0);
                continue;
            }
            let frame: Vec<u8> = self.buffer.drain(..FRAME_SIZE).collect();
            let data = ((frame[4] as u16) << 8) | frame[5] as u16;
            match frame[3] {
                ZOOM_RESPONSE => out.push(DayCameraMessage::ZoomPosition {
                    position: data,
                    hfov_deg: hfov_from_zoom(data),
                }),
                FOCUS_RESPONSE => out.push(DayCameraMessage::FocusPosition { position: data }),
                other => debug!("day camera unhandled response 0x{other:02x}"),
            }
        }
        out
    }
}

#[derive(Debug, Default)]
pub struct DayCameraDevice {
    snapshot: DayCameraData,
}

impl DayCameraDevice {
    pub fn snapshot(&self) -> DayCameraData {
        self.snapshot
    }

    pub fn merge(&mut self, msg: &DayCameraMessage) -> Option<DayCameraData> {
        let mut next = self.snapshot;
        next.is_connected = true;
        match msg {
            DayCameraMessage::ZoomPosition { position, hfov_deg } => {
                next.zoom_position = *position;
                next.current_hfov_deg = *hfov_deg;
            }
            DayCameraMessage::FocusPosition { position } => {
                next.focus_position = *position;
            }
        }
        self.publish(next)
    }

    pub fn set_connected(&mut self, connected: bool) -> Option<DayCameraData> {
        let mut next = self.snapshot;
        next.is_connected = connected;
        self.publish(next)
    }

    fn publish(&mut self, next: DayCameraData) -> Option<DayCameraData> {
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
    mut commands: mpsc::Receiver<DayCameraCommand>,
    events: Sender<DeviceEvent>,
) -> Result<()> {
    let mut link = SerialLink::open(&config).await?;
    let mut parser = DayCameraParser::default();
    let mut device = DayCameraDevice::default();
    let mut watchdog = Watchdog::new(Duration::from_millis(config.watchdog_ms));
    let mut poll_tick =
        tokio::time::interval(Duration::from_millis(config.poll_interval_ms.max(100)));
    let mut poll_focus = false;

    debug!("day camera online on {}", config.port);

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
                                send_event(&events, DeviceEvent::DayCamera(snapshot))?;
                            }
                        }
                    }
                    Ok(None) | Err(_) => {
                        if let Some(snapshot) = device.set_connected(false) {
                            send_event(&events, DeviceEvent::DayCamera(snapshot))?;
                        }
                        link.reconnect_with_backoff().await?;
                    }
                }
            }
            _ = poll_tick.tick() => {
                // Alternate zoom and focus position reads.
                let query = if poll_focus {
                    DayCameraCommand::QueryFocusPosition
                } else {
                    DayCameraCommand::QueryZoomPosition
                };
                poll_focus = !poll_focus;
                if let Err(e) = link.send(&build_command(query)).await {
                    warn!("day camera poll send failed: {e}");
                }
            }
            _ = tokio::time::sleep_until(tokio::time::Instant::from_std(watchdog.deadline())) => {
                if watchdog.take_expiry() {
                    warn!("day camera communication timeout");
                    if let Some(snapshot) = device.set_connected(false) {
                        send_event(&events, DeviceEvent::DayCamera(snapshot))?;
                    }
                }
            }
            cmd = commands.recv() => {
                match cmd {
                    Some(command) => {
                        if let Err(e) = link.send(&build_command(command)).await {
                            warn!("day camera command send failed: {e}");
                            send_event(&events, DeviceEvent::Fault {
                                device: DeviceKind::DayCamera,
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
    use approx::assert_relative_eq;

    fn zoom_reply(position: u16) -> [u8; FRAME_SIZE] {
        let d1 = (position >> 8) as u8;
        let d2 = (position & 0xFF) as u8;
        let cs = (CAMERA_ADDRESS as u16 + ZOOM_RESPONSE as u16 + d1 as u16 + d2 as u16) as u8;
        [SYNC, CAMERA_ADDRESS, 0x00, ZOOM_RESPONSE, d1, d2, cs]
    }

    #[test]
    fn hfov_endpoints() {
        assert_relative_eq!(hfov_from_zoom(0), 63.7);
        assert_relative_eq!(hfov_from_zoom(MAX_ZOOM), 2.3);
        // Midpoint is halfway between wide and tele.
        assert_relative_eq!(hfov_from_zoom(MAX_ZOOM / 2), 33.0, epsilon = 0.01);
    }

    #[test]
    fn zoom_reply_parses_and_merges() {
        let mut parser = DayCameraParser::default();
        let mut device = DayCameraDevice::default();
        let messages = parser.parse(&zoom_reply(0x2000));
        assert_eq!(messages.len(), 1);
        let snapshot = device.merge(&messages[0]).unwrap();
        assert_eq!(snapshot.zoom_position, 0x2000);
        assert!(snapshot.is_connected);
        assert_relative_eq!(snapshot.current_hfov_deg, 33.0, epsilon = 0.01);
    }

    #[test]
    fn checksum_failure_drops_frame() {
        let mut frame = zoom_reply(100);
        frame[6] ^= 1;
        let mut parser = DayCameraParser::default();
        assert!(parser.parse(&frame).is_empty());
    }

    #[test]
    fn command_checksum_is_sum_of_payload() {
        let frame = build_command(DayCameraCommand::ZoomIn);
        assert_eq!(frame[0], SYNC);
        let sum = (frame[1] as u16 + frame[2] as u16 + frame[3] as u16
            + frame[4] as u16
            + frame[5] as u16) as u8;
        assert_eq!(frame[6], sum);
    }

    #[test]
    fn partial_frames_buffer_across_chunks() {
        let mut parser = DayCameraParser::default();
        let frame = zoom_reply(0x1234);
        assert!(parser.parse(&frame[..3]).is_empty());
        let messages = parser.parse(&frame[3..]);
        assert_eq!(messages.len(), 1);
    }
}
