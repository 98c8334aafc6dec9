//! Linear charging actuator: line-oriented ASCII terminated by CR.
//!
//! Each command is followed by a space and a two-hex-digit checksum
//! (byte sum of the command plus the trailing space, mod 256). Replies
//! are `A <data> <cs>` for ACK and `N <detail> <cs>` for NACK. Replies
//! carry no echo of the command, so the parser routes data by the
//! command currently pending in the gate.

use std::time::Duration;

use crossbeam_channel::Sender;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use rampart_comms::{CommandGate, LinkConfig, ProtocolParser, SerialLink, Watchdog};
use rampart_types::{ActuatorStatus, ServoActuatorData};

use crate::merge::fuzzy_eq_f64;
use crate::{send_event, DeviceEvent, DeviceKind, Result};

/// Sensor counts per millimetre of stroke.
const COUNTS_PER_MM: f64 = 1000.0;
/// Sensor counts per mm/s of velocity.
const COUNTS_PER_MM_S: f64 = 1000.0;
/// Torque telemetry full scale.
const COUNTS_PER_TORQUE_PERCENT: f64 = 32.0;

/// Commanded position counts as "reached" within this tolerance.
const POSITION_REACHED_TOLERANCE: f64 = 50.0;

const COMMAND_TIMEOUT: Duration = Duration::from_millis(1000);
const INTER_COMMAND_DELAY: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, PartialEq)]
pub enum ActuatorCommand {
    /// Absolute move in sensor counts.
    MoveTo(i64),
    Stop,
    QueryStatus,
    QueryPosition,
    QueryVelocity,
    QueryTorque,
    QueryTemperature,
    QueryBusVoltage,
}

impl ActuatorCommand {
    /// The wire command text, without checksum.
    pub fn text(&self) -> String {
        match self {
            ActuatorCommand::MoveTo(counts) => format!("MA {counts}"),
            ActuatorCommand::Stop => "ST".to_string(),
            ActuatorCommand::QueryStatus => "SR".to_string(),
            ActuatorCommand::QueryPosition => "AP".to_string(),
            ActuatorCommand::QueryVelocity => "VL".to_string(),
            ActuatorCommand::QueryTorque => "TQ".to_string(),
            ActuatorCommand::QueryTemperature => "RT1".to_string(),
            ActuatorCommand::QueryBusVoltage => "BV".to_string(),
        }
    }
}

/// Checksum of `text + " "`, rendered as two uppercase hex digits.
pub fn checksum(text_with_space: &str) -> String {
    let sum: u16 = text_with_space.bytes().map(|b| b as u16).sum();
    format!("{:02X}", (sum % 256) as u8)
}

/// Full wire line for one command, CR-terminated.
pub fn build_command(command: &ActuatorCommand) -> Vec<u8> {
    let body = format!("{} ", command.text());
    format!("{}{}\r", body, checksum(&body)).into_bytes()
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActuatorMessage {
    Ack { command: String, data: String },
    Nack { command: String, detail: String },
}

/// Line splitter and checksum validator. Routing of ACK data happens in
/// the device, which knows the pending command.
#[derive(Debug, Default)]
pub struct ActuatorParser {
    buffer: Vec<u8>,
    pending_command: String,
}

impl ActuatorParser {
    pub fn set_pending_command(&mut self, command: &str) {
        self.pending_command = command.to_string();
    }
}

impl ProtocolParser for ActuatorParser {
    type Msg = ActuatorMessage;

    fn parse(&mut self, raw: &[u8]) -> Vec<ActuatorMessage> {
        self.buffer.extend_from_slice(raw);
        let mut out = Vec::new();

        while let Some(end) = self.buffer.iter().position(|&b| b == b'\r') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1])
                .trim()
                .to_string();
            if line.is_empty() {
                continue;
            }

            let Some(space) = line.rfind(' ') else {
                warn!("actuator reply without checksum: {line:?}");
                continue;
            };
            let (main, received_cs) = line.split_at(space);
            let received_cs = received_cs.trim_start();
            let expected = checksum(&format!("{main} "));
            if !received_cs.eq_ignore_ascii_case(&expected) {
                warn!("actuator checksum mismatch on {line:?}");
                continue;
            }

            if let Some(rest) = main.strip_prefix('A') {
                out.push(ActuatorMessage::Ack {
                    command: self.pending_command.clone(),
                    data: rest.trim().to_string(),
                });
            } else if main.starts_with('N') {
                out.push(ActuatorMessage::Nack {
                    command: self.pending_command.clone(),
                    detail: main.to_string(),
                });
            } else {
                warn!("actuator unrecognised reply: {line:?}");
            }
        }
        out
    }
}

/// Decode the hex status-register bitfield.
pub fn parse_status_register(hex: &str) -> ActuatorStatus {
    let mut status = ActuatorStatus::default();
    let Ok(value) = u32::from_str_radix(hex.trim(), 16) else {
        status
            .active_status_messages
            .push("Invalid Hex Status Received".to_string());
        return status;
    };
    for bit in 0..32 {
        if (value >> bit) & 1 == 0 {
            continue;
        }
        let message = status_bit_message(bit);
        if message.contains("(Latching)") {
            status.is_latching_fault_active = true;
            if bit == 3 || bit == 31 {
                status.is_motor_off = true;
            }
        }
        status.active_status_messages.push(message);
    }
    status
}

fn status_bit_message(bit: u32) -> String {
    match bit {
        0 => "Drive Ready".to_string(),
        1 => "Motion In Progress".to_string(),
        2 => "In Position".to_string(),
        3 => "Emergency Shutdown MOTOR OFF (Latching)".to_string(),
        4 => "Over Temperature (Latching)".to_string(),
        5 => "Bus Overvoltage (Latching)".to_string(),
        6 => "Following Error (Latching)".to_string(),
        7 => "Limit Switch Active".to_string(),
        31 => "Configuration Error MOTOR OFF (Latching)".to_string(),
        other => format!("Unknown Bit {other}"),
    }
}

#[derive(Debug, Default)]
pub struct ActuatorDevice {
    snapshot: ServoActuatorData,
    move_target_counts: Option<i64>,
}

impl ActuatorDevice {
    pub fn snapshot(&self) -> ServoActuatorData {
        self.snapshot.clone()
    }

    pub fn note_move_target(&mut self, counts: i64) {
        self.move_target_counts = Some(counts);
    }

    /// Merge an ACK's data by the command it answered. Returns the new
    /// snapshot (when changed) and whether the pending move completed.
    pub fn merge_ack(&mut self, command: &str, data: &str) -> (Option<ServoActuatorData>, bool) {
        let mut next = self.snapshot.clone();
        next.is_connected = true;
        let mut reached = false;

        match command {
            "SR" => {
                next.status = parse_status_register(data);
            }
            "AP" => {
                if let Ok(counts) = data.trim().parse::<i64>() {
                    next.position_mm = counts as f64 / COUNTS_PER_MM;
                    if let Some(target) = self.move_target_counts {
                        if (counts - target).abs() as f64 <= POSITION_REACHED_TOLERANCE {
                            self.move_target_counts = None;
                            reached = true;
                        }
                    }
                }
            }
            "VL" => {
                if let Ok(counts) = data.trim().parse::<i64>() {
                    next.velocity_mm_s = counts as f64 / COUNTS_PER_MM_S;
                }
            }
            "TQ" => {
                if let Ok(counts) = data.trim().parse::<i64>() {
                    next.torque_percent = counts as f64 / COUNTS_PER_TORQUE_PERCENT;
                }
            }
            "RT1" => {
                if let Ok(celsius) = data.trim().parse::<f64>() {
                    next.temperature_c = celsius;
                }
            }
            "BV" => {
                if let Ok(millivolts) = data.trim().parse::<f64>() {
                    next.bus_voltage_v = millivolts / 1000.0;
                }
            }
            _ => {}
        }

        (self.publish(next), reached)
    }

    pub fn set_connected(&mut self, connected: bool) -> Option<ServoActuatorData> {
        let mut next = self.snapshot.clone();
        next.is_connected = connected;
        self.publish(next)
    }

    fn publish(&mut self, next: ServoActuatorData) -> Option<ServoActuatorData> {
        if !snapshot_eq(&next, &self.snapshot) {
            self.snapshot = next;
            Some(self.snapshot.clone())
        } else {
            None
        }
    }
}

/// Field-wise compare with the +1.0 fuzzy float rule.
fn snapshot_eq(a: &ServoActuatorData, b: &ServoActuatorData) -> bool {
    a.is_connected == b.is_connected
        && fuzzy_eq_f64(a.position_mm, b.position_mm)
        && fuzzy_eq_f64(a.velocity_mm_s, b.velocity_mm_s)
        && fuzzy_eq_f64(a.torque_percent, b.torque_percent)
        && fuzzy_eq_f64(a.temperature_c, b.temperature_c)
        && fuzzy_eq_f64(a.bus_voltage_v, b.bus_voltage_v)
        && a.status == b.status
}

pub async fn run(
    config: LinkConfig,
    mut commands: mpsc::Receiver<ActuatorCommand>,
    events: Sender<DeviceEvent>,
) -> Result<()> {
    let mut link = SerialLink::open(&config).await?;
    let mut parser = ActuatorParser::default();
    let mut device = ActuatorDevice::default();
    let mut gate = CommandGate::new(COMMAND_TIMEOUT, INTER_COMMAND_DELAY);
    let mut watchdog = Watchdog::new(Duration::from_millis(config.watchdog_ms));
    let mut status_tick =
        tokio::time::interval(Duration::from_millis(config.poll_interval_ms.max(200)));

    debug!("servo actuator online on {}", config.port);

    loop {
        // The gate may have a command ready (post-delay dispatch).
        if let Some(text) = gate.try_dispatch(std::time::Instant::now()) {
            parser.set_pending_command(&text);
            let body = format!("{text} ");
            let line = format!("{}{}\r", body, checksum(&body));
            if let Err(e) = link.send(line.as_bytes()).await {
                warn!("actuator send failed: {e}");
            }
        }

        let gate_deadline = gate
            .next_deadline()
            .unwrap_or_else(|| std::time::Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            chunk = link.recv() => {
                match chunk {
                    Ok(Some(bytes)) => {
                        let messages = parser.parse(&bytes);
                        if !messages.is_empty() {
                            watchdog.rearm();
                        }
                        for msg in messages {
                            match msg {
                                ActuatorMessage::Ack { command, data } => {
                                    gate.complete();
                                    parser.set_pending_command("");
                                    let (snapshot, reached) = device.merge_ack(&command, &data);
                                    if let Some(snapshot) = snapshot {
                                        let motor_off = snapshot.status.is_motor_off;
                                        send_event(&events, DeviceEvent::Actuator(snapshot))?;
                                        if motor_off {
                                            send_event(&events, DeviceEvent::Fault {
                                                device: DeviceKind::ServoActuator,
                                                message: "actuator latching fault, motor off".to_string(),
                                            })?;
                                        }
                                    }
                                    if reached {
                                        send_event(&events, DeviceEvent::ActuatorPositionReached)?;
                                    }
                                }
                                ActuatorMessage::Nack { command, detail } => {
                                    gate.complete();
                                    parser.set_pending_command("");
                                    warn!("actuator rejected {command:?}: {detail}");
                                    send_event(&events, DeviceEvent::Fault {
                                        device: DeviceKind::ServoActuator,
                                        message: format!("command {command:?} rejected: {detail}"),
                                    })?;
                                }
                            }
                        }
                    }
                    Ok(None) | Err(_) => {
                        if let Some(snapshot) = device.set_connected(false) {
                            send_event(&events, DeviceEvent::Actuator(snapshot))?;
                        }
                        gate.clear();
                        parser.set_pending_command("");
                        link.reconnect_with_backoff().await?;
                    }
                }
            }
            _ = status_tick.tick() => {
                // Background telemetry: status and position keep the
                // watchdog fed and the load sequences informed.
                gate.submit(ActuatorCommand::QueryStatus.text());
                gate.submit(ActuatorCommand::QueryPosition.text());
            }
            _ = tokio::time::sleep_until(tokio::time::Instant::from_std(gate_deadline)) => {
                if let Some(timed_out) = gate.check_timeout(std::time::Instant::now()) {
                    warn!("actuator command {timed_out:?} timed out");
                    parser.set_pending_command("");
                    send_event(&events, DeviceEvent::Fault {
                        device: DeviceKind::ServoActuator,
                        message: format!("timeout on command: {timed_out}"),
                    })?;
                }
            }
            _ = tokio::time::sleep_until(tokio::time::Instant::from_std(watchdog.deadline())) => {
                if watchdog.take_expiry() {
                    warn!("actuator communication timeout");
                    if let Some(snapshot) = device.set_connected(false) {
                        send_event(&events, DeviceEvent::Actuator(snapshot))?;
                    }
                }
            }
            cmd = commands.recv() => {
                match cmd {
                    Some(command) => {
                        if let ActuatorCommand::MoveTo(counts) = &command {
                            device.note_move_target(*counts);
                        }
                        gate.submit(command.text());
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

    fn reply_line(main: &str) -> Vec<u8> {
        let body = format!("{main} ");
        format!("{}{}\r", body, checksum(&body)).into_bytes()
    }

    #[test]
    fn command_line_has_trailing_checksum_and_cr() {
        let line = build_command(&ActuatorCommand::QueryStatus);
        let text = String::from_utf8(line).unwrap();
        assert!(text.ends_with('\r'));
        assert!(text.starts_with("SR "));
        // "SR " sums to 0x53 + 0x52 + 0x20 = 0xC5.
        assert_eq!(text.trim_end(), "SR C5");
    }

    #[test]
    fn ack_routes_by_pending_command() {
        let mut parser = ActuatorParser::default();
        parser.set_pending_command("AP");
        let messages = parser.parse(&reply_line("A 63000"));
        assert_eq!(
            messages,
            vec![ActuatorMessage::Ack {
                command: "AP".to_string(),
                data: "63000".to_string()
            }]
        );
    }

    #[test]
    fn bad_checksum_is_dropped() {
        let mut parser = ActuatorParser::default();
        parser.set_pending_command("AP");
        assert!(parser.parse(b"A 63000 00\r").is_empty());
    }

    #[test]
    fn position_merge_and_reached_detection() {
        let mut device = ActuatorDevice::default();
        device.note_move_target(63000);

        let (snapshot, reached) = device.merge_ack("AP", "30000");
        assert!(!reached);
        assert_eq!(snapshot.unwrap().position_mm, 30.0);

        let (snapshot, reached) = device.merge_ack("AP", "62990");
        assert!(reached);
        assert_eq!(snapshot.unwrap().position_mm, 62.99);
    }

    #[test]
    fn status_register_flags_latching_faults() {
        // Bit 3 set: emergency shutdown.
        let status = parse_status_register("8");
        assert!(status.is_latching_fault_active);
        assert!(status.is_motor_off);

        // Bits 0 and 2: healthy.
        let status = parse_status_register("5");
        assert!(!status.is_latching_fault_active);
        assert!(!status.is_motor_off);
        assert_eq!(status.active_status_messages.len(), 2);
    }

    #[test]
    fn invalid_status_hex_is_reported_not_panicked() {
        let status = parse_status_register("zz");
        assert_eq!(
            status.active_status_messages,
            vec!["Invalid Hex Status Received".to_string()]
        );
    }

    #[test]
    fn nack_carries_detail() {
        let mut parser = ActuatorParser::default();
        parser.set_pending_command("MA 63000");
        let messages = parser.parse(&reply_line("N 02"));
        match &messages[0] {
            ActuatorMessage::Nack { command, detail } => {
                assert_eq!(command, "MA 63000");
                assert_eq!(detail, "N 02");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
