//! Operator joystick via gilrs, pumped on a dedicated blocking thread.
//!
//! Raw stick values carry a dead zone equivalent to 3000 counts of the
//! 16-bit range; outside it the value is re-normalised to [-1, 1] so a
//! deflection just past the dead zone starts at zero. The D-pad is
//! mapped onto the classic hat bitmap (up=1, right=2, down=4, left=8).

use std::time::Duration;

use crossbeam_channel::Sender;
use gilrs::{Axis, Button, Event, EventType, Gilrs};
use tracing::{debug, info, warn};

use rampart_types::JoystickInput;

use crate::{send_event, DeviceEvent, Error, Result};

/// Dead zone as a fraction of full deflection (3000 / 32767).
const DEADZONE: f32 = 3000.0 / 32767.0;

pub const HAT_UP: u8 = 1;
pub const HAT_RIGHT: u8 = 2;
pub const HAT_DOWN: u8 = 4;
pub const HAT_LEFT: u8 = 8;

/// Apply the dead zone and rescale so output spans the full [-1, 1].
pub fn apply_deadzone(value: f32) -> f32 {
    let magnitude = value.abs();
    if magnitude < DEADZONE {
        return 0.0;
    }
    let rescaled = (magnitude - DEADZONE) / (1.0 - DEADZONE);
    rescaled.min(1.0) * value.signum()
}

fn axis_index(axis: Axis) -> Option<u8> {
    match axis {
        Axis::LeftStickX => Some(0),
        Axis::LeftStickY => Some(1),
        Axis::RightStickX => Some(2),
        Axis::RightStickY => Some(3),
        Axis::LeftZ => Some(4),
        Axis::RightZ => Some(5),
        _ => None,
    }
}

fn button_index(button: Button) -> Option<u8> {
    match button {
        Button::South => Some(0),
        Button::East => Some(1),
        Button::West => Some(2),
        Button::North => Some(3),
        Button::LeftTrigger => Some(4),
        Button::RightTrigger => Some(5),
        Button::LeftTrigger2 => Some(6),
        Button::RightTrigger2 => Some(7),
        Button::Select => Some(8),
        Button::Start => Some(9),
        Button::LeftThumb => Some(10),
        Button::RightThumb => Some(11),
        _ => None,
    }
}

fn hat_bit(button: Button) -> Option<u8> {
    match button {
        Button::DPadUp => Some(HAT_UP),
        Button::DPadRight => Some(HAT_RIGHT),
        Button::DPadDown => Some(HAT_DOWN),
        Button::DPadLeft => Some(HAT_LEFT),
        _ => None,
    }
}

/// Blocking event pump. Exits when the event channel closes.
///
/// When `target_uuid` is configured, events from other controllers are
/// ignored.
pub fn run(target_uuid: Option<String>, events: Sender<DeviceEvent>) -> Result<()> {
    let mut gilrs = Gilrs::new().map_err(|e| Error::Joystick(e.to_string()))?;
    let mut hat_state: u8 = 0;
    let mut active_pad: Option<gilrs::GamepadId> = None;

    for (id, pad) in gilrs.gamepads() {
        debug!("gamepad found: {} ({})", pad.name(), uuid_string(&pad));
        if matches(&target_uuid, &pad) && active_pad.is_none() {
            info!("joystick selected: {}", pad.name());
            active_pad = Some(id);
            send_event(
                &events,
                DeviceEvent::Joystick(JoystickInput::Connected {
                    name: pad.name().to_string(),
                }),
            )?;
        }
    }

    loop {
        let Some(Event { id, event, .. }) = gilrs.next_event_blocking(Some(Duration::from_millis(200)))
        else {
            continue;
        };

        match event {
            EventType::Connected => {
                let pad = gilrs.gamepad(id);
                if matches(&target_uuid, &pad) && active_pad.is_none() {
                    info!("joystick connected: {}", pad.name());
                    active_pad = Some(id);
                    send_event(
                        &events,
                        DeviceEvent::Joystick(JoystickInput::Connected {
                            name: pad.name().to_string(),
                        }),
                    )?;
                }
            }
            EventType::Disconnected => {
                if active_pad == Some(id) {
                    warn!("joystick disconnected");
                    active_pad = None;
                    send_event(&events, DeviceEvent::Joystick(JoystickInput::Disconnected))?;
                }
            }
            _ if active_pad != Some(id) => {}
            EventType::AxisChanged(axis, value, _) => {
                if let Some(index) = axis_index(axis) {
                    send_event(
                        &events,
                        DeviceEvent::Joystick(JoystickInput::Axis {
                            axis: index,
                            value: apply_deadzone(value),
                        }),
                    )?;
                }
            }
            EventType::ButtonPressed(button, _) | EventType::ButtonReleased(button, _) => {
                let pressed = matches!(event, EventType::ButtonPressed(..));
                if let Some(bit) = hat_bit(button) {
                    if pressed {
                        hat_state |= bit;
                    } else {
                        hat_state &= !bit;
                    }
                    send_event(
                        &events,
                        DeviceEvent::Joystick(JoystickInput::Hat {
                            hat: 0,
                            value: hat_state,
                        }),
                    )?;
                } else if let Some(index) = button_index(button) {
                    send_event(
                        &events,
                        DeviceEvent::Joystick(JoystickInput::Button {
                            button: index,
                            pressed,
                        }),
                    )?;
                }
            }
            _ => {}
        }
    }
}

fn uuid_string(pad: &gilrs::Gamepad<'_>) -> String {
    pad.uuid()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
}

fn matches(target: &Option<String>, pad: &gilrs::Gamepad<'_>) -> bool {
    match target {
        Some(uuid) => uuid.eq_ignore_ascii_case(&uuid_string(pad)),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn deadzone_zeroes_small_deflections() {
        assert_eq!(apply_deadzone(0.05), 0.0);
        assert_eq!(apply_deadzone(-0.09), 0.0);
    }

    #[test]
    fn deadzone_edge_starts_at_zero_and_reaches_full_scale() {
        let just_past = apply_deadzone(DEADZONE + 0.001);
        assert!(just_past > 0.0 && just_past < 0.01);
        assert_relative_eq!(apply_deadzone(1.0), 1.0);
        assert_relative_eq!(apply_deadzone(-1.0), -1.0);
    }

    #[test]
    fn hat_bits_match_the_classic_bitmap() {
        assert_eq!(hat_bit(Button::DPadUp), Some(1));
        assert_eq!(hat_bit(Button::DPadRight), Some(2));
        assert_eq!(hat_bit(Button::DPadDown), Some(4));
        assert_eq!(hat_bit(Button::DPadLeft), Some(8));
        assert_eq!(hat_bit(Button::South), None);
    }
}
