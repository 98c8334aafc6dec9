use std::fmt;

use crate::state::SystemState;

/// A user-visible alarm condition, latched into the status overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alarm {
    EmergencyStopActive,
    AzimuthServoFault,
    ElevationServoFault,
    LrfFault,
    LrfOverTemperature,
    StationDisabled,
    DayCameraOffline,
    NightCameraOffline,
    ImuOffline,
    Plc21Offline,
    Plc42Offline,
    ActuatorOffline,
}

impl fmt::Display for Alarm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Alarm::EmergencyStopActive => "\u{26a0} EMERGENCY STOP ACTIVE",
            Alarm::AzimuthServoFault => "\u{26a0} Azimuth Servo Fault",
            Alarm::ElevationServoFault => "\u{26a0} Elevation Servo Fault",
            Alarm::LrfFault => "\u{26a0} LRF Hardware Fault",
            Alarm::LrfOverTemperature => "\u{26a0} LRF Over Temperature",
            Alarm::StationDisabled => "\u{2139} Station Disabled",
            Alarm::DayCameraOffline => "\u{26a0} Day Camera Offline",
            Alarm::NightCameraOffline => "\u{26a0} Night Camera Offline",
            Alarm::ImuOffline => "\u{26a0} IMU Offline",
            Alarm::Plc21Offline => "\u{26a0} Panel PLC Offline",
            Alarm::Plc42Offline => "\u{26a0} Station PLC Offline",
            Alarm::ActuatorOffline => "\u{26a0} Charging Actuator Offline",
        };
        f.write_str(text)
    }
}

/// The text shown when nothing is wrong.
pub const ALL_NOMINAL: &str = "\u{2713} All Systems Nominal";

/// Collect the active alarms for a state snapshot, worst first.
pub fn active_alarms(state: &SystemState) -> Vec<Alarm> {
    let mut alarms = Vec::new();
    if state.emergency_stop_active {
        alarms.push(Alarm::EmergencyStopActive);
    }
    if state.az_fault {
        alarms.push(Alarm::AzimuthServoFault);
    }
    if state.el_fault {
        alarms.push(Alarm::ElevationServoFault);
    }
    if state.lrf_fault {
        alarms.push(Alarm::LrfFault);
    }
    if state.lrf_over_temperature {
        alarms.push(Alarm::LrfOverTemperature);
    }
    if !state.day_camera_connected {
        alarms.push(Alarm::DayCameraOffline);
    }
    if !state.night_camera_connected {
        alarms.push(Alarm::NightCameraOffline);
    }
    if !state.imu_connected {
        alarms.push(Alarm::ImuOffline);
    }
    if !state.plc21_connected {
        alarms.push(Alarm::Plc21Offline);
    }
    if !state.plc42_connected {
        alarms.push(Alarm::Plc42Offline);
    }
    if !state.actuator_connected {
        alarms.push(Alarm::ActuatorOffline);
    }
    if !state.station_enabled {
        alarms.push(Alarm::StationDisabled);
    }
    alarms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estop_sorts_first() {
        let mut state = SystemState {
            emergency_stop_active: true,
            az_fault: true,
            ..Default::default()
        };
        state.day_camera_connected = true;
        state.night_camera_connected = true;
        state.imu_connected = true;
        state.plc21_connected = true;
        state.plc42_connected = true;
        state.actuator_connected = true;
        state.station_enabled = true;
        let alarms = active_alarms(&state);
        assert_eq!(alarms[0], Alarm::EmergencyStopActive);
        assert_eq!(alarms[1], Alarm::AzimuthServoFault);
        assert_eq!(alarms.len(), 2);
    }

    #[test]
    fn healthy_station_has_no_alarms() {
        let state = SystemState {
            station_enabled: true,
            day_camera_connected: true,
            night_camera_connected: true,
            imu_connected: true,
            plc21_connected: true,
            plc42_connected: true,
            actuator_connected: true,
            lrf_connected: true,
            ..Default::default()
        };
        assert!(active_alarms(&state).is_empty());
    }
}
