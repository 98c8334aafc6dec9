//! OSD input composition.
//!
//! Rendering primitives are out of scope; this module only assembles
//! the text content the renderer draws: the per-frame alarm list and
//! the `FrameData` record itself (built in the pipeline).

use rampart_types::{active_alarms, SystemState, ALL_NOMINAL};

/// The status-overlay lines for one state snapshot, worst first. An
/// empty alarm set yields the single all-nominal line.
pub fn compose_alarm_lines(state: &SystemState) -> Vec<String> {
    let alarms = active_alarms(state);
    if alarms.is_empty() {
        vec![ALL_NOMINAL.to_string()]
    } else {
        alarms.iter().map(|a| a.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy_state() -> SystemState {
        SystemState {
            station_enabled: true,
            day_camera_connected: true,
            night_camera_connected: true,
            imu_connected: true,
            plc21_connected: true,
            plc42_connected: true,
            actuator_connected: true,
            lrf_connected: true,
            ..Default::default()
        }
    }

    #[test]
    fn nominal_when_nothing_wrong() {
        let lines = compose_alarm_lines(&healthy_state());
        assert_eq!(lines, vec![ALL_NOMINAL.to_string()]);
    }

    #[test]
    fn estop_line_leads() {
        let mut state = healthy_state();
        state.emergency_stop_active = true;
        state.lrf_over_temperature = true;
        let lines = compose_alarm_lines(&state);
        assert!(lines[0].contains("EMERGENCY STOP"));
        assert!(lines.iter().any(|l| l.contains("LRF Over Temperature")));
    }
}
