//! Vehicle stationary detection from IMU rates and accelerations.

use std::time::{Duration, Instant};

use rampart_types::SystemState;

/// Maximum gyro vector magnitude, in degrees per second.
const GYRO_LIMIT_DPS: f64 = 0.5;
/// Maximum change in accelerometer vector magnitude between samples, in g.
const ACCEL_DELTA_LIMIT_G: f64 = 0.01;
/// How long both thresholds must hold before the vehicle counts as
/// stationary.
const HOLD_TIME: Duration = Duration::from_secs(2);

/// Update `is_vehicle_stationary` from the current IMU fields.
///
/// `now` is injected so tests can drive synthetic time.
pub(crate) fn update_stationary_status(state: &mut SystemState, now: Instant) {
    let (gx, gy, gz) = state.gyro_dps;
    let gyro_magnitude =
        ((gx as f64).powi(2) + (gy as f64).powi(2) + (gz as f64).powi(2)).sqrt();

    let (ax, ay, az) = state.accel_g;
    let accel_magnitude =
        ((ax as f64).powi(2) + (ay as f64).powi(2) + (az as f64).powi(2)).sqrt();
    // Without a running hold timer there is no motion baseline yet (the
    // very first sample, or the one right after a breach reset): seed it
    // so the gravity vector itself does not count as an acceleration
    // step and the timer can start on the first quiet sample.
    let accel_delta = if state.stationary_start_time.is_some() {
        (accel_magnitude - state.previous_accel_magnitude).abs()
    } else {
        0.0
    };
    state.previous_accel_magnitude = accel_magnitude;

    if gyro_magnitude < GYRO_LIMIT_DPS && accel_delta < ACCEL_DELTA_LIMIT_G {
        let start = *state.stationary_start_time.get_or_insert(now);
        if now.duration_since(start) >= HOLD_TIME {
            state.is_vehicle_stationary = true;
        }
    } else {
        state.is_vehicle_stationary = false;
        state.stationary_start_time = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn imu_state(gyro: (f32, f32, f32), accel: (f32, f32, f32)) -> SystemState {
        SystemState {
            gyro_dps: gyro,
            accel_g: accel,
            ..Default::default()
        }
    }

    #[test]
    fn becomes_stationary_after_hold_time() {
        let mut state = imu_state((0.1, 0.1, 0.1), (0.0, 0.0, 1.0));
        let t0 = Instant::now();
        update_stationary_status(&mut state, t0);
        assert!(!state.is_vehicle_stationary);
        update_stationary_status(&mut state, t0 + Duration::from_millis(1999));
        assert!(!state.is_vehicle_stationary);
        update_stationary_status(&mut state, t0 + Duration::from_millis(2001));
        assert!(state.is_vehicle_stationary);
    }

    #[test]
    fn gyro_breach_resets_timer_and_flag() {
        let mut state = imu_state((0.1, 0.1, 0.1), (0.0, 0.0, 1.0));
        let t0 = Instant::now();
        update_stationary_status(&mut state, t0);
        update_stationary_status(&mut state, t0 + Duration::from_secs(3));
        assert!(state.is_vehicle_stationary);

        state.gyro_dps = (1.0, 0.0, 0.0);
        update_stationary_status(&mut state, t0 + Duration::from_secs(4));
        assert!(!state.is_vehicle_stationary);
        assert!(state.stationary_start_time.is_none());
    }

    #[test]
    fn accel_step_resets_flag() {
        let mut state = imu_state((0.0, 0.0, 0.0), (0.0, 0.0, 1.0));
        let t0 = Instant::now();
        update_stationary_status(&mut state, t0);
        update_stationary_status(&mut state, t0 + Duration::from_secs(3));
        assert!(state.is_vehicle_stationary);

        // A 0.05 g jump in magnitude breaches the delta threshold.
        state.accel_g = (0.0, 0.0, 1.05);
        update_stationary_status(&mut state, t0 + Duration::from_secs(4));
        assert!(!state.is_vehicle_stationary);
    }
}
