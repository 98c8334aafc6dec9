//! Lead-angle computation for moving targets.
//!
//! The calculator is a pure function: the same input tuple always
//! produces the same solution. It models flat fire with a linear drag
//! decay on the average projectile velocity, adds gravity drop to the
//! elevation lead and crosswind drift to the azimuth lead, and grades
//! the result with the OSD status ladder (On / Lag / ZoomOut / Off).

use rampart_types::LeadAngleStatus;

/// Average-velocity decay per metre of range. Chosen so a 2 km shot
/// loses about 5 % of muzzle velocity; clamped to halve it at most.
const DRAG_DECAY_PER_M: f64 = 2.5e-5;
/// Time of flight beyond which the tracker's rate envelope is exceeded.
const LAG_TOF_LIMIT_S: f64 = 2.5;
/// Angular-rate ceiling for a confident solution.
const LAG_RATE_LIMIT_DPS: f64 = 12.0;
/// Lead beyond this fraction of the HFOV cannot be displayed sensibly.
const ZOOM_OUT_HFOV_FRACTION: f64 = 0.25;
const KNOTS_TO_MPS: f64 = 0.514444;
const GRAVITY_MPS2: f64 = 9.80665;

/// Inputs to one lead solution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeadInputs {
    pub target_range_m: f64,
    pub target_rate_az_dps: f64,
    pub target_rate_el_dps: f64,
    pub muzzle_velocity_mps: f64,
    /// Optional starting estimate for the time of flight; ignored when
    /// non-positive.
    pub tof_seed_s: f64,
    pub camera_hfov_deg: f64,
    /// Operator-entered crosswind, positive left-to-right.
    pub crosswind_knots: f64,
}

/// One lead solution: angular offsets for the reticle plus the status.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeadSolution {
    pub lead_az_deg: f64,
    pub lead_el_deg: f64,
    pub time_of_flight_s: f64,
    pub status: LeadAngleStatus,
}

impl LeadSolution {
    fn off() -> Self {
        LeadSolution {
            lead_az_deg: 0.0,
            lead_el_deg: 0.0,
            time_of_flight_s: 0.0,
            status: LeadAngleStatus::Off,
        }
    }
}

/// Compute the lead solution for one input tuple.
pub fn compute_lead(inputs: &LeadInputs) -> LeadSolution {
    if inputs.target_range_m <= 0.0
        || inputs.muzzle_velocity_mps <= 0.0
        || inputs.camera_hfov_deg <= 0.0
    {
        return LeadSolution::off();
    }

    let tof = time_of_flight(inputs.target_range_m, inputs.muzzle_velocity_mps, inputs.tof_seed_s);

    // Kinematic lead: the target keeps its angular rate for the flight.
    let mut lead_az = inputs.target_rate_az_dps * tof;
    let lead_el_motion = inputs.target_rate_el_dps * tof;

    // Gravity drop converted to superelevation at the target range.
    let drop_m = 0.5 * GRAVITY_MPS2 * tof * tof;
    let superelevation_deg = (drop_m / inputs.target_range_m).atan().to_degrees();

    // Crosswind drift, converted to an angle at the target range.
    let drift_m = inputs.crosswind_knots * KNOTS_TO_MPS * tof;
    lead_az += (drift_m / inputs.target_range_m).atan().to_degrees();

    let lead_el = lead_el_motion + superelevation_deg;

    let status = grade(inputs, tof, lead_az, lead_el);
    LeadSolution {
        lead_az_deg: lead_az,
        lead_el_deg: lead_el,
        time_of_flight_s: tof,
        status,
    }
}

/// Time of flight with linear drag decay on the average velocity,
/// floored at half the muzzle velocity.
fn time_of_flight(range_m: f64, muzzle_velocity_mps: f64, seed_s: f64) -> f64 {
    let decayed = muzzle_velocity_mps * (1.0 - DRAG_DECAY_PER_M * range_m);
    let v_avg = decayed.max(muzzle_velocity_mps / 2.0);
    let tof = range_m / v_avg;
    if seed_s > 0.0 {
        // One fixed-point blend toward the seed keeps the result
        // deterministic while letting an external estimate settle.
        (tof + seed_s) / 2.0
    } else {
        tof
    }
}

fn grade(inputs: &LeadInputs, tof: f64, lead_az: f64, lead_el: f64) -> LeadAngleStatus {
    let rate_mag = inputs
        .target_rate_az_dps
        .abs()
        .max(inputs.target_rate_el_dps.abs());
    if tof > LAG_TOF_LIMIT_S || rate_mag > LAG_RATE_LIMIT_DPS {
        return LeadAngleStatus::Lag;
    }
    let display_limit = inputs.camera_hfov_deg * ZOOM_OUT_HFOV_FRACTION;
    if lead_az.abs() >= display_limit || lead_el.abs() >= display_limit {
        return LeadAngleStatus::ZoomOut;
    }
    LeadAngleStatus::On
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn base_inputs() -> LeadInputs {
        LeadInputs {
            target_range_m: 1000.0,
            target_rate_az_dps: 2.0,
            target_rate_el_dps: 0.0,
            muzzle_velocity_mps: 900.0,
            tof_seed_s: 0.0,
            camera_hfov_deg: 20.0,
            crosswind_knots: 0.0,
        }
    }

    #[test]
    fn deterministic_for_same_inputs() {
        let inputs = base_inputs();
        assert_eq!(compute_lead(&inputs), compute_lead(&inputs));
    }

    #[test]
    fn invalid_inputs_return_off() {
        let mut inputs = base_inputs();
        inputs.target_range_m = 0.0;
        assert_eq!(compute_lead(&inputs).status, LeadAngleStatus::Off);

        let mut inputs = base_inputs();
        inputs.muzzle_velocity_mps = -1.0;
        assert_eq!(compute_lead(&inputs).status, LeadAngleStatus::Off);

        let mut inputs = base_inputs();
        inputs.camera_hfov_deg = 0.0;
        assert_eq!(compute_lead(&inputs).status, LeadAngleStatus::Off);
    }

    #[test]
    fn lead_scales_with_rate_and_tof() {
        let inputs = base_inputs();
        let solution = compute_lead(&inputs);
        assert_eq!(solution.status, LeadAngleStatus::On);
        // tof ~= 1000 / (900 * 0.975) ~= 1.14 s, az lead ~= 2.28 deg.
        assert_relative_eq!(solution.time_of_flight_s, 1.1396, epsilon = 1e-3);
        assert_relative_eq!(
            solution.lead_az_deg,
            2.0 * solution.time_of_flight_s,
            epsilon = 1e-9
        );
        assert!(solution.lead_el_deg > 0.0, "superelevation present");
    }

    #[test]
    fn long_tof_grades_lag() {
        let mut inputs = base_inputs();
        inputs.target_range_m = 3000.0;
        inputs.muzzle_velocity_mps = 300.0;
        assert_eq!(compute_lead(&inputs).status, LeadAngleStatus::Lag);
    }

    #[test]
    fn fast_target_grades_lag() {
        let mut inputs = base_inputs();
        inputs.target_rate_az_dps = 20.0;
        assert_eq!(compute_lead(&inputs).status, LeadAngleStatus::Lag);
    }

    #[test]
    fn narrow_fov_grades_zoom_out() {
        let mut inputs = base_inputs();
        inputs.camera_hfov_deg = 2.3;
        let solution = compute_lead(&inputs);
        assert_eq!(solution.status, LeadAngleStatus::ZoomOut);
        // The offsets are still reported so the reticle can shift.
        assert!(solution.lead_az_deg > 0.5);
    }

    #[test]
    fn crosswind_adds_azimuth_drift() {
        let calm = compute_lead(&base_inputs());
        let mut windy_inputs = base_inputs();
        windy_inputs.crosswind_knots = 10.0;
        let windy = compute_lead(&windy_inputs);
        assert!(windy.lead_az_deg > calm.lead_az_deg);
    }
}
