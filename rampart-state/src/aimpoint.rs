//! Derived reticle aimpoint geometry.
//!
//! A right-ward gun offset moves the reticle leftward on screen and an
//! upward gun offset moves the reticle down, so the pixel shift negates
//! azimuth and keeps the elevation sign in screen coordinates.

use rampart_types::LeadAngleStatus;

/// Convert one angular gun offset to a reticle pixel shift.
///
/// Returns `(0, 0)` for degenerate optics (non-positive HFOV or image
/// dimensions) rather than propagating NaNs into the overlay.
pub fn pixel_shift_for_offsets(
    offset_az_deg: f32,
    offset_el_deg: f32,
    hfov_deg: f32,
    image_width_px: u32,
    image_height_px: u32,
) -> (f32, f32) {
    if hfov_deg <= 0.001 || image_width_px == 0 || image_height_px == 0 {
        return (0.0, 0.0);
    }
    let width = image_width_px as f64;
    let height = image_height_px as f64;
    let hfov = hfov_deg as f64;

    let ppd_az = width / hfov;

    let aspect = width / height;
    let vfov_rad = 2.0 * ((hfov.to_radians() / 2.0).tan() / aspect).atan();
    let vfov_deg = vfov_rad.to_degrees();
    let ppd_el = if vfov_deg > 0.001 {
        height / vfov_deg
    } else {
        ppd_az
    };

    let shift_x = -(offset_az_deg as f64) * ppd_az;
    let shift_y = (offset_el_deg as f64) * ppd_el;
    (shift_x as f32, shift_y as f32)
}

/// Compute the absolute reticle aimpoint in image pixels.
///
/// Accumulates the zeroing shift (when applied) and the lead shift (when
/// lead compensation is active with a displayable status) onto the image
/// centre.
#[allow(clippy::too_many_arguments)]
pub fn reticle_position_px(
    zeroing_az_deg: f32,
    zeroing_el_deg: f32,
    zeroing_applied: bool,
    lead_az_deg: f32,
    lead_el_deg: f32,
    lead_active: bool,
    lead_status: LeadAngleStatus,
    hfov_deg: f32,
    image_width_px: u32,
    image_height_px: u32,
) -> (f32, f32) {
    let mut shift = (0.0f32, 0.0f32);

    if zeroing_applied {
        let (dx, dy) = pixel_shift_for_offsets(
            zeroing_az_deg,
            zeroing_el_deg,
            hfov_deg,
            image_width_px,
            image_height_px,
        );
        shift.0 += dx;
        shift.1 += dy;
    }

    let apply_lead = lead_active
        && matches!(
            lead_status,
            LeadAngleStatus::On | LeadAngleStatus::Lag | LeadAngleStatus::ZoomOut
        );
    if apply_lead {
        let (dx, dy) = pixel_shift_for_offsets(
            lead_az_deg,
            lead_el_deg,
            hfov_deg,
            image_width_px,
            image_height_px,
        );
        shift.0 += dx;
        shift.1 += dy;
    }

    let center_x = image_width_px as f32 / 2.0;
    let center_y = image_height_px as f32 / 2.0;
    (center_x + shift.0, center_y + shift.1)
}

/// Azimuth arc membership with wrap through 360 degrees.
///
/// All three angles are normalised to [0, 360). When `start <= end` the
/// arc is `[start, end]`; otherwise it wraps: `[start, 360) U [0, end]`.
pub fn azimuth_in_range(target_deg: f32, start_deg: f32, end_deg: f32) -> bool {
    let target = normalize_deg(target_deg);
    let start = normalize_deg(start_deg);
    let end = normalize_deg(end_deg);

    if start <= end {
        target >= start && target <= end
    } else {
        target >= start || target <= end
    }
}

fn normalize_deg(deg: f32) -> f32 {
    let wrapped = deg % 360.0;
    if wrapped < 0.0 {
        wrapped + 360.0
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn wrap_membership() {
        // Arc from 350 to 10 contains 355, 0, 5 and rejects 11, 180, 349.
        for inside in [355.0, 0.0, 5.0] {
            assert!(azimuth_in_range(inside, 350.0, 10.0), "{inside}");
        }
        for outside in [11.0, 180.0, 349.0] {
            assert!(!azimuth_in_range(outside, 350.0, 10.0), "{outside}");
        }
    }

    #[test]
    fn wrap_membership_symmetric_across_turns() {
        for k in [-2i32, -1, 0, 1, 3] {
            let a = 5.0 + 360.0 * k as f32;
            assert!(azimuth_in_range(a, 350.0, 10.0));
            let b = 180.0 + 360.0 * k as f32;
            assert!(!azimuth_in_range(b, 350.0, 10.0));
        }
    }

    #[test]
    fn zeroing_shift_matches_worked_example() {
        // 1024x768 at HFOV 20 deg with zeroing az 0.5 el 0.25 applied.
        let (x, y) = reticle_position_px(
            0.5,
            0.25,
            true,
            0.0,
            0.0,
            false,
            LeadAngleStatus::Off,
            20.0,
            1024,
            768,
        );
        assert_relative_eq!(x, 486.4, epsilon = 0.05);
        // vfov = 2*atan(tan(10 deg) / (1024/768)) = 15.0668 deg,
        // ppd_el = 768 / 15.0668 = 50.97 px/deg, y = 384 + 0.25 * 50.97.
        assert_relative_eq!(y, 396.74, epsilon = 0.05);
    }

    #[test]
    fn idempotent_for_same_inputs() {
        let args = (
            0.3f32,
            -0.2f32,
            true,
            1.0f32,
            0.5f32,
            true,
            LeadAngleStatus::On,
            12.5f32,
            1024u32,
            768u32,
        );
        let a = reticle_position_px(
            args.0, args.1, args.2, args.3, args.4, args.5, args.6, args.7, args.8, args.9,
        );
        let b = reticle_position_px(
            args.0, args.1, args.2, args.3, args.4, args.5, args.6, args.7, args.8, args.9,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn degenerate_optics_keep_reticle_centred() {
        let (x, y) = reticle_position_px(
            1.0,
            1.0,
            true,
            0.0,
            0.0,
            false,
            LeadAngleStatus::Off,
            0.0,
            1024,
            768,
        );
        assert_relative_eq!(x, 512.0);
        assert_relative_eq!(y, 384.0);
    }
}
