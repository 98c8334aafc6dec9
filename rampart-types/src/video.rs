use crate::modes::{
    FireMode, LeadAngleStatus, MotionMode, OperationalMode, OsdColor, ReticleType,
    TrackerRawState, TrackingPhase,
};

/// Axis-aligned rectangle in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PixelBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl PixelBox {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        PixelBox { x, y, w, h }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    /// True when the box lies fully inside an image of the given size and
    /// has positive extent.
    pub fn in_bounds(&self, width: u32, height: u32) -> bool {
        self.w > 0.0
            && self.h > 0.0
            && self.x >= 0.0
            && self.y >= 0.0
            && self.x + self.w <= width as f32
            && self.y + self.h <= height as f32
    }
}

/// One object-detector result.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: PixelBox,
    pub label: String,
}

/// Everything the OSD renderer and downstream consumers need for one
/// frame. Created per frame, moved through the channel, never retained.
#[derive(Debug, Clone)]
pub struct FrameData {
    pub camera_index: usize,
    /// Decoded working-size image, tightly packed RGB8.
    pub image_rgb: Vec<u8>,
    pub image_width: u32,
    pub image_height: u32,

    pub tracking_bbox: Option<PixelBox>,
    pub tracker_raw_state: TrackerRawState,
    pub tracking_phase: TrackingPhase,
    pub tracker_has_valid_target: bool,
    pub acquisition_box: PixelBox,

    pub op_mode: OperationalMode,
    pub motion_mode: MotionMode,
    pub gimbal_az_deg: f32,
    pub gimbal_el_deg: f32,
    pub camera_hfov_deg: f32,
    pub lrf_distance_m: f32,

    pub station_enabled: bool,
    pub gun_armed: bool,
    pub ammo_loaded: bool,
    pub stabilization_enabled: bool,
    pub fire_mode: FireMode,
    pub reticle_type: ReticleType,
    pub color_style: OsdColor,

    pub detections: Vec<Detection>,
    pub detection_enabled: bool,

    pub zeroing_mode_active: bool,
    pub zeroing_applied: bool,
    pub zeroing_az_offset_deg: f32,
    pub zeroing_el_offset_deg: f32,
    pub windage_mode_active: bool,
    pub windage_applied: bool,
    pub windage_speed_knots: f32,
    pub lead_angle_active: bool,
    pub lead_angle_status: LeadAngleStatus,

    pub is_reticle_in_no_fire_zone: bool,
    pub is_reticle_in_no_traverse_zone: bool,

    pub reticle_aimpoint_x_px: f32,
    pub reticle_aimpoint_y_px: f32,
    pub lead_status_text: String,
    pub zeroing_status_text: String,
    pub current_scan_name: String,

    /// Pre-composed status overlay lines, worst first.
    pub alarm_lines: Vec<String>,
}
