//! The per-camera worker: pull, crop/scale, track, detect, publish.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use image::imageops::FilterType;
use image::RgbImage;
use tracing::{debug, info, warn};

use rampart_state::SharedState;
use rampart_types::{
    FrameData, PixelBox, SystemState, TrackerRawState, TrackingPhase,
};

use crate::detector::Detector;
use crate::osd::compose_alarm_lines;
use crate::source::{Frame, FrameSource};
use crate::tracker::CorrelationTracker;
use crate::{Error, Result};

/// Fixed working geometry for one camera.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub camera_index: usize,
    pub output_width: u32,
    pub output_height: u32,
    pub crop_left: u32,
    pub crop_right: u32,
    pub crop_top: u32,
    pub crop_bottom: u32,
    /// Bound on the per-iteration frame pull.
    pub frame_timeout: Duration,
}

impl PipelineConfig {
    pub fn for_camera(camera_index: usize) -> Self {
        PipelineConfig {
            camera_index,
            output_width: 1024,
            output_height: 768,
            crop_left: 0,
            crop_right: 0,
            crop_top: 0,
            crop_bottom: 0,
            frame_timeout: Duration::from_millis(100),
        }
    }
}

/// Events the pipeline pushes toward the UI thread.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Forwarded into `SystemStateModel::update_tracking_result`; the
    /// model ignores reports from the inactive camera.
    TrackingResult {
        camera_index: usize,
        has_lock: bool,
        center_px: (f32, f32),
        size_px: (f32, f32),
        velocity_px_s: (f32, f32),
        raw_state: TrackerRawState,
    },
    Frame(Box<FrameData>),
    Error {
        camera_index: usize,
        message: String,
    },
}

/// Control handle held by the composition root.
#[derive(Clone)]
pub struct PipelineHandle {
    abort: Arc<AtomicBool>,
    detection_enabled: Arc<AtomicBool>,
}

impl PipelineHandle {
    pub fn request_stop(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    pub fn set_detection_enabled(&self, enabled: bool) {
        self.detection_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn detection_enabled(&self) -> bool {
        self.detection_enabled.load(Ordering::SeqCst)
    }
}

pub struct CameraPipeline {
    config: PipelineConfig,
    source: Box<dyn FrameSource>,
    detector: Box<dyn Detector>,
    tracker: CorrelationTracker,
    shared: SharedState,
    events: Sender<PipelineEvent>,
    abort: Arc<AtomicBool>,
    detection_enabled: Arc<AtomicBool>,
    last_center: Option<(f32, f32)>,
    last_update: Option<Instant>,
    was_active: bool,
}

impl CameraPipeline {
    pub fn new(
        config: PipelineConfig,
        source: Box<dyn FrameSource>,
        detector: Box<dyn Detector>,
        shared: SharedState,
        events: Sender<PipelineEvent>,
    ) -> (Self, PipelineHandle) {
        let abort = Arc::new(AtomicBool::new(false));
        let detection_enabled = Arc::new(AtomicBool::new(false));
        let handle = PipelineHandle {
            abort: abort.clone(),
            detection_enabled: detection_enabled.clone(),
        };
        (
            CameraPipeline {
                config,
                source,
                detector,
                tracker: CorrelationTracker::new(),
                shared,
                events,
                abort,
                detection_enabled,
                last_center: None,
                last_update: None,
                was_active: false,
            },
            handle,
        )
    }

    /// Worker-thread entry point: loop until aborted or the source ends.
    pub fn run(mut self) {
        info!("camera {} pipeline started", self.config.camera_index);
        loop {
            if self.abort.load(Ordering::SeqCst) {
                break;
            }
            match self.source.next_frame(self.config.frame_timeout) {
                Ok(Some(frame)) => {
                    if let Err(e) = self.process_frame(frame) {
                        let _ = self.events.send(PipelineEvent::Error {
                            camera_index: self.config.camera_index,
                            message: e.to_string(),
                        });
                    }
                }
                Ok(None) => continue,
                Err(Error::SourceExhausted) => {
                    info!("camera {} source ended", self.config.camera_index);
                    break;
                }
                Err(e) => {
                    warn!("camera {} frame pull failed: {e}", self.config.camera_index);
                    let _ = self.events.send(PipelineEvent::Error {
                        camera_index: self.config.camera_index,
                        message: e.to_string(),
                    });
                }
            }
        }
        info!("camera {} pipeline stopped", self.config.camera_index);
    }

    fn process_frame(&mut self, frame: Frame) -> Result<()> {
        let state = self.shared.snapshot();
        let working = self.crop_and_scale(frame)?;
        let luma = working.to_luma();

        // Detection first: the tracker template never sees the overlay.
        let detection_enabled = self.detection_enabled.load(Ordering::SeqCst);
        let detections = if detection_enabled {
            match self
                .detector
                .detect(&working.rgb, working.width, working.height)
            {
                Ok(list) => list,
                Err(e) => {
                    warn!("camera {} detection failed: {e}", self.config.camera_index);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let verdict = self.run_tracking(&state, &luma, working.width, working.height);

        // Velocity in pixels per second from consecutive valid centres.
        let now = Instant::now();
        let mut velocity = (0.0f32, 0.0f32);
        let mut center = (0.0f32, 0.0f32);
        let mut size = (0.0f32, 0.0f32);
        let tracked = verdict
            .as_ref()
            .map(|v| v.raw_state == TrackerRawState::Tracked)
            .unwrap_or(false);
        if let Some(v) = &verdict {
            center = v.bbox.center();
            size = (v.bbox.w, v.bbox.h);
        }
        if tracked {
            if let (Some(last), Some(last_at)) = (self.last_center, self.last_update) {
                let dt = now.duration_since(last_at).as_secs_f32();
                if dt > 1e-6 {
                    velocity = ((center.0 - last.0) / dt, (center.1 - last.1) / dt);
                }
            }
            self.last_center = Some(center);
            self.last_update = Some(now);
        } else {
            self.last_center = None;
            self.last_update = Some(now);
        }

        let raw_state = verdict
            .as_ref()
            .map(|v| v.raw_state)
            .unwrap_or(TrackerRawState::Lost);

        self.events
            .send(PipelineEvent::TrackingResult {
                camera_index: self.config.camera_index,
                has_lock: tracked,
                center_px: center,
                size_px: size,
                velocity_px_s: velocity,
                raw_state,
            })
            .map_err(|_| Error::ChannelClosed)?;

        let frame_data = self.build_frame_data(&state, working, verdict.map(|v| v.bbox), raw_state, detections, detection_enabled);
        self.events
            .send(PipelineEvent::Frame(Box::new(frame_data)))
            .map_err(|_| Error::ChannelClosed)?;
        Ok(())
    }

    fn crop_and_scale(&self, frame: Frame) -> Result<Frame> {
        let img = RgbImage::from_raw(frame.width, frame.height, frame.rgb)
            .ok_or_else(|| Error::Inference("frame buffer size mismatch".to_string()))?;
        let cropped_w = frame
            .width
            .saturating_sub(self.config.crop_left + self.config.crop_right)
            .max(1);
        let cropped_h = frame
            .height
            .saturating_sub(self.config.crop_top + self.config.crop_bottom)
            .max(1);
        let cropped = image::imageops::crop_imm(
            &img,
            self.config.crop_left,
            self.config.crop_top,
            cropped_w,
            cropped_h,
        )
        .to_image();
        let scaled = if cropped.width() == self.config.output_width
            && cropped.height() == self.config.output_height
        {
            cropped
        } else {
            image::imageops::resize(
                &cropped,
                self.config.output_width,
                self.config.output_height,
                FilterType::Triangle,
            )
        };
        Ok(Frame {
            width: scaled.width(),
            height: scaled.height(),
            rgb: scaled.into_raw(),
            captured_at: frame.captured_at,
        })
    }

    /// The state-driven tracking branch. Returns `None` when the
    /// tracker did not run this frame (Off/Acquisition/inactive).
    fn run_tracking(
        &mut self,
        state: &SystemState,
        luma: &[f32],
        width: u32,
        height: u32,
    ) -> Option<crate::tracker::TrackerVerdict> {
        let i_am_active = state.active_camera_index() == self.config.camera_index;
        if i_am_active != self.was_active {
            // Camera switch always tears the tracker down.
            self.tracker.reset();
            self.was_active = i_am_active;
        }

        if !i_am_active {
            if self.tracker.is_initialized() {
                debug!(
                    "camera {} inactive, resetting tracker",
                    self.config.camera_index
                );
                self.tracker.reset();
            }
            return None;
        }

        match state.tracking_phase {
            TrackingPhase::Off | TrackingPhase::Acquisition => {
                if self.tracker.is_initialized() {
                    self.tracker.reset();
                }
                None
            }
            TrackingPhase::LockPending => {
                if !self.tracker.is_initialized() {
                    let ok = self.tracker.initialize(
                        luma,
                        width,
                        height,
                        state.acquisition_box,
                    );
                    if !ok {
                        warn!(
                            "camera {} tracker init failed for box {:?}",
                            self.config.camera_index, state.acquisition_box
                        );
                        return Some(crate::tracker::TrackerVerdict {
                            raw_state: TrackerRawState::Lost,
                            bbox: PixelBox::default(),
                            confidence: 0.0,
                        });
                    }
                }
                Some(self.tracker.localize(luma, width, height))
            }
            TrackingPhase::ActiveLock | TrackingPhase::Coast | TrackingPhase::Firing => {
                if self.tracker.is_initialized() {
                    Some(self.tracker.localize(luma, width, height))
                } else {
                    // Anomaly: the model believes tracking is live but
                    // this worker has no template. Report lost so the
                    // model can recover.
                    Some(crate::tracker::TrackerVerdict {
                        raw_state: TrackerRawState::Lost,
                        bbox: PixelBox::default(),
                        confidence: 0.0,
                    })
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_frame_data(
        &self,
        state: &SystemState,
        frame: Frame,
        bbox: Option<PixelBox>,
        raw_state: TrackerRawState,
        detections: Vec<rampart_types::Detection>,
        detection_enabled: bool,
    ) -> FrameData {
        FrameData {
            camera_index: self.config.camera_index,
            image_width: frame.width,
            image_height: frame.height,
            image_rgb: frame.rgb,

            tracking_bbox: bbox.filter(|b| b.in_bounds(frame.width, frame.height)),
            tracker_raw_state: raw_state,
            tracking_phase: state.tracking_phase,
            tracker_has_valid_target: state.tracker_has_valid_target,
            acquisition_box: state.acquisition_box,

            op_mode: state.op_mode,
            motion_mode: state.motion_mode,
            gimbal_az_deg: state.gimbal_az_deg,
            gimbal_el_deg: state.gimbal_el_deg,
            camera_hfov_deg: state.active_hfov_deg(),
            lrf_distance_m: state.lrf_distance_m,

            station_enabled: state.station_enabled,
            gun_armed: state.gun_armed,
            ammo_loaded: state.ammo_loaded,
            stabilization_enabled: state.stabilization_enabled,
            fire_mode: state.fire_mode,
            reticle_type: state.reticle_type,
            color_style: state.osd_color_style,

            detections,
            detection_enabled,

            zeroing_mode_active: state.zeroing_mode_active,
            zeroing_applied: state.zeroing_applied,
            zeroing_az_offset_deg: state.zeroing_az_offset_deg,
            zeroing_el_offset_deg: state.zeroing_el_offset_deg,
            windage_mode_active: state.windage_mode_active,
            windage_applied: state.windage_applied,
            windage_speed_knots: state.windage_speed_knots,
            lead_angle_active: state.lead_angle_active,
            lead_angle_status: state.lead_angle_status,

            is_reticle_in_no_fire_zone: state.is_reticle_in_no_fire_zone,
            is_reticle_in_no_traverse_zone: state.is_reticle_in_no_traverse_zone,

            reticle_aimpoint_x_px: state.reticle_aimpoint_image_x_px,
            reticle_aimpoint_y_px: state.reticle_aimpoint_image_y_px,
            lead_status_text: state.lead_status_text.clone(),
            zeroing_status_text: state.zeroing_status_text.clone(),
            current_scan_name: state.current_scan_name.clone(),

            alarm_lines: compose_alarm_lines(state),
        }
    }
}
