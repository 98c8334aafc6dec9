//! End-to-end loop: synthetic frames -> pipeline worker -> tracking
//! results -> state model phase machine, the way the UI thread wires
//! them at runtime.

use std::time::Duration;

use crossbeam_channel::unbounded;

use rampart_state::SystemStateModel;
use rampart_types::{MotionMode, OperationalMode, TrackingPhase};
use rampart_video::{
    CameraPipeline, NullDetector, PipelineConfig, PipelineEvent, SyntheticSource,
};

#[test]
fn operator_lock_on_reaches_active_lock() {
    let mut model = SystemStateModel::new();
    let mut state = model.snapshot();
    state.station_enabled = true;
    state.deadman_switch_active = true;
    model.update(state);
    model.update_camera_optics_and_activity(320, 240, 63.7, 10.6, true);

    // A static high-contrast square centred at (160, 120).
    let frames = vec![(140u32, 100u32); 240];
    let source = SyntheticSource::new(320, 240, 40, frames);

    let (events_tx, events_rx) = unbounded();
    let config = PipelineConfig {
        output_width: 320,
        output_height: 240,
        frame_timeout: Duration::from_millis(20),
        ..PipelineConfig::for_camera(0)
    };
    let (pipeline, handle) = CameraPipeline::new(
        config,
        Box::new(source),
        Box::new(NullDetector),
        model.shared(),
        events_tx,
    );
    let worker = std::thread::spawn(move || pipeline.run());

    let mut frames_seen = 0usize;
    let deadline = std::time::Instant::now() + Duration::from_secs(20);
    while std::time::Instant::now() < deadline {
        let event = match events_rx.recv_timeout(Duration::from_secs(2)) {
            Ok(event) => event,
            Err(_) => break,
        };
        match event {
            PipelineEvent::Frame(frame) => {
                frames_seen += 1;
                assert_eq!(frame.camera_index, 0);
                if frames_seen == 2 {
                    assert!(model.start_tracking_acquisition());
                    // Shrink the gate onto the square.
                    assert!(model.adjust_acquisition_box_size(-60.0, -60.0));
                    assert_eq!(model.data().tracking_phase, TrackingPhase::Acquisition);
                }
                if frames_seen == 4 {
                    assert!(model.request_tracker_lock_on());
                }
            }
            PipelineEvent::TrackingResult {
                camera_index,
                has_lock,
                center_px,
                size_px,
                velocity_px_s,
                raw_state,
            } => {
                model.update_tracking_result(
                    camera_index,
                    has_lock,
                    center_px,
                    size_px,
                    velocity_px_s,
                    raw_state,
                );
            }
            PipelineEvent::Error { message, .. } => panic!("pipeline error: {message}"),
        }
        if model.data().tracking_phase == TrackingPhase::ActiveLock {
            break;
        }
    }

    handle.request_stop();
    worker.join().unwrap();

    let state = model.data();
    assert_eq!(state.tracking_phase, TrackingPhase::ActiveLock);
    assert_eq!(state.op_mode, OperationalMode::Tracking);
    assert_eq!(state.motion_mode, MotionMode::AutoTrack);
    assert!(state.tracker_has_valid_target);
    let (cx, cy) = state.tracked_center_px;
    assert!((cx - 160.0).abs() < 6.0, "cx = {cx}");
    assert!((cy - 120.0).abs() < 6.0, "cy = {cy}");
}
