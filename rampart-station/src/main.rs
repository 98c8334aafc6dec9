//! The station executable: composition root, device threads, camera
//! pipelines and the UI-thread event loop that owns the state model.

mod config;
mod logging;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, error, info, warn};

use rampart_control::{
    AppEffect, ApplicationController, CameraController, GimbalController, JoystickController,
    StationAction, WeaponController,
};
use rampart_devices::day_camera::{self, DayCameraCommand};
use rampart_devices::lrf::{self, LrfCommand};
use rampart_devices::night_camera::{self, NightCameraCommand};
use rampart_devices::plc42::{self, Plc42Command};
use rampart_devices::servo_actuator::{self, ActuatorCommand};
use rampart_devices::servo_driver::{self, ServoAxis, ServoDriverCommand};
use rampart_devices::{imu, joystick, plc21, radar, DeviceEvent};
use rampart_state::SystemStateModel;
use rampart_video::{
    CameraPipeline, Detector, ImageDirSource, NullDetector, PipelineConfig, PipelineEvent,
    PipelineHandle, YoloV8Detector,
};

use config::{StationConfig, VideoSourceConfig};

#[derive(Parser, Debug)]
#[command(name = "rampart-station", about = "Remote weapon station control software")]
struct Cli {
    /// Station configuration file.
    #[arg(long, default_value = "rampart.toml")]
    config: PathBuf,
    /// Zone persistence file (overrides the config entry).
    #[arg(long)]
    zones: Option<PathBuf>,
}

/// Command senders into the device threads.
struct DeviceCommands {
    day_camera: tokio::sync::mpsc::Sender<DayCameraCommand>,
    night_camera: tokio::sync::mpsc::Sender<NightCameraCommand>,
    lrf: tokio::sync::mpsc::Sender<LrfCommand>,
    plc42: tokio::sync::mpsc::Sender<Plc42Command>,
    actuator: tokio::sync::mpsc::Sender<ActuatorCommand>,
    servo_az: tokio::sync::mpsc::Sender<ServoDriverCommand>,
    servo_el: tokio::sync::mpsc::Sender<ServoDriverCommand>,
}

fn main() {
    logging::init();
    let cli = Cli::parse();

    let config = match StationConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("fatal configuration error: {e:#}");
            std::process::exit(2);
        }
    };

    if let Err(e) = run_station(cli, config) {
        error!("station terminated with error: {e:#}");
        std::process::exit(1);
    }
    info!("clean shutdown");
}

fn run_station(cli: Cli, config: StationConfig) -> anyhow::Result<()> {
    let zones_path = cli.zones.unwrap_or_else(|| config.zones_file.clone());
    let mut model = SystemStateModel::with_zones_file(&zones_path);

    let (device_tx, device_rx) = unbounded::<DeviceEvent>();
    let (pipeline_tx, pipeline_rx) = unbounded::<PipelineEvent>();
    let (shutdown_tx, shutdown_rx) = unbounded::<()>();

    let mut threads: Vec<(String, std::thread::JoinHandle<()>)> = Vec::new();

    // --- Device threads: one current-thread runtime per link. ---
    let (day_tx, day_rx) = tokio::sync::mpsc::channel(16);
    spawn_device(&mut threads, "day-camera", {
        let cfg = config.day_camera.clone();
        let events = device_tx.clone();
        move || day_camera::run(cfg, day_rx, events)
    });

    let (night_tx, night_rx) = tokio::sync::mpsc::channel(16);
    spawn_device(&mut threads, "night-camera", {
        let cfg = config.night_camera.clone();
        let events = device_tx.clone();
        move || night_camera::run(cfg, night_rx, events)
    });

    let (lrf_tx, lrf_rx) = tokio::sync::mpsc::channel(16);
    spawn_device(&mut threads, "lrf", {
        let cfg = config.lrf.clone();
        let events = device_tx.clone();
        move || lrf::run(cfg, lrf_rx, events)
    });

    spawn_device(&mut threads, "imu", {
        let cfg = config.imu.clone();
        let events = device_tx.clone();
        move || imu::run(cfg, events)
    });

    spawn_device(&mut threads, "plc21", {
        let cfg = config.plc21.clone();
        let events = device_tx.clone();
        move || plc21::run(cfg, events)
    });

    let (plc42_tx, plc42_rx) = tokio::sync::mpsc::channel(64);
    spawn_device(&mut threads, "plc42", {
        let cfg = config.plc42.clone();
        let events = device_tx.clone();
        move || plc42::run(cfg, plc42_rx, events)
    });

    let (servo_az_tx, servo_az_rx) = tokio::sync::mpsc::channel(16);
    spawn_device(&mut threads, "servo-az", {
        let cfg = config.servo_az.clone();
        let events = device_tx.clone();
        move || servo_driver::run(ServoAxis::Azimuth, cfg, servo_az_rx, events)
    });

    let (servo_el_tx, servo_el_rx) = tokio::sync::mpsc::channel(16);
    spawn_device(&mut threads, "servo-el", {
        let cfg = config.servo_el.clone();
        let events = device_tx.clone();
        move || servo_driver::run(ServoAxis::Elevation, cfg, servo_el_rx, events)
    });

    let (actuator_tx, actuator_rx) = tokio::sync::mpsc::channel(16);
    spawn_device(&mut threads, "actuator", {
        let cfg = config.actuator.clone();
        let events = device_tx.clone();
        move || servo_actuator::run(cfg, actuator_rx, events)
    });

    spawn_device(&mut threads, "radar", {
        let cfg = config.radar.clone();
        let events = device_tx.clone();
        move || radar::run(cfg, events)
    });

    // --- Joystick: blocking gilrs pump. ---
    {
        let uuid = config.joystick_uuid.clone();
        let events = device_tx.clone();
        let handle = std::thread::Builder::new()
            .name("joystick".to_string())
            .spawn(move || {
                if let Err(e) = joystick::run(uuid, events) {
                    warn!("joystick thread exited: {e}");
                }
            })
            .context("spawning joystick thread")?;
        threads.push(("joystick".to_string(), handle));
    }

    // --- Camera pipelines. ---
    let mut pipeline_handles: Vec<PipelineHandle> = Vec::new();
    for (index, video) in [(0usize, &config.day_video), (1usize, &config.night_video)] {
        match spawn_pipeline(
            index,
            video,
            config.detector_model.as_deref(),
            &model,
            &pipeline_tx,
        )? {
            Some((name, handle, join)) => {
                pipeline_handles.push(handle);
                threads.push((name, join));
            }
            None => debug!("camera {index} has no frame source configured"),
        }
    }

    // --- Ctrl-C watcher. ---
    {
        let shutdown = shutdown_tx.clone();
        std::thread::Builder::new()
            .name("signal".to_string())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("signal runtime");
                runtime.block_on(async {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("interrupt received, shutting down");
                        let _ = shutdown.send(());
                    }
                });
            })
            .context("spawning signal thread")?;
    }

    let commands = DeviceCommands {
        day_camera: day_tx,
        night_camera: night_tx,
        lrf: lrf_tx,
        plc42: plc42_tx,
        actuator: actuator_tx,
        servo_az: servo_az_tx,
        servo_el: servo_el_tx,
    };

    // Continuous 1 Hz ranging keeps the LRF distance fresh.
    let _ = commands.lrf.try_send(LrfCommand::ContinuousRanging1Hz);

    ui_loop(
        &mut model,
        &commands,
        &pipeline_handles,
        device_rx,
        pipeline_rx,
        shutdown_rx,
    );

    // --- Ordered shutdown. ---
    info!("stopping pipelines and devices");
    for handle in &pipeline_handles {
        handle.request_stop();
    }
    drop(commands);
    drop(device_tx);
    drop(pipeline_tx);

    if let Err(e) = model.save_zones() {
        warn!("could not save zones to {}: {e}", zones_path.display());
    }

    for (name, handle) in threads {
        let bound = if name.contains("pipeline") {
            Duration::from_secs(2)
        } else {
            Duration::from_secs(1)
        };
        join_with_timeout(name, handle, bound);
    }
    Ok(())
}

/// Spawn one device task on its own thread with a current-thread tokio
/// runtime, the way the serial workers are organised throughout.
fn spawn_device<F, Fut>(
    threads: &mut Vec<(String, std::thread::JoinHandle<()>)>,
    name: &str,
    factory: F,
) where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = rampart_devices::Result<()>>,
{
    use rampart_devices::DeviceLifecycle;

    let thread_name = name.to_string();
    let log_name = thread_name.clone();
    let handle = std::thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            debug!("device {log_name}: {:?}", DeviceLifecycle::Initializing);
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("device runtime");
            match runtime.block_on(factory()) {
                Ok(()) => debug!("device {log_name}: {:?}", DeviceLifecycle::Offline),
                Err(e) => {
                    warn!("device {log_name} exited: {e}");
                    debug!("device {log_name}: {:?}", DeviceLifecycle::Error);
                }
            }
        })
        .expect("spawning device thread");
    threads.push((thread_name, handle));
}

type SpawnedPipeline = (String, PipelineHandle, std::thread::JoinHandle<()>);

fn spawn_pipeline(
    camera_index: usize,
    video: &VideoSourceConfig,
    detector_model: Option<&std::path::Path>,
    model: &SystemStateModel,
    events: &Sender<PipelineEvent>,
) -> anyhow::Result<Option<SpawnedPipeline>> {
    let Some(frame_dir) = &video.frame_dir else {
        return Ok(None);
    };
    let source = ImageDirSource::new(frame_dir, video.fps.unwrap_or(25.0), true)
        .with_context(|| format!("opening frame source {}", frame_dir.display()))?;

    let detector: Box<dyn Detector> = match detector_model {
        Some(path) if path.exists() => match YoloV8Detector::load(path) {
            Ok(detector) => Box::new(detector),
            Err(e) => {
                warn!("detector model failed to load ({e}), detection disabled");
                Box::new(NullDetector)
            }
        },
        _ => Box::new(NullDetector),
    };

    let config = PipelineConfig {
        crop_left: video.crop_left,
        crop_right: video.crop_right,
        crop_top: video.crop_top,
        crop_bottom: video.crop_bottom,
        ..PipelineConfig::for_camera(camera_index)
    };
    let (pipeline, handle) = CameraPipeline::new(
        config,
        Box::new(source),
        detector,
        model.shared(),
        events.clone(),
    );
    let name = format!("camera-{camera_index}-pipeline");
    let join = std::thread::Builder::new()
        .name(name.clone())
        .spawn(move || pipeline.run())
        .context("spawning pipeline thread")?;
    Ok(Some((name, handle, join)))
}

/// The UI thread: owns the model and the controllers, drains every
/// cross-thread channel and runs the periodic control ticks.
fn ui_loop(
    model: &mut SystemStateModel,
    commands: &DeviceCommands,
    pipeline_handles: &[PipelineHandle],
    device_rx: Receiver<DeviceEvent>,
    pipeline_rx: Receiver<PipelineEvent>,
    shutdown_rx: Receiver<()>,
) {
    let mut gimbal = GimbalController::new();
    let mut weapon = WeaponController::new();
    let camera = CameraController::new();
    let mut stick = JoystickController::new();
    let mut app = ApplicationController::new();

    camera.sync_optics(model);

    let gimbal_tick = crossbeam_channel::tick(Duration::from_millis(20));
    let fire_control_tick = crossbeam_channel::tick(Duration::from_millis(100));
    let mut frames_seen: u64 = 0;

    loop {
        crossbeam_channel::select! {
            recv(device_rx) -> event => {
                let Ok(event) = event else { break };
                let before = model.snapshot();
                let mut actions = handle_device_event(event, model, &mut weapon, &mut stick, &camera);
                let after = model.snapshot();
                match app.on_panel_state(&before, &after, model) {
                    AppEffect::ToggleDetection => {
                        for handle in pipeline_handles {
                            let enabled = !handle.detection_enabled();
                            handle.set_detection_enabled(enabled);
                        }
                    }
                    AppEffect::ResetServoAlarms => {
                        actions.push(StationAction::ServoAz(ServoDriverCommand::ResetAlarm));
                        actions.push(StationAction::ServoEl(ServoDriverCommand::ResetAlarm));
                    }
                    AppEffect::Shutdown => return,
                    AppEffect::None => {}
                }
                actions.extend(weapon.on_state_changed(model.data()));
                route_actions(actions, commands, pipeline_handles);
            }
            recv(pipeline_rx) -> event => {
                let Ok(event) = event else { break };
                match event {
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
                    PipelineEvent::Frame(frame) => {
                        // Rendering is an external collaborator; the
                        // record is complete and ready for it.
                        frames_seen += 1;
                        if frames_seen % 250 == 0 {
                            debug!(
                                "camera {} frame {} ({} alarms)",
                                frame.camera_index,
                                frames_seen,
                                frame.alarm_lines.len()
                            );
                        }
                    }
                    PipelineEvent::Error { camera_index, message } => {
                        warn!("camera {camera_index} pipeline error: {message}");
                    }
                }
            }
            recv(gimbal_tick) -> _ => {
                let actions = gimbal.tick(model, Instant::now());
                route_actions(actions, commands, pipeline_handles);
            }
            recv(fire_control_tick) -> _ => {
                weapon.update_fire_control(model);
            }
            recv(shutdown_rx) -> _ => {
                return;
            }
        }
    }
}

fn handle_device_event(
    event: DeviceEvent,
    model: &mut SystemStateModel,
    weapon: &mut WeaponController,
    stick: &mut JoystickController,
    camera: &CameraController,
) -> Vec<StationAction> {
    match event {
        DeviceEvent::DayCamera(d) => {
            model.on_day_camera_data(&d);
            Vec::new()
        }
        DeviceEvent::NightCamera(d) => {
            model.on_night_camera_data(&d);
            Vec::new()
        }
        DeviceEvent::Lrf(d) => {
            model.on_lrf_data(&d);
            Vec::new()
        }
        DeviceEvent::LrfInfo {
            product_id,
            version,
        } => {
            info!("LRF product {product_id} firmware {version}");
            Vec::new()
        }
        DeviceEvent::Imu(d) => {
            model.on_imu_data(&d);
            Vec::new()
        }
        DeviceEvent::Plc21(d) => {
            model.on_plc21_data(&d);
            Vec::new()
        }
        DeviceEvent::Plc42(d) => {
            model.on_plc42_data(&d);
            Vec::new()
        }
        DeviceEvent::ServoAz(d) => {
            model.on_servo_az_data(&d);
            Vec::new()
        }
        DeviceEvent::ServoEl(d) => {
            model.on_servo_el_data(&d);
            Vec::new()
        }
        DeviceEvent::Actuator(d) => {
            model.on_actuator_data(&d);
            Vec::new()
        }
        DeviceEvent::ActuatorPositionReached => weapon.on_actuator_position_reached(),
        DeviceEvent::RadarPlots(plots) => {
            model.on_radar_plots(plots);
            Vec::new()
        }
        DeviceEvent::Joystick(input) => {
            let weapon_ref: &WeaponController = weapon;
            stick.handle_input(&input, model, weapon_ref, camera, Instant::now())
        }
        DeviceEvent::Fault { device, message } => {
            warn!("device fault: {device:?}: {message}");
            Vec::new()
        }
    }
}

fn route_actions(
    actions: Vec<StationAction>,
    commands: &DeviceCommands,
    pipeline_handles: &[PipelineHandle],
) {
    // try_send keeps the UI thread non-blocking: a device that cannot
    // drain its queue drops the stale command and gets the next one.
    for action in actions {
        let result = match action {
            StationAction::Actuator(cmd) => {
                commands.actuator.try_send(cmd).map_err(|_| "actuator")
            }
            StationAction::Plc42(cmd) => commands.plc42.try_send(cmd).map_err(|_| "plc42"),
            StationAction::DayCamera(cmd) => {
                commands.day_camera.try_send(cmd).map_err(|_| "day camera")
            }
            StationAction::NightCamera(cmd) => commands
                .night_camera
                .try_send(cmd)
                .map_err(|_| "night camera"),
            StationAction::Lrf(cmd) => commands.lrf.try_send(cmd).map_err(|_| "lrf"),
            StationAction::ServoAz(cmd) => {
                commands.servo_az.try_send(cmd).map_err(|_| "servo az")
            }
            StationAction::ServoEl(cmd) => {
                commands.servo_el.try_send(cmd).map_err(|_| "servo el")
            }
            StationAction::ToggleDetection => {
                for handle in pipeline_handles {
                    let enabled = !handle.detection_enabled();
                    handle.set_detection_enabled(enabled);
                }
                Ok(())
            }
            StationAction::Shutdown => Ok(()),
        };
        if let Err(device) = result {
            warn!("command to {device} dropped (queue full or closed)");
        }
    }
}

/// Join a worker with a deadline; a stuck thread is reported as a
/// resource leak rather than blocking shutdown.
fn join_with_timeout(name: String, handle: std::thread::JoinHandle<()>, bound: Duration) {
    let deadline = Instant::now() + bound;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!("thread {name} did not stop within {bound:?}, leaking it");
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    if handle.join().is_err() {
        warn!("thread {name} panicked");
    }
}
