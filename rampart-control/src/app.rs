//! Application controller: the panel-button menu and procedure state
//! machine.
//!
//! Presentation is out of scope; this machine owns which screen is
//! active and what the buttons mean there, and mutates the model only
//! through its documented operations. Zone definition follows the
//! mark-in-place pattern: the operator slews onto a point and presses
//! VAL to capture the current gimbal position.

use tracing::{debug, info};

use rampart_state::SystemStateModel;
use rampart_types::{
    AreaZone, OsdColor, ReticleType, SectorScanZone, SystemState, TargetReferencePoint, ZoneType,
};

/// Side effects the menu cannot apply itself; the composition root
/// routes them (detection toggle to the pipelines, shutdown to main).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEffect {
    None,
    ToggleDetection,
    /// Acknowledge latched servo alarms on both axes.
    ResetServoAlarms,
    Shutdown,
}

pub const MAIN_MENU_ITEMS: [&str; 13] = [
    "Personalize Reticle",
    "Personalize Colors",
    "Zeroing",
    "Clear Zeroing",
    "Windage",
    "Clear Windage",
    "Zone Definitions",
    "System Status",
    "Radar Targets",
    "Toggle Detection",
    "About",
    "Shutdown",
    "Close Menu",
];

const RETICLE_CHOICES: [ReticleType; 4] = [
    ReticleType::BoxCrosshair,
    ReticleType::Crosshair,
    ReticleType::Dot,
    ReticleType::CircleDot,
];

const COLOR_CHOICES: [(&str, OsdColor); 4] = [
    ("Green", OsdColor::rgb(70, 226, 165)),
    ("Red", OsdColor::rgb(200, 60, 60)),
    ("White", OsdColor::rgb(230, 230, 230)),
    ("Amber", OsdColor::rgb(255, 190, 0)),
];

/// Zone-definition wizard: which kind, then mark points in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneWizardStep {
    SelectKind { selected: usize },
    AreaMarkStart { zone_type: ZoneType },
    AreaMarkEnd { zone_type: ZoneType, start_az: CentiDeg },
    SectorMarkFirst,
    SectorMarkSecond { az1: CentiDeg, el1: CentiDeg },
    TrpMark,
}

/// Degrees stored in hundredths so the wizard steps stay `Copy + Eq`.
pub type CentiDeg = i32;

fn quantize(deg: f32) -> CentiDeg {
    (deg * 100.0).round() as CentiDeg
}

fn dequantize(q: CentiDeg) -> f32 {
    q as f32 / 100.0
}

const ZONE_KINDS: [&str; 4] = ["No-Fire Zone", "No-Traverse Zone", "Sector Scan", "TRP"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MenuState {
    #[default]
    Hidden,
    MainMenu {
        selected: usize,
    },
    ReticleMenu {
        selected: usize,
    },
    ColorMenu {
        selected: usize,
    },
    Zeroing,
    Windage,
    ZoneWizard(ZoneWizardStep),
    SystemStatus,
    RadarTargets,
    About,
}

#[derive(Debug, Default)]
pub struct ApplicationController {
    menu: MenuState,
}

impl ApplicationController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn menu_state(&self) -> MenuState {
        self.menu
    }

    /// Feed rising edges of the panel's menu buttons.
    pub fn on_panel_state(
        &mut self,
        previous: &SystemState,
        current: &SystemState,
        model: &mut SystemStateModel,
    ) -> AppEffect {
        let mut effect = AppEffect::None;
        if current.menu_val_sw && !previous.menu_val_sw {
            effect = self.on_menu_val(model);
        }
        if current.menu_up_sw && !previous.menu_up_sw {
            self.on_up(model);
        }
        if current.menu_down_sw && !previous.menu_down_sw {
            self.on_down(model);
        }
        effect
    }

    pub fn on_up(&mut self, model: &mut SystemStateModel) {
        match self.menu {
            MenuState::Hidden => {}
            MenuState::MainMenu { ref mut selected } => {
                *selected = (*selected + MAIN_MENU_ITEMS.len() - 1) % MAIN_MENU_ITEMS.len();
            }
            MenuState::ReticleMenu { ref mut selected } => {
                *selected = (*selected + RETICLE_CHOICES.len() - 1) % RETICLE_CHOICES.len();
            }
            MenuState::ColorMenu { ref mut selected } => {
                *selected = (*selected + COLOR_CHOICES.len() - 1) % COLOR_CHOICES.len();
            }
            MenuState::Zeroing => model.apply_zeroing_adjustment(0.0, 0.05),
            MenuState::Windage => {
                let knots = model.data().windage_speed_knots + 1.0;
                model.set_windage_speed(knots);
            }
            MenuState::ZoneWizard(ZoneWizardStep::SelectKind { ref mut selected }) => {
                *selected = (*selected + ZONE_KINDS.len() - 1) % ZONE_KINDS.len();
            }
            MenuState::ZoneWizard(_) => {}
            MenuState::RadarTargets => model.select_previous_radar_track(),
            MenuState::SystemStatus | MenuState::About => {}
        }
    }

    pub fn on_down(&mut self, model: &mut SystemStateModel) {
        match self.menu {
            MenuState::Hidden => {}
            MenuState::MainMenu { ref mut selected } => {
                *selected = (*selected + 1) % MAIN_MENU_ITEMS.len();
            }
            MenuState::ReticleMenu { ref mut selected } => {
                *selected = (*selected + 1) % RETICLE_CHOICES.len();
            }
            MenuState::ColorMenu { ref mut selected } => {
                *selected = (*selected + 1) % COLOR_CHOICES.len();
            }
            MenuState::Zeroing => model.apply_zeroing_adjustment(0.0, -0.05),
            MenuState::Windage => {
                let knots = (model.data().windage_speed_knots - 1.0).max(0.0);
                model.set_windage_speed(knots);
            }
            MenuState::ZoneWizard(ZoneWizardStep::SelectKind { ref mut selected }) => {
                *selected = (*selected + 1) % ZONE_KINDS.len();
            }
            MenuState::ZoneWizard(_) => {}
            MenuState::RadarTargets => model.select_next_radar_track(),
            MenuState::SystemStatus | MenuState::About => {}
        }
    }

    pub fn on_menu_val(&mut self, model: &mut SystemStateModel) -> AppEffect {
        match self.menu {
            MenuState::Hidden => {
                self.menu = MenuState::MainMenu { selected: 0 };
                AppEffect::None
            }
            MenuState::MainMenu { selected } => self.activate_main_item(selected, model),
            MenuState::ReticleMenu { selected } => {
                model.set_reticle_style(RETICLE_CHOICES[selected]);
                self.menu = MenuState::MainMenu { selected: 0 };
                AppEffect::None
            }
            MenuState::ColorMenu { selected } => {
                let (name, color) = COLOR_CHOICES[selected];
                debug!("OSD color set to {name}");
                model.set_color_style(color);
                self.menu = MenuState::MainMenu { selected: 1 };
                AppEffect::None
            }
            MenuState::Zeroing => {
                model.finalize_zeroing();
                self.menu = MenuState::Hidden;
                AppEffect::None
            }
            MenuState::Windage => {
                model.finalize_windage();
                self.menu = MenuState::Hidden;
                AppEffect::None
            }
            MenuState::ZoneWizard(step) => {
                self.advance_zone_wizard(step, model);
                AppEffect::None
            }
            MenuState::SystemStatus => {
                // VAL on the status screen acknowledges latched servo
                // alarms and returns to the menu.
                self.menu = MenuState::MainMenu { selected: 0 };
                AppEffect::ResetServoAlarms
            }
            MenuState::About => {
                self.menu = MenuState::MainMenu { selected: 0 };
                AppEffect::None
            }
            MenuState::RadarTargets => {
                model.command_radar_slew();
                self.menu = MenuState::Hidden;
                AppEffect::None
            }
        }
    }

    fn activate_main_item(&mut self, selected: usize, model: &mut SystemStateModel) -> AppEffect {
        match MAIN_MENU_ITEMS[selected] {
            "Personalize Reticle" => {
                self.menu = MenuState::ReticleMenu { selected: 0 };
            }
            "Personalize Colors" => {
                self.menu = MenuState::ColorMenu { selected: 0 };
            }
            "Zeroing" => {
                model.start_zeroing();
                self.menu = MenuState::Zeroing;
            }
            "Clear Zeroing" => {
                model.clear_zeroing();
            }
            "Windage" => {
                model.start_windage();
                self.menu = MenuState::Windage;
            }
            "Clear Windage" => {
                model.clear_windage();
            }
            "Zone Definitions" => {
                self.menu = MenuState::ZoneWizard(ZoneWizardStep::SelectKind { selected: 0 });
            }
            "System Status" => {
                self.menu = MenuState::SystemStatus;
            }
            "Radar Targets" => {
                self.menu = MenuState::RadarTargets;
            }
            "Toggle Detection" => {
                return AppEffect::ToggleDetection;
            }
            "About" => {
                self.menu = MenuState::About;
            }
            "Shutdown" => {
                self.menu = MenuState::Hidden;
                return AppEffect::Shutdown;
            }
            _ => {
                self.menu = MenuState::Hidden;
            }
        }
        AppEffect::None
    }

    /// VAL inside the zone wizard captures the current gimbal position
    /// for the step's point.
    fn advance_zone_wizard(&mut self, step: ZoneWizardStep, model: &mut SystemStateModel) {
        let az = model.data().gimbal_az_deg;
        let el = model.data().gimbal_el_deg;

        self.menu = match step {
            ZoneWizardStep::SelectKind { selected } => match selected {
                0 => MenuState::ZoneWizard(ZoneWizardStep::AreaMarkStart {
                    zone_type: ZoneType::NoFire,
                }),
                1 => MenuState::ZoneWizard(ZoneWizardStep::AreaMarkStart {
                    zone_type: ZoneType::NoTraverse,
                }),
                2 => MenuState::ZoneWizard(ZoneWizardStep::SectorMarkFirst),
                _ => MenuState::ZoneWizard(ZoneWizardStep::TrpMark),
            },
            ZoneWizardStep::AreaMarkStart { zone_type } => {
                MenuState::ZoneWizard(ZoneWizardStep::AreaMarkEnd {
                    zone_type,
                    start_az: quantize(az),
                })
            }
            ZoneWizardStep::AreaMarkEnd {
                zone_type,
                start_az,
            } => {
                let id = model.add_area_zone(AreaZone {
                    zone_type,
                    is_enabled: true,
                    start_azimuth: dequantize(start_az),
                    end_azimuth: az,
                    // Area zones span the full elevation travel unless
                    // edited later.
                    min_elevation: rampart_state::EL_MIN_DEG,
                    max_elevation: rampart_state::EL_MAX_DEG,
                    name: format!("{zone_type:?}"),
                    ..Default::default()
                });
                info!("area zone {id} defined");
                MenuState::Hidden
            }
            ZoneWizardStep::SectorMarkFirst => {
                MenuState::ZoneWizard(ZoneWizardStep::SectorMarkSecond {
                    az1: quantize(az),
                    el1: quantize(el),
                })
            }
            ZoneWizardStep::SectorMarkSecond { az1, el1 } => {
                let id = model.add_sector_scan_zone(SectorScanZone {
                    is_enabled: true,
                    az1: dequantize(az1),
                    el1: dequantize(el1),
                    az2: az,
                    el2: el,
                    scan_speed: 20.0,
                    ..Default::default()
                });
                info!("sector scan zone {id} defined");
                MenuState::Hidden
            }
            ZoneWizardStep::TrpMark => {
                let page = model.data().active_trp_page;
                let in_page = model
                    .data()
                    .target_reference_points
                    .iter()
                    .filter(|t| t.location_page == page)
                    .count() as u32
                    + 1;
                let id = model.add_trp(TargetReferencePoint {
                    location_page: page,
                    trp_in_page: in_page,
                    azimuth: az,
                    elevation: el,
                    halt_time: 2.0,
                    ..Default::default()
                });
                info!("TRP {id} defined on page {page}");
                MenuState::Hidden
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_at(az: f32, el: f32) -> SystemStateModel {
        let mut model = SystemStateModel::new();
        let mut state = model.snapshot();
        state.gimbal_az_deg = az;
        state.gimbal_el_deg = el;
        model.update(state);
        model
    }

    fn select_item(app: &mut ApplicationController, model: &mut SystemStateModel, item: &str) {
        app.on_menu_val(model); // open main menu
        let index = MAIN_MENU_ITEMS.iter().position(|&i| i == item).unwrap();
        for _ in 0..index {
            app.on_down(model);
        }
        app.on_menu_val(model);
    }

    #[test]
    fn menu_opens_and_wraps() {
        let mut model = SystemStateModel::new();
        let mut app = ApplicationController::new();
        assert_eq!(app.menu_state(), MenuState::Hidden);
        app.on_menu_val(&mut model);
        assert_eq!(app.menu_state(), MenuState::MainMenu { selected: 0 });
        app.on_up(&mut model);
        assert_eq!(
            app.menu_state(),
            MenuState::MainMenu {
                selected: MAIN_MENU_ITEMS.len() - 1
            }
        );
    }

    #[test]
    fn zeroing_procedure_adjusts_and_finalizes() {
        let mut model = SystemStateModel::new();
        let mut app = ApplicationController::new();
        select_item(&mut app, &mut model, "Zeroing");
        assert_eq!(app.menu_state(), MenuState::Zeroing);
        assert!(model.data().zeroing_mode_active);

        app.on_up(&mut model);
        app.on_up(&mut model);
        app.on_down(&mut model);
        approx::assert_relative_eq!(model.data().zeroing_el_offset_deg, 0.05, epsilon = 1e-6);

        app.on_menu_val(&mut model);
        assert!(model.data().zeroing_applied);
        assert!(!model.data().zeroing_mode_active);
        assert_eq!(app.menu_state(), MenuState::Hidden);
    }

    #[test]
    fn windage_procedure_sets_speed() {
        let mut model = SystemStateModel::new();
        let mut app = ApplicationController::new();
        select_item(&mut app, &mut model, "Windage");
        for _ in 0..8 {
            app.on_up(&mut model);
        }
        app.on_down(&mut model);
        app.on_menu_val(&mut model);
        assert_eq!(model.data().windage_speed_knots, 7.0);
        assert!(model.data().windage_applied);
    }

    #[test]
    fn zone_wizard_captures_gimbal_positions() {
        let mut model = model_at(100.0, 5.0);
        let mut app = ApplicationController::new();
        select_item(&mut app, &mut model, "Zone Definitions");
        // Kind 0 = no-fire.
        app.on_menu_val(&mut model); // -> mark start at az 100
        // Operator slews to 140 and marks the end.
        let mut state = model.snapshot();
        state.gimbal_az_deg = 140.0;
        model.update(state);
        app.on_menu_val(&mut model);

        let zones = &model.data().area_zones;
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].zone_type, ZoneType::NoFire);
        approx::assert_relative_eq!(zones[0].start_azimuth, 100.0, epsilon = 0.01);
        approx::assert_relative_eq!(zones[0].end_azimuth, 140.0, epsilon = 0.01);
        assert!(zones[0].is_enabled);
        assert!(model.is_point_in_no_fire_zone(120.0, 0.0, None));
    }

    #[test]
    fn trp_wizard_numbers_within_page() {
        let mut model = model_at(45.0, 15.0);
        let mut app = ApplicationController::new();
        select_item(&mut app, &mut model, "Zone Definitions");
        for _ in 0..3 {
            app.on_down(&mut model); // kind 3 = TRP
        }
        app.on_menu_val(&mut model); // choose TRP
        app.on_menu_val(&mut model); // mark

        let trps = &model.data().target_reference_points;
        assert_eq!(trps.len(), 1);
        assert_eq!(trps[0].location_page, 1);
        assert_eq!(trps[0].trp_in_page, 1);
        approx::assert_relative_eq!(trps[0].azimuth, 45.0);
    }

    #[test]
    fn toggle_detection_is_surfaced_as_effect() {
        let mut model = SystemStateModel::new();
        let mut app = ApplicationController::new();
        app.on_menu_val(&mut model);
        let index = MAIN_MENU_ITEMS
            .iter()
            .position(|&i| i == "Toggle Detection")
            .unwrap();
        for _ in 0..index {
            app.on_down(&mut model);
        }
        let effect = app.on_menu_val(&mut model);
        assert_eq!(effect, AppEffect::ToggleDetection);
    }

    #[test]
    fn panel_edges_drive_the_menu() {
        let mut model = SystemStateModel::new();
        let mut app = ApplicationController::new();
        let before = model.snapshot();
        let mut pressed = before.clone();
        pressed.menu_val_sw = true;
        app.on_panel_state(&before, &pressed, &mut model);
        assert_eq!(app.menu_state(), MenuState::MainMenu { selected: 0 });

        // Held button: no further edge.
        app.on_panel_state(&pressed, &pressed, &mut model);
        assert_eq!(app.menu_state(), MenuState::MainMenu { selected: 0 });
    }
}
