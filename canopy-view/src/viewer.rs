//! Interactive canopy viewer built with eframe/egui.
//!
//! This module defines [`Viewer`], which owns a [`Simulation`] together
//! with the parameters it was built from, and implements [`eframe::App`]
//! to step it and draw a side view of the forest.

use canopy_core::{
    CameraDistance, LeafShape, Result, Simulation, SimulationParams, TreeParams, Tree,
    segment::SegmentTree,
};
use eframe::App;
use glam::{Vec2, Vec3};
use std::ops::RangeInclusive;

/// Edge length of the ground-light inset, in pixels.
const SHADOW_INSET_SIZE: f32 = 160.0;

/// Species presets selectable in the config panel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Species {
    #[default]
    GeneralDeciduous,
    AmericanSycamore,
    SugarMaple,
}

impl Species {
    pub const ALL: [Self; 3] = [
        Self::GeneralDeciduous,
        Self::AmericanSycamore,
        Self::SugarMaple,
    ];

    pub fn params(self) -> TreeParams {
        match self {
            Self::GeneralDeciduous => TreeParams::general_deciduous(),
            Self::AmericanSycamore => TreeParams::american_sycamore(),
            Self::SugarMaple => TreeParams::sugar_maple(),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::GeneralDeciduous => "General deciduous",
            Self::AmericanSycamore => "American sycamore",
            Self::SugarMaple => "Sugar maple",
        }
    }
}

/// Pixels per metre a camera distance class starts at.
fn initial_zoom(distance: CameraDistance) -> f32 {
    match distance {
        CameraDistance::Close => 120.0,
        CameraDistance::Middle => 50.0,
        CameraDistance::Far => 20.0,
    }
}

/// Main application state for the interactive viewer.
///
/// The typical per-frame update is:
/// 1. Handle UI interactions / input.
/// 2. If `running` is `true` and enough time has passed, call [`Viewer::step_once`].
/// 3. Render the segments of every tree and the ground-light inset.
///
/// ### Fields
/// - `sim` - The running simulation.
/// - `species` / `params` - Settings edited in the config panel; they only
///   take effect on the next reset.
/// - `seed` - Seed the current simulation was built from.
/// - `error` - Why the last reset was refused, if it was.
///
/// - `running` - Whether the simulation is currently auto-advancing.
/// - `zoom` - Pixels per metre.
/// - `pan` - Screen-space pan offset in pixels.
///
/// - `step_interval` - Target time between automatic steps (seconds).
/// - `last_step_time` - Time stamp of the last step (egui time).
/// - `last_step_dt` - Actual time delta between the last two steps (for display only).
pub struct Viewer {
    sim: Simulation,
    species: Species,
    params: SimulationParams,
    seed: u64,
    error: Option<String>,

    running: bool,
    zoom: f32,
    pan: egui::Vec2,

    step_interval: f64,
    last_step_time: f64,
    last_step_dt: f64,
}

impl Viewer {
    /// Creates a viewer over a single general deciduous tree at the equator,
    /// with a random seed.
    pub fn new() -> Result<Self> {
        Self::with_params(
            Species::default(),
            SimulationParams::equator(),
            rand::random(),
        )
    }

    pub fn with_params(species: Species, params: SimulationParams, seed: u64) -> Result<Self> {
        let sim = Simulation::with_seed(params, species.params(), seed)?;
        Ok(Self {
            sim,
            species,
            params,
            seed,
            error: None,
            running: false,
            zoom: initial_zoom(params.camera_distance),
            pan: egui::vec2(0.0, 0.0),
            step_interval: 0.1,
            last_step_time: 0.0,
            last_step_dt: 0.0,
        })
    }

    /// Rebuilds the simulation from the edited settings with a fresh seed.
    ///
    /// Invalid settings leave the current simulation in place and are
    /// reported in the config panel.
    fn reset(&mut self) {
        self.reset_with_seed(rand::random());
    }

    fn reset_with_seed(&mut self, seed: u64) {
        match Simulation::with_seed(self.params, self.species.params(), seed) {
            Ok(sim) => {
                self.sim = sim;
                self.seed = seed;
                self.error = None;
                self.zoom = initial_zoom(self.params.camera_distance);
                self.pan = egui::vec2(0.0, 0.0);
            }
            Err(err) => {
                tracing::warn!(%err, "keeping previous simulation");
                self.error = Some(err.to_string());
            }
        }
        self.running = false;
    }

    /// Advances the simulation by one year; stops auto-running once every
    /// tree has finished growing.
    fn step_once(&mut self) {
        if !self.sim.update() {
            self.running = false;
        }
    }

    /// [`Viewer::step_once`] at egui time `now`, recording the gap since the
    /// previous step for the status bar.
    fn timed_step(&mut self, now: f64) {
        if self.last_step_time > 0.0 {
            self.last_step_dt = now - self.last_step_time;
        }
        self.step_once();
        self.last_step_time = now;
    }

    /// Converts a side-view world position `(x, z)` to screen-space.
    ///
    /// The view is centred on the middle of the plot at ground level. The
    /// vertical axis is flipped so that height goes up on screen.
    ///
    /// ### Parameters
    /// - `p` - World position projected onto the x–z plane.
    /// - `rect` - Screen-space rectangle representing the drawing area.
    fn world_to_screen(&self, p: Vec2, rect: egui::Rect) -> egui::Pos2 {
        let center = rect.center();
        let mid = self.params.size.x * 0.5;
        egui::pos2(
            center.x + (p.x - mid) * self.zoom + self.pan.x,
            center.y - p.y * self.zoom + self.pan.y,
        )
    }

    /// Inverse of [`Viewer::world_to_screen`] (up to floating point rounding).
    fn screen_to_world(&self, p: egui::Pos2, rect: egui::Rect) -> Vec2 {
        let center = rect.center();
        let mid = self.params.size.x * 0.5;
        let x = (p.x - center.x - self.pan.x) / self.zoom + mid;
        let z = (center.y - p.y + self.pan.y) / self.zoom;
        Vec2::new(x, z)
    }

    fn project(&self, p: Vec3, rect: egui::Rect) -> egui::Pos2 {
        self.world_to_screen(Vec2::new(p.x, p.z), rect)
    }

    /// A [`egui::DragValue`] with a label to its left.
    fn labeled_drag<N: egui::emath::Numeric>(
        ui: &mut egui::Ui,
        label: &str,
        value: &mut N,
        range: RangeInclusive<N>,
        speed: f64,
    ) {
        ui.horizontal(|ui| {
            ui.label(label);
            ui.add(egui::DragValue::new(value).range(range).speed(speed));
        });
    }

    /// Builds the top panel UI (run controls, stepping, zoom).
    fn ui_top_panel(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
            ui.horizontal(|ui| {
                if ui
                    .button(if self.running { "⏸ Pause" } else { "▶ Run" })
                    .clicked()
                {
                    self.running = !self.running;
                }

                ui.add(
                    egui::DragValue::new(&mut self.step_interval)
                        .prefix("dt target = ")
                        .range(0.01..=2.0)
                        .speed(0.01),
                );

                if ui.button("Step").clicked() {
                    self.timed_step(ctx.input(|i| i.time));
                }

                if ui.button("Reset").clicked() {
                    self.reset();
                }

                ui.separator();
                ui.add(egui::Slider::new(&mut self.zoom, 5.0..=400.0).text("Zoom"));
            });
        });
    }

    /// Builds the bottom status bar (year, segments, masses).
    fn ui_status_bar(&self, ctx: &egui::Context) {
        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                ui.label(format!("dt last = {:.3} s", self.last_step_dt));
                ui.separator();
                ui.label(format!("timber = {:.2} kg", self.sim.total_timber_mass()));
                ui.label(format!("mass = {:.2} kg", self.sim.total_mass()));
                ui.label(format!(
                    "segments = {}",
                    self.sim.trees().iter().map(Tree::segment_count).sum::<usize>()
                ));
                ui.label(format!("year = {}", self.sim.year()));
                ui.label(format!("seed = {}", self.seed));
            });
        });
    }

    /// Builds the right-hand panel for the settings applied on reset.
    fn ui_config_panel(&mut self, ctx: &egui::Context) {
        egui::SidePanel::right("config_panel")
            .resizable(true)
            .default_width(220.0)
            .show(ctx, |ui| {
                ui.heading("Config");

                ui.separator();
                ui.label("Species");
                egui::ComboBox::from_id_salt("species")
                    .selected_text(self.species.label())
                    .show_ui(ui, |ui| {
                        for species in Species::ALL {
                            ui.selectable_value(&mut self.species, species, species.label());
                        }
                    });

                ui.separator();
                ui.label("Planting");
                Self::labeled_drag(ui, "trees x:", &mut self.params.num_trees_x, 1..=10, 0.1);
                Self::labeled_drag(ui, "trees y:", &mut self.params.num_trees_y, 1..=10, 0.1);

                ui.separator();
                ui.label("Environment");
                Self::labeled_drag(
                    ui,
                    "wind speed:",
                    &mut self.params.max_wind_speed,
                    0.0..=60.0,
                    0.5,
                );

                ui.label("Light split");
                for (label, value) in ["down:", "north:", "south:", "east:", "west:"]
                    .into_iter()
                    .zip(self.params.light_directions.iter_mut())
                {
                    Self::labeled_drag(ui, label, value, 0.0..=1.0, 0.01);
                }
                ui.label(format!("total = {:.2}", self.params.total_incident_light()));

                ui.separator();
                ui.label("Leaves");
                ui.horizontal(|ui| {
                    ui.radio_value(&mut self.params.leaf_shape, LeafShape::Round, "Round");
                    ui.radio_value(&mut self.params.leaf_shape, LeafShape::Textured, "Textured");
                });

                ui.label("Camera");
                ui.horizontal(|ui| {
                    ui.radio_value(&mut self.params.camera_distance, CameraDistance::Close, "Close");
                    ui.radio_value(&mut self.params.camera_distance, CameraDistance::Middle, "Middle");
                    ui.radio_value(&mut self.params.camera_distance, CameraDistance::Far, "Far");
                });

                ui.separator();
                if ui.button("Apply & reset").clicked() {
                    self.reset();
                }
                if ui.button("Reset cfg to default").clicked() {
                    self.species = Species::default();
                    self.params = SimulationParams::equator();
                }
                if let Some(error) = &self.error {
                    ui.colored_label(egui::Color32::LIGHT_RED, error.as_str());
                }
            });
    }

    /// Draws one tree: wood as width-scaled lines, then leaves on top.
    fn draw_tree(&self, painter: &egui::Painter, rect: egui::Rect, segments: &SegmentTree) {
        let wood = egui::Color32::from_rgb(120, 85, 50);
        for (_, seg) in segments.iter() {
            let a = self.project(seg.start(), rect);
            let b = self.project(seg.end(), rect);
            let w = (seg.width() * self.zoom).max(1.0);
            painter.line_segment([a, b], egui::Stroke::new(w, wood));
        }

        let leaf = egui::Color32::from_rgb(60, 150, 60);
        let side = segments.params().leaf_area.sqrt();
        for (id, seg) in segments.iter() {
            if !segments.is_leaf(id) {
                continue;
            }
            match self.params.leaf_shape {
                LeafShape::Round => {
                    let r = (side * 0.5 * self.zoom).max(1.5);
                    painter.circle_filled(self.project(seg.end(), rect), r, leaf);
                }
                LeafShape::Textured => {
                    // Quad across the segment tip, spanned by the two axes
                    // perpendicular to the segment.
                    let (x, y, _) = seg.local_frame();
                    let h = side * 0.5;
                    let corners = [x * h, y * h, -x * h, -y * h]
                        .map(|off| self.project(seg.end() + off, rect))
                        .to_vec();
                    painter.add(egui::Shape::convex_polygon(
                        corners,
                        leaf,
                        egui::Stroke::new(0.5, egui::Color32::DARK_GREEN),
                    ));
                }
            }
        }
    }

    /// Draws the light reaching each ground cell as a grey square map in
    /// the lower-left corner of `rect`: white is full sun.
    fn draw_shadow_map(&self, painter: &egui::Painter, rect: egui::Rect) {
        let dims = self.sim.grid().dims();
        let full = self.sim.params().total_incident_light();
        if full <= 0.0 {
            return;
        }
        let cell = SHADOW_INSET_SIZE / dims.x.max(dims.y) as f32;
        let origin = egui::pos2(rect.left() + 10.0, rect.bottom() - 10.0 - SHADOW_INSET_SIZE);

        for (x, y, light) in self.sim.ground_light() {
            let shade = ((light / full).clamp(0.0, 1.0) * 255.0) as u8;
            let min = origin + egui::vec2(x as f32 * cell, (dims.y as usize - 1 - y) as f32 * cell);
            let r = egui::Rect::from_min_size(min, egui::vec2(cell, cell));
            painter.rect_filled(r, 0.0, egui::Color32::from_gray(shade));
        }
        painter.rect_stroke(
            egui::Rect::from_min_size(origin, egui::vec2(SHADOW_INSET_SIZE, SHADOW_INSET_SIZE)),
            0.0,
            egui::Stroke::new(1.0, egui::Color32::GRAY),
            egui::StrokeKind::Outside,
        );
    }

    /// Builds the central panel where the forest is drawn.
    fn ui_central_panel(&mut self, ctx: &egui::Context) {
        egui::CentralPanel::default().show(ctx, |ui| {
            let response = ui.allocate_response(ui.available_size(), egui::Sense::click_and_drag());
            let rect = response.rect;
            let painter = ui.painter_at(rect);

            // Pan with drag.
            if response.dragged() {
                self.pan += response.drag_delta();
            }

            // Zoom around the mouse cursor.
            let scroll = ui.ctx().input(|i| i.raw_scroll_delta.y);
            if scroll != 0.0 {
                let pointer_screen = response.hover_pos().unwrap_or(rect.center());
                let world_before = self.screen_to_world(pointer_screen, rect);

                let factor = (1.0 + scroll * 0.001).clamp(0.5, 2.0);
                self.zoom = (self.zoom * factor).clamp(5.0, 400.0);

                let screen_after = self.world_to_screen(world_before, rect);
                self.pan += pointer_screen - screen_after;
            }

            // Ground line across the plot.
            let ground = [
                self.world_to_screen(Vec2::new(0.0, 0.0), rect),
                self.world_to_screen(Vec2::new(self.params.size.x, 0.0), rect),
            ];
            painter.line_segment(ground, egui::Stroke::new(1.0, egui::Color32::DARK_GRAY));

            for tree in self.sim.trees() {
                self.draw_tree(&painter, rect, tree.segments());
            }
            self.draw_shadow_map(&painter, rect);

            // Auto-run simulation if requested.
            if self.running {
                let now = ctx.input(|i| i.time);
                if now - self.last_step_time >= self.step_interval {
                    self.timed_step(now);
                }
                ctx.request_repaint();
            }
        });
    }
}

impl App for Viewer {
    /// eframe callback that builds all UI panels for each frame.
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.ui_top_panel(ctx);
        self.ui_status_bar(ctx);
        self.ui_config_panel(ctx);
        self.ui_central_panel(ctx);
    }
}
