/*
 * GPU Swarm Simulation
 *
 * Host application for the swarm core. It opens a nannou window, hands
 * the window's wgpu device to the simulation and ticks it every frame.
 *
 * Usage: swarm-gpu [config.json] [kernel.wgsl]
 *
 * Keys:
 * - A: add a boid to the selected swarm
 * - R: remove a boid from the selected swarm
 * - F: drop a food attractor at a random point
 * - Up/Down: raise or lower the selected swarm's speed
 * - Tab: select the next swarm
 * - I: retry device setup after a failure
 */

use std::collections::HashMap;

use nannou::prelude::*;
use rand::Rng;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use swarm_gpu::food::VisualHandle;
use swarm_gpu::{
    AttractorVisuals, SimulationConfig, SwarmDescriptor, SwarmSimulation, SwarmType, WgpuBackend,
};

// Top-down markers for food attractors
#[derive(Default)]
struct FoodMarkers {
    next: VisualHandle,
    markers: HashMap<VisualHandle, Vec3>,
}

impl AttractorVisuals for FoodMarkers {
    fn spawn(&mut self, position: Vec3) -> Option<VisualHandle> {
        self.next += 1;
        self.markers.insert(self.next, position);
        Some(self.next)
    }

    fn destroy(&mut self, handle: VisualHandle) {
        self.markers.remove(&handle);
    }
}

struct Model {
    sim: SwarmSimulation<WgpuBackend, FoodMarkers>,
    selected_swarm: u32,
    draw_calls: usize,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    nannou::app(model).update(update).run();
}

// Three small swarms when no config file is given
fn demo_config() -> SimulationConfig {
    SimulationConfig {
        swarms: vec![
            SwarmDescriptor::new(SwarmType::Prey, 200),
            SwarmDescriptor::new(SwarmType::Predator, 20),
            SwarmDescriptor::new(SwarmType::Omnivore, 50),
        ],
        ..SimulationConfig::default()
    }
}

fn load_config(path: Option<&String>) -> SimulationConfig {
    match path {
        Some(path) => match SimulationConfig::from_json_file(path) {
            Ok(config) => {
                info!(path = %path, "loaded simulation config");
                config
            }
            Err(err) => {
                error!(path = %path, error = %err, "could not load config; using the demo setup");
                demo_config()
            }
        },
        None => demo_config(),
    }
}

fn load_kernel_source(path: Option<&String>) -> Option<String> {
    let path = path?;
    match std::fs::read_to_string(path) {
        Ok(source) => Some(source),
        Err(err) => {
            warn!(path = %path, error = %err, "could not read compute kernel");
            None
        }
    }
}

fn model(app: &App) -> Model {
    let args: Vec<String> = std::env::args().collect();
    let config = load_config(args.get(1));
    let kernel_source = load_kernel_source(args.get(2));

    let window_id = app
        .new_window()
        .title("GPU Swarm Simulation")
        .size(1024, 768)
        .view(view)
        .key_pressed(key_pressed)
        .build()
        .unwrap();
    let window = app.window(window_id).unwrap();

    let backend = WgpuBackend::new(window.device_queue_pair().clone(), kernel_source);
    let sim = match SwarmSimulation::new(config, backend, FoodMarkers::default()) {
        Ok(sim) => sim,
        Err(err) => {
            error!(error = %err, "invalid simulation config");
            std::process::exit(1);
        }
    };
    if sim.is_degraded() {
        warn!("running without a compute kernel; pass a WGSL file as the second argument");
    }

    Model {
        sim,
        selected_swarm: 0,
        draw_calls: 0,
    }
}

fn update(app: &App, model: &mut Model, update: Update) {
    match model.sim.tick(app.time, update.since_last.as_secs_f32()) {
        Ok(report) => model.draw_calls = report.draws.len(),
        Err(err) => {
            // Reported once; later ticks skip device work until reinitialized
            error!(error = %err, "simulation tick failed");
            model.draw_calls = 0;
        }
    }
}

// Nudge the selected swarm's speed, kept inside the slider range
fn nudge_speed(model: &mut Model, delta: f32) {
    let swarm_id = model.selected_swarm;
    let mut parameters = match model.sim.registry().get(swarm_id) {
        Ok(swarm) => swarm.parameters,
        Err(err) => {
            warn!(swarm_id, error = %err, "no swarm selected");
            return;
        }
    };
    parameters.speed += delta;
    let parameters = parameters.clamped();
    match model.sim.adjust_swarm_parameters(swarm_id, parameters) {
        Ok(()) => info!(swarm_id, speed = parameters.speed, "swarm speed changed"),
        Err(err) => warn!(swarm_id, error = %err, "speed change rejected"),
    }
}

fn key_pressed(app: &App, model: &mut Model, key: Key) {
    let swarm_id = model.selected_swarm;
    match key {
        Key::A => {
            if let Err(err) = model.sim.add_boid(swarm_id) {
                warn!(swarm_id, error = %err, "add boid rejected");
            }
        }
        Key::R => {
            if let Err(err) = model.sim.remove_boid(swarm_id) {
                warn!(swarm_id, error = %err, "remove boid rejected");
            }
        }
        Key::F => {
            let half = model.sim.config().bounds_size() / 2.0;
            let mut rng = rand::thread_rng();
            let offset = vec3(
                rng.gen_range(-half.x..half.x),
                rng.gen_range(-half.y..half.y),
                rng.gen_range(-half.z..half.z),
            );
            let position = model.sim.config().origin() + offset;
            if let Err(err) = model.sim.add_food_attractor(position, app.time) {
                warn!(error = %err, "food attractor rejected");
            }
        }
        Key::Up => nudge_speed(model, 1.0),
        Key::Down => nudge_speed(model, -1.0),
        Key::Tab => {
            let swarms = model.sim.registry().len() as u32;
            if swarms > 0 {
                model.selected_swarm = (model.selected_swarm + 1) % swarms;
                info!(swarm_id = model.selected_swarm, "selected swarm");
            }
        }
        Key::I => {
            if let Err(err) = model.sim.reinitialize() {
                error!(error = %err, "reinitialization failed");
            }
        }
        _ => {}
    }
}

fn view(app: &App, model: &Model, frame: Frame) {
    let draw = app.draw();
    draw.background().color(BLACK);

    // Top-down (x, z) projection of the simulation volume
    let win = app.window_rect();
    let bounds = model.sim.config().bounds_size();
    let origin = model.sim.config().origin();
    let scale = win.w().min(win.h()) * 0.8 / bounds.x.max(bounds.z);

    draw.rect()
        .x_y(0.0, 0.0)
        .w_h(bounds.x * scale, bounds.z * scale)
        .no_fill()
        .stroke_weight(1.0)
        .stroke(rgba(0.3, 0.3, 0.3, 1.0));

    for position in model.sim.visuals().markers.values() {
        let p = (*position - origin) * scale;
        draw.ellipse().x_y(p.x, p.z).radius(4.0).color(ORANGE);
    }

    let mut lines = vec![model.sim.debug_info().summary()];
    for swarm in model.sim.registry().iter() {
        let marker = if swarm.swarm_id == model.selected_swarm { ">" } else { " " };
        lines.push(format!("{} swarm {} {:?}: {} boids", marker, swarm.swarm_id, swarm.swarm_type, swarm.boid_count));
    }
    lines.push(format!("draw calls: {}", model.draw_calls));

    draw.text(&lines.join("\n"))
        .xy(pt2(win.left() + 220.0, win.top() - 80.0))
        .w(420.0)
        .left_justify()
        .color(WHITE)
        .font_size(14);

    draw.to_frame(app, &frame).unwrap();
}
