#![cfg(not(target_arch = "wasm32"))]

//! Headless demo: a character walks across a small test course while a
//! platform slides back and forth, driven by a jittery frame clock.
//!
//! `kinematic_motor_demo [motor_config.json]`

use anyhow::{Context, Result};
use glam::{Quat, Vec3};
use log::{info, LevelFilter};

use kinematic_motor::math::{direction_tangent_to_surface, look_rotation, normalized, project_on_plane};
use kinematic_motor::{
    CharacterController, CharacterMotor, CollisionWorld, FixedStepClock, KinematicCharacterSystem, LayerMask,
    MotorConfig, MotorCore, PhysicsMover, RapierWorld, SystemSettings,
};

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const FIXED_DT: f32 = 1.0 / 60.0;
const SECONDS: f32 = 12.0;

/// Walks towards `heading` on the ground, falls otherwise.
struct Walker {
    heading: Vec3,
    speed: f32,
    sharpness: f32,
    gravity: Vec3,
}

impl CharacterController for Walker {
    fn update_rotation(&mut self, motor: &mut MotorCore, rotation: &mut Quat, _dt: f32) {
        let forward = normalized(project_on_plane(self.heading, motor.character_up()));
        if forward != Vec3::ZERO {
            *rotation = look_rotation(forward, motor.character_up());
        }
    }

    fn update_velocity(&mut self, motor: &mut MotorCore, velocity: &mut Vec3, dt: f32) {
        let grounding = motor.grounding_status();
        if grounding.is_stable_on_ground {
            let target = direction_tangent_to_surface(self.heading, grounding.ground_normal, motor.character_up())
                * self.speed;
            *velocity = velocity.lerp(target, 1.0 - (-self.sharpness * dt).exp());
        } else {
            *velocity += self.gravity * dt;
        }
    }
}

fn setup_logging() {
    env_logger::Builder::new()
        .filter_level(if cfg!(debug_assertions) { LevelFilter::Debug } else { LevelFilter::Info })
        .format_timestamp_millis()
        .format_target(false)
        .parse_default_env()
        .init();
}

fn load_config() -> Result<MotorConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let json = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            MotorConfig::from_json(&json).with_context(|| format!("parsing {path}"))
        }
        None => Ok(MotorConfig::default()),
    }
}

fn build_course(world: &mut RapierWorld) {
    // floor
    world.spawn_static_box(Vec3::new(0.0, -0.5, 20.0), Vec3::new(10.0, 0.5, 30.0), Quat::IDENTITY);
    // a low step, then a 25 degree ramp
    world.spawn_static_box(Vec3::new(0.0, 0.1, 4.0), Vec3::new(3.0, 0.1, 1.0), Quat::IDENTITY);
    let ramp = Quat::from_rotation_x(-25f32.to_radians());
    world.spawn_static_box(Vec3::new(0.0, 0.0, 9.0), Vec3::new(3.0, 0.2, 3.0), ramp);
    // crates to shove
    for i in 0..3 {
        world.spawn_dynamic_box(Vec3::new(-0.8 + i as f32 * 0.8, 0.3, 14.0), Vec3::splat(0.3), 50.0);
    }
    world.update_queries();
}

fn main() -> Result<()> {
    setup_logging();

    let config = load_config()?;
    let mut world = RapierWorld::default();
    build_course(&mut world);

    let mut system = KinematicCharacterSystem::new(SystemSettings::default());

    // platform sliding sideways at the end of the course
    let platform_start = Vec3::new(0.0, -0.25, 20.0);
    let (platform_body, _) =
        world.spawn_kinematic_box(platform_start, Vec3::new(2.0, 0.25, 2.0), Quat::IDENTITY);
    let mut elapsed = 0.0f32;
    let slide = move |position: &mut Vec3, _rotation: &mut Quat, dt: f32| {
        elapsed += dt;
        *position = platform_start + Vec3::X * (elapsed * 0.8).sin() * 3.0;
    };
    let platform = system.register_mover(PhysicsMover::new(platform_body, platform_start, Quat::IDENTITY, Box::new(slide)));

    let start = Vec3::new(0.0, 0.5, 0.0);
    let walker = Walker { heading: Vec3::Z, speed: 3.0, sharpness: 10.0, gravity: Vec3::new(0.0, -30.0, 0.0) };
    let motor = CharacterMotor::new(config, Box::new(walker)).context("building the motor")?;
    let (body, collider) = world.spawn_character_capsule(motor.core().capsule(), start, Quat::IDENTITY, LayerMask::DEFAULT);
    world.update_queries();
    let character = system.register_motor(motor.with_body(body, collider).with_pose(start, Quat::IDENTITY));

    let mut clock = FixedStepClock::new(FIXED_DT)?;
    let mut time = 0.0f32;
    let mut frame = 0u32;
    let mut next_report = 0.0f32;

    while time < SECONDS {
        // uneven frame pacing between 90 and 30 fps
        let frame_dt = if frame % 3 == 0 { 1.0 / 30.0 } else { 1.0 / 90.0 };
        frame += 1;
        time += frame_dt;

        let alpha = system.run_frame(&mut world, &mut clock, frame_dt);
        world.step(frame_dt);

        if time >= next_report {
            next_report += 1.0;
            let core = system.motor(character)?.core();
            let rendered = system.interpolated_motor_pose(character, alpha)?;
            let grounding = core.grounding_status();
            info!(
                "t={time:5.2}s pos=({:6.2}, {:5.2}, {:6.2}) stable={} attached={:?} v={:.2}",
                rendered.position.x,
                rendered.position.y,
                rendered.position.z,
                grounding.is_stable_on_ground,
                core.attached_body(),
                core.velocity().length(),
            );
        }
    }

    let final_state = system.motor(character)?.core().state();
    let platform_state = system.mover(platform)?.state();
    info!("ran {} fixed steps", clock.steps());
    println!("{}", serde_json::to_string_pretty(&final_state)?);
    println!("{}", serde_json::to_string_pretty(&platform_state)?);
    Ok(())
}
