// src/system.rs
//! Tick scheduler for every motor and mover.
//!
//! One fixed step runs, in order:
//! 1. every mover's velocity update,
//! 2. every motor's phase 1,
//! 3. mover poses pushed into the world,
//! 4. every motor's phase 2, each followed by its own pose push and the
//!    velocity changes it owes other characters.
//!
//! Motors and movers live in slot arenas addressed by generational handles and
//! are always visited in registration order.

use std::collections::HashMap;

use glam::Vec3;
use log::{debug, trace};

use crate::collision::{BodyDirectory, BodyId, CharacterBody, CollisionWorld};
use crate::config::SystemSettings;
use crate::math::Pose;
use crate::motor::CharacterMotor;
use crate::mover::PhysicsMover;
use crate::time::FixedStepClock;
use crate::{Error, Result};

/* -------------------------------------------------------------------------- */
/*                                 Handles                                    */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MotorHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MoverHandle {
    index: u32,
    generation: u32,
}

impl MotorHandle {
    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }
}

impl MoverHandle {
    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }
}

/* -------------------------------------------------------------------------- */
/*                                  Arena                                     */
/* -------------------------------------------------------------------------- */

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot storage with free-list reuse and a separate registration order.
struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    order: Vec<u32>,
}

impl<T> Arena<T> {
    fn with_capacity(capacity: usize) -> Self {
        Self { slots: Vec::with_capacity(capacity), free: Vec::new(), order: Vec::with_capacity(capacity) }
    }

    fn insert(&mut self, value: T) -> (u32, u32) {
        let index = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.value = Some(value);
                index
            }
            None => {
                self.slots.push(Slot { generation: 0, value: Some(value) });
                (self.slots.len() - 1) as u32
            }
        };
        self.order.push(index);
        (index, self.slots[index as usize].generation)
    }

    fn remove(&mut self, index: u32, generation: u32) -> Option<T> {
        let slot = self.slots.get_mut(index as usize)?;
        if slot.generation != generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        self.order.retain(|&i| i != index);
        Some(value)
    }

    fn get(&self, index: u32, generation: u32) -> Option<&T> {
        self.slots
            .get(index as usize)
            .filter(|s| s.generation == generation)
            .and_then(|s| s.value.as_ref())
    }

    fn get_mut(&mut self, index: u32, generation: u32) -> Option<&mut T> {
        self.slots
            .get_mut(index as usize)
            .filter(|s| s.generation == generation)
            .and_then(|s| s.value.as_mut())
    }

    #[inline]
    fn at_mut(&mut self, index: u32) -> Option<&mut T> {
        self.slots.get_mut(index as usize).and_then(|s| s.value.as_mut())
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn reserve(&mut self, capacity: usize) {
        self.order.reserve(capacity.saturating_sub(self.order.len()));
        self.slots.reserve(capacity.saturating_sub(self.slots.len()));
    }

    fn iter(&self) -> impl Iterator<Item = (u32, &T)> + '_ {
        self.order
            .iter()
            .filter_map(move |&i| self.slots[i as usize].value.as_ref().map(|v| (i, v)))
    }

    fn for_each_mut(&mut self, mut f: impl FnMut(u32, &mut T)) {
        for &i in &self.order {
            if let Some(v) = self.slots[i as usize].value.as_mut() {
                f(i, v);
            }
        }
    }

    fn generation(&self, index: u32) -> u32 {
        self.slots[index as usize].generation
    }
}

/* -------------------------------------------------------------------------- */
/*                                  System                                    */
/* -------------------------------------------------------------------------- */

pub struct KinematicCharacterSystem {
    settings: SystemSettings,
    motors: Arena<CharacterMotor>,
    movers: Arena<PhysicsMover>,
    bodies: BodyDirectory,
    character_slots: HashMap<BodyId, u32>,
    last_tick_dt: f32,
}

impl Default for KinematicCharacterSystem {
    fn default() -> Self {
        Self::new(SystemSettings::default())
    }
}

impl KinematicCharacterSystem {
    pub fn new(settings: SystemSettings) -> Self {
        Self {
            motors: Arena::with_capacity(settings.motors_capacity),
            movers: Arena::with_capacity(settings.movers_capacity),
            bodies: BodyDirectory::with_capacity(settings.movers_capacity, settings.motors_capacity),
            character_slots: HashMap::with_capacity(settings.motors_capacity),
            settings,
            last_tick_dt: 0.0,
        }
    }

    #[inline]
    pub fn settings(&self) -> &SystemSettings {
        &self.settings
    }

    /// Capacities only ever grow.
    pub fn set_settings(&mut self, settings: SystemSettings) {
        self.motors.reserve(settings.motors_capacity);
        self.movers.reserve(settings.movers_capacity);
        self.settings = settings;
    }

    // =========================================================================
    // Registration
    // =========================================================================

    pub fn register_motor(&mut self, motor: CharacterMotor) -> MotorHandle {
        let (index, generation) = self.motors.insert(motor);
        debug!("registered motor {index} (generation {generation})");
        MotorHandle { index, generation }
    }

    pub fn unregister_motor(&mut self, handle: MotorHandle) -> Result<CharacterMotor> {
        let motor = self
            .motors
            .remove(handle.index, handle.generation)
            .ok_or(Error::UnknownMotor(handle.index))?;
        debug!("unregistered motor {}", handle.index);
        Ok(motor)
    }

    pub fn register_mover(&mut self, mover: PhysicsMover) -> MoverHandle {
        let (index, generation) = self.movers.insert(mover);
        debug!("registered mover {index} (generation {generation})");
        MoverHandle { index, generation }
    }

    pub fn unregister_mover(&mut self, handle: MoverHandle) -> Result<PhysicsMover> {
        let mover = self
            .movers
            .remove(handle.index, handle.generation)
            .ok_or(Error::UnknownMover(handle.index))?;
        debug!("unregistered mover {}", handle.index);
        Ok(mover)
    }

    pub fn motor(&self, handle: MotorHandle) -> Result<&CharacterMotor> {
        self.motors.get(handle.index, handle.generation).ok_or(Error::UnknownMotor(handle.index))
    }

    pub fn motor_mut(&mut self, handle: MotorHandle) -> Result<&mut CharacterMotor> {
        self.motors.get_mut(handle.index, handle.generation).ok_or(Error::UnknownMotor(handle.index))
    }

    pub fn mover(&self, handle: MoverHandle) -> Result<&PhysicsMover> {
        self.movers.get(handle.index, handle.generation).ok_or(Error::UnknownMover(handle.index))
    }

    pub fn mover_mut(&mut self, handle: MoverHandle) -> Result<&mut PhysicsMover> {
        self.movers.get_mut(handle.index, handle.generation).ok_or(Error::UnknownMover(handle.index))
    }

    #[inline] pub fn motor_count(&self) -> usize { self.motors.len() }
    #[inline] pub fn mover_count(&self) -> usize { self.movers.len() }

    /// Motors in registration order.
    pub fn motors(&self) -> impl Iterator<Item = (MotorHandle, &CharacterMotor)> + '_ {
        self.motors
            .iter()
            .map(move |(index, m)| (MotorHandle { index, generation: self.motors.generation(index) }, m))
    }

    /// Movers in registration order.
    pub fn movers(&self) -> impl Iterator<Item = (MoverHandle, &PhysicsMover)> + '_ {
        self.movers
            .iter()
            .map(move |(index, m)| (MoverHandle { index, generation: self.movers.generation(index) }, m))
    }

    // =========================================================================
    // Simulation
    // =========================================================================

    /// Entry point for a host's fixed-rate callback.
    pub fn fixed_update(&mut self, world: &mut dyn CollisionWorld, dt: f32) {
        if !self.settings.auto_simulation {
            return;
        }
        if self.settings.interpolate {
            self.pre_simulation_interpolation_update(world);
        }
        self.simulate(world, dt);
        if self.settings.interpolate {
            self.post_simulation_interpolation_update(dt);
        }
    }

    /// Runs the fixed steps `clock` owes for this frame and returns the
    /// render interpolation fraction.
    pub fn run_frame(&mut self, world: &mut dyn CollisionWorld, clock: &mut FixedStepClock, frame_dt: f32) -> f32 {
        let dt = clock.fixed_dt();
        for _ in clock.advance(frame_dt) {
            self.fixed_update(world, dt);
        }
        clock.alpha()
    }

    /// One fixed step, ignoring `auto_simulation`.
    pub fn simulate(&mut self, world: &mut dyn CollisionWorld, dt: f32) {
        trace!("simulate {} motors, {} movers, dt {dt}", self.motors.len(), self.movers.len());

        self.movers.for_each_mut(|_, mover| mover.velocity_update(dt));

        self.rebuild_body_directory();

        let bodies = &self.bodies;
        self.motors.for_each_mut(|_, motor| motor.update_phase1(world, bodies, dt));

        self.movers.for_each_mut(|_, mover| mover.sync_to_world(world));
        world.update_queries();

        for i in 0..self.motors.order.len() {
            let index = self.motors.order[i];
            let Some(motor) = self.motors.at_mut(index) else { continue };

            motor.update_phase2(world, &self.bodies, dt);

            let core = motor.core_mut();
            if let Some(body) = core.body() {
                world.set_body_pose(body, core.transient_position(), core.transient_rotation());
                world.update_queries();
            }

            let pushes = core.take_character_pushes();
            for push in pushes {
                let Some(&target) = self.character_slots.get(&push.body) else { continue };
                if let Some(other) = self.motors.at_mut(target) {
                    let core = other.core_mut();
                    core.set_base_velocity(core.base_velocity() + push.velocity_change);
                    trace!("motor {target} pushed by {:?}", push.velocity_change);
                }
            }
        }
    }

    fn rebuild_body_directory(&mut self) {
        self.bodies.clear();
        self.character_slots.clear();

        let bodies = &mut self.bodies;
        self.movers.for_each_mut(|_, mover| bodies.set_mover(mover.body(), mover.velocities()));

        let slots = &mut self.character_slots;
        self.motors.for_each_mut(|index, motor| {
            let core = motor.core();
            if let Some(body) = core.body() {
                bodies.set_character(
                    body,
                    CharacterBody { mass: core.config().simulated_character_mass, base_velocity: core.base_velocity() },
                );
                slots.insert(body, index);
            }
        });
    }

    // =========================================================================
    // Interpolation
    // =========================================================================

    /// Remembers the pre-tick poses and puts movers back at their transient pose.
    pub fn pre_simulation_interpolation_update(&mut self, world: &mut dyn CollisionWorld) {
        self.motors.for_each_mut(|_, motor| motor.core_mut().mark_initial_tick_pose());
        self.movers.for_each_mut(|_, mover| {
            mover.mark_initial_tick_pose();
            mover.sync_to_world(world);
        });
        world.update_queries();
    }

    pub fn post_simulation_interpolation_update(&mut self, dt: f32) {
        self.last_tick_dt = dt;
    }

    /// Fraction of the last tick covered `elapsed` seconds after it ran.
    pub fn interpolation_factor(&self, elapsed: f32) -> f32 {
        if self.last_tick_dt <= 0.0 {
            return 1.0;
        }
        (elapsed / self.last_tick_dt).clamp(0.0, 1.0)
    }

    /// Render pose between the pre-tick and the transient pose.
    pub fn interpolated_motor_pose(&self, handle: MotorHandle, factor: f32) -> Result<Pose> {
        let core = self.motor(handle)?.core();
        Ok(core.initial_tick_pose().interpolate(&core.transient_pose(), factor))
    }

    pub fn interpolated_mover_pose(&self, handle: MoverHandle, factor: f32) -> Result<Pose> {
        let mover = self.mover(handle)?;
        Ok(mover.initial_tick_pose().interpolate(&mover.transient_pose(), factor))
    }

    /// Applies a velocity change to the motor bound to `body`, if any.
    pub fn push_character(&mut self, body: BodyId, velocity_change: Vec3) -> bool {
        let found = self.motors.iter().find(|(_, m)| m.core().body() == Some(body)).map(|(i, _)| i);
        match found.and_then(|i| self.motors.at_mut(i)) {
            Some(motor) => {
                let core = motor.core_mut();
                core.set_base_velocity(core.base_velocity() + velocity_change);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::LayerMask;
    use crate::config::{MotorConfig, RigidbodyInteraction};
    use crate::motor::MotorCore;
    use crate::policy::{CharacterController, MoverController, PassiveController};
    use crate::rapier_world::RapierWorld;
    use glam::Quat;
    use std::cell::RefCell;
    use std::rc::Rc;

    const DT: f32 = 1.0 / 60.0;

    fn floor_world() -> RapierWorld {
        let mut world = RapierWorld::default();
        world.spawn_static_box(Vec3::new(0.0, -0.5, 0.0), Vec3::new(50.0, 0.5, 50.0), Quat::IDENTITY);
        world.update_queries();
        world
    }

    fn spawn_character(world: &mut RapierWorld, position: Vec3, config: MotorConfig) -> CharacterMotor {
        let motor = CharacterMotor::new(config, Box::new(PassiveController)).unwrap();
        let (body, collider) =
            world.spawn_character_capsule(motor.core().capsule(), position, Quat::IDENTITY, LayerMask::DEFAULT);
        world.update_queries();
        motor.with_body(body, collider).with_pose(position, Quat::IDENTITY)
    }

    #[test]
    fn stale_handles_are_rejected() {
        let mut system = KinematicCharacterSystem::default();
        let a = system.register_motor(CharacterMotor::new(MotorConfig::default(), Box::new(PassiveController)).unwrap());
        assert!(system.unregister_motor(a).is_ok());
        assert_eq!(system.unregister_motor(a).err(), Some(Error::UnknownMotor(a.index())));

        // the slot is reused under a new generation
        let b = system.register_motor(CharacterMotor::new(MotorConfig::default(), Box::new(PassiveController)).unwrap());
        assert_eq!(a.index(), b.index());
        assert!(system.motor(a).is_err_and(|e| e.is_handle()));
        assert!(system.motor(b).is_ok());

        let still = |_p: &mut Vec3, _r: &mut Quat, _dt: f32| {};
        let m = system.register_mover(PhysicsMover::new(BodyId(3), Vec3::ZERO, Quat::IDENTITY, Box::new(still)));
        system.unregister_mover(m).unwrap();
        assert_eq!(system.mover(m).err(), Some(Error::UnknownMover(m.index())));
    }

    #[test]
    fn iteration_follows_registration_order() {
        let mut system = KinematicCharacterSystem::default();
        let make = |x: f32| {
            CharacterMotor::new(MotorConfig::default(), Box::new(PassiveController))
                .unwrap()
                .with_pose(Vec3::new(x, 0.0, 0.0), Quat::IDENTITY)
        };
        let a = system.register_motor(make(0.0));
        let _b = system.register_motor(make(1.0));
        let _c = system.register_motor(make(2.0));
        system.unregister_motor(a).unwrap();
        let _d = system.register_motor(make(3.0));

        let xs: Vec<f32> = system.motors().map(|(_, m)| m.core().transient_position().x).collect();
        assert_eq!(xs, vec![1.0, 2.0, 3.0]);
        assert_eq!(system.motor_count(), 3);
    }

    struct Recorder {
        name: &'static str,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl CharacterController for Recorder {
        fn before_update(&mut self, _motor: &mut MotorCore, _dt: f32) {
            self.log.borrow_mut().push(format!("{} phase1", self.name));
        }
        fn after_update(&mut self, _motor: &mut MotorCore, _dt: f32) {
            self.log.borrow_mut().push(format!("{} phase2", self.name));
        }
    }

    struct LoggingMover(Rc<RefCell<Vec<String>>>);

    impl MoverController for LoggingMover {
        fn update_movement(&mut self, _position: &mut Vec3, _rotation: &mut Quat, _dt: f32) {
            self.0.borrow_mut().push("mover".to_string());
        }
    }

    #[test]
    fn phases_run_in_order() {
        let mut world = floor_world();
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut system = KinematicCharacterSystem::default();

        for name in ["a", "b"] {
            let ctrl = Recorder { name, log: log.clone() };
            system.register_motor(CharacterMotor::new(MotorConfig::default(), Box::new(ctrl)).unwrap());
        }
        let (platform, _) = world.spawn_kinematic_box(Vec3::new(20.0, 0.0, 0.0), Vec3::ONE, Quat::IDENTITY);
        system.register_mover(PhysicsMover::new(platform, Vec3::new(20.0, 0.0, 0.0), Quat::IDENTITY, Box::new(LoggingMover(log.clone()))));

        system.fixed_update(&mut world, DT);
        assert_eq!(*log.borrow(), vec!["mover", "a phase1", "b phase1", "a phase2", "b phase2"]);
    }

    #[test]
    fn auto_simulation_off_skips_fixed_update() {
        let mut world = floor_world();
        let log = Rc::new(RefCell::new(Vec::new()));
        let settings = SystemSettings { auto_simulation: false, ..SystemSettings::default() };
        let mut system = KinematicCharacterSystem::new(settings);
        system.register_motor(
            CharacterMotor::new(MotorConfig::default(), Box::new(Recorder { name: "a", log: log.clone() })).unwrap(),
        );

        system.fixed_update(&mut world, DT);
        assert!(log.borrow().is_empty());
        system.simulate(&mut world, DT);
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn character_rides_a_mover() {
        crate::init_logging();
        let mut world = RapierWorld::default();
        let start = Vec3::new(0.0, 1.0, 0.0);
        let (platform, _) = world.spawn_kinematic_box(start, Vec3::new(4.0, 0.5, 4.0), Quat::IDENTITY);
        world.update_queries();

        let mut system = KinematicCharacterSystem::default();
        let speed = Vec3::new(0.0, 0.0, 1.5);
        let slide = move |p: &mut Vec3, _r: &mut Quat, dt: f32| *p += speed * dt;
        let mover = system.register_mover(PhysicsMover::new(platform, start, Quat::IDENTITY, Box::new(slide)));

        let character = spawn_character(&mut world, Vec3::new(0.0, 1.503, 0.0), MotorConfig::default());
        let motor = system.register_motor(character);

        for _ in 0..3 {
            system.fixed_update(&mut world, DT);
        }
        // landing leaves the world-space velocity unchanged, so stand still relative to the platform
        system.motor_mut(motor).unwrap().core_mut().set_base_velocity(Vec3::ZERO);
        let before = system.motor(motor).unwrap().core().transient_position();
        for _ in 0..30 {
            system.fixed_update(&mut world, DT);
        }
        let core = system.motor(motor).unwrap().core();
        assert!(core.grounding_status().is_stable_on_ground);
        assert_eq!(core.attached_body(), Some(platform));

        let platform_travel = 30.0 * DT * speed.z;
        let travelled = core.transient_position() - before;
        assert!((travelled.z - platform_travel).abs() < 0.02, "travelled {travelled:?}");
        assert!((system.mover(mover).unwrap().velocity() - speed).length() < 1e-3);
    }

    #[test]
    fn interpolation_spans_the_last_tick() {
        let mut world = floor_world();
        let mut system = KinematicCharacterSystem::default();
        let mut config = MotorConfig::default();
        config.step_handling = crate::config::StepHandling::None;
        let motor = system.register_motor(spawn_character(&mut world, Vec3::new(0.0, 0.003, 0.0), config));
        system.fixed_update(&mut world, DT);

        system.motor_mut(motor).unwrap().core_mut().set_base_velocity(Vec3::new(6.0, 0.0, 0.0));
        system.fixed_update(&mut world, DT);

        let start = system.interpolated_motor_pose(motor, 0.0).unwrap();
        let end = system.interpolated_motor_pose(motor, 1.0).unwrap();
        let mid = system.interpolated_motor_pose(motor, system.interpolation_factor(DT * 0.5)).unwrap();
        assert!((end.position.x - start.position.x - 6.0 * DT).abs() < 1e-3);
        assert!((mid.position.x - (start.position.x + end.position.x) * 0.5).abs() < 1e-4);
        assert_eq!(system.interpolation_factor(DT * 3.0), 1.0);
    }

    #[test]
    fn run_frame_steps_the_clock() {
        let mut world = floor_world();
        let mut system = KinematicCharacterSystem::default();
        let log = Rc::new(RefCell::new(Vec::new()));
        system.register_motor(
            CharacterMotor::new(MotorConfig::default(), Box::new(Recorder { name: "a", log: log.clone() })).unwrap(),
        );

        let mut clock = FixedStepClock::new(1.0 / 64.0).unwrap();
        let alpha = system.run_frame(&mut world, &mut clock, 2.5 / 64.0);
        assert_eq!(clock.steps(), 2);
        assert_eq!(log.borrow().len(), 4);
        assert!((alpha - 0.5).abs() < 1e-4);
    }

    #[test]
    fn characters_exchange_momentum() {
        let mut world = floor_world();
        let config = MotorConfig {
            rigidbody_interaction: RigidbodyInteraction::SimulatedDynamic,
            step_handling: crate::config::StepHandling::None,
            ..MotorConfig::default()
        };
        let mut system = KinematicCharacterSystem::default();
        let left = system.register_motor(spawn_character(&mut world, Vec3::new(-0.6, 0.003, 0.0), config.clone()));
        let right = system.register_motor(spawn_character(&mut world, Vec3::new(0.6, 0.003, 0.0), config));
        system.fixed_update(&mut world, DT);

        // equal masses: the moving character hands half its speed to the idle one
        system.motor_mut(left).unwrap().core_mut().set_base_velocity(Vec3::new(2.0, 0.0, 0.0));
        for _ in 0..20 {
            system.fixed_update(&mut world, DT);
        }

        let l = system.motor(left).unwrap().core();
        let r = system.motor(right).unwrap().core();
        // never pass through each other
        assert!(r.transient_position().x - l.transient_position().x >= 1.0 - 1e-2);
        assert!((l.base_velocity().x - 1.0).abs() < 1e-2, "left {:?}", l.base_velocity());
        assert!((r.base_velocity().x - 1.0).abs() < 1e-2, "right {:?}", r.base_velocity());
        assert!((l.base_velocity().x + r.base_velocity().x - 2.0).abs() < 1e-2);
    }

    #[test]
    fn push_character_targets_bound_body() {
        let mut world = floor_world();
        let mut system = KinematicCharacterSystem::default();
        let character = spawn_character(&mut world, Vec3::ZERO, MotorConfig::default());
        let body = character.core().body().unwrap();
        let handle = system.register_motor(character);

        assert!(system.push_character(body, Vec3::X));
        assert_eq!(system.motor(handle).unwrap().core().base_velocity(), Vec3::X);
        assert!(!system.push_character(BodyId(999), Vec3::X));
    }
}
