//! # Simulation Integration Tests
//!
//! Whole-stack properties: store, spatial index, VM processor and the world
//! tick working together.

use std::sync::Arc;

use kinetic::{MasterStash, SimulationConfig, SimulationWorld};
use kinetic_core::{EntityStore, SpatialSystem};
use kinetic_shared::{
    layer, prop, CellChangeEvent, CellCoord, ColliderType, EntityId, IntentEvent, Tag, Vec3,
};
use kinetic_vm::{reg, FlowBuilder, ProgramRegistry};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

// =============================================================================
// Helpers
// =============================================================================

fn sphere(store: &mut EntityStore, entity: EntityId, radius: i32, layer: u8, mask: u8) {
    store.set_property(entity, prop::COLLIDER_TYPE, ColliderType::Sphere as i32);
    store.set_property(entity, prop::COLLIDER_RADIUS, radius);
    store.set_property(entity, prop::COLLISION_LAYER, i32::from(layer));
    store.set_property(entity, prop::COLLISION_MASK, i32::from(mask));
}

fn register(registry: &ProgramRegistry, flow: &mut FlowBuilder) {
    if let Err(err) = flow.build_and_register(registry) {
        panic!("program should build: {err}");
    }
}

// =============================================================================
// Store
// =============================================================================

/// A freed and re-allocated id starts blank.
#[test]
fn test_allocation_roundtrip() {
    let mut store = EntityStore::new();
    let e = store.allocate();
    store.set_property(e, prop::HEALTH, 90);
    store.set_property(e, prop::POS_X, 1234);
    store.add_tag(e, Tag::new("State.Stunned"));
    store.free(e);

    let again = store.allocate();
    assert_eq!(again, e);
    assert!((0..128u16).all(|p| store.get_property(again, p) == 0));
    assert!(store.tags(again).is_empty());
}

/// Identical call sequences give identical checksums.
#[test]
fn test_checksum_determinism() {
    let build = || {
        let mut store = EntityStore::new();
        for i in 0..10 {
            let e = store.allocate();
            store.set_property(e, prop::HEALTH, 100 - i);
            store.set_property(e, prop::TEAM, i % 2);
            store.add_tag(e, Tag::new("Unit.Soldier"));
        }
        store.mark_frame_completed(42);
        store
    };
    let a = build();
    let b = build();
    assert_eq!(a.calculate_checksum(), b.calculate_checksum());

    let mut c = build();
    c.mark_frame_completed(43);
    assert_ne!(a.calculate_checksum(), c.calculate_checksum());
}

/// Save then load reproduces every entity and the completed frame.
#[test]
fn test_serialization_roundtrip() {
    let mut store = EntityStore::new();
    let ids: Vec<EntityId> = (0..5).map(|_| store.allocate()).collect();
    for (i, &e) in ids.iter().enumerate() {
        let i = i32::try_from(i).unwrap_or(0);
        store.set_property(e, prop::HEALTH, 10 * i);
        store.set_property(e, prop::POS_Y, -500 * i);
        store.add_tag(e, Tag::new("Unit"));
    }
    store.add_tag(ids[3], Tag::new("Effect.Burning"));
    store.free(ids[1]);
    store.mark_frame_completed(17);

    let bytes = store.serialize_full_state();
    let mut restored = EntityStore::new();
    restored
        .deserialize_full_state(&bytes)
        .expect("state should decode");

    assert_eq!(restored.entity_count(), store.entity_count());
    assert_eq!(restored.completed_frame(), 17);
    assert!(!restored.is_valid(ids[1]));
    for e in store.iter_entities() {
        for p in 0..128u16 {
            assert_eq!(restored.get_property(e, p), store.get_property(e, p));
        }
        assert_eq!(restored.tags(e), store.tags(e));
    }
    assert_eq!(restored.calculate_checksum(), store.calculate_checksum());
    // The freed slot is reused first after a restore too.
    assert_eq!(restored.allocate(), ids[1]);
}

// =============================================================================
// Spatial
// =============================================================================

/// Exactly one event per real cell change, none within a cell.
#[test]
fn test_cell_transition_exactness() {
    let mut store = EntityStore::new();
    let mut spatial = SpatialSystem::new(5000.0);
    let e = store.allocate();
    spatial.on_entity_allocated(e);

    store.set_position(e, Vec3::new(2000.0, 2000.0, 0.0));
    spatial.update_entity_positions(&store);
    spatial.consume_cell_change_events();

    store.set_position(e, Vec3::new(5200.0, 2000.0, 0.0));
    spatial.update_entity_positions(&store);
    assert_eq!(
        spatial.consume_cell_change_events(),
        vec![CellChangeEvent {
            entity: e,
            old_cell: CellCoord::new(0, 0),
            new_cell: CellCoord::new(1, 0),
        }]
    );

    store.set_position(e, Vec3::new(5300.0, 2000.0, 0.0));
    spatial.update_entity_positions(&store);
    assert!(spatial.consume_cell_change_events().is_empty());
}

/// Penetration 20 is split evenly: each sphere moves 10.
#[test]
fn test_depenetration_symmetry() {
    let mut store = EntityStore::new();
    let mut spatial = SpatialSystem::new(5000.0);
    let a = store.allocate();
    let b = store.allocate();
    for e in [a, b] {
        spatial.on_entity_allocated(e);
        sphere(&mut store, e, 50, layer::DEFAULT, layer::ALL);
    }
    store.set_position(a, Vec3::new(0.0, 0.0, 0.0));
    store.set_position(b, Vec3::new(80.0, 0.0, 0.0));
    spatial.add_watched_entity(a);
    spatial.update_entity_positions(&store);

    let mut events = Vec::new();
    assert_eq!(spatial.resolve_overlaps_and_gen_events(&mut store, &mut events), 1);

    assert_eq!(store.get_property(a, prop::POS_X), -10);
    assert_eq!(store.get_property(b, prop::POS_X), 90);
    assert_eq!(store.get_property(a, prop::POS_Y), 0);
    assert_eq!(store.get_property(b, prop::POS_Y), 0);

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].source, a);
    assert_eq!(events[0].target, b);
    assert!(events[0].tag.matches(&Tag::new("Event.System")));
}

/// Incompatible layers never see each other, however much they overlap.
#[test]
fn test_layer_filtering() {
    let mut store = EntityStore::new();
    let mut spatial = SpatialSystem::new(5000.0);
    let a = store.allocate();
    let b = store.allocate();
    for e in [a, b] {
        spatial.on_entity_allocated(e);
    }
    sphere(&mut store, a, 100, layer::PLAYER, layer::ENEMY);
    sphere(&mut store, b, 100, layer::ENVIRONMENT, layer::PROJECTILE);
    store.set_position(a, Vec3::ZERO);
    store.set_position(b, Vec3::new(10.0, 0.0, 0.0));
    spatial.add_watched_entity(a);
    spatial.add_watched_entity(b);
    spatial.update_entity_positions(&store);

    let mut hits = Vec::new();
    spatial.overlap_sphere(&store, Vec3::ZERO, 100.0, layer::ENEMY, a, &mut hits);
    assert!(!hits.contains(&b));
    hits.clear();
    spatial.overlap_sphere(&store, Vec3::new(10.0, 0.0, 0.0), 100.0, layer::PROJECTILE, b, &mut hits);
    assert!(!hits.contains(&a));

    let mut pairs = Vec::new();
    assert_eq!(spatial.detect_watched_collisions(&store, &mut pairs), 0);
    assert_eq!(spatial.detect_all_collisions(&store, &mut pairs), 0);
    assert!(pairs.is_empty());

    // Same geometry with compatible layers does collide.
    sphere(&mut store, b, 100, layer::ENEMY, layer::PLAYER);
    spatial.mark_colliders_dirty();
    assert_eq!(spatial.detect_all_collisions(&store, &mut pairs), 1);
}

// =============================================================================
// VM through the world
// =============================================================================

/// One tick runs a program end to end and commits its write.
#[test]
fn test_vm_end_to_end() {
    let mut world = SimulationWorld::default();
    register(
        world.registry(),
        FlowBuilder::new("Test.SetHealth")
            .load_const(reg::R0, 77)
            .save_entity_property(reg::SELF, prop::HEALTH, reg::R0)
            .halt(),
    );
    let e = world.stash().allocate_entity();
    assert_eq!(world.store().get_property(e, prop::HEALTH), 0);

    world.add_input_event(IntentEvent::new(1, e, Tag::new("Test.SetHealth")));
    world.tick(1, 1.0 / 30.0);

    assert_eq!(world.store().get_property(e, prop::HEALTH), 77);
}

/// Resolve now, react later: a waiting guard wakes the tick after the
/// overlap, and the collision event runs its own program on that tick.
#[test]
fn test_collision_wait_end_to_end() {
    let mut world = SimulationWorld::default();
    register(
        world.registry(),
        FlowBuilder::new("Ability.Guard")
            .wait_collision(reg::SELF)
            .apply_damage_const(reg::HIT, 25)
            .halt(),
    );
    register(
        world.registry(),
        FlowBuilder::new("Event.System.OnCollision")
            .load_const(reg::R0, 9)
            .save_entity_property(reg::TARGET, prop::TEAM, reg::R0)
            .halt(),
    );

    let guard = world.stash().allocate_entity();
    let intruder = world.stash().allocate_entity();
    {
        let store = world.store_mut();
        sphere(store, guard, 50, layer::DEFAULT, layer::ALL);
        sphere(store, intruder, 50, layer::DEFAULT, layer::ALL);
        store.set_position(intruder, Vec3::new(1000.0, 0.0, 0.0));
        store.set_property(intruder, prop::HEALTH, 100);
    }

    world.add_input_event(IntentEvent::new(1, guard, Tag::new("Ability.Guard")));
    let stats = world.tick(1, 1.0 / 30.0);
    assert_eq!(stats.active_vms, 1);
    assert!(world.spatial().is_watched(guard));

    world
        .store_mut()
        .set_position(intruder, Vec3::new(60.0, 0.0, 0.0));
    let stats = world.tick(2, 1.0 / 30.0);
    assert_eq!(stats.collisions, 1);
    assert_eq!(world.store().get_property(intruder, prop::HEALTH), 100);

    let stats = world.tick(3, 1.0 / 30.0);
    assert_eq!(stats.vms_completed, 2);
    assert_eq!(stats.active_vms, 0);
    assert_eq!(world.store().get_property(intruder, prop::HEALTH), 75);
    assert_eq!(world.store().get_property(intruder, prop::TEAM), 9);
    assert!(!world.spatial().is_watched(guard));
}

/// Intents sent from another thread are picked up by the next tick.
#[test]
fn test_intents_from_another_thread() {
    let mut world = SimulationWorld::default();
    register(
        world.registry(),
        FlowBuilder::new("Test.Heal")
            .load_store(reg::R0, prop::PARAM0)
            .save_store(prop::HEALTH, reg::R0)
            .halt(),
    );
    let e = world.stash().allocate_entity();

    let sender = world.intent_sender();
    let producer = std::thread::spawn(move || {
        sender.send(IntentEvent::new(1, e, Tag::new("Test.Heal")).with_params(&[55]));
    });
    producer.join().expect("producer thread");

    world.tick(1, 0.0);
    assert_eq!(world.store().get_property(e, prop::HEALTH), 55);
}

/// Worlds sharing a registry and fed the same inputs agree after a restore.
#[test]
fn test_save_load_then_continue() {
    let registry = Arc::new(ProgramRegistry::new());
    register(
        &registry,
        FlowBuilder::new("Test.Bump")
            .load_store(reg::R0, prop::HEALTH)
            .add_imm(reg::R0, reg::R0, 1)
            .save_store(prop::HEALTH, reg::R0)
            .halt(),
    );
    let mut original = SimulationWorld::with_registry(SimulationConfig::default(), Arc::clone(&registry))
        .expect("default config is valid");
    let e = original.stash().allocate_entity();
    original.add_input_event(IntentEvent::new(1, e, Tag::new("Test.Bump")));
    original.tick(1, 0.0);

    let mut copy = SimulationWorld::with_registry(SimulationConfig::default(), registry)
        .expect("default config is valid");
    copy.load_state(&original.save_state()).expect("state loads");
    assert_eq!(copy.checksum(), original.checksum());

    for world in [&mut original, &mut copy] {
        world.add_input_event(IntentEvent::new(2, e, Tag::new("Test.Bump")));
        world.tick(2, 0.0);
    }
    assert_eq!(copy.store().get_property(e, prop::HEALTH), 2);
    assert_eq!(copy.checksum(), original.checksum());
}

// =============================================================================
// Randomized determinism
// =============================================================================

fn scripted_registry() -> Arc<ProgramRegistry> {
    let registry = Arc::new(ProgramRegistry::new());
    register(
        &registry,
        FlowBuilder::new("Test.Nudge")
            .load_store(reg::R0, prop::PARAM0)
            .get_position(reg::R1, reg::SELF)
            .add(reg::R1, reg::R1, reg::R0)
            .set_position(reg::SELF, reg::R1)
            .halt(),
    );
    register(
        &registry,
        FlowBuilder::new("Test.Strike")
            .yield_frames(2)
            .apply_damage_const(reg::TARGET, 7)
            .apply_effect(reg::TARGET, "Effect.Bleeding")
            .halt(),
    );
    register(
        &registry,
        FlowBuilder::new("Test.Pulse")
            .for_each_in_radius(reg::SELF, 3000)
            .apply_damage_const(reg::ITER, 1)
            .end_for_each()
            .halt(),
    );
    registry
}

fn run_scenario(seed: u64, registry: &Arc<ProgramRegistry>) -> (Vec<u32>, Vec<u8>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let config = SimulationConfig {
        cell_size: 2000.0,
        ..SimulationConfig::default()
    };
    let mut world =
        SimulationWorld::with_registry(config, Arc::clone(registry)).expect("valid config");

    let entities: Vec<EntityId> = (0..32)
        .map(|_| {
            let e = world.stash().allocate_entity();
            let store = world.store_mut();
            store.set_property(e, prop::HEALTH, rng.gen_range(50..200));
            store.set_position(
                e,
                Vec3::new(
                    rng.gen_range(-10_000.0..10_000.0),
                    rng.gen_range(-10_000.0..10_000.0),
                    0.0,
                ),
            );
            e
        })
        .collect();

    let tags = ["Test.Nudge", "Test.Strike", "Test.Pulse"];
    let mut checksums = Vec::new();
    for frame in 1..=60 {
        for event_id in 0..rng.gen_range(0..6) {
            let source = entities[rng.gen_range(0..entities.len())];
            let target = entities[rng.gen_range(0..entities.len())];
            let tag = tags[rng.gen_range(0..tags.len())];
            world.add_input_event(
                IntentEvent::new(frame * 100 + event_id, source, Tag::new(tag))
                    .with_target(target)
                    .with_params(&[rng.gen_range(-3000..3000)]),
            );
        }
        world.tick(frame, 1.0 / 30.0);
        checksums.push(world.checksum());
    }
    (checksums, world.save_state())
}

/// Same seed, same inputs: the same checksum every tick and byte-identical
/// final state.
#[test]
fn test_seeded_runs_are_identical() {
    let registry = scripted_registry();
    let (checksums_a, state_a) = run_scenario(0xC0FFEE, &registry);
    let (checksums_b, state_b) = run_scenario(0xC0FFEE, &registry);
    assert_eq!(checksums_a, checksums_b);
    assert_eq!(state_a, state_b);

    let (checksums_c, _) = run_scenario(7, &registry);
    assert_ne!(checksums_a, checksums_c);
}
