//! Query cache behavior and archetype migration through the world API.

use helios_ecs::archetype::ArchetypesConfig;
use helios_ecs::component::component_type_id_of;
use helios_ecs::query::QueryDescriptor;
use helios_ecs::world::World;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Velocity {
    dx: f32,
    dy: f32,
}

struct Frozen;

#[test]
fn repeated_matching_returns_identical_results() {
    let mut world = World::new();
    world.spawn((Position { x: 0.0, y: 0.0 },));
    world.spawn((Position { x: 1.0, y: 0.0 }, Velocity { dx: 0.0, dy: 0.0 }));

    let descriptor = QueryDescriptor::new([component_type_id_of::<Position>()], []);
    let first = world.archetypes().matching(&descriptor);
    let second = world.archetypes().matching(&descriptor);

    // No structural change in between: same archetypes, same order
    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
}

#[test]
fn migration_by_add_preserves_values_and_caches_edge() {
    let mut world = World::new();
    let first = world.spawn((Position { x: 5.0, y: 6.0 },));
    let second = world.spawn((Position { x: 7.0, y: 8.0 },));

    let single_archetype = world.entity_location(first).unwrap().archetype;
    assert_eq!(world.archetypes().archetype(single_archetype).unwrap().len(), 2);

    world
        .add_component(first, Velocity { dx: 1.0, dy: 0.0 })
        .unwrap();

    // Values survive the move byte for byte
    assert_eq!(
        world.get_component::<Position>(first),
        Some(&Position { x: 5.0, y: 6.0 })
    );

    // The source archetype shrank by one row
    assert_eq!(world.archetypes().archetype(single_archetype).unwrap().len(), 1);

    // The second migration lands in the same target archetype via the edge
    world
        .add_component(second, Velocity { dx: 0.0, dy: 1.0 })
        .unwrap();
    assert_eq!(
        world.entity_location(first).unwrap().archetype,
        world.entity_location(second).unwrap().archetype
    );
}

#[test]
fn query_results_track_structural_changes() {
    let mut world = World::new();
    let lone = world.spawn((Position { x: 0.0, y: 0.0 },));

    assert_eq!(world.query::<(&Position,)>().count(), 1);

    // New matching archetype appears
    world.spawn((Position { x: 1.0, y: 1.0 }, Velocity { dx: 0.0, dy: 0.0 }));
    assert_eq!(world.query::<(&Position,)>().count(), 2);

    // Destruction empties an archetype, which then stops matching
    world.destroy_entity(lone).unwrap();
    assert_eq!(world.query::<(&Position,)>().count(), 1);
}

#[test]
fn without_predicate_respects_migrations() {
    let mut world = World::new();
    let entity = world.spawn((Position { x: 0.0, y: 0.0 },));
    world.spawn((Position { x: 1.0, y: 0.0 }, Frozen));

    assert_eq!(world.query::<(&Position,)>().without::<Frozen>().count(), 1);

    world.add_component(entity, Frozen).unwrap();
    assert_eq!(world.query::<(&Position,)>().without::<Frozen>().count(), 0);

    world.remove_component::<Frozen>(entity).unwrap();
    assert_eq!(world.query::<(&Position,)>().without::<Frozen>().count(), 1);
}

#[test]
fn disabled_cache_still_answers_correctly() {
    let config = ArchetypesConfig {
        query_cache_capacity: 16,
        use_query_cache: false,
    };
    let mut world = World::with_config(&config);

    world.spawn((Position { x: 0.0, y: 0.0 },));
    world.spawn((Position { x: 1.0, y: 0.0 }, Velocity { dx: 0.0, dy: 0.0 }));

    for _ in 0..3 {
        assert_eq!(world.query::<(&Position,)>().count(), 2);
        assert_eq!(world.query::<(&Velocity,)>().count(), 1);
    }
}

#[test]
fn tiny_lru_capacity_evicts_but_stays_correct() {
    let config = ArchetypesConfig {
        query_cache_capacity: 1,
        use_query_cache: true,
    };
    let mut world = World::with_config(&config);

    world.spawn((Position { x: 0.0, y: 0.0 },));
    world.spawn((Velocity { dx: 0.0, dy: 0.0 },));

    // Alternate two descriptors through a single-entry cache
    for _ in 0..4 {
        assert_eq!(world.query::<(&Position,)>().count(), 1);
        assert_eq!(world.query::<(&Velocity,)>().count(), 1);
    }
}

#[test]
fn add_then_remove_restores_prior_archetype() {
    let mut world = World::new();
    let entity = world.spawn((Position { x: 0.0, y: 0.0 },));
    let before = world.entity_location(entity).unwrap().archetype;

    world
        .add_component(entity, Velocity { dx: 0.0, dy: 0.0 })
        .unwrap();
    world.remove_component::<Velocity>(entity).unwrap();

    assert_eq!(world.entity_location(entity).unwrap().archetype, before);
}
