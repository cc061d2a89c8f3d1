//! Spawn scheduler integration: зонный цикл от cooldown'а до живых юнитов
//!
//! Проверяем:
//! - Сценарий зоны: t=0 спавн внутри сферы, t=599 false, t=600 снова спавн
//! - Позиция спавна всегда в пределах радиуса зоны
//! - Cap encounter'ов: отказ без частичного состояния, зона не ретраит
//! - Заспавненные юниты живут в registry и ввязываются в бой
//! - Детект завершения encounter'а после зачистки

use std::sync::Arc;

use bevy::prelude::*;
use starhold_simulation::host::FactionRelation;
use starhold_simulation::*;

const RAIDER_FACTION: u64 = 2;

fn raider_catalog() -> EncounterCatalog {
    EncounterCatalog {
        profiles: vec![EncounterProfile {
            id: "raider_pair".to_string(),
            prefab_ids: vec!["raider_mk1".to_string(), "raider_mk1".to_string()],
            default_mood: Mood::Aggressive,
        }],
    }
}

fn belt_zone() -> ZoneDefinition {
    ZoneDefinition {
        id: "outer_belt".to_string(),
        center: Vec3::new(2000.0, 0.0, 0.0),
        radius: 1000.0,
        active: true,
        spawn_interval_secs: 600.0,
        last_spawn: None,
        profile_pool: vec!["raider_pair".to_string()],
        sector_binding: Vec::new(),
    }
}

struct Sim {
    stub: Arc<StubWorld>,
    registry: EntityRegistry,
    scheduler: SpawnScheduler,
}

fn create_sim(max_encounters: usize) -> Sim {
    let stub = Arc::new(StubWorld::new());
    stub.set_relation(1, RAIDER_FACTION, FactionRelation::Hostile);

    let registry = EntityRegistry::new(
        stub.clone(),
        Arc::new(StubNavigator::new()),
        Arc::new(StubWeapons::new()),
        BehaviorConfig::default(),
        42,
    );
    let executor = Arc::new(StubSpawnExecutor::new(stub.clone(), RAIDER_FACTION));
    let mut scheduler = SpawnScheduler::new(
        EncounterManager::new(raider_catalog(), max_encounters, 7200.0),
        executor,
        stub.clone(),
        42,
    );
    scheduler.add_zone(belt_zone());
    Sim { stub, registry, scheduler }
}

#[test]
fn test_zone_cycle_t0_t599_t600() {
    let mut sim = create_sim(8);

    sim.scheduler.tick(0.0, "alpha", &mut sim.registry);
    assert_eq!(sim.registry.len(), 2);
    assert_eq!(sim.scheduler.statistics().total_spawned, 2);

    // Все заспавненные — внутри сферы зоны (плюс разнос префабов executor'ом)
    let center = belt_zone().center;
    for unit in sim.registry.units_ordered() {
        assert!(unit.spawn_position.distance(center) <= 1000.0 + 100.0);
        assert_eq!(unit.mood, Mood::Aggressive);
    }

    sim.scheduler.tick(599.0, "alpha", &mut sim.registry);
    assert_eq!(sim.registry.len(), 2, "cooldown must hold at 599s");

    sim.scheduler.tick(600.0, "alpha", &mut sim.registry);
    assert_eq!(sim.registry.len(), 4);
}

#[test]
fn test_cap_holds_and_no_retry_within_interval() {
    let mut sim = create_sim(1);

    sim.scheduler.tick(0.0, "alpha", &mut sim.registry);
    assert_eq!(sim.scheduler.statistics().active_encounters, 1);

    // Cap достигнут: отказ, но cooldown зоны всё равно взведён
    sim.scheduler.tick(600.0, "alpha", &mut sim.registry);
    assert_eq!(sim.registry.len(), 2);
    assert_eq!(sim.scheduler.statistics().rejected_by_cap, 1);

    sim.scheduler.tick(601.0, "alpha", &mut sim.registry);
    assert_eq!(sim.scheduler.statistics().rejected_by_cap, 1, "no retry within interval");
}

#[test]
fn test_spawned_raiders_engage_defenders() {
    let mut sim = create_sim(8);

    // Узкая зона: любой спавн гарантированно в engagement range сторожа
    let mut zone = belt_zone();
    zone.id = "close_belt".to_string();
    zone.radius = 300.0;
    sim.scheduler.set_zone_active("outer_belt", false);
    sim.scheduler.add_zone(zone);

    // Сторож базы в центре зоны
    let guard = sim.stub.add_grid(Vec3::new(2000.0, 0.0, 0.0), Some(1), 2000.0);
    sim.registry.register_unit(guard, Mood::Guard).unwrap();

    sim.scheduler.tick(0.0, "alpha", &mut sim.registry);
    assert_eq!(sim.registry.len(), 3);

    // Рейдеры ≤ 350м от сторожа (радиус зоны + разнос префабов) — кто-то
    // из сторон видит противника уже на первом тике
    sim.registry.tick_all(0.0);
    let engaged = sim
        .registry
        .units_ordered()
        .iter()
        .any(|u| matches!(u.behavior, BehaviorVariant::Attack { target: Some(_) }));
    assert!(engaged);
}

#[test]
fn test_encounter_completed_after_wipe() {
    let mut sim = create_sim(8);
    sim.scheduler.tick(0.0, "alpha", &mut sim.registry);

    // Зачистка: все заспавненные handle уничтожаются миром
    let handles: Vec<GridHandle> =
        sim.registry.units_ordered().iter().map(|u| u.handle).collect();
    for handle in handles {
        sim.stub.destroy(handle);
    }
    sim.registry.cleanup_closed_grids();
    assert!(sim.registry.is_empty());

    // Следующий зонный проход замечает завершение
    sim.scheduler.tick(10.0, "alpha", &mut sim.registry);
    assert_eq!(sim.scheduler.statistics().active_encounters, 0);
}

#[test]
fn test_inactive_zone_never_spawns() {
    let mut sim = create_sim(8);
    sim.scheduler.set_zone_active("outer_belt", false);

    for t in 0..5 {
        sim.scheduler.tick(t as f64 * 600.0, "alpha", &mut sim.registry);
    }
    assert_eq!(sim.registry.len(), 0);
    assert_eq!(sim.scheduler.statistics().total_spawned, 0);
}

#[test]
fn test_sector_bound_zone_ignores_foreign_sector() {
    let mut sim = create_sim(8);
    let mut zone = belt_zone();
    zone.id = "bound".to_string();
    zone.sector_binding = vec!["beta".to_string()];
    sim.scheduler.set_zone_active("outer_belt", false);
    sim.scheduler.add_zone(zone);

    sim.scheduler.tick(0.0, "alpha", &mut sim.registry);
    assert_eq!(sim.registry.len(), 0);

    sim.scheduler.tick(1.0, "beta", &mut sim.registry);
    assert_eq!(sim.registry.len(), 2);
}
