//! Headless-запуск ядра STARHOLD
//!
//! Bevy App без рендера: stub-мир, одна зона спавна, пара сторожевых
//! юнитов и враг. Печатает прогресс и итоговую статистику.

use bevy::prelude::*;
use starhold_simulation::{
    create_headless_app, set_log_level, EncounterCatalog, EncounterProfile, LogLevel, Mood,
    RegistryResource, SchedulerResource, StubWorldHandle, ZoneCatalog,
};

fn main() {
    let seed = 42;
    set_log_level(LogLevel::Info);
    println!("Starting STARHOLD headless simulation (seed: {})", seed);

    let mut app = create_headless_app(seed);
    seed_scenario(&mut app);

    for tick in 0..1000 {
        app.update();

        if tick % 100 == 0 {
            let stats = app.world().resource::<RegistryResource>().0.get_statistics();
            println!(
                "Tick {}: {} units (attack {}, patrol {}, retreat {}), mean health {:.2}",
                tick, stats.total, stats.attack, stats.patrol, stats.retreat, stats.mean_health_ratio
            );
        }
    }

    let spawn_stats = app.world().resource::<SchedulerResource>().0.statistics();
    println!(
        "Simulation complete: {} spawned, {} encounters active",
        spawn_stats.total_spawned, spawn_stats.active_encounters
    );
}

fn seed_scenario(app: &mut App) {
    let world = app.world().resource::<StubWorldHandle>().0.clone();
    world.set_relation(1, 2, starhold_simulation::host::FactionRelation::Hostile);
    // Фракция 0 — юниты, рождённые stub-executor'ом зоны
    world.set_relation(1, 0, starhold_simulation::host::FactionRelation::Hostile);

    // Два сторожа базы и один враждебный рейдер
    let g1 = world.add_grid(Vec3::new(100.0, 0.0, 0.0), Some(1), 2000.0);
    let g2 = world.add_grid(Vec3::new(-100.0, 0.0, 0.0), Some(1), 2000.0);
    world.add_grid(Vec3::new(450.0, 0.0, 300.0), Some(2), 1200.0);

    {
        let mut registry = app.world_mut().resource_mut::<RegistryResource>();
        registry.0.register_unit(g1, Mood::Guard).unwrap();
        registry.0.register_unit(g2, Mood::Guard).unwrap();
    }

    let mut scheduler = app.world_mut().resource_mut::<SchedulerResource>();
    scheduler.0.encounters.reload_catalog(EncounterCatalog {
        profiles: vec![EncounterProfile {
            id: "raider_pair".to_string(),
            prefab_ids: vec!["raider_mk1".to_string(), "raider_mk1".to_string()],
            default_mood: Mood::Aggressive,
        }],
    });
    let zones = ZoneCatalog::from_json(
        r#"{
            "zones": [{
                "id": "outer_belt",
                "center": [2000.0, 0.0, 0.0],
                "radius": 1000.0,
                "spawn_interval_secs": 600.0,
                "profile_pool": ["raider_pair"]
            }]
        }"#,
    )
    .expect("embedded zone catalog is valid");
    scheduler.0.load_zones(zones);
}
