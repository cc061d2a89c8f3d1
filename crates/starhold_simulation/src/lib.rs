//! STARHOLD AI Coordination Core
//!
//! Координация автономных боевых NPC-юнитов: per-unit behavior state
//! machine, оценка угроз и выбор целей, backup-запросы между юнитами,
//! cooldown-планировщик зонных спавнов.
//!
//! Ядро ничего не рендерит и не считает физику; мир, навигация, оружие и
//! спавн — внешние collaborators за трейтами в [`host`]. Два периодических
//! расписания (быстрый юнит-тик и медленный зонный тик) — Bevy-системы в
//! FixedUpdate, питаются одними инжектируемыми часами [`SimClock`].

use std::sync::Arc;

use bevy::prelude::*;

pub mod behavior;
pub mod comms;
pub mod error;
pub mod host;
pub mod logger;
pub mod persistence;
pub mod registry;
pub mod spawn;
pub mod threat;
pub mod unit;

pub use behavior::{BehaviorConfig, BehaviorKind, BehaviorVariant};
pub use comms::CommunicationBus;
pub use error::SimError;
pub use host::{
    Navigator, SpawnExecutor, StubNavigator, StubSpawnExecutor, StubWeapons, StubWorld,
    WeaponsApi, WorldView,
};
pub use logger::{init_logger, set_log_level, set_logger, LogLevel, LogPrinter};
pub use registry::{EntityRegistry, RegistryListener, RegistryStatistics};
pub use spawn::{
    EncounterCatalog, EncounterManager, EncounterProfile, EncounterStatus, SpawnScheduler,
    SpawnStatistics, ZoneCatalog, ZoneDefinition,
};
pub use threat::{CombatPredictor, ThreatAssessor, WeaponClass};
pub use unit::{GridHandle, ManagedUnit, Mood, UnitId};

/// Конфигурация ядра (resource)
#[derive(Resource, Clone)]
pub struct SimConfig {
    pub seed: u64,
    /// Текущий сектор исполнения (матчится с sector_binding зон)
    pub sector: String,
    /// Каданс медленного зонного прохода
    pub zone_pass_interval_secs: f64,
    /// Каданс housekeeping (update_all + cleanup)
    pub housekeeping_interval_secs: f64,
    pub behavior: BehaviorConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            sector: "alpha".to_string(),
            zone_pass_interval_secs: 5.0,
            housekeeping_interval_secs: 10.0,
            behavior: BehaviorConfig::default(),
        }
    }
}

/// Единые инжектируемые часы обоих расписаний
///
/// Кадансы сравниваются с часами на каждом тике; отложенных wake-up'ов нет.
#[derive(Resource, Default)]
pub struct SimClock {
    pub now: f64,
    last_zone_pass: Option<f64>,
    last_housekeeping: Option<f64>,
}

#[derive(Resource)]
pub struct RegistryResource(pub EntityRegistry);

#[derive(Resource)]
pub struct SchedulerResource(pub SpawnScheduler);

/// Handle на stub-мир headless-аппа (для тестов и демо-раннера)
#[derive(Resource, Clone)]
pub struct StubWorldHandle(pub Arc<StubWorld>);

/// Главный plugin ядра: часы + оба расписания, chain для детерминизма
pub struct SimulationPlugin;

impl Plugin for SimulationPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(Time::<Fixed>::from_hz(60.0))
            .init_resource::<SimClock>()
            .add_systems(
                FixedUpdate,
                (advance_clock, unit_tick_pass, zone_pass, housekeeping_pass).chain(),
            );
    }
}

fn advance_clock(mut clock: ResMut<SimClock>, time: Res<Time>) {
    clock.now += time.delta_secs_f64();
}

/// Быстрое расписание: TickAll каждый FixedUpdate
fn unit_tick_pass(clock: Res<SimClock>, mut registry: ResMut<RegistryResource>) {
    registry.0.tick_all(clock.now);
}

/// Медленное расписание: зонный проход по своему кадансу
fn zone_pass(
    mut clock: ResMut<SimClock>,
    config: Res<SimConfig>,
    mut registry: ResMut<RegistryResource>,
    mut scheduler: ResMut<SchedulerResource>,
) {
    let now = clock.now;
    let due = clock
        .last_zone_pass
        .map_or(true, |last| now - last >= config.zone_pass_interval_secs);
    if !due {
        return;
    }
    clock.last_zone_pass = Some(now);
    scheduler.0.tick(now, &config.sector, &mut registry.0);
}

/// Housekeeping: update_all юнитов + ленивая чистка протухших handle
fn housekeeping_pass(
    mut clock: ResMut<SimClock>,
    config: Res<SimConfig>,
    mut registry: ResMut<RegistryResource>,
) {
    let now = clock.now;
    let due = clock
        .last_housekeeping
        .map_or(true, |last| now - last >= config.housekeeping_interval_secs);
    if !due {
        return;
    }
    clock.last_housekeeping = Some(now);
    registry.0.update_all();
    registry.0.cleanup_closed_grids();
}

/// Minimal Bevy App для headless-симуляции: stub-мир, registry и
/// scheduler уже вставлены как ресурсы
pub fn create_headless_app(seed: u64) -> App {
    let mut app = App::new();
    logger::init_logger();

    let config = SimConfig { seed, ..Default::default() };
    let world = Arc::new(StubWorld::new());
    let executor = Arc::new(StubSpawnExecutor::new(world.clone(), 0));

    let registry = EntityRegistry::new(
        world.clone(),
        Arc::new(StubNavigator::new()),
        Arc::new(StubWeapons::new()),
        config.behavior.clone(),
        seed,
    );
    let scheduler = SpawnScheduler::new(
        EncounterManager::new(EncounterCatalog::default(), 16, 7200.0),
        executor,
        world.clone(),
        seed,
    );

    app.add_plugins(MinimalPlugins)
        .insert_resource(config)
        .insert_resource(RegistryResource(registry))
        .insert_resource(SchedulerResource(scheduler))
        .insert_resource(StubWorldHandle(world))
        .add_plugins(SimulationPlugin);

    app
}
