//! Зоны спавна и cooldown-планировщик
//!
//! Зона — пространственный регион со своим интервалом спавна и пулом
//! encounter-профилей. Cooldown — сравнение часов на каждом тике, без
//! отложенных wake-up'ов. MarkSpawned вызывается безусловно на попытке:
//! неудачи не ретраятся внутри того же интервала.

mod encounters;

pub use encounters::{
    EncounterCatalog, EncounterInstance, EncounterManager, EncounterProfile, EncounterStatus,
    SpawnStatistics,
};

use std::sync::Arc;

use bevy::prelude::*;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::host::{SpawnExecutor, WorldView};
use crate::logger;
use crate::registry::EntityRegistry;

/// Декларативная запись зоны (JSON-каталог)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneEntry {
    pub id: String,
    pub center: [f32; 3],
    pub radius: f32,
    pub spawn_interval_secs: f64,
    pub profile_pool: Vec<String>,
    #[serde(default)]
    pub sector_binding: Vec<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZoneCatalog {
    pub zones: Vec<ZoneEntry>,
}

impl ZoneCatalog {
    pub fn from_json(json: &str) -> Result<Self, SimError> {
        serde_json::from_str(json).map_err(|e| {
            logger::log_error(&format!("Zones: catalog parse failed: {}", e));
            SimError::InvalidArgument("malformed zone catalog")
        })
    }
}

/// Runtime-состояние зоны. Мутируется только mark_spawned и
/// административными toggles; удаляется только на reload.
#[derive(Debug, Clone)]
pub struct ZoneDefinition {
    pub id: String,
    pub center: Vec3,
    pub radius: f32,
    pub active: bool,
    pub spawn_interval_secs: f64,
    pub last_spawn: Option<f64>,
    pub profile_pool: Vec<String>,
    /// Пустой список — зона не привязана к сектору
    pub sector_binding: Vec<String>,
}

impl ZoneDefinition {
    pub fn from_entry(entry: ZoneEntry) -> Self {
        Self {
            id: entry.id,
            center: Vec3::from_array(entry.center),
            radius: entry.radius,
            active: entry.active,
            spawn_interval_secs: entry.spawn_interval_secs,
            last_spawn: None,
            profile_pool: entry.profile_pool,
            sector_binding: entry.sector_binding,
        }
    }

    /// true ⟺ зона активна, пул непуст, cooldown истёк (elapsed ≥ interval;
    /// ни одного спавна — сразу true) и сектор совпадает
    pub fn should_spawn(&self, now: f64, sector: &str) -> bool {
        if !self.active || self.profile_pool.is_empty() {
            return false;
        }
        if !self.sector_binding.is_empty()
            && !self.sector_binding.iter().any(|s| s == sector)
        {
            return false;
        }
        match self.last_spawn {
            None => true,
            Some(last) => now - last >= self.spawn_interval_secs,
        }
    }

    pub fn mark_spawned(&mut self, now: f64) {
        self.last_spawn = Some(now);
    }

    /// Точка внутри сферы зоны: center + dir × uniform(0, radius).
    /// Равномерно по радиусу, не по объёму.
    pub fn get_random_position_inside(&self, rng: &mut ChaCha8Rng) -> Vec3 {
        self.center + random_direction(rng) * rng.gen_range(0.0..=self.radius)
    }
}

/// Случайный единичный вектор (rejection sampling по кубу)
pub(crate) fn random_direction(rng: &mut ChaCha8Rng) -> Vec3 {
    loop {
        let v = Vec3::new(
            rng.gen_range(-1.0..=1.0f32),
            rng.gen_range(-1.0..=1.0f32),
            rng.gen_range(-1.0..=1.0f32),
        );
        let len_sq = v.length_squared();
        if len_sq > 1e-4 && len_sq <= 1.0 {
            return v / len_sq.sqrt();
        }
    }
}

/// Медленный тик: обходит зоны, по истечении cooldown'а выбирает профиль,
/// считает позицию, отдаёт executor'у и регистрирует юниты в registry
pub struct SpawnScheduler {
    zones: Vec<ZoneDefinition>,
    pub encounters: EncounterManager,
    executor: Arc<dyn SpawnExecutor>,
    world: Arc<dyn WorldView>,
    rng: ChaCha8Rng,
}

impl SpawnScheduler {
    pub fn new(
        encounters: EncounterManager,
        executor: Arc<dyn SpawnExecutor>,
        world: Arc<dyn WorldView>,
        seed: u64,
    ) -> Self {
        use rand::SeedableRng;
        Self {
            zones: Vec::new(),
            encounters,
            executor,
            world,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn add_zone(&mut self, zone: ZoneDefinition) {
        logger::log_info(&format!("Zones: {} registered (r={}m)", zone.id, zone.radius));
        self.zones.push(zone);
    }

    /// Полная замена зон из каталога (reload)
    pub fn load_zones(&mut self, catalog: ZoneCatalog) {
        self.zones = catalog.zones.into_iter().map(ZoneDefinition::from_entry).collect();
        logger::log_info(&format!("Zones: {} loaded from catalog", self.zones.len()));
    }

    pub fn zone(&self, id: &str) -> Option<&ZoneDefinition> {
        self.zones.iter().find(|z| z.id == id)
    }

    pub fn set_zone_active(&mut self, id: &str, active: bool) {
        if let Some(zone) = self.zones.iter_mut().find(|z| z.id == id) {
            zone.active = active;
        }
    }

    /// Один проход медленного расписания
    ///
    /// Rate modifier 0 завершает проход до каких-либо попыток: ни одна зона
    /// не получает mark_spawned. Любая попытка спавна (включая cap-отказ и
    /// отказ executor'а) помечает зону: минимум одна попытка на интервал.
    pub fn tick(&mut self, now: f64, sector: &str, registry: &mut EntityRegistry) {
        if !self.encounters.spawning_enabled() {
            return;
        }

        self.encounters.cleanup(self.world.as_ref(), now);

        for i in 0..self.zones.len() {
            if !self.zones[i].should_spawn(now, sector) {
                continue;
            }

            // Per-player toggle: зона с выключившим спавн игроком внутри
            // пропускается без mark_spawned (это не попытка)
            let zone_center = self.zones[i].center;
            let zone_radius = self.zones[i].radius;
            let blocked = self.world.players().iter().any(|p| {
                p.position.distance(zone_center) <= zone_radius
                    && !self.encounters.is_player_enabled(p.id)
            });
            if blocked {
                continue;
            }

            // Попытка началась: cooldown сбрасывается независимо от исхода
            self.zones[i].mark_spawned(now);

            let pool_len = self.zones[i].profile_pool.len();
            let profile_id = self.zones[i].profile_pool[self.rng.gen_range(0..pool_len)].clone();

            let Some(profile) = self.encounters.catalog().get(&profile_id).cloned() else {
                logger::log_warning(&format!(
                    "Zones: {} references unknown profile {}",
                    self.zones[i].id, profile_id
                ));
                continue;
            };

            let position = self.zones[i].get_random_position_inside(&mut self.rng);

            let instance_id = match self.encounters.begin_encounter(&profile_id, position, now) {
                Ok(id) => id,
                Err(e) => {
                    logger::log_warning(&format!("Zones: {} spawn rejected: {}", self.zones[i].id, e));
                    continue;
                }
            };

            match self.executor.spawn_encounter(&profile, position) {
                Ok(handles) => {
                    logger::log(&format!(
                        "Zones: {} spawned {} ({} units) at {:?}",
                        self.zones[i].id, profile_id, handles.len(), position
                    ));
                    // Executor возвращает по одному handle на префаб, в порядке пула
                    for (&handle, prefab_id) in handles.iter().zip(&profile.prefab_ids) {
                        match registry.register_unit(handle, profile.default_mood) {
                            Ok(unit_id) => registry.set_prefab(unit_id, prefab_id),
                            Err(e) => {
                                logger::log_warning(&format!("Zones: spawned unit rejected: {}", e))
                            }
                        }
                    }
                    self.encounters.record_spawned(instance_id, handles);
                }
                Err(e) => {
                    logger::log_warning(&format!("Zones: {} executor failed: {}", self.zones[i].id, e));
                    self.encounters.mark_failed(instance_id);
                }
            }
        }
    }

    /// Принудительный снос encounter'а: каждый заспавненный grid снимается
    /// с учёта registry и despawn'ится executor'ом, инстанс помечается
    /// Despawned (GC на следующем cleanup-проходе). Повторный снос и снос
    /// уже терминального инстанса — no-op.
    pub fn despawn_encounter(
        &mut self,
        instance_id: u64,
        registry: &mut EntityRegistry,
    ) -> Result<(), SimError> {
        let Some(instance) = self.encounters.instance(instance_id) else {
            logger::log_warning(&format!(
                "Encounters: despawn of unknown instance {} — no-op",
                instance_id
            ));
            return Err(SimError::InvalidArgument("unknown encounter instance"));
        };
        if instance.status.is_terminal() {
            return Ok(());
        }

        let handles = instance.spawned_handles.clone();
        for handle in handles {
            if let Some(id) = registry.unit_by_handle(handle).map(|u| u.id) {
                registry.unregister_unit(id);
            }
            self.executor.despawn(handle);
        }

        self.encounters.mark_despawned(instance_id);
        logger::log(&format!("Encounters: {} despawned", instance_id));
        Ok(())
    }

    pub fn statistics(&self) -> SpawnStatistics {
        self.encounters.statistics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::BehaviorConfig;
    use crate::host::{StubNavigator, StubSpawnExecutor, StubWeapons, StubWorld};
    use crate::unit::Mood;

    fn test_zone(interval: f64) -> ZoneDefinition {
        ZoneDefinition {
            id: "zeta".to_string(),
            center: Vec3::new(1000.0, 0.0, -500.0),
            radius: 1000.0,
            active: true,
            spawn_interval_secs: interval,
            last_spawn: None,
            profile_pool: vec!["raider_pair".to_string()],
            sector_binding: Vec::new(),
        }
    }

    fn test_catalog() -> EncounterCatalog {
        EncounterCatalog {
            profiles: vec![EncounterProfile {
                id: "raider_pair".to_string(),
                prefab_ids: vec!["raider_mk1".to_string(), "raider_mk1".to_string()],
                default_mood: Mood::Aggressive,
            }],
        }
    }

    struct Fixture {
        executor: Arc<StubSpawnExecutor>,
        scheduler: SpawnScheduler,
        registry: EntityRegistry,
    }

    fn fixture() -> Fixture {
        let world = Arc::new(StubWorld::new());
        let executor = Arc::new(StubSpawnExecutor::new(world.clone(), 9));
        let manager = EncounterManager::new(test_catalog(), 8, 7200.0);
        let scheduler = SpawnScheduler::new(manager, executor.clone(), world.clone(), 42);
        let registry = EntityRegistry::new(
            world,
            Arc::new(StubNavigator::new()),
            Arc::new(StubWeapons::new()),
            BehaviorConfig::default(),
            42,
        );
        Fixture { executor, scheduler, registry }
    }

    #[test]
    fn test_should_spawn_cooldown_boundary() {
        let mut zone = test_zone(600.0);
        // Ни одного спавна — сразу true
        assert!(zone.should_spawn(0.0, "alpha"));

        zone.mark_spawned(0.0);
        assert!(!zone.should_spawn(0.0, "alpha"));
        assert!(!zone.should_spawn(599.0, "alpha"));
        assert!(zone.should_spawn(600.0, "alpha"));
    }

    #[test]
    fn test_should_spawn_inactive_or_empty_pool() {
        let mut zone = test_zone(600.0);
        zone.active = false;
        assert!(!zone.should_spawn(0.0, "alpha"));

        let mut zone = test_zone(600.0);
        zone.profile_pool.clear();
        assert!(!zone.should_spawn(0.0, "alpha"));
    }

    #[test]
    fn test_sector_binding() {
        let mut zone = test_zone(600.0);
        zone.sector_binding = vec!["alpha".to_string(), "beta".to_string()];
        assert!(zone.should_spawn(0.0, "alpha"));
        assert!(zone.should_spawn(0.0, "beta"));
        assert!(!zone.should_spawn(0.0, "gamma"));
    }

    #[test]
    fn test_random_position_inside_radius() {
        use rand::SeedableRng;
        let zone = test_zone(600.0);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..64 {
            let pos = zone.get_random_position_inside(&mut rng);
            assert!(pos.distance(zone.center) <= zone.radius + 1e-3);
        }
    }

    #[test]
    fn test_zone_scenario_t0_t599_t600() {
        let mut fx = fixture();
        fx.scheduler.add_zone(test_zone(600.0));

        // t=0: спавн происходит внутри сферы зоны
        fx.scheduler.tick(0.0, "alpha", &mut fx.registry);
        assert_eq!(fx.registry.len(), 2);
        let zone_center = Vec3::new(1000.0, 0.0, -500.0);
        for unit in fx.registry.units_ordered() {
            // Префабы ставятся executor'ом с шагом 50м от точки спавна
            assert!(unit.spawn_position.distance(zone_center) <= 1000.0 + 100.0);
        }
        assert_eq!(fx.scheduler.zone("zeta").unwrap().last_spawn, Some(0.0));

        // t=599: cooldown ещё держит
        fx.scheduler.tick(599.0, "alpha", &mut fx.registry);
        assert_eq!(fx.registry.len(), 2);

        // t=600: снова спавн
        fx.scheduler.tick(600.0, "alpha", &mut fx.registry);
        assert_eq!(fx.registry.len(), 4);
    }

    #[test]
    fn test_rate_modifier_zero_no_attempt() {
        let mut fx = fixture();
        fx.scheduler.add_zone(test_zone(600.0));
        fx.scheduler.encounters.set_rate_modifier(0.0);

        fx.scheduler.tick(0.0, "alpha", &mut fx.registry);
        // Проход завершился до попытки: ни юнитов, ни mark_spawned
        assert_eq!(fx.registry.len(), 0);
        assert_eq!(fx.scheduler.zone("zeta").unwrap().last_spawn, None);
    }

    #[test]
    fn test_disabled_player_inside_zone_skips_without_attempt() {
        let world = Arc::new(StubWorld::new());
        let executor = Arc::new(StubSpawnExecutor::new(world.clone(), 9));
        let manager = EncounterManager::new(test_catalog(), 8, 7200.0);
        let mut scheduler = SpawnScheduler::new(manager, executor, world.clone(), 42);
        let mut registry = EntityRegistry::new(
            world.clone(),
            Arc::new(StubNavigator::new()),
            Arc::new(StubWeapons::new()),
            BehaviorConfig::default(),
            42,
        );
        scheduler.add_zone(test_zone(600.0));
        world.add_player(7, Vec3::new(1000.0, 0.0, -500.0)); // в центре зоны
        scheduler.encounters.set_player_enabled(7, false);

        scheduler.tick(0.0, "alpha", &mut registry);
        // Не попытка: cooldown не взводится
        assert_eq!(registry.len(), 0);
        assert_eq!(scheduler.zone("zeta").unwrap().last_spawn, None);

        // Игрок снова включил спавн — зона работает
        scheduler.encounters.set_player_enabled(7, true);
        scheduler.tick(1.0, "alpha", &mut registry);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_executor_failure_still_marks_spawned() {
        let mut fx = fixture();
        fx.scheduler.add_zone(test_zone(600.0));
        fx.executor.fail_next();

        fx.scheduler.tick(0.0, "alpha", &mut fx.registry);
        assert_eq!(fx.registry.len(), 0);
        // Неудача не ретраится внутри интервала
        assert_eq!(fx.scheduler.zone("zeta").unwrap().last_spawn, Some(0.0));

        fx.scheduler.tick(1.0, "alpha", &mut fx.registry);
        assert_eq!(fx.registry.len(), 0);
    }

    #[test]
    fn test_despawn_encounter_removes_units_and_grids() {
        let world = Arc::new(StubWorld::new());
        let executor = Arc::new(StubSpawnExecutor::new(world.clone(), 9));
        let manager = EncounterManager::new(test_catalog(), 8, 7200.0);
        let mut scheduler = SpawnScheduler::new(manager, executor, world.clone(), 42);
        let mut registry = EntityRegistry::new(
            world.clone(),
            Arc::new(StubNavigator::new()),
            Arc::new(StubWeapons::new()),
            BehaviorConfig::default(),
            42,
        );
        scheduler.add_zone(test_zone(600.0));
        scheduler.tick(0.0, "alpha", &mut registry);
        assert_eq!(registry.len(), 2);

        let instance = scheduler.encounters.instance(1).unwrap();
        let handles = instance.spawned_handles.clone();
        assert_eq!(handles.len(), 2);

        scheduler.despawn_encounter(1, &mut registry).unwrap();
        assert_eq!(registry.len(), 0);
        assert_eq!(
            scheduler.encounters.instance(1).unwrap().status,
            EncounterStatus::Despawned
        );
        // Grid'ы снесены в мире
        for handle in &handles {
            assert!(!world.is_valid(*handle));
        }

        // Повторный снос — no-op, неизвестный инстанс — отказ
        assert!(scheduler.despawn_encounter(1, &mut registry).is_ok());
        assert!(scheduler.despawn_encounter(99, &mut registry).is_err());

        // GC на следующем cleanup-проходе, как у остальных терминальных
        scheduler.encounters.cleanup(world.as_ref(), 1.0);
        assert!(scheduler.encounters.instance(1).is_none());
    }

    #[test]
    fn test_cap_rejection_marks_spawned() {
        let world = Arc::new(StubWorld::new());
        let executor = Arc::new(StubSpawnExecutor::new(world.clone(), 9));
        let manager = EncounterManager::new(test_catalog(), 0, 7200.0); // cap 0
        let mut scheduler = SpawnScheduler::new(manager, executor, world.clone(), 42);
        let mut registry = EntityRegistry::new(
            world.clone(),
            Arc::new(StubNavigator::new()),
            Arc::new(StubWeapons::new()),
            BehaviorConfig::default(),
            42,
        );
        scheduler.add_zone(test_zone(600.0));

        scheduler.tick(0.0, "alpha", &mut registry);
        assert_eq!(registry.len(), 0);
        assert_eq!(scheduler.zone("zeta").unwrap().last_spawn, Some(0.0));
        assert_eq!(scheduler.statistics().rejected_by_cap, 1);
    }

    #[test]
    fn test_zone_catalog_json() {
        let json = r#"{
            "zones": [
                {
                    "id": "zeta",
                    "center": [1000.0, 0.0, -500.0],
                    "radius": 1000.0,
                    "spawn_interval_secs": 600.0,
                    "profile_pool": ["raider_pair"]
                }
            ]
        }"#;
        let catalog = ZoneCatalog::from_json(json).unwrap();
        let zone = ZoneDefinition::from_entry(catalog.zones[0].clone());
        assert!(zone.active);
        assert!(zone.sector_binding.is_empty());
        assert_eq!(zone.spawn_interval_secs, 600.0);
    }

    #[test]
    fn test_spawned_units_inherit_profile_mood() {
        let mut fx = fixture();
        fx.scheduler.add_zone(test_zone(600.0));
        fx.scheduler.tick(0.0, "alpha", &mut fx.registry);

        for unit in fx.registry.units_ordered() {
            assert_eq!(unit.mood, Mood::Aggressive);
        }
    }
}
