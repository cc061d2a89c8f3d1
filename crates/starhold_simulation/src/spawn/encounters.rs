//! Каталог encounter-профилей и учёт живых encounter-инстансов
//!
//! Каталог — декларативный immutable snapshot между reload'ами (JSON).
//! EncounterManager ведёт инстансы: cap на одновременные, возрастной
//! expiry, детект завершения, глобальный rate modifier, per-player toggle.

use std::collections::HashSet;

use bevy::prelude::*;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::host::WorldView;
use crate::logger;
use crate::unit::{GridHandle, Mood};

/// Ограничение перебора кандидатов в get_spawn_position
const POSITION_ATTEMPTS: usize = 20;

/// Декларативный профиль encounter'а
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncounterProfile {
    pub id: String,
    /// Префабы юнитов, спавнящиеся этим профилем
    pub prefab_ids: Vec<String>,
    pub default_mood: Mood,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncounterCatalog {
    pub profiles: Vec<EncounterProfile>,
}

impl EncounterCatalog {
    pub fn from_json(json: &str) -> Result<Self, SimError> {
        serde_json::from_str(json).map_err(|e| {
            logger::log_error(&format!("Encounters: catalog parse failed: {}", e));
            SimError::InvalidArgument("malformed encounter catalog")
        })
    }

    pub fn get(&self, profile_id: &str) -> Option<&EncounterProfile> {
        self.profiles.iter().find(|p| p.id == profile_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncounterStatus {
    Active,
    Completed,
    Failed,
    Despawned,
    Expired,
}

impl EncounterStatus {
    pub fn is_terminal(self) -> bool {
        self != EncounterStatus::Active
    }
}

/// Живой учёт одного spawn-события
#[derive(Debug, Clone)]
pub struct EncounterInstance {
    pub id: u64,
    pub profile_id: String,
    pub position: Vec3,
    pub spawn_time: f64,
    pub status: EncounterStatus,
    pub spawned_handles: Vec<GridHandle>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpawnStatistics {
    pub active_encounters: usize,
    pub total_spawned: usize,
    pub rejected_by_cap: usize,
}

pub struct EncounterManager {
    catalog: EncounterCatalog,
    instances: Vec<EncounterInstance>,
    next_instance_id: u64,
    max_concurrent: usize,
    max_age_secs: f64,
    disabled_players: HashSet<u64>,
    rate_modifier: f32,
    total_spawned: usize,
    rejected_by_cap: usize,
}

impl EncounterManager {
    pub fn new(catalog: EncounterCatalog, max_concurrent: usize, max_age_secs: f64) -> Self {
        Self {
            catalog,
            instances: Vec::new(),
            next_instance_id: 1,
            max_concurrent,
            max_age_secs,
            disabled_players: HashSet::new(),
            rate_modifier: 1.0,
            total_spawned: 0,
            rejected_by_cap: 0,
        }
    }

    pub fn catalog(&self) -> &EncounterCatalog {
        &self.catalog
    }

    /// Горячая замена каталога (reload — внешний I/O collaborator)
    pub fn reload_catalog(&mut self, catalog: EncounterCatalog) {
        logger::log_info(&format!("Encounters: catalog reloaded, {} profiles", catalog.profiles.len()));
        self.catalog = catalog;
    }

    /// 0 выключает спавн целиком; масштабирование сверх on/off — дело
    /// execution collaborator'а
    pub fn set_rate_modifier(&mut self, modifier: f32) {
        self.rate_modifier = modifier.max(0.0);
    }

    pub fn spawning_enabled(&self) -> bool {
        self.rate_modifier > 0.0
    }

    pub fn set_player_enabled(&mut self, player_id: u64, enabled: bool) {
        if enabled {
            self.disabled_players.remove(&player_id);
        } else {
            self.disabled_players.insert(player_id);
        }
    }

    pub fn is_player_enabled(&self, player_id: u64) -> bool {
        !self.disabled_players.contains(&player_id)
    }

    pub fn active_count(&self) -> usize {
        self.instances.iter().filter(|i| i.status == EncounterStatus::Active).count()
    }

    /// Создание инстанса. Сверх cap — отказ без частичного состояния.
    pub fn begin_encounter(
        &mut self,
        profile_id: &str,
        position: Vec3,
        now: f64,
    ) -> Result<u64, SimError> {
        let active = self.active_count();
        if active >= self.max_concurrent {
            self.rejected_by_cap += 1;
            logger::log_warning(&format!(
                "Encounters: cap reached ({}/{}), {} rejected",
                active, self.max_concurrent, profile_id
            ));
            return Err(SimError::CapacityExceeded { active, cap: self.max_concurrent });
        }

        let id = self.next_instance_id;
        self.next_instance_id += 1;
        self.instances.push(EncounterInstance {
            id,
            profile_id: profile_id.to_string(),
            position,
            spawn_time: now,
            status: EncounterStatus::Active,
            spawned_handles: Vec::new(),
        });
        Ok(id)
    }

    pub fn record_spawned(&mut self, instance_id: u64, handles: Vec<GridHandle>) {
        self.total_spawned += handles.len();
        if let Some(instance) = self.instances.iter_mut().find(|i| i.id == instance_id) {
            instance.spawned_handles = handles;
        }
    }

    pub fn mark_failed(&mut self, instance_id: u64) {
        if let Some(instance) = self.instances.iter_mut().find(|i| i.id == instance_id) {
            instance.status = EncounterStatus::Failed;
        }
    }

    /// Принудительный снос (executor'ом занимается SpawnScheduler)
    pub fn mark_despawned(&mut self, instance_id: u64) {
        if let Some(instance) = self.instances.iter_mut().find(|i| i.id == instance_id) {
            instance.status = EncounterStatus::Despawned;
        }
    }

    pub fn instance(&self, instance_id: u64) -> Option<&EncounterInstance> {
        self.instances.iter().find(|i| i.id == instance_id)
    }

    /// Housekeeping-проход: сперва GC терминальных с прошлого прохода,
    /// затем Completed (все handle протухли) и Expired (возраст > max_age)
    pub fn cleanup(&mut self, world: &dyn WorldView, now: f64) {
        self.instances.retain(|i| !i.status.is_terminal());

        for instance in &mut self.instances {
            if now - instance.spawn_time > self.max_age_secs {
                instance.status = EncounterStatus::Expired;
                logger::log(&format!("Encounters: {} ({}) expired", instance.id, instance.profile_id));
                continue;
            }
            if !instance.spawned_handles.is_empty()
                && instance.spawned_handles.iter().all(|h| !world.is_valid(*h))
            {
                instance.status = EncounterStatus::Completed;
                logger::log(&format!("Encounters: {} ({}) completed", instance.id, instance.profile_id));
            }
        }
    }

    pub fn statistics(&self) -> SpawnStatistics {
        SpawnStatistics {
            active_encounters: self.active_count(),
            total_spawned: self.total_spawned,
            rejected_by_cap: self.rejected_by_cap,
        }
    }

    /// Кандидатная позиция в кольце [min_distance, max_distance] от origin
    ///
    /// Ограниченный перебор; если за POSITION_ATTEMPTS не нашлось полностью
    /// подходящего кандидата — best-effort возврат последнего (не ошибка).
    /// Некорректное кольцо (min > max, отрицательные или не-конечные
    /// границы) — лог и best-effort точка, вызывающий не страдает.
    pub fn get_spawn_position(
        &self,
        world: &dyn WorldView,
        origin: Vec3,
        min_distance: f32,
        max_distance: f32,
        avoid_players: bool,
        avoid_grids: bool,
        rng: &mut ChaCha8Rng,
    ) -> Vec3 {
        if !min_distance.is_finite()
            || !max_distance.is_finite()
            || min_distance < 0.0
            || min_distance > max_distance
        {
            logger::log_warning(&format!(
                "Encounters: invalid spawn ring [{}, {}] — best-effort fallback",
                min_distance, max_distance
            ));
            let fallback = if min_distance.is_finite() { min_distance.max(0.0) } else { 0.0 };
            return origin + Vec3::X * fallback;
        }

        let mut candidate = origin + Vec3::X * min_distance;
        for _ in 0..POSITION_ATTEMPTS {
            let dir = super::random_direction(rng);
            candidate = origin + dir * rng.gen_range(min_distance..=max_distance);

            let players_ok = !avoid_players
                || world
                    .players()
                    .iter()
                    .all(|p| p.position.distance(candidate) >= min_distance);
            let grids_ok =
                !avoid_grids || world.entities_in_sphere(candidate, min_distance).is_empty();

            if players_ok && grids_ok {
                return candidate;
            }
        }
        candidate
    }
}
