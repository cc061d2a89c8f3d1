//! In-memory host collaborators для headless запуска и тестов
//!
//! Аналог headless-режима: вместо живого мира — HashMap под Mutex.
//! Не детерминирует ядро (ядро само сортирует кандидатов по handle).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use bevy::prelude::*;

use crate::error::SimError;
use crate::spawn::EncounterProfile;
use crate::threat::WeaponClass;
use crate::unit::GridHandle;

use super::{CombatStats, FactionRelation, Navigator, PlayerInfo, SpawnExecutor, WeaponsApi, WorldView};

#[derive(Debug, Clone)]
struct StubEntity {
    position: Vec3,
    velocity: Vec3,
    faction_id: Option<u64>,
    health: f32,
    stats: CombatStats,
}

/// In-memory мир: grid'ы, фракционные отношения, игроки
#[derive(Default)]
pub struct StubWorld {
    entities: Mutex<HashMap<GridHandle, StubEntity>>,
    /// Симметричные отношения, ключ упорядочен (min, max)
    relations: Mutex<HashMap<(u64, u64), FactionRelation>>,
    players: Mutex<Vec<PlayerInfo>>,
    next_handle: AtomicU64,
}

impl StubWorld {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            ..Default::default()
        }
    }

    pub fn add_grid(&self, position: Vec3, faction_id: Option<u64>, health: f32) -> GridHandle {
        let handle = GridHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.entities.lock().unwrap().insert(
            handle,
            StubEntity {
                position,
                velocity: Vec3::ZERO,
                faction_id,
                health,
                stats: CombatStats { weapon_count: 2, mass: 50_000.0 },
            },
        );
        handle
    }

    pub fn set_combat_stats(&self, handle: GridHandle, stats: CombatStats) {
        if let Some(e) = self.entities.lock().unwrap().get_mut(&handle) {
            e.stats = stats;
        }
    }

    pub fn set_velocity(&self, handle: GridHandle, velocity: Vec3) {
        if let Some(e) = self.entities.lock().unwrap().get_mut(&handle) {
            e.velocity = velocity;
        }
    }

    pub fn set_health(&self, handle: GridHandle, health: f32) {
        if let Some(e) = self.entities.lock().unwrap().get_mut(&handle) {
            e.health = health;
        }
    }

    pub fn move_grid(&self, handle: GridHandle, position: Vec3) {
        if let Some(e) = self.entities.lock().unwrap().get_mut(&handle) {
            e.position = position;
        }
    }

    /// Уничтожить grid (handle протухает, cleanup pass подберёт)
    pub fn destroy(&self, handle: GridHandle) {
        self.entities.lock().unwrap().remove(&handle);
    }

    pub fn set_relation(&self, a: u64, b: u64, relation: FactionRelation) {
        let key = (a.min(b), a.max(b));
        self.relations.lock().unwrap().insert(key, relation);
    }

    pub fn add_player(&self, id: u64, position: Vec3) {
        self.players.lock().unwrap().push(PlayerInfo { id, position });
    }
}

impl WorldView for StubWorld {
    fn is_valid(&self, handle: GridHandle) -> bool {
        self.entities.lock().unwrap().contains_key(&handle)
    }

    fn position(&self, handle: GridHandle) -> Option<Vec3> {
        self.entities.lock().unwrap().get(&handle).map(|e| e.position)
    }

    fn velocity(&self, handle: GridHandle) -> Option<Vec3> {
        self.entities.lock().unwrap().get(&handle).map(|e| e.velocity)
    }

    fn faction_of(&self, handle: GridHandle) -> Option<u64> {
        self.entities.lock().unwrap().get(&handle).and_then(|e| e.faction_id)
    }

    fn relation(&self, a: u64, b: u64) -> FactionRelation {
        if a == b {
            return FactionRelation::Allied;
        }
        let key = (a.min(b), a.max(b));
        self.relations
            .lock()
            .unwrap()
            .get(&key)
            .copied()
            .unwrap_or(FactionRelation::Neutral)
    }

    fn health(&self, handle: GridHandle) -> Option<f32> {
        self.entities.lock().unwrap().get(&handle).map(|e| e.health)
    }

    fn combat_stats(&self, handle: GridHandle) -> Option<CombatStats> {
        self.entities.lock().unwrap().get(&handle).map(|e| e.stats)
    }

    fn entities_in_sphere(&self, center: Vec3, radius: f32) -> Vec<GridHandle> {
        let mut found: Vec<GridHandle> = self
            .entities
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, e)| e.position.distance(center) <= radius)
            .map(|(h, _)| *h)
            .collect();
        // Стабильный порядок для воспроизводимости
        found.sort();
        found
    }

    fn players(&self) -> Vec<PlayerInfo> {
        self.players.lock().unwrap().clone()
    }
}

/// Navigator-заглушка: записывает последнюю команду per unit
#[derive(Default)]
pub struct StubNavigator {
    commands: Mutex<HashMap<GridHandle, Vec3>>,
    /// Юниты без actuator (move_to вернёт CollaboratorUnavailable)
    without_actuator: Mutex<Vec<GridHandle>>,
}

impl StubNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remove_actuator(&self, unit: GridHandle) {
        self.without_actuator.lock().unwrap().push(unit);
    }

    pub fn last_destination(&self, unit: GridHandle) -> Option<Vec3> {
        self.commands.lock().unwrap().get(&unit).copied()
    }
}

impl Navigator for StubNavigator {
    fn move_to(&self, unit: GridHandle, destination: Vec3, _speed_limit: f32)
        -> Result<(), SimError>
    {
        if self.without_actuator.lock().unwrap().contains(&unit) {
            return Err(SimError::CollaboratorUnavailable("navigation"));
        }
        self.commands.lock().unwrap().insert(unit, destination);
        Ok(())
    }

    fn stop(&self, unit: GridHandle) {
        self.commands.lock().unwrap().remove(&unit);
    }
}

/// Weapons-заглушка: записывает targeting, может быть полностью недоступна
pub struct StubWeapons {
    targets: Mutex<HashMap<GridHandle, (GridHandle, WeaponClass)>>,
    available: bool,
}

impl Default for StubWeapons {
    fn default() -> Self {
        Self { targets: Mutex::new(HashMap::new()), available: true }
    }
}

impl StubWeapons {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable() -> Self {
        Self { targets: Mutex::new(HashMap::new()), available: false }
    }

    pub fn target_of(&self, unit: GridHandle) -> Option<GridHandle> {
        self.targets.lock().unwrap().get(&unit).map(|(t, _)| *t)
    }

    pub fn class_of(&self, unit: GridHandle) -> Option<WeaponClass> {
        self.targets.lock().unwrap().get(&unit).map(|(_, c)| *c)
    }
}

impl WeaponsApi for StubWeapons {
    fn has_weapons(&self, _unit: GridHandle) -> bool {
        self.available
    }

    fn arm(&self, _unit: GridHandle) -> Result<(), SimError> {
        if !self.available {
            return Err(SimError::CollaboratorUnavailable("weapons"));
        }
        Ok(())
    }

    fn set_target(
        &self,
        unit: GridHandle,
        target: GridHandle,
        preferred_class: WeaponClass,
    ) -> Result<(), SimError> {
        if !self.available {
            return Err(SimError::CollaboratorUnavailable("weapons"));
        }
        self.targets.lock().unwrap().insert(unit, (target, preferred_class));
        Ok(())
    }

    fn clear_target(&self, unit: GridHandle) {
        self.targets.lock().unwrap().remove(&unit);
    }
}

/// Spawn executor-заглушка: создаёт grid'ы прямо в StubWorld
pub struct StubSpawnExecutor {
    world: std::sync::Arc<StubWorld>,
    /// Фракция для заспавненных grid'ов
    pub faction_id: u64,
    fail_next: Mutex<bool>,
}

impl StubSpawnExecutor {
    pub fn new(world: std::sync::Arc<StubWorld>, faction_id: u64) -> Self {
        Self { world, faction_id, fail_next: Mutex::new(false) }
    }

    /// Следующий spawn_encounter вернёт ошибку (тест at-least-one-attempt семантики)
    pub fn fail_next(&self) {
        *self.fail_next.lock().unwrap() = true;
    }
}

impl SpawnExecutor for StubSpawnExecutor {
    fn spawn_encounter(
        &self,
        profile: &EncounterProfile,
        position: Vec3,
    ) -> Result<Vec<GridHandle>, SimError> {
        if std::mem::take(&mut *self.fail_next.lock().unwrap()) {
            return Err(SimError::CollaboratorUnavailable("spawn executor"));
        }
        let handles = profile
            .prefab_ids
            .iter()
            .enumerate()
            .map(|(i, _)| {
                // Разносим prefab'ы чтобы не спавнить в одну точку
                let offset = Vec3::new(i as f32 * 50.0, 0.0, 0.0);
                self.world.add_grid(position + offset, Some(self.faction_id), 1000.0)
            })
            .collect();
        Ok(handles)
    }

    fn despawn(&self, handle: GridHandle) {
        self.world.destroy(handle);
    }
}
