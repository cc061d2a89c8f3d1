//! Внешние collaborators (host boundary)
//!
//! Ядро принимает решения (какой mood/behavior, кого атаковать, где спавнить),
//! host исполняет (движение, стрельба, создание grid'ов). Все collaborators —
//! trait objects, передаются сервисам по handle при конструировании:
//! никаких глобальных singletons, тесты работают без живого host.
//!
//! Деградация: отсутствие navigation/weapons — это CollaboratorUnavailable,
//! не panic. Юнит продолжает тикать в targeting-only режиме.

use bevy::prelude::*;

use crate::error::SimError;
use crate::spawn::EncounterProfile;
use crate::threat::WeaponClass;
use crate::unit::GridHandle;

pub mod stub;

pub use stub::{StubNavigator, StubSpawnExecutor, StubWeapons, StubWorld};

/// Отношение между фракциями (источник правды — мир, не ядро)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactionRelation {
    Allied,
    Hostile,
    /// Неизвестная/нейтральная фракция — цель остаётся eligible
    Neutral,
}

/// Наблюдаемые боевые характеристики сущности (для combat power оценки)
#[derive(Debug, Clone, Copy, Default)]
pub struct CombatStats {
    pub weapon_count: u32,
    pub mass: f32,
}

/// Игрок в мире (для spawn-position clearance и per-player toggles)
#[derive(Debug, Clone, Copy)]
pub struct PlayerInfo {
    pub id: u64,
    pub position: Vec3,
}

/// Read-only взгляд на мир: enumeration, позиции, фракции, целостность
///
/// Все методы толерантны к протухшим handle — возвращают None/false,
/// никогда не паникуют.
pub trait WorldView: Send + Sync {
    /// Handle всё ещё резолвится в живую сущность
    fn is_valid(&self, handle: GridHandle) -> bool;

    fn position(&self, handle: GridHandle) -> Option<Vec3>;

    fn velocity(&self, handle: GridHandle) -> Option<Vec3>;

    /// None — сущность без фракции (eligible как цель)
    fn faction_of(&self, handle: GridHandle) -> Option<u64>;

    fn relation(&self, a: u64, b: u64) -> FactionRelation;

    /// Текущий health/integrity сущности (абсолютное значение)
    fn health(&self, handle: GridHandle) -> Option<f32>;

    fn combat_stats(&self, handle: GridHandle) -> Option<CombatStats>;

    /// Все сущности в сфере (включая сам origin-grid, фильтрует вызывающий)
    fn entities_in_sphere(&self, center: Vec3, radius: f32) -> Vec<GridHandle>;

    fn players(&self) -> Vec<PlayerInfo>;
}

/// Navigation collaborator: принимает destination + speed limit
///
/// Отсутствие actuator у юнита — `CollaboratorUnavailable("navigation")`,
/// сигнал деградации, не ошибка тика.
pub trait Navigator: Send + Sync {
    fn move_to(&self, unit: GridHandle, destination: Vec3, speed_limit: f32)
        -> Result<(), SimError>;

    fn stop(&self, unit: GridHandle);
}

/// Weapons collaborator: discovery/readiness/targeting
///
/// Отсутствие — Attack/Defense всё равно переключаются, просто без fire control.
pub trait WeaponsApi: Send + Sync {
    fn has_weapons(&self, unit: GridHandle) -> bool;

    /// Регистрирует боеготовность (Defense behavior вызывает на каждом тике)
    fn arm(&self, unit: GridHandle) -> Result<(), SimError>;

    /// Навести на цель; preferred_class — рекомендация CombatPredictor по дистанции
    fn set_target(
        &self,
        unit: GridHandle,
        target: GridHandle,
        preferred_class: WeaponClass,
    ) -> Result<(), SimError>;

    fn clear_target(&self, unit: GridHandle);
}

/// Spawn executor: материализует encounter profile в world-сущности
///
/// Ядро решает "что и где", executor создаёт grid'ы и возвращает handles.
pub trait SpawnExecutor: Send + Sync {
    fn spawn_encounter(
        &self,
        profile: &EncounterProfile,
        position: Vec3,
    ) -> Result<Vec<GridHandle>, SimError>;

    fn despawn(&self, handle: GridHandle);
}
