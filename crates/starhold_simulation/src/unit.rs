//! Базовые типы managed-юнитов: UnitId, GridHandle, Mood, ManagedUnit
//!
//! Ядро не владеет world-сущностями: GridHandle — слабая ссылка, резолвится
//! через WorldView каждый раз заново (существование не гарантируется).
//! ManagedUnit живёт только в арене EntityRegistry, behavior хранит id,
//! а не прямую ссылку — никаких ownership-циклов.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::behavior::BehaviorVariant;

/// Stable id юнита внутри registry (арена keyed by id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub u64);

/// Слабая ссылка на world-сущность (grid) у spatial collaborator
///
/// Владеет сущностью мир, не ядро. Валидность проверяется лениво через
/// `WorldView::is_valid` — протухший handle чистится следующим cleanup pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridHandle(pub u64);

/// Режим поведения юнита (задаёт дефолтный behavior при регистрации)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mood {
    /// Не атакует и не ищет цели
    Passive,
    /// Патрулирует вокруг точки спавна, отвечает на угрозы
    Guard,
    /// Активно ищет цели
    Aggressive,
}

/// Флаги состояния юнита (однократные события, деградации)
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitFlags {
    /// Guard-юнит уже выдал предупреждение перед атакой
    pub has_warned: bool,
    /// Юнит недавно был в бою (сбрасывается housekeeping-проходом)
    pub engaged_recently: bool,
    /// Backup broadcast уже отправлен (ровно один на переход в Retreat)
    pub called_reinforcements: bool,
    /// Юнит просит помощи (выставляется при retreat, сбрасывается при восстановлении)
    pub needs_help: bool,
    /// Отсутствие navigation actuator уже залогировано (логируем один раз)
    pub nav_degraded_logged: bool,
    /// Отсутствие weapons API уже залогировано
    pub weapons_degraded_logged: bool,
}

/// Managed-юнит: арена EntityRegistry владеет им эксклюзивно
///
/// Инвариант: ровно один активный BehaviorVariant в любой наблюдаемый момент.
/// Замена варианта атомарна в пределах тика (присваивание поля).
#[derive(Debug, Clone)]
pub struct ManagedUnit {
    pub id: UnitId,
    pub handle: GridHandle,
    pub mood: Mood,
    pub behavior: BehaviorVariant,
    /// Поведение, в которое возвращаемся при потере цели (снимок до Attack)
    pub fallback: Option<BehaviorVariant>,
    pub faction_id: Option<u64>,
    /// Префаб, из которого юнит создан (нужен persistence-снимку)
    pub prefab_id: Option<String>,
    pub spawn_position: Vec3,
    /// Health на момент регистрации (база для retreat threshold)
    pub initial_health: f32,
    /// Последний наблюдаемый health ratio (current / initial), 1.0 при регистрации
    pub health_ratio: f32,
    pub flags: UnitFlags,
}

impl ManagedUnit {
    /// Может ли юнит ответить на backup request
    ///
    /// Retreat и Passive не помогают; юнит с валидной целью занят своей дракой.
    pub fn can_assist(&self) -> bool {
        if self.mood == Mood::Passive {
            return false;
        }
        match &self.behavior {
            BehaviorVariant::Retreat { .. } => false,
            BehaviorVariant::Attack { target } => target.is_none(),
            _ => true,
        }
    }

    /// Дефолтный behavior для mood (используется при регистрации и смене mood)
    ///
    /// Aggressive → Attack без цели, Passive → Idle,
    /// Guard → Patrol по кольцу waypoint'ов вокруг точки спавна.
    pub fn derive_behavior(mood: Mood, spawn_position: Vec3, ring_radius: f32) -> BehaviorVariant {
        match mood {
            Mood::Aggressive => BehaviorVariant::Attack { target: None },
            Mood::Passive => BehaviorVariant::Idle,
            Mood::Guard => BehaviorVariant::Patrol {
                waypoints: patrol_ring(spawn_position, ring_radius),
                cursor: 0,
            },
        }
    }
}

/// Кольцо waypoint'ов вокруг центра (6 точек, горизонтальная плоскость)
pub fn patrol_ring(center: Vec3, radius: f32) -> Vec<Vec3> {
    const POINTS: usize = 6;
    (0..POINTS)
        .map(|i| {
            let angle = i as f32 / POINTS as f32 * std::f32::consts::TAU;
            center + Vec3::new(angle.cos() * radius, 0.0, angle.sin() * radius)
        })
        .collect()
}
