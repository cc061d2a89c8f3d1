//! CombatPredictor: оценка combat power + короткая экстраполяция позиции
//!
//! Потребители: ThreatAssessor (power-компонента threat score) и Attack
//! behavior (упреждение по предсказанной позиции, выбор класса оружия).
//! Формула предсказания — линейная экстраполяция по наблюдаемой velocity
//! (контракт: монотонна по velocity, точность не обещается).

use std::collections::HashMap;

use bevy::prelude::*;

use crate::host::WorldView;
use crate::unit::GridHandle;

/// Вес одного орудия в power-оценке
const WEAPON_POWER: f32 = 40.0;
/// Вклад массы (тяжёлый grid живучее): power per 1000 kg
const MASS_POWER: f32 = 1.0;
/// TTL кэша power-оценок (секунды) — combat stats меняются медленно
const POWER_CACHE_TTL: f64 = 1.0;

/// Рекомендуемый класс оружия по дистанции до цели
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeaponClass {
    /// Дальний бой (> 800м)
    Missile,
    /// Средняя дистанция
    Ballistic,
    /// Ближний бой (< 200м)
    Energy,
}

/// Оценщик боевой силы; состояние — только кэш power-оценок
pub struct CombatPredictor {
    power_cache: HashMap<GridHandle, (f64, f32)>,
}

impl Default for CombatPredictor {
    fn default() -> Self {
        Self::new()
    }
}

impl CombatPredictor {
    pub fn new() -> Self {
        Self { power_cache: HashMap::new() }
    }

    /// Combat power сущности: орудия + масса
    ///
    /// Протухший handle → 0.0 (не угроза).
    pub fn estimate_combat_power(
        &mut self,
        world: &dyn WorldView,
        handle: GridHandle,
        now: f64,
    ) -> f32 {
        if let Some((stamp, power)) = self.power_cache.get(&handle) {
            if now - stamp < POWER_CACHE_TTL {
                return *power;
            }
        }

        let power = match world.combat_stats(handle) {
            Some(stats) => {
                stats.weapon_count as f32 * WEAPON_POWER + stats.mass / 1000.0 * MASS_POWER
            }
            None => 0.0,
        };

        self.power_cache.insert(handle, (now, power));
        power
    }

    /// Позиция цели через horizon секунд (линейная экстраполяция)
    pub fn predict_position(
        &self,
        world: &dyn WorldView,
        handle: GridHandle,
        horizon_secs: f32,
    ) -> Option<Vec3> {
        let position = world.position(handle)?;
        let velocity = world.velocity(handle).unwrap_or(Vec3::ZERO);
        Some(position + velocity * horizon_secs)
    }

    /// Оптимальный класс оружия для дистанции (потребляет Weapons collaborator)
    pub fn optimal_weapon_class(&self, distance: f32) -> WeaponClass {
        if distance > 800.0 {
            WeaponClass::Missile
        } else if distance > 200.0 {
            WeaponClass::Ballistic
        } else {
            WeaponClass::Energy
        }
    }

    /// Сброс кэша (housekeeping pass)
    pub fn clear_cache(&mut self) {
        self.power_cache.clear();
    }
}
