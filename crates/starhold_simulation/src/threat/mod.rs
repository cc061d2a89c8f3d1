//! ThreatAssessor: скоринг враждебных сущностей и выбор цели
//!
//! score = hostility × (0.6 × proximity + 0.4 × power_norm)
//! - proximity — обратная дистанция, 1/(1 + dist/100)
//! - power_norm — squash оценки CombatPredictor в [0, 1)
//! - hostility: Hostile 1.0, Neutral/unknown 0.5, Allied → score 0 и исключение
//!
//! Конкретные веса — наш выбор; гарантируется только контракт упорядочивания
//! ("выше score — опаснее, союзники исключены"). При равных score — ближе,
//! затем меньший handle для воспроизводимости.

use bevy::prelude::*;

use crate::behavior::{select_target, TargetCandidate};
use crate::host::{FactionRelation, WorldView};
use crate::logger;
use crate::unit::GridHandle;

pub mod predictor;

pub use predictor::{CombatPredictor, WeaponClass};

/// Масштаб обратной дистанции: на SCALE метрах proximity падает до 0.5
const PROXIMITY_SCALE: f32 = 100.0;
/// Squash-константа power-компоненты
const POWER_HALF_POINT: f32 = 100.0;

const PROXIMITY_WEIGHT: f32 = 0.6;
const POWER_WEIGHT: f32 = 0.4;

/// Оценщик угроз; состояние — только кэши внутри CombatPredictor
pub struct ThreatAssessor {
    pub predictor: CombatPredictor,
}

impl Default for ThreatAssessor {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreatAssessor {
    pub fn new() -> Self {
        Self { predictor: CombatPredictor::new() }
    }

    /// Threat score сущности относительно origin
    ///
    /// 0.0 — не угроза (союзник, протухший handle). Unknown-фракция eligible.
    pub fn assess_threat(
        &mut self,
        world: &dyn WorldView,
        entity: GridHandle,
        origin: Vec3,
        own_faction_id: Option<u64>,
        now: f64,
    ) -> f32 {
        let Some(position) = world.position(entity) else {
            return 0.0;
        };

        let hostility = match (own_faction_id, world.faction_of(entity)) {
            (Some(own), Some(theirs)) => match world.relation(own, theirs) {
                FactionRelation::Allied => return 0.0,
                FactionRelation::Hostile => 1.0,
                FactionRelation::Neutral => 0.5,
            },
            // Unknown/без фракции — eligible с нейтральной hostility
            _ => 0.5,
        };

        let distance = origin.distance(position);
        let proximity = 1.0 / (1.0 + distance / PROXIMITY_SCALE);

        let power = self.predictor.estimate_combat_power(world, entity, now);
        let power_norm = power / (power + POWER_HALF_POINT);

        hostility * (PROXIMITY_WEIGHT * proximity + POWER_WEIGHT * power_norm)
    }

    /// Самая опасная eligible-цель в радиусе
    ///
    /// Финальный выбор — select_target: score, при равенстве ближе,
    /// затем меньший handle (стабильный детерминированный ключ).
    /// Некорректный range — no-op с логом, вызывающий не страдает.
    pub fn find_target(
        &mut self,
        world: &dyn WorldView,
        origin: Vec3,
        range: f32,
        own_faction_id: Option<u64>,
        exclude: Option<GridHandle>,
        now: f64,
    ) -> Option<(GridHandle, f32)> {
        if !range.is_finite() || range <= 0.0 {
            logger::log_warning(&format!("ThreatAssessor: invalid range {} — no-op", range));
            return None;
        }

        let mut candidates = Vec::new();

        for candidate in world.entities_in_sphere(origin, range) {
            if Some(candidate) == exclude {
                continue;
            }

            let score = self.assess_threat(world, candidate, origin, own_faction_id, now);
            if score <= 0.0 {
                continue;
            }

            let distance = world
                .position(candidate)
                .map_or(f32::MAX, |p| origin.distance(p));
            candidates.push(TargetCandidate { handle: candidate, score, distance });
        }

        let picked = select_target(&candidates)?;
        let score = candidates
            .iter()
            .find(|c| c.handle == picked)
            .map(|c| c.score)
            .unwrap_or(0.0);
        Some((picked, score))
    }
}
