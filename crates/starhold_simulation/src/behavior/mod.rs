//! Behavior-варианты managed-юнитов
//!
//! Закрытый tagged union вместо открытой иерархии: набор режимов мал и
//! фиксирован, exhaustive match заменяет runtime type inspection.
//! Вариант взаимоисключающий и заменяется атомарно в пределах тика.
//!
//! Переходы — в tick.rs; здесь данные вариантов, хуки и тактические
//! предикаты (select_target, should_retreat, should_enter_last_stand).

use bevy::prelude::*;

use crate::unit::GridHandle;

pub mod tick;

pub use tick::{on_damaged, receive_backup_request, tick_unit, update_unit, TickContext, TickEffect};

/// Активный режим юнита (ровно один в любой момент)
#[derive(Debug, Clone, PartialEq)]
pub enum BehaviorVariant {
    /// Ничего не делаем, переходов не инициируем
    Idle,

    /// Обход waypoint'ов по кругу; не-Passive юниты попутно сканируют угрозы
    Patrol {
        waypoints: Vec<Vec3>,
        cursor: usize,
    },

    /// Преследование цели (слабая ссылка, валидируется каждый тик).
    /// target == None — активный поиск цели (Aggressive после регистрации).
    Attack {
        target: Option<GridHandle>,
    },

    /// Удержание позиции: приоритетные цели в радиусе → Attack
    Defense {
        position: Vec3,
        radius: f32,
    },

    /// Отступление от точки входа в бой
    Retreat {
        origin: Vec3,
    },
}

/// Дискриминант варианта (статистика, события, логи)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BehaviorKind {
    Idle,
    Patrol,
    Attack,
    Defense,
    Retreat,
}

impl BehaviorVariant {
    pub fn kind(&self) -> BehaviorKind {
        match self {
            BehaviorVariant::Idle => BehaviorKind::Idle,
            BehaviorVariant::Patrol { .. } => BehaviorKind::Patrol,
            BehaviorVariant::Attack { .. } => BehaviorKind::Attack,
            BehaviorVariant::Defense { .. } => BehaviorKind::Defense,
            BehaviorVariant::Retreat { .. } => BehaviorKind::Retreat,
        }
    }

    /// Следующий waypoint патруля; двигает cursor когда текущий достигнут
    ///
    /// Не-Patrol варианты и пустой маршрут → None.
    pub fn next_waypoint(&mut self, current: Vec3, reached_distance: f32) -> Option<Vec3> {
        let BehaviorVariant::Patrol { waypoints, cursor } = self else {
            return None;
        };
        if waypoints.is_empty() {
            return None;
        }

        let wp = waypoints[*cursor % waypoints.len()];
        if current.distance(wp) <= reached_distance {
            *cursor = (*cursor + 1) % waypoints.len();
            Some(waypoints[*cursor])
        } else {
            Some(wp)
        }
    }
}

/// Кандидат для выбора цели: handle + threat score + дистанция
#[derive(Debug, Clone, Copy)]
pub struct TargetCandidate {
    pub handle: GridHandle,
    pub score: f32,
    pub distance: f32,
}

/// Выбор цели из кандидатов: выше score, при равенстве — ближе, затем handle
pub fn select_target(candidates: &[TargetCandidate]) -> Option<GridHandle> {
    candidates
        .iter()
        .max_by(|a, b| {
            a.score
                .partial_cmp(&b.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                // Дистанция сравнивается в обратную сторону (ближе лучше)
                .then_with(|| {
                    b.distance
                        .partial_cmp(&a.distance)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| b.handle.cmp(&a.handle))
        })
        .map(|c| c.handle)
}

/// Отступать ли при данном соотношении сил (ratio-threshold)
pub fn should_retreat(own_strength: f32, enemy_strength: f32, ratio: f32) -> bool {
    if own_strength <= 0.0 {
        return enemy_strength > 0.0;
    }
    enemy_strength / own_strength >= ratio
}

/// Last stand: при почти нулевой целостности отступать поздно — стоим до конца
pub fn should_enter_last_stand(integrity_ratio: f32, threshold: f32) -> bool {
    integrity_ratio <= threshold
}

/// Параметры behavior-машины (пороги, радиусы, кадансы)
#[derive(Debug, Clone)]
pub struct BehaviorConfig {
    /// Health-порог перехода в Retreat (доля initial health)
    pub retreat_health_threshold: f32,
    /// Порог last stand (подавляет retreat)
    pub last_stand_threshold: f32,
    /// Гистерезис восстановления: выход из Retreat при ratio ≥ threshold × hysteresis
    pub recover_hysteresis: f32,
    /// Радиус opportunistic-скана для Patrol/Attack-без-цели
    pub engagement_range: f32,
    /// Дистанция, дальше которой цель считается потерянной
    pub attack_abandon_range: f32,
    /// Радиус Defense при ответе на backup request
    pub assist_radius: f32,
    /// Радиус waypoint-кольца Guard-патруля
    pub patrol_ring_radius: f32,
    /// Насколько далеко уходит Retreat от origin
    pub retreat_distance: f32,
    /// Дистанция "waypoint достигнут"
    pub waypoint_reached_distance: f32,
    /// Горизонт предсказания позиции цели (секунды)
    pub prediction_horizon_secs: f32,
    /// Speed limit для navigation collaborator
    pub cruise_speed: f32,
    /// Соотношение сил, при котором Attack отступает
    pub strength_retreat_ratio: f32,
    /// Амплитуда бокового манёвра под огнём (метры)
    pub jink_amplitude: f32,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            retreat_health_threshold: 0.25, // 25% initial health
            last_stand_threshold: 0.05,
            recover_hysteresis: 1.2,
            engagement_range: 600.0,
            attack_abandon_range: 1500.0,
            assist_radius: 150.0,
            patrol_ring_radius: 120.0,
            retreat_distance: 800.0,
            waypoint_reached_distance: 25.0,
            prediction_horizon_secs: 1.5,
            cruise_speed: 50.0,
            strength_retreat_ratio: 2.5,
            jink_amplitude: 30.0,
        }
    }
}
