//! Per-tick вычисление behavior-переходов
//!
//! Порядок каждого тика фиксированный:
//! 1. Health guard (всегда первым): ratio < порога → Retreat + один backup broadcast
//! 2. Defense: arm weapons, приоритетная цель в радиусе → Attack
//! 3. Attack: валидация цели, fallback-правила при потере
//! 4. Patrol (не-Passive): opportunistic-скан в engagement range
//! 5. Idle: переходов нет
//!
//! tick_unit не трогает чужие юниты и не шлёт сообщения сам — возвращает
//! TickEffect'ы, которые EntityRegistry применяет после тика юнита
//! (рассылки и события идут синхронно, в пределах того же TickAll-прохода).

use bevy::prelude::*;
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::host::{Navigator, WeaponsApi, WorldView};
use crate::logger;
use crate::threat::ThreatAssessor;
use crate::unit::{GridHandle, ManagedUnit, Mood};

use super::{should_enter_last_stand, should_retreat, BehaviorConfig, BehaviorKind, BehaviorVariant};

/// Всё, что нужно одному тику юнита (collaborators передаются по handle)
pub struct TickContext<'a> {
    pub world: &'a dyn WorldView,
    pub navigator: &'a dyn Navigator,
    pub weapons: &'a dyn WeaponsApi,
    pub assessor: &'a mut ThreatAssessor,
    pub config: &'a BehaviorConfig,
    /// Единые инжектируемые часы (секунды)
    pub now: f64,
    pub rng: &'a mut ChaCha8Rng,
}

/// Побочный эффект тика — применяет EntityRegistry
#[derive(Debug, Clone, PartialEq)]
pub enum TickEffect {
    BehaviorChanged { from: BehaviorKind, to: BehaviorKind },
    /// Ровно один на переход в Retreat (не на каждый тик отступления)
    BackupRequested { location: Vec3 },
    /// Guard-юнит первый раз захватил цель (has_warned gate)
    WarningIssued { target: GridHandle },
}

/// Один тик behavior-машины юнита
///
/// Протухший handle — пустой результат (видимость лениво, cleanup pass удалит).
pub fn tick_unit(unit: &mut ManagedUnit, ctx: &mut TickContext) -> Vec<TickEffect> {
    let mut effects = Vec::new();

    let Some(position) = ctx.world.position(unit.handle) else {
        return effects;
    };
    let Some(health) = ctx.world.health(unit.handle) else {
        return effects;
    };
    unit.health_ratio = if unit.initial_health > 0.0 {
        health / unit.initial_health
    } else {
        0.0
    };

    // 1. Health guard — всегда первым
    if health_guard(unit, position, ctx, &mut effects) {
        return effects;
    }

    match unit.behavior.clone() {
        // 2. Defense: держим позицию, приоритетные цели в радиусе → Attack
        BehaviorVariant::Defense { position: hold, radius } => {
            arm_weapons(unit, ctx);

            let found = ctx.assessor.find_target(
                ctx.world,
                hold,
                radius,
                unit.faction_id,
                Some(unit.handle),
                ctx.now,
            );
            if let Some((target, _)) = found {
                unit.fallback = Some(BehaviorVariant::Defense { position: hold, radius });
                acquire_target(unit, target, &mut effects);
                transition(unit, BehaviorVariant::Attack { target: Some(target) }, &mut effects, "defense contact");
            } else if position.distance(hold) > radius * 0.5 {
                // Вернуться на пост
                move_unit(unit, ctx, hold, false);
            }
        }

        // 3. Attack с целью: валидация + преследование
        BehaviorVariant::Attack { target: Some(target) } => {
            if !target_valid(ctx, position, target) {
                on_target_lost(unit, ctx, target);
                let next = match unit.fallback.take() {
                    // Defense-derived fallback: реконструкция Defense на его позиции/радиусе
                    Some(BehaviorVariant::Defense { position, radius }) => {
                        Some(BehaviorVariant::Defense { position, radius })
                    }
                    Some(other) => Some(other),
                    // Нет fallback — остаёмся в Attack (явный edge case)
                    None => None,
                };
                match next {
                    Some(behavior) => transition(unit, behavior, &mut effects, "target lost"),
                    None => {
                        unit.behavior = BehaviorVariant::Attack { target: None };
                        logger::log(&format!("AI: {:?} target lost, no fallback — stays in Attack", unit.id));
                    }
                }
            } else {
                let own = ctx
                    .assessor
                    .predictor
                    .estimate_combat_power(ctx.world, unit.handle, ctx.now);
                let enemy = ctx
                    .assessor
                    .predictor
                    .estimate_combat_power(ctx.world, target, ctx.now);

                if should_retreat(own, enemy, ctx.config.strength_retreat_ratio)
                    && !should_enter_last_stand(unit.health_ratio, ctx.config.last_stand_threshold)
                {
                    // Силовой retreat без broadcast (broadcast только у health guard)
                    transition(unit, BehaviorVariant::Retreat { origin: position }, &mut effects, "outgunned");
                } else {
                    pursue_target(unit, ctx, position, target);
                }
            }
        }

        // Attack без цели: активный поиск (кроме Passive)
        BehaviorVariant::Attack { target: None } => {
            if unit.mood != Mood::Passive {
                let found = ctx.assessor.find_target(
                    ctx.world,
                    position,
                    ctx.config.engagement_range,
                    unit.faction_id,
                    Some(unit.handle),
                    ctx.now,
                );
                if let Some((target, _)) = found {
                    acquire_target(unit, target, &mut effects);
                    unit.behavior = BehaviorVariant::Attack { target: Some(target) };
                }
            }
        }

        // 4. Patrol: не-Passive сканируют попутно
        BehaviorVariant::Patrol { .. } => {
            let contact = if unit.mood != Mood::Passive {
                ctx.assessor.find_target(
                    ctx.world,
                    position,
                    ctx.config.engagement_range,
                    unit.faction_id,
                    Some(unit.handle),
                    ctx.now,
                )
            } else {
                None
            };

            if let Some((target, _)) = contact {
                unit.fallback = Some(unit.behavior.clone());
                acquire_target(unit, target, &mut effects);
                transition(unit, BehaviorVariant::Attack { target: Some(target) }, &mut effects, "patrol contact");
            } else if let Some(wp) =
                unit.behavior.next_waypoint(position, ctx.config.waypoint_reached_distance)
            {
                move_unit(unit, ctx, wp, false);
            }
        }

        BehaviorVariant::Retreat { origin } => {
            retreat_movement(unit, ctx, position, origin);
        }

        // 5. Idle: переходов нет
        BehaviorVariant::Idle => {}
    }

    effects
}

/// Housekeeping с пониженной частотой (независимый каданс от tick)
///
/// Сбрасывает engaged_recently, восстанавливает пустой patrol-маршрут.
pub fn update_unit(unit: &mut ManagedUnit, config: &BehaviorConfig) {
    unit.flags.engaged_recently = false;

    if let BehaviorVariant::Patrol { waypoints, cursor } = &mut unit.behavior {
        if waypoints.is_empty() {
            *waypoints = crate::unit::patrol_ring(unit.spawn_position, config.patrol_ring_radius);
            *cursor = 0;
        }
    }
}

/// Хук: юнит получил урон от attacker
///
/// Не-Passive юнит без своей цели разворачивается на обидчика.
pub fn on_damaged(
    unit: &mut ManagedUnit,
    attacker: GridHandle,
    _config: &BehaviorConfig,
) -> Vec<TickEffect> {
    let mut effects = Vec::new();
    unit.flags.engaged_recently = true;

    if unit.mood == Mood::Passive {
        return effects;
    }

    match &unit.behavior {
        // Уже дерёмся или уже отступаем — не переключаемся
        BehaviorVariant::Attack { target: Some(_) } | BehaviorVariant::Retreat { .. } => {}
        BehaviorVariant::Attack { target: None } => {
            acquire_target(unit, attacker, &mut effects);
            unit.behavior = BehaviorVariant::Attack { target: Some(attacker) };
        }
        _ => {
            unit.fallback = Some(unit.behavior.clone());
            acquire_target(unit, attacker, &mut effects);
            transition(unit, BehaviorVariant::Attack { target: Some(attacker) }, &mut effects, "damaged");
        }
    }

    effects
}

/// Хук: входящий backup request
///
/// Согласившийся юнит встаёт в Defense на точке запроса; прежний режим
/// сохраняется как fallback.
pub fn receive_backup_request(
    unit: &mut ManagedUnit,
    location: Vec3,
    config: &BehaviorConfig,
) -> Vec<TickEffect> {
    let mut effects = Vec::new();

    if !unit.can_assist() {
        return effects;
    }

    if !matches!(unit.behavior, BehaviorVariant::Attack { .. }) {
        unit.fallback = Some(unit.behavior.clone());
    }
    transition(
        unit,
        BehaviorVariant::Defense { position: location, radius: config.assist_radius },
        &mut effects,
        "backup request",
    );

    effects
}

// --- Внутренние шаги ---

/// Health guard: true если юнит ушёл в Retreat в этом тике
fn health_guard(
    unit: &mut ManagedUnit,
    position: Vec3,
    ctx: &mut TickContext,
    effects: &mut Vec<TickEffect>,
) -> bool {
    let cfg = ctx.config;
    let ratio = unit.health_ratio;

    if matches!(unit.behavior, BehaviorVariant::Retreat { .. }) {
        // Восстановились с гистерезисом — возвращаемся к fallback или mood-дефолту
        if ratio >= cfg.retreat_health_threshold * cfg.recover_hysteresis {
            let restored = unit.fallback.take().unwrap_or_else(|| {
                ManagedUnit::derive_behavior(unit.mood, unit.spawn_position, cfg.patrol_ring_radius)
            });
            transition(unit, restored, effects, "recovered");
            unit.flags.needs_help = false;
            unit.flags.called_reinforcements = false;
        }
        return false;
    }

    if ratio >= cfg.retreat_health_threshold {
        return false;
    }

    // Last stand: отступать уже поздно, стоим до конца
    if should_enter_last_stand(ratio, cfg.last_stand_threshold) {
        return false;
    }

    transition(unit, BehaviorVariant::Retreat { origin: position }, effects, "health guard");
    unit.flags.needs_help = true;

    // Ровно один broadcast на переход, не на каждый тик отступления
    if !unit.flags.called_reinforcements {
        unit.flags.called_reinforcements = true;
        effects.push(TickEffect::BackupRequested { location: position });
    }

    true
}

fn target_valid(ctx: &TickContext, own_position: Vec3, target: GridHandle) -> bool {
    let Some(target_position) = ctx.world.position(target) else {
        return false;
    };
    let alive = ctx.world.health(target).map_or(false, |h| h > 0.0);
    alive && own_position.distance(target_position) <= ctx.config.attack_abandon_range
}

/// Преследование: упреждение по предсказанной позиции + fire control
fn pursue_target(unit: &mut ManagedUnit, ctx: &mut TickContext, position: Vec3, target: GridHandle) {
    let destination = ctx
        .assessor
        .predictor
        .predict_position(ctx.world, target, ctx.config.prediction_horizon_secs)
        .or_else(|| ctx.world.position(target));

    if let Some(destination) = destination {
        let under_fire = unit.flags.engaged_recently;
        move_unit(unit, ctx, destination, under_fire);
    }

    let distance = ctx
        .world
        .position(target)
        .map_or(f32::MAX, |p| position.distance(p));
    let class = ctx.assessor.predictor.optimal_weapon_class(distance);
    if let Err(err) = ctx.weapons.set_target(unit.handle, target, class) {
        log_weapons_degraded(unit, &err);
    }
}

fn retreat_movement(unit: &mut ManagedUnit, ctx: &mut TickContext, position: Vec3, origin: Vec3) {
    let from_origin = position - origin;
    if from_origin.length() >= ctx.config.retreat_distance {
        // Достаточно далеко — держим позицию
        ctx.navigator.stop(unit.handle);
        return;
    }

    let direction = from_origin.try_normalize().unwrap_or(Vec3::X);
    let destination = origin + direction * ctx.config.retreat_distance;
    move_unit(unit, ctx, destination, true);
}

/// Тактическое перемещение: боковой jink под огнём, деградация без actuator
fn move_unit(unit: &mut ManagedUnit, ctx: &mut TickContext, destination: Vec3, under_fire: bool) {
    let destination = if under_fire {
        // Разброс в горизонтальной плоскости — не летим по прямой под огнём
        let amp = ctx.config.jink_amplitude;
        destination
            + Vec3::new(
                ctx.rng.gen_range(-1.0..1.0) * amp,
                0.0,
                ctx.rng.gen_range(-1.0..1.0) * amp,
            )
    } else {
        destination
    };

    if let Err(err) = ctx.navigator.move_to(unit.handle, destination, ctx.config.cruise_speed) {
        // Нет actuator — юнит деградирует до targeting-only, логируем один раз
        if !unit.flags.nav_degraded_logged {
            unit.flags.nav_degraded_logged = true;
            logger::log_warning(&format!(
                "AI: {:?} navigation unavailable ({}) — targeting-only mode",
                unit.id, err
            ));
        }
    }
}

fn arm_weapons(unit: &mut ManagedUnit, ctx: &TickContext) {
    if !ctx.weapons.has_weapons(unit.handle) {
        log_weapons_degraded(unit, &crate::error::SimError::CollaboratorUnavailable("weapons"));
        return;
    }
    if let Err(err) = ctx.weapons.arm(unit.handle) {
        log_weapons_degraded(unit, &err);
    }
}

fn acquire_target(unit: &mut ManagedUnit, target: GridHandle, effects: &mut Vec<TickEffect>) {
    unit.flags.engaged_recently = true;

    // Guard предупреждает один раз перед первым боем
    if unit.mood == Mood::Guard && !unit.flags.has_warned {
        unit.flags.has_warned = true;
        effects.push(TickEffect::WarningIssued { target });
    }
}

fn on_target_lost(unit: &mut ManagedUnit, ctx: &TickContext, target: GridHandle) {
    ctx.weapons.clear_target(unit.handle);
    logger::log(&format!("AI: {:?} lost target {:?}", unit.id, target));
}

fn log_weapons_degraded(unit: &mut ManagedUnit, err: &crate::error::SimError) {
    if !unit.flags.weapons_degraded_logged {
        unit.flags.weapons_degraded_logged = true;
        logger::log_warning(&format!(
            "AI: {:?} weapons unavailable ({}) — no fire control",
            unit.id, err
        ));
    }
}

fn transition(
    unit: &mut ManagedUnit,
    to: BehaviorVariant,
    effects: &mut Vec<TickEffect>,
    reason: &str,
) {
    let from = unit.behavior.kind();
    let to_kind = to.kind();
    unit.behavior = to;
    logger::log(&format!("AI: {:?} {:?} → {:?} ({})", unit.id, from, to_kind, reason));
    effects.push(TickEffect::BehaviorChanged { from, to: to_kind });
}
