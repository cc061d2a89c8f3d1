//! EntityRegistry: арена managed-юнитов + tick driver
//!
//! Registry эксклюзивно владеет временем жизни юнитов; behavior хранит id
//! и резолвится через арену — никаких циклов владения. Collaborators
//! передаются при конструировании (никаких глобальных singletons).
//!
//! TickAll итерирует стабильный snapshot id, взятый в начале прохода:
//! структурные изменения из тика юнита (spawn/despawn) влияют только на
//! следующий проход. Паника одного юнита изолируется и не прерывает
//! остальных; после серии аварийных проходов ядро отключает себя
//! ("core disabled"), а не роняет host.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use bevy::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::behavior::{self, BehaviorConfig, BehaviorKind, BehaviorVariant, TickContext, TickEffect};
use crate::comms::CommunicationBus;
use crate::error::SimError;
use crate::host::{Navigator, WeaponsApi, WorldView};
use crate::logger;
use crate::threat::ThreatAssessor;
use crate::unit::{GridHandle, ManagedUnit, Mood, UnitId};

/// Подряд идущие аварийные проходы до отключения ядра
const MAX_FAULTY_TICKS: u32 = 10;

/// Подписчик на lifecycle-события registry (plugin extension point)
///
/// Вызовы синхронные; паника подписчика ловится, логируется и не
/// прерывает ни тик, ни других подписчиков.
pub trait RegistryListener: Send + Sync {
    fn on_unit_spawned(&self, _id: UnitId, _handle: GridHandle) {}
    fn on_unit_removed(&self, _id: UnitId, _handle: GridHandle) {}
    fn on_mood_changed(&self, _id: UnitId, _from: Mood, _to: Mood) {}
    fn on_behavior_changed(&self, _id: UnitId, _from: BehaviorKind, _to: BehaviorKind) {}
    /// Guard-юнит первый раз предупреждает цель
    fn on_unit_warning(&self, _id: UnitId, _target: GridHandle) {}
    /// Периодический callback (конец каждого TickAll-прохода)
    fn on_tick(&self, _now: f64) {}
}

/// Срез состояния registry: счётчики по mood/behavior + средний health
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistryStatistics {
    pub total: usize,
    pub passive: usize,
    pub guard: usize,
    pub aggressive: usize,
    pub idle: usize,
    pub patrol: usize,
    pub attack: usize,
    pub defense: usize,
    pub retreat: usize,
    pub mean_health_ratio: f32,
}

pub struct EntityRegistry {
    units: HashMap<UnitId, ManagedUnit>,
    by_handle: HashMap<GridHandle, UnitId>,
    next_id: u64,
    bus: CommunicationBus,
    assessor: ThreatAssessor,
    listeners: Vec<Box<dyn RegistryListener>>,
    world: Arc<dyn WorldView>,
    navigator: Arc<dyn Navigator>,
    weapons: Arc<dyn WeaponsApi>,
    config: BehaviorConfig,
    rng: ChaCha8Rng,
    /// Часы последнего TickAll-прохода (штампы power-кэша — в этом домене)
    last_tick: f64,
    faulty_ticks: u32,
    disabled: bool,
}

impl EntityRegistry {
    pub fn new(
        world: Arc<dyn WorldView>,
        navigator: Arc<dyn Navigator>,
        weapons: Arc<dyn WeaponsApi>,
        config: BehaviorConfig,
        seed: u64,
    ) -> Self {
        Self {
            units: HashMap::new(),
            by_handle: HashMap::new(),
            next_id: 1,
            bus: CommunicationBus::new(),
            assessor: ThreatAssessor::new(),
            listeners: Vec::new(),
            world,
            navigator,
            weapons,
            config,
            rng: ChaCha8Rng::seed_from_u64(seed),
            last_tick: 0.0,
            faulty_ticks: 0,
            disabled: false,
        }
    }

    pub fn add_listener(&mut self, listener: Box<dyn RegistryListener>) {
        self.listeners.push(listener);
    }

    /// Регистрация юнита. Идемпотентна: повторная регистрация того же
    /// handle возвращает существующий id без дубликата и без события.
    ///
    /// Behavior выводится из mood: Aggressive → Attack(без цели),
    /// Passive → Idle, Guard → Patrol (кольцо вокруг точки спавна).
    pub fn register_unit(&mut self, handle: GridHandle, mood: Mood) -> Result<UnitId, SimError> {
        if let Some(&existing) = self.by_handle.get(&handle) {
            return Ok(existing);
        }

        if !self.world.is_valid(handle) {
            logger::log_warning(&format!("Registry: register of invalid handle {:?}", handle));
            return Err(SimError::InvalidReference(handle));
        }

        let spawn_position = self.world.position(handle).unwrap_or(Vec3::ZERO);
        let initial_health = self.world.health(handle).unwrap_or(1.0).max(1.0);
        let id = UnitId(self.next_id);
        self.next_id += 1;

        let unit = ManagedUnit {
            id,
            handle,
            mood,
            behavior: ManagedUnit::derive_behavior(mood, spawn_position, self.config.patrol_ring_radius),
            fallback: None,
            faction_id: self.world.faction_of(handle),
            prefab_id: None,
            spawn_position,
            initial_health,
            health_ratio: 1.0,
            flags: Default::default(),
        };

        self.units.insert(id, unit);
        self.by_handle.insert(handle, id);
        self.bus.register(id);

        logger::log_info(&format!("Registry: unit {:?} registered ({:?}, {:?})", id, handle, mood));
        self.notify(|l| l.on_unit_spawned(id, handle));

        Ok(id)
    }

    /// Удаление юнита; no-op для уже удалённого id
    pub fn unregister_unit(&mut self, id: UnitId) {
        let Some(unit) = self.units.remove(&id) else {
            return;
        };
        self.by_handle.remove(&unit.handle);
        // Обязательная отписка: протухший получатель не должен ловить broadcast
        self.bus.unregister(id);

        logger::log_info(&format!("Registry: unit {:?} removed", id));
        self.notify(|l| l.on_unit_removed(id, unit.handle));
    }

    /// Один проход по стабильному snapshot юнитов
    pub fn tick_all(&mut self, now: f64) {
        if self.disabled {
            return;
        }
        self.last_tick = now;

        // Snapshot в начале прохода; сортировка — для воспроизводимости
        let mut snapshot: Vec<UnitId> = self.units.keys().copied().collect();
        snapshot.sort();

        let mut pass_faulted = false;

        for id in snapshot {
            // Юнит мог быть удалён ранее в этом же проходе
            if !self.units.contains_key(&id) {
                continue;
            }

            let effects = {
                let Some(unit) = self.units.get_mut(&id) else { continue };
                let mut ctx = TickContext {
                    world: self.world.as_ref(),
                    navigator: self.navigator.as_ref(),
                    weapons: self.weapons.as_ref(),
                    assessor: &mut self.assessor,
                    config: &self.config,
                    now,
                    rng: &mut self.rng,
                };

                // Изоляция: паника одного юнита не прерывает проход
                match catch_unwind(AssertUnwindSafe(|| behavior::tick_unit(unit, &mut ctx))) {
                    Ok(effects) => effects,
                    Err(_) => {
                        pass_faulted = true;
                        logger::log_error(&format!("Registry: tick of {:?} panicked — isolated", id));
                        continue;
                    }
                }
            };

            self.apply_effects(id, effects);
        }

        if pass_faulted {
            self.faulty_ticks += 1;
            if self.faulty_ticks >= MAX_FAULTY_TICKS {
                self.disabled = true;
                logger::log_error("Registry: repeated tick failures — core disabled");
            }
        } else {
            self.faulty_ticks = 0;
        }

        // Периодический callback для plugins
        let listener_now = now;
        self.notify(|l| l.on_tick(listener_now));
    }

    /// Housekeeping с пониженной частотой (независимый каданс от tick_all)
    pub fn update_all(&mut self) {
        if self.disabled {
            return;
        }
        for unit in self.units.values_mut() {
            behavior::update_unit(unit, &self.config);
        }
        self.assessor.predictor.clear_cache();
    }

    /// Поиск цели: Passive всегда None, остальное делегируется ThreatAssessor
    ///
    /// Часы — время последнего тика, чтобы штампы power-кэша не расходились
    /// с теми, что пишутся внутри TickAll.
    pub fn find_target(
        &mut self,
        origin: Vec3,
        range: f32,
        mood: Mood,
        faction_id: Option<u64>,
    ) -> Option<GridHandle> {
        if mood == Mood::Passive {
            return None;
        }
        let now = self.last_tick;
        self.assessor
            .find_target(self.world.as_ref(), origin, range, faction_id, None, now)
            .map(|(handle, _)| handle)
    }

    /// Backup broadcast: синхронно, по snapshot получателей из bus
    ///
    /// Доставка каждому agent ≠ requester с can_assist; паника одного
    /// получателя логируется и не блокирует остальных. Ноль eligible —
    /// no-op. Возвращает число откликнувшихся.
    pub fn request_backup(&mut self, requester: UnitId, location: Vec3) -> usize {
        let recipients = self.bus.recipients(requester);
        if recipients.is_empty() {
            return 0;
        }

        let mut delivered = 0;
        let mut pending: Vec<(UnitId, Vec<TickEffect>)> = Vec::new();

        for id in recipients {
            let Some(unit) = self.units.get_mut(&id) else {
                // Unregister при удалении обязателен, сюда попадать не должны
                logger::log_warning(&format!("Bus: stale recipient {:?} skipped", id));
                continue;
            };

            let config = &self.config;
            let result = catch_unwind(AssertUnwindSafe(|| {
                behavior::receive_backup_request(unit, location, config)
            }));
            match result {
                Ok(effects) => {
                    if !effects.is_empty() {
                        delivered += 1;
                        pending.push((id, effects));
                    }
                }
                Err(_) => {
                    logger::log_error(&format!("Bus: delivery to {:?} panicked — isolated", id));
                }
            }
        }

        for (id, effects) in pending {
            self.apply_effects(id, effects);
        }

        if delivered > 0 {
            logger::log(&format!(
                "Bus: {:?} requested backup at {:?} — {} responded",
                requester, location, delivered
            ));
        }
        delivered
    }

    /// Урон по managed-юниту: разворачиваем юнит на обидчика
    pub fn report_damage(&mut self, victim: GridHandle, attacker: GridHandle) {
        let Some(&id) = self.by_handle.get(&victim) else {
            return;
        };
        let effects = {
            let Some(unit) = self.units.get_mut(&id) else { return };
            behavior::on_damaged(unit, attacker, &self.config)
        };
        self.apply_effects(id, effects);
    }

    /// Замена активного behavior (атомарно относительно тика)
    pub fn set_behavior(&mut self, id: UnitId, behavior: BehaviorVariant) -> Result<(), SimError> {
        let Some(unit) = self.units.get_mut(&id) else {
            logger::log_warning(&format!("Registry: set_behavior for unknown {:?} — no-op", id));
            return Err(SimError::InvalidArgument("unknown unit id"));
        };
        let from = unit.behavior.kind();
        let to = behavior.kind();
        unit.behavior = behavior;
        unit.fallback = None;
        self.notify(|l| l.on_behavior_changed(id, from, to));
        Ok(())
    }

    /// Привязка префаба к юниту (persistence-снимок)
    pub fn set_prefab(&mut self, id: UnitId, prefab_id: &str) {
        if let Some(unit) = self.units.get_mut(&id) {
            unit.prefab_id = Some(prefab_id.to_string());
        }
    }

    pub fn get_behavior(&self, id: UnitId) -> Option<BehaviorVariant> {
        self.units.get(&id).map(|u| u.behavior.clone())
    }

    /// Смена mood с пере-выводом дефолтного behavior
    pub fn set_mood(&mut self, id: UnitId, mood: Mood) -> Result<(), SimError> {
        let Some(unit) = self.units.get_mut(&id) else {
            logger::log_warning(&format!("Registry: set_mood for unknown {:?} — no-op", id));
            return Err(SimError::InvalidArgument("unknown unit id"));
        };
        if unit.mood == mood {
            return Ok(());
        }

        let from_mood = unit.mood;
        let from_kind = unit.behavior.kind();
        unit.mood = mood;
        unit.behavior =
            ManagedUnit::derive_behavior(mood, unit.spawn_position, self.config.patrol_ring_radius);
        unit.fallback = None;
        let to_kind = unit.behavior.kind();

        self.notify(|l| l.on_mood_changed(id, from_mood, mood));
        if from_kind != to_kind {
            self.notify(|l| l.on_behavior_changed(id, from_kind, to_kind));
        }
        Ok(())
    }

    /// Глобальная смена mood для всех юнитов
    pub fn set_mood_all(&mut self, mood: Mood) {
        let mut ids: Vec<UnitId> = self.units.keys().copied().collect();
        ids.sort();
        for id in ids {
            let _ = self.set_mood(id, mood);
        }
    }

    /// Ленивая чистка юнитов с протухшими spatial handle
    ///
    /// Инвалидация замечается здесь, не посреди тика. Возвращает число удалённых.
    pub fn cleanup_closed_grids(&mut self) -> usize {
        let stale: Vec<UnitId> = self
            .units
            .values()
            .filter(|u| !self.world.is_valid(u.handle))
            .map(|u| u.id)
            .collect();

        let removed = stale.len();
        for id in stale {
            self.unregister_unit(id);
        }
        if removed > 0 {
            logger::log(&format!("Registry: cleanup removed {} stale units", removed));
        }
        removed
    }

    pub fn get_statistics(&self) -> RegistryStatistics {
        let mut stats = RegistryStatistics { total: self.units.len(), ..Default::default() };

        let mut health_sum = 0.0;
        for unit in self.units.values() {
            match unit.mood {
                Mood::Passive => stats.passive += 1,
                Mood::Guard => stats.guard += 1,
                Mood::Aggressive => stats.aggressive += 1,
            }
            match unit.behavior.kind() {
                BehaviorKind::Idle => stats.idle += 1,
                BehaviorKind::Patrol => stats.patrol += 1,
                BehaviorKind::Attack => stats.attack += 1,
                BehaviorKind::Defense => stats.defense += 1,
                BehaviorKind::Retreat => stats.retreat += 1,
            }
            health_sum += unit.health_ratio;
        }
        if stats.total > 0 {
            stats.mean_health_ratio = health_sum / stats.total as f32;
        }
        stats
    }

    /// Синхронный разбор: все юниты и агенты bus отписываются до возврата
    pub fn dispose(&mut self) {
        let mut ids: Vec<UnitId> = self.units.keys().copied().collect();
        ids.sort();
        for id in ids {
            self.unregister_unit(id);
        }
        self.bus.clear();
        logger::log_info("Registry: disposed");
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn unit(&self, id: UnitId) -> Option<&ManagedUnit> {
        self.units.get(&id)
    }

    pub fn unit_by_handle(&self, handle: GridHandle) -> Option<&ManagedUnit> {
        self.by_handle.get(&handle).and_then(|id| self.units.get(id))
    }

    /// Юниты в стабильном порядке (persistence snapshot)
    pub fn units_ordered(&self) -> Vec<&ManagedUnit> {
        let mut units: Vec<&ManagedUnit> = self.units.values().collect();
        units.sort_by_key(|u| u.id);
        units
    }

    pub fn bus(&self) -> &CommunicationBus {
        &self.bus
    }

    fn apply_effects(&mut self, id: UnitId, effects: Vec<TickEffect>) {
        for effect in effects {
            match effect {
                TickEffect::BehaviorChanged { from, to } => {
                    self.notify(|l| l.on_behavior_changed(id, from, to));
                }
                TickEffect::BackupRequested { location } => {
                    // Retreat-переход регистрирует юнит в bus (идемпотентно)
                    self.bus.register(id);
                    self.request_backup(id, location);
                }
                TickEffect::WarningIssued { target } => {
                    self.notify(|l| l.on_unit_warning(id, target));
                }
            }
        }
    }

    /// Рассылка события подписчикам с изоляцией паник
    fn notify<F: Fn(&dyn RegistryListener)>(&self, call: F) {
        for listener in &self.listeners {
            if catch_unwind(AssertUnwindSafe(|| call(listener.as_ref()))).is_err() {
                logger::log_error("Registry: listener panicked — isolated");
            }
        }
    }
}
