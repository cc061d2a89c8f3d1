//! CommunicationBus: реестр backup-capable агентов
//!
//! Ключ — identity юнита (UnitId), не value equality. Bus не владеет
//! юнитами: хранит только id, доставку выполняет EntityRegistry через
//! арену (bus отдаёт snapshot получателей, итерация идёт по snapshot —
//! register/unregister во время доставки не ломают рассылку).
//!
//! Unregister при удалении юнита обязателен: протухшие получатели
//! никогда не должны попадать в broadcast.

use std::collections::BTreeSet;

use crate::logger;
use crate::unit::UnitId;

#[derive(Debug, Default)]
pub struct CommunicationBus {
    agents: BTreeSet<UnitId>,
}

impl CommunicationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Идемпотентная регистрация: дубликат логируется, не дублируется
    pub fn register(&mut self, agent: UnitId) {
        if !self.agents.insert(agent) {
            logger::log(&format!("CommunicationBus: duplicate register of {:?}", agent));
        }
    }

    /// No-op для незарегистрированного агента
    pub fn unregister(&mut self, agent: UnitId) {
        self.agents.remove(&agent);
    }

    pub fn is_registered(&self, agent: UnitId) -> bool {
        self.agents.contains(&agent)
    }

    /// Snapshot получателей broadcast'а (все кроме requester)
    ///
    /// Порядок получателей не гарантируется контрактом; can_assist
    /// проверяет доставляющая сторона — у bus нет доступа к состоянию юнитов.
    pub fn recipients(&self, requester: UnitId) -> Vec<UnitId> {
        self.agents.iter().copied().filter(|&a| a != requester).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn clear(&mut self) {
        self.agents.clear();
    }
}
