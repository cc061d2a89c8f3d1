//! Persistence-контракт: упорядоченный список {prefab_id, position, mood}
//!
//! Снимок производится на shutdown, восстановление — на старте через
//! SpawnExecutor. Формат — JSON; позиции сериализуются как [f32; 3].

use std::sync::Arc;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::host::{SpawnExecutor, WorldView};
use crate::logger;
use crate::registry::EntityRegistry;
use crate::spawn::EncounterProfile;
use crate::unit::Mood;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRecord {
    pub prefab_id: String,
    pub position: [f32; 3],
    pub mood: Mood,
}

pub fn records_to_json(records: &[UnitRecord]) -> Result<String, SimError> {
    serde_json::to_string_pretty(records)
        .map_err(|_| SimError::InvalidArgument("unit records not serializable"))
}

pub fn records_from_json(json: &str) -> Result<Vec<UnitRecord>, SimError> {
    serde_json::from_str(json).map_err(|e| {
        logger::log_error(&format!("Persistence: load failed: {}", e));
        SimError::InvalidArgument("malformed unit records")
    })
}

/// Снимок живых юнитов в стабильном порядке (по UnitId)
///
/// Юниты без известного префаба (зарегистрированные мимо spawn-пути)
/// в снимок не попадают; каждый пропуск логируется.
pub fn snapshot(registry: &EntityRegistry, world: &dyn WorldView) -> Vec<UnitRecord> {
    let mut records = Vec::new();
    for unit in registry.units_ordered() {
        let Some(prefab_id) = unit.prefab_id.clone() else {
            logger::log(&format!("Persistence: {:?} has no prefab, skipped", unit.id));
            continue;
        };
        let position = world.position(unit.handle).unwrap_or(unit.spawn_position);
        records.push(UnitRecord { prefab_id, position: position.to_array(), mood: unit.mood });
    }
    records
}

/// Восстановление юнитов из записей. Ошибка одной записи логируется и не
/// мешает остальным; возвращается число восстановленных.
pub fn restore(
    records: &[UnitRecord],
    executor: &Arc<dyn SpawnExecutor>,
    registry: &mut EntityRegistry,
) -> usize {
    let mut restored = 0;
    for record in records {
        // Одиночный префаб оборачивается в ad-hoc профиль для executor'а
        let profile = EncounterProfile {
            id: format!("restore:{}", record.prefab_id),
            prefab_ids: vec![record.prefab_id.clone()],
            default_mood: record.mood,
        };
        let position = Vec3::from_array(record.position);

        let handles = match executor.spawn_encounter(&profile, position) {
            Ok(handles) => handles,
            Err(e) => {
                logger::log_warning(&format!("Persistence: restore of {} failed: {}", record.prefab_id, e));
                continue;
            }
        };

        for &handle in &handles {
            match registry.register_unit(handle, record.mood) {
                Ok(unit_id) => {
                    registry.set_prefab(unit_id, &record.prefab_id);
                    restored += 1;
                }
                Err(e) => {
                    logger::log_warning(&format!("Persistence: register of {} failed: {}", record.prefab_id, e));
                }
            }
        }
    }
    logger::log_info(&format!("Persistence: {} of {} units restored", restored, records.len()));
    restored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::BehaviorConfig;
    use crate::host::{StubNavigator, StubSpawnExecutor, StubWeapons, StubWorld};

    fn records() -> Vec<UnitRecord> {
        vec![
            UnitRecord { prefab_id: "raider_mk1".to_string(), position: [100.0, 0.0, -50.0], mood: Mood::Aggressive },
            UnitRecord { prefab_id: "sentry".to_string(), position: [0.0, 20.0, 0.0], mood: Mood::Guard },
        ]
    }

    #[test]
    fn test_json_roundtrip_preserves_order() {
        let json = records_to_json(&records()).unwrap();
        let loaded = records_from_json(&json).unwrap();
        assert_eq!(loaded, records());
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(records_from_json("{not json").is_err());
    }

    #[test]
    fn test_restore_then_snapshot() {
        let world = Arc::new(StubWorld::new());
        let executor: Arc<dyn SpawnExecutor> = Arc::new(StubSpawnExecutor::new(world.clone(), 9));
        let mut registry = EntityRegistry::new(
            world.clone(),
            Arc::new(StubNavigator::new()),
            Arc::new(StubWeapons::new()),
            BehaviorConfig::default(),
            42,
        );

        let restored = restore(&records(), &executor, &mut registry);
        assert_eq!(restored, 2);
        assert_eq!(registry.len(), 2);

        let saved = snapshot(&registry, world.as_ref());
        assert_eq!(saved.len(), 2);
        assert!(saved.iter().any(|r| r.prefab_id == "raider_mk1" && r.mood == Mood::Aggressive));
        assert!(saved.iter().any(|r| r.prefab_id == "sentry" && r.mood == Mood::Guard));
    }

    #[test]
    fn test_executor_failure_skips_record() {
        let world = Arc::new(StubWorld::new());
        let stub = Arc::new(StubSpawnExecutor::new(world.clone(), 9));
        stub.fail_next();
        let executor: Arc<dyn SpawnExecutor> = stub;
        let mut registry = EntityRegistry::new(
            world,
            Arc::new(StubNavigator::new()),
            Arc::new(StubWeapons::new()),
            BehaviorConfig::default(),
            42,
        );

        // Первая запись падает, вторая восстанавливается
        let restored = restore(&records(), &executor, &mut registry);
        assert_eq!(restored, 1);
        assert_eq!(registry.len(), 1);
    }
}
