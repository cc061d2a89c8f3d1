//! Ошибки координационного ядра
//!
//! Таксономия фиксированная:
//! - InvalidReference — протухший spatial handle (юнит удаляется следующим cleanup pass)
//! - InvalidArgument — мусор на входе API (no-op для вызывающего, логируем)
//! - CapacityExceeded — encounter cap достигнут (запрос отклонён, partial state не создаётся)
//! - CollaboratorUnavailable — нет weapons/navigation/sector API (деградация, юнит продолжает тикать)

use std::fmt;

use crate::unit::GridHandle;

#[derive(Debug, Clone, PartialEq)]
pub enum SimError {
    /// Spatial handle больше не резолвится миром
    InvalidReference(GridHandle),

    /// Некорректный аргумент (null/отрицательный range и т.п.)
    InvalidArgument(&'static str),

    /// Превышен лимит одновременных encounters
    CapacityExceeded { active: usize, cap: usize },

    /// Внешний collaborator отсутствует (feature деградирует)
    CollaboratorUnavailable(&'static str),
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimError::InvalidReference(handle) => {
                write!(f, "invalid spatial reference: {:?}", handle)
            }
            SimError::InvalidArgument(what) => write!(f, "invalid argument: {}", what),
            SimError::CapacityExceeded { active, cap } => {
                write!(f, "encounter capacity exceeded: {} active, cap {}", active, cap)
            }
            SimError::CollaboratorUnavailable(which) => {
                write!(f, "collaborator unavailable: {}", which)
            }
        }
    }
}

impl std::error::Error for SimError {}
