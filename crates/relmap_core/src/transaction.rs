//! Unit-of-work lifecycle.

use crate::error::{CoreError, CoreResult};
use crate::types::EntityRef;

/// State of the session's unit of work.
///
/// `Idle → Active → (Committed | RolledBack)`; the terminal states
/// collapse back to the idle behavior when the next `begin` starts a
/// fresh unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// No unit of work has started.
    Idle,
    /// A unit of work is accepting persists.
    Active,
    /// The last unit of work committed.
    Committed,
    /// The last unit of work rolled back.
    RolledBack,
}

impl TxnState {
    /// Returns `true` for [`TxnState::Active`].
    #[must_use]
    pub fn is_active(self) -> bool {
        self == Self::Active
    }

    /// Name of the state, for diagnostics.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
        }
    }
}

/// One unit of work: the transaction state plus the staged insert list.
///
/// Staging preserves insertion order; the flush reorders by foreign
/// key dependency at commit time. Only one unit of work exists per
/// session, so there is no nesting to police beyond the state machine.
#[derive(Debug)]
pub(crate) struct UnitOfWork {
    state: TxnState,
    staged: Vec<EntityRef>,
}

impl UnitOfWork {
    pub(crate) fn new() -> Self {
        Self {
            state: TxnState::Idle,
            staged: Vec::new(),
        }
    }

    pub(crate) fn state(&self) -> TxnState {
        self.state
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Starts a fresh unit of work.
    pub(crate) fn begin(&mut self) -> CoreResult<()> {
        if self.state.is_active() {
            return Err(CoreError::TransactionAlreadyActive);
        }
        self.state = TxnState::Active;
        self.staged.clear();
        Ok(())
    }

    /// Stages an entity for insertion.
    pub(crate) fn stage(&mut self, entity: EntityRef) -> CoreResult<()> {
        if !self.state.is_active() {
            return Err(CoreError::TransactionNotActive);
        }
        if !self.staged.contains(&entity) {
            self.staged.push(entity);
        }
        Ok(())
    }

    pub(crate) fn staged(&self) -> &[EntityRef] {
        &self.staged
    }

    /// Checks that a commit is legal in the current state.
    pub(crate) fn ensure_can_commit(&self) -> CoreResult<()> {
        if self.state.is_active() {
            Ok(())
        } else {
            Err(CoreError::InvalidTransactionState {
                state: self.state.name(),
            })
        }
    }

    pub(crate) fn mark_committed(&mut self) {
        self.state = TxnState::Committed;
        self.staged.clear();
    }

    pub(crate) fn mark_rolled_back(&mut self) {
        self.state = TxnState::RolledBack;
        self.staged.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_unit_is_idle() {
        let uow = UnitOfWork::new();
        assert_eq!(uow.state(), TxnState::Idle);
        assert!(!uow.is_active());
    }

    #[test]
    fn begin_activates() {
        let mut uow = UnitOfWork::new();
        uow.begin().unwrap();
        assert!(uow.is_active());
    }

    #[test]
    fn begin_while_active_fails() {
        let mut uow = UnitOfWork::new();
        uow.begin().unwrap();
        let err = uow.begin().unwrap_err();
        assert!(matches!(err, CoreError::TransactionAlreadyActive));
    }

    #[test]
    fn begin_after_commit_starts_fresh() {
        let mut uow = UnitOfWork::new();
        uow.begin().unwrap();
        uow.stage(EntityRef::new(1)).unwrap();
        uow.mark_committed();

        uow.begin().unwrap();
        assert!(uow.is_active());
        assert!(uow.staged().is_empty());
    }

    #[test]
    fn stage_outside_active_fails() {
        let mut uow = UnitOfWork::new();
        let err = uow.stage(EntityRef::new(1)).unwrap_err();
        assert!(matches!(err, CoreError::TransactionNotActive));
    }

    #[test]
    fn stage_deduplicates() {
        let mut uow = UnitOfWork::new();
        uow.begin().unwrap();
        uow.stage(EntityRef::new(1)).unwrap();
        uow.stage(EntityRef::new(1)).unwrap();
        assert_eq!(uow.staged().len(), 1);
    }

    #[test]
    fn stage_preserves_order() {
        let mut uow = UnitOfWork::new();
        uow.begin().unwrap();
        for n in [3, 1, 2] {
            uow.stage(EntityRef::new(n)).unwrap();
        }
        let order: Vec<_> = uow.staged().iter().map(|r| r.as_u32()).collect();
        assert_eq!(order, vec![3, 1, 2]);
    }

    #[test]
    fn commit_requires_active_state() {
        let mut uow = UnitOfWork::new();
        let err = uow.ensure_can_commit().unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransactionState { .. }));

        uow.begin().unwrap();
        uow.mark_committed();
        let err = uow.ensure_can_commit().unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidTransactionState { state: "committed" }
        ));
    }

    #[test]
    fn terminal_states_clear_staging() {
        let mut uow = UnitOfWork::new();
        uow.begin().unwrap();
        uow.stage(EntityRef::new(1)).unwrap();
        uow.mark_rolled_back();
        assert!(uow.staged().is_empty());
        assert_eq!(uow.state(), TxnState::RolledBack);
    }
}
