//! Write transaction state.

use std::sync::Arc;

use super::TransactionManager;
use crate::error::CoreResult;
use crate::storage::{State, WorkingState};

/// Status of a write transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Accepting mutations.
    Active,
    /// Changes were published.
    Committed,
    /// Changes were discarded.
    Cancelled,
}

/// An open write transaction.
///
/// Holds the store's write lock from [`WriteTransaction::begin`] until it
/// is committed, cancelled or dropped. Mutations go to a private working
/// copy that no reader can see before commit.
#[derive(Debug)]
pub(crate) struct WriteTransaction {
    store: Arc<TransactionManager>,
    working: Option<WorkingState>,
    status: TransactionStatus,
}

impl WriteTransaction {
    /// Takes the write lock and starts from the latest committed state.
    ///
    /// # Errors
    ///
    /// Fails when the store is closed.
    pub fn begin(store: Arc<TransactionManager>) -> CoreResult<Self> {
        store.acquire_write()?;
        let working = WorkingState::new(&store.latest());
        tracing::trace!(version = working.version.as_u64(), "write transaction started");
        Ok(Self {
            store,
            working: Some(working),
            status: TransactionStatus::Active,
        })
    }

    /// The working copy, including uncommitted changes.
    pub fn state(&self) -> Option<&State> {
        self.working.as_ref().map(|w| &w.state)
    }

    pub fn working_mut(&mut self) -> Option<&mut WorkingState> {
        self.working.as_mut()
    }

    /// Publishes the changes and releases the write lock.
    ///
    /// On error the changes are discarded and the lock is still released.
    pub fn commit(mut self) -> CoreResult<Arc<State>> {
        let working = self.working.take();
        let result = match working {
            Some(working) => self.store.commit(working),
            None => Ok(self.store.latest()),
        };
        self.status = if result.is_ok() {
            TransactionStatus::Committed
        } else {
            TransactionStatus::Cancelled
        };
        self.finish();
        result
    }

    /// Discards the changes and releases the write lock.
    pub fn cancel(mut self) {
        self.working = None;
        self.status = TransactionStatus::Cancelled;
        self.finish();
    }

    fn finish(&mut self) {
        self.store.release_write();
    }
}

impl Drop for WriteTransaction {
    fn drop(&mut self) {
        if self.status == TransactionStatus::Active {
            tracing::debug!("write transaction dropped without commit; rolling back");
            self.status = TransactionStatus::Cancelled;
            self.finish();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::schema::{ObjectSchemaDef, Schema};
    use crate::types::UpdateMode;
    use tessera_codec::Value;

    fn store() -> Arc<TransactionManager> {
        let tm = Arc::new(TransactionManager::open(&Config::in_memory("txn")).unwrap());
        let mut txn = WriteTransaction::begin(Arc::clone(&tm)).unwrap();
        let schema = Schema::new(vec![ObjectSchemaDef::new("T").property("v", "int")]).unwrap();
        txn.working_mut().unwrap().replace_schema(Arc::new(schema));
        txn.commit().unwrap();
        tm
    }

    fn add(txn: &mut WriteTransaction, v: i64) {
        txn.working_mut()
            .unwrap()
            .create("T", Value::object([("v", Value::Int(v))]), UpdateMode::Never)
            .unwrap();
    }

    #[test]
    fn uncommitted_changes_are_private() {
        let tm = store();
        let mut txn = WriteTransaction::begin(Arc::clone(&tm)).unwrap();
        add(&mut txn, 1);
        assert_eq!(txn.state().unwrap().table("T").unwrap().len(), 1);
        assert_eq!(tm.latest().table("T").unwrap().len(), 0);
        let state = txn.commit().unwrap();
        assert_eq!(state.table("T").unwrap().len(), 1);
    }

    #[test]
    fn cancel_discards_and_releases() {
        let tm = store();
        let mut txn = WriteTransaction::begin(Arc::clone(&tm)).unwrap();
        add(&mut txn, 1);
        txn.cancel();
        assert_eq!(tm.latest().table("T").unwrap().len(), 0);
        // The lock is free again.
        WriteTransaction::begin(Arc::clone(&tm)).unwrap().cancel();
    }

    #[test]
    fn drop_rolls_back() {
        let tm = store();
        {
            let mut txn = WriteTransaction::begin(Arc::clone(&tm)).unwrap();
            add(&mut txn, 1);
            assert_eq!(txn.status, TransactionStatus::Active);
        }
        assert_eq!(tm.latest().table("T").unwrap().len(), 0);
        let txn = WriteTransaction::begin(Arc::clone(&tm)).unwrap();
        assert_eq!(txn.state().unwrap().version(), tm.latest().version().next());
    }
}
