//! Scoped transaction execution.
//!
//! [`TransactionScope::run`] brackets a body of work between `BEGIN` and
//! exactly one terminal action: commit when the body returns `Ok`, rollback
//! when it returns `Err` - including errors raised by caller logic rather
//! than the adapter. The body's original error is what the caller sees
//! after a successful rollback. A failed rollback is not swallowed: it
//! replaces the body error with a fatal transaction error, because the
//! adapter's transactional state can no longer be trusted.

use crate::db::adapter::EngineAdapter;
use crate::error::{DbError, DbResult};
use futures_util::future::BoxFuture;
use tracing::{debug, error, warn};

pub struct TransactionScope;

impl TransactionScope {
    /// Run `body` inside a transaction on the adapter.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let moved = TransactionScope::run(&mut adapter, |adapter| {
    ///     Box::pin(async move {
    ///         adapter.execute(debit_sql, &debit_params).await?;
    ///         adapter.execute(credit_sql, &credit_params).await
    ///     })
    /// })
    /// .await?;
    /// ```
    pub async fn run<T, F>(adapter: &mut EngineAdapter, body: F) -> DbResult<T>
    where
        F: for<'c> FnOnce(&'c mut EngineAdapter) -> BoxFuture<'c, DbResult<T>>,
    {
        adapter.begin_transaction().await?;

        // Bound to a let so the body future's borrow ends before the
        // terminal action reborrows the adapter
        let body_result = body(&mut *adapter).await;

        match body_result {
            Ok(value) => {
                adapter.commit().await?;
                debug!(instance = %adapter.instance_id(), "Transaction scope committed");
                Ok(value)
            }
            Err(body_err) => match adapter.rollback().await {
                Ok(()) => {
                    warn!(
                        instance = %adapter.instance_id(),
                        error = %body_err,
                        "Transaction scope rolled back"
                    );
                    Err(body_err)
                }
                Err(rollback_err) => {
                    error!(
                        instance = %adapter.instance_id(),
                        error = %body_err,
                        rollback_error = %rollback_err,
                        "Rollback failed, connection state is untrustworthy"
                    );
                    Err(DbError::transaction(format!(
                        "Rollback failed after error ({}): {}",
                        body_err, rollback_err
                    )))
                }
            },
        }
    }
}
