//! Acquires a pooled connection, runs a closure inside BEGIN/COMMIT, rolls
//! back on any error. The connection always returns to the pool: `sqlx`'s
//! `Transaction` rolls back on drop if neither `commit` nor `rollback` ran.

use futures::future::BoxFuture;
use sqlx::{Postgres, Transaction};

use crate::database::DbPool;
use crate::errors::{TransactionError, WriteError};

/// `f` already returns typed pipeline errors (`WriteError`); a failure
/// inside `f` propagates unchanged. Only BEGIN/COMMIT failures are wrapped
/// as `WriteError::Transaction`.
///
/// The closure's returned future is boxed and tied to the borrow's lifetime
/// (`BoxFuture<'c, _>`) rather than left as an unconstrained generic `Fut`:
/// every real call site's future captures `tx` across an `.await`, so its
/// type is parameterized by `'c` and no single `Fut` can satisfy a
/// `for<'c> FnOnce(...) -> Fut` bound.
pub async fn with_transaction<T, F>(pool: &DbPool, f: F) -> Result<T, WriteError>
where
    F: for<'c> FnOnce(&'c mut Transaction<'_, Postgres>) -> BoxFuture<'c, Result<T, WriteError>>,
{
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| WriteError::Transaction(TransactionError(e.to_string())))?;

    match f(&mut tx).await {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|e| WriteError::Transaction(TransactionError(e.to_string())))?;
            Ok(value)
        }
        Err(err) => {
            let _ = tx.rollback().await;
            Err(err)
        }
    }
}
