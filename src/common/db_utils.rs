// src/common/db_utils.rs

use std::future::Future;

use sqlx::{PgPool, Postgres, Transaction};

use crate::common::error::AppError;

pub(crate) const MAX_TX_ATTEMPTS: u32 = 3;

/// Abre uma transação REPEATABLE READ. Toda escrita de pedido/venda/estoque passa por aqui.
pub(crate) async fn begin_repeatable_read(
    pool: &PgPool,
) -> Result<Transaction<'static, Postgres>, AppError> {
    let mut tx = pool.begin().await?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
        .execute(&mut *tx)
        .await?;
    Ok(tx)
}

/// Repete a operação inteira quando o Postgres aborta por serialização ou deadlock.
/// Cada tentativa abre a sua própria transação; a anterior já sofreu rollback.
pub(crate) async fn retry_on_conflict<T, F, Fut>(
    operation: &'static str,
    mut attempt_fn: F,
) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut attempt = 1;
    loop {
        match attempt_fn().await {
            Err(err) if err.is_retryable() && attempt < MAX_TX_ATTEMPTS => {
                tracing::warn!(operation, attempt, "⚠️ Conflito de concorrência, repetindo transação");
                attempt += 1;
            }
            Err(err) if err.is_retryable() => {
                tracing::warn!(operation, attempt, "Conflito persistente, desistindo");
                return Err(AppError::Conflict("concurrent_update"));
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn non_retryable_errors_are_returned_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), AppError> = retry_on_conflict("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::ResourceNotFound("order")) }
        })
        .await;

        assert!(matches!(result, Err(AppError::ResourceNotFound("order"))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn success_is_passed_through() {
        let value = retry_on_conflict("test", || async { Ok::<_, AppError>(42) })
            .await
            .expect("ok");
        assert_eq!(value, 42);
    }
}
