//! Prepaid family wallet
//!
//! Sole authority over `family_wallet.balance`. Every balance mutation locks
//! the wallet row, writes the new balance, and appends a `wallet_transactions`
//! row in the same transaction. Insufficient funds is a business result, not
//! an error.

use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use hearth_shared::{SpendReason, TxnKind};

use crate::error::{BillingError, BillingResult};

/// Wallet state for API responses
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct FamilyWallet {
    pub id: Uuid,
    pub family_id: Uuid,
    pub balance: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// One row of the append-only transaction log
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub wallet_id: Uuid,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: String,
    pub amount: i64,
    pub reason: String,
    pub description: String,
    pub user_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Result of a debit attempt
#[derive(Debug, Clone, Serialize)]
pub enum DebitOutcome {
    Debited { new_balance: i64 },
    InsufficientFunds { balance: i64, required: i64 },
}

/// Wallet service
#[derive(Clone)]
pub struct WalletService {
    pool: PgPool,
}

impl WalletService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Debit the family wallet by `amount` whole currency units.
    ///
    /// Locks the wallet row (creating it at balance 0 if absent), checks the
    /// balance, decrements it and appends a `spend` transaction atomically.
    /// Concurrent debits for the same family serialize on the row lock, so
    /// `balance >= 0` holds under any interleaving.
    pub async fn debit(
        &self,
        family_id: Uuid,
        amount: i64,
        reason: SpendReason,
        description: &str,
        user_id: Uuid,
    ) -> BillingResult<DebitOutcome> {
        if amount <= 0 {
            return Err(BillingError::InvalidAmount(format!(
                "debit amount must be positive, got {amount}"
            )));
        }

        let mut tx = self.pool.begin().await?;

        let (wallet_id, balance) = lock_or_create_wallet(&mut tx, family_id).await?;

        if balance < amount {
            // Roll back the (possibly created) lock scope; creation of an
            // empty wallet row is not worth keeping on a failed debit.
            tx.rollback().await?;
            tracing::info!(
                family_id = %family_id,
                balance = balance,
                required = amount,
                reason = %reason,
                "Wallet debit denied: insufficient funds"
            );
            return Ok(DebitOutcome::InsufficientFunds {
                balance,
                required: amount,
            });
        }

        let new_balance: i64 = sqlx::query_scalar(
            "UPDATE family_wallet SET balance = balance - $1, updated_at = NOW() WHERE id = $2 RETURNING balance",
        )
        .bind(amount)
        .bind(wallet_id)
        .fetch_one(&mut *tx)
        .await?;

        append_transaction(
            &mut tx,
            wallet_id,
            TxnKind::Spend,
            amount,
            reason,
            description,
            Some(user_id),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            family_id = %family_id,
            amount = amount,
            reason = %reason,
            new_balance = new_balance,
            "Wallet debited"
        );

        Ok(DebitOutcome::Debited { new_balance })
    }

    /// Credit the family wallet (topup or refund)
    pub async fn credit(
        &self,
        family_id: Uuid,
        amount: i64,
        kind: TxnKind,
        reason: SpendReason,
        description: &str,
        user_id: Option<Uuid>,
    ) -> BillingResult<i64> {
        let mut tx = self.pool.begin().await?;
        let new_balance =
            credit_in_tx(&mut tx, family_id, amount, kind, reason, description, user_id).await?;
        tx.commit().await?;

        tracing::info!(
            family_id = %family_id,
            amount = amount,
            kind = kind.as_str(),
            reason = %reason,
            new_balance = new_balance,
            "Wallet credited"
        );

        Ok(new_balance)
    }

    /// Non-locking balance read; a missing wallet reads as zero
    pub async fn balance(&self, family_id: Uuid) -> BillingResult<i64> {
        let balance: Option<i64> =
            sqlx::query_scalar("SELECT balance FROM family_wallet WHERE family_id = $1")
                .bind(family_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(balance.unwrap_or(0))
    }

    /// Recent transaction history, newest first
    pub async fn history(
        &self,
        family_id: Uuid,
        limit: i64,
    ) -> BillingResult<Vec<WalletTransaction>> {
        let rows: Vec<WalletTransaction> = sqlx::query_as(
            r#"
            SELECT t.id, t.wallet_id, t.type, t.amount, t.reason, t.description,
                   t.user_id, t.created_at
            FROM wallet_transactions t
            JOIN family_wallet w ON w.id = t.wallet_id
            WHERE w.family_id = $1
            ORDER BY t.created_at DESC
            LIMIT $2
            "#,
        )
        .bind(family_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

/// Lock the family's wallet row for update, creating it at balance 0 first if
/// it does not exist. Returns (wallet_id, balance).
async fn lock_or_create_wallet(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    family_id: Uuid,
) -> BillingResult<(Uuid, i64)> {
    // The no-op upsert makes a first call race-safe; the subsequent
    // FOR UPDATE select is what actually serializes concurrent movements.
    sqlx::query(
        "INSERT INTO family_wallet (family_id) VALUES ($1) ON CONFLICT (family_id) DO NOTHING",
    )
    .bind(family_id)
    .execute(&mut **tx)
    .await?;

    let row: (Uuid, i64) =
        sqlx::query_as("SELECT id, balance FROM family_wallet WHERE family_id = $1 FOR UPDATE")
            .bind(family_id)
            .fetch_one(&mut **tx)
            .await?;

    Ok(row)
}

/// Credit inside an existing transaction. Used by the webhook dispatcher so a
/// topup lands in the same transaction that marks the payment paid.
pub async fn credit_in_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    family_id: Uuid,
    amount: i64,
    kind: TxnKind,
    reason: SpendReason,
    description: &str,
    user_id: Option<Uuid>,
) -> BillingResult<i64> {
    if amount <= 0 {
        return Err(BillingError::InvalidAmount(format!(
            "credit amount must be positive, got {amount}"
        )));
    }
    if kind == TxnKind::Spend {
        return Err(BillingError::InvalidAmount(
            "credit cannot use the spend kind".to_string(),
        ));
    }

    let (wallet_id, _) = lock_or_create_wallet(tx, family_id).await?;

    let new_balance: i64 = sqlx::query_scalar(
        "UPDATE family_wallet SET balance = balance + $1, updated_at = NOW() WHERE id = $2 RETURNING balance",
    )
    .bind(amount)
    .bind(wallet_id)
    .fetch_one(&mut **tx)
    .await?;

    append_transaction(tx, wallet_id, kind, amount, reason, description, user_id).await?;

    Ok(new_balance)
}

async fn append_transaction(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    wallet_id: Uuid,
    kind: TxnKind,
    amount: i64,
    reason: SpendReason,
    description: &str,
    user_id: Option<Uuid>,
) -> BillingResult<()> {
    sqlx::query(
        r#"
        INSERT INTO wallet_transactions (wallet_id, type, amount, reason, description, user_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(wallet_id)
    .bind(kind.as_str())
    .bind(amount)
    .bind(reason.as_str())
    .bind(description)
    .bind(user_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Recompute a wallet balance from its transaction log.
///
/// Reconciliation helper for consistency checks; reads only.
pub async fn replayed_balance(conn: &mut PgConnection, wallet_id: Uuid) -> BillingResult<i64> {
    let sum: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(CASE WHEN type = 'spend' THEN -amount ELSE amount END), 0)::BIGINT
        FROM wallet_transactions
        WHERE wallet_id = $1
        "#,
    )
    .bind(wallet_id)
    .fetch_one(conn)
    .await?;
    Ok(sum.unwrap_or(0))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use hearth_shared::AiKind;

    async fn test_pool() -> PgPool {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        hearth_shared::db::create_pool(&url).await.unwrap()
    }

    async fn seed_family(pool: &PgPool) -> (Uuid, Uuid) {
        let user_id: Uuid = sqlx::query_scalar(
            "INSERT INTO users (email) VALUES ($1) RETURNING id",
        )
        .bind(format!("wallet-{}@test.local", Uuid::new_v4()))
        .fetch_one(pool)
        .await
        .unwrap();
        let family_id: Uuid =
            sqlx::query_scalar("INSERT INTO families (name) VALUES ('Test family') RETURNING id")
                .fetch_one(pool)
                .await
                .unwrap();
        (family_id, user_id)
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn debit_on_empty_wallet_is_denied_without_a_transaction_row() {
        let pool = test_pool().await;
        let (family_id, user_id) = seed_family(&pool).await;
        let wallet = WalletService::new(pool.clone());

        let outcome = wallet
            .debit(family_id, 17, SpendReason::AiDietPlan, "diet plan", user_id)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            DebitOutcome::InsufficientFunds { balance: 0, required: 17 }
        ));

        let rows = wallet.history(family_id, 10).await.unwrap();
        assert!(rows.is_empty(), "denied debit must not log a transaction");
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn debit_then_credit_restores_balance_and_leaves_two_rows() {
        let pool = test_pool().await;
        let (family_id, user_id) = seed_family(&pool).await;
        let wallet = WalletService::new(pool.clone());

        wallet
            .credit(
                family_id,
                50,
                TxnKind::Topup,
                SpendReason::TopupDonation,
                "donation",
                Some(user_id),
            )
            .await
            .unwrap();

        let outcome = wallet
            .debit(family_id, 7, SpendReason::AiPhoto, "photo", user_id)
            .await
            .unwrap();
        assert!(matches!(outcome, DebitOutcome::Debited { new_balance: 43 }));

        wallet
            .credit(
                family_id,
                7,
                TxnKind::Refund,
                SpendReason::AdminRefund,
                "refund",
                None,
            )
            .await
            .unwrap();

        assert_eq!(wallet.balance(family_id).await.unwrap(), 50);
        let rows = wallet.history(family_id, 10).await.unwrap();
        assert_eq!(rows.len(), 3);

        // the log replays to the stored balance
        let wallet_id: Uuid =
            sqlx::query_scalar("SELECT id FROM family_wallet WHERE family_id = $1")
                .bind(family_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(replayed_balance(&mut conn, wallet_id).await.unwrap(), 50);
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn concurrent_debits_never_drive_balance_negative() {
        let pool = test_pool().await;
        let (family_id, user_id) = seed_family(&pool).await;
        let wallet = WalletService::new(pool.clone());

        wallet
            .credit(
                family_id,
                10,
                TxnKind::Topup,
                SpendReason::TopupDonation,
                "seed",
                Some(user_id),
            )
            .await
            .unwrap();

        let mut handles = vec![];
        for _ in 0..8 {
            let w = wallet.clone();
            handles.push(tokio::spawn(async move {
                w.debit(
                    family_id,
                    AiKind::Recipe.price(),
                    SpendReason::AiRecipe,
                    "recipe",
                    user_id,
                )
                .await
                .unwrap()
            }));
        }

        let mut debited = 0;
        for h in handles {
            if matches!(h.await.unwrap(), DebitOutcome::Debited { .. }) {
                debited += 1;
            }
        }

        // 10 units cover exactly five debits of 2
        assert_eq!(debited, 5);
        assert_eq!(wallet.balance(family_id).await.unwrap(), 0);
    }
}
