use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::images::{
    repo::insert_image_tx,
    repo_types::{GeneratedImage, NewImage},
};

#[derive(Debug, Error)]
pub enum ChargeError {
    /// The conditional decrement matched no row: balance below cost at write time.
    #[error("insufficient credits")]
    InsufficientFunds,

    #[error("nothing to charge for")]
    Empty,

    #[error(transparent)]
    Database(#[from] anyhow::Error),
}

/// Outcome of a committed charge.
#[derive(Debug, Clone)]
pub struct ChargeReceipt {
    pub balance: i32,
    pub total_generated: i64,
    pub images: Vec<GeneratedImage>,
}

/// Debits one credit per image and records the images, atomically.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    async fn charge(&self, user_id: Uuid, images: Vec<NewImage>) -> Result<ChargeReceipt, ChargeError>;
}

#[derive(Clone)]
pub struct PgLedger {
    db: PgPool,
}

impl PgLedger {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CreditLedger for PgLedger {
    async fn charge(&self, user_id: Uuid, images: Vec<NewImage>) -> Result<ChargeReceipt, ChargeError> {
        if images.is_empty() {
            return Err(ChargeError::Empty);
        }
        let cost = i32::try_from(images.len()).context("image count overflows cost")?;

        let mut tx = self.db.begin().await.context("begin tx")?;

        // Re-validates the balance at write time; the earlier read is advisory.
        let balance: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE users
               SET credits = credits - $1
             WHERE id = $2 AND credits >= $1
         RETURNING credits
            "#,
        )
        .bind(cost)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .context("decrement credits")?;

        let Some(balance) = balance else {
            tx.rollback().await.context("rollback tx")?;
            debug!(%user_id, cost, "conditional decrement matched no row");
            return Err(ChargeError::InsufficientFunds);
        };

        let mut inserted = Vec::with_capacity(images.len());
        for image in &images {
            inserted.push(insert_image_tx(&mut tx, user_id, image).await?);
        }

        let total_generated: i64 =
            sqlx::query_scalar("SELECT count(*) FROM generated_images WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await
                .context("count generated images")?;

        tx.commit().await.context("commit tx")?;
        info!(%user_id, cost, balance, total_generated, "credits charged");

        Ok(ChargeReceipt {
            balance,
            total_generated,
            images: inserted,
        })
    }
}
