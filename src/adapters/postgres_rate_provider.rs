//! Postgres implementation of RateProvider over the append-only rate log.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::ExchangeRate;
use crate::ports::{RateProvider, RepositoryError, RepositoryResult};

#[derive(Clone)]
pub struct PostgresRateProvider {
    pool: PgPool,
}

impl PostgresRateProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RateProvider for PostgresRateProvider {
    async fn latest_rate(&self) -> RepositoryResult<Option<ExchangeRate>> {
        let row = sqlx::query_as::<_, ExchangeRateRow>(
            "SELECT id, rate, recorded_at FROM exchange_rates ORDER BY recorded_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.map(ExchangeRateRow::into_domain))
    }

    async fn record_rate(&self, rate: &BigDecimal) -> RepositoryResult<ExchangeRate> {
        let entry = ExchangeRate::new(rate.clone());
        let row = sqlx::query_as::<_, ExchangeRateRow>(
            r#"
            INSERT INTO exchange_rates (id, rate, recorded_at)
            VALUES ($1, $2, $3)
            RETURNING id, rate, recorded_at
            "#,
        )
        .bind(entry.id)
        .bind(&entry.rate)
        .bind(entry.recorded_at)
        .fetch_one(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.into_domain())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ExchangeRateRow {
    id: Uuid,
    rate: BigDecimal,
    recorded_at: DateTime<Utc>,
}

impl ExchangeRateRow {
    fn into_domain(self) -> ExchangeRate {
        ExchangeRate {
            id: self.id,
            rate: self.rate,
            recorded_at: self.recorded_at,
        }
    }
}
