//! Postgres-backed staging store

use super::{StagingRow, StagingStore};
use crate::config::StoreConfig;
use crate::error::{HarvestError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

/// Staging table written by the warmer.
pub const STAGING_TABLE: &str = "enrichment_staging";

/// Long-term public list and its SKU column.
pub const PUBLIC_LIST_TABLE: &str = "\"Penny List\"";
pub const PUBLIC_LIST_SKU_COLUMN: &str = "home_depot_sku_6_or_10_digits";

const MAX_CONNECTIONS: u32 = 5;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct PgStagingStore {
    pool: PgPool,
}

impl PgStagingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using `DATABASE_URL` from the store config and run migrations.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| HarvestError::config("DATABASE_URL is required to persist staging rows"))?;

        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(url)
            .await?;
        info!("Database connection pool established");

        sqlx::migrate!("../../migrations").run(&pool).await?;
        debug!("Database migrations completed");

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StagingStore for PgStagingStore {
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE created_at < $1", STAGING_TABLE))
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn existing_skus(&self) -> Result<HashSet<String>> {
        let skus: Vec<Option<String>> = sqlx::query_scalar(&format!(
            "SELECT {}::text FROM {}",
            PUBLIC_LIST_SKU_COLUMN, PUBLIC_LIST_TABLE
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(skus
            .into_iter()
            .flatten()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect())
    }

    async fn upsert_batch(&self, rows: &[StagingRow]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            r#"
            INSERT INTO {} (
                sku,
                internet_number,
                barcode_upc,
                item_name,
                brand,
                retail_price,
                image_url,
                product_link,
                created_at
            )
            "#,
            STAGING_TABLE
        ));

        query_builder.push_values(rows, |mut b, row| {
            b.push_bind(&row.sku)
                .push_bind(row.internet_number)
                .push_bind(&row.barcode_upc)
                .push_bind(&row.item_name)
                .push_bind(&row.brand)
                .push_bind(row.retail_price)
                .push_bind(&row.image_url)
                .push_bind(&row.product_link)
                .push_bind(row.created_at);
        });

        // Stored values win; incoming only fills NULL columns.
        query_builder.push(format!(
            r#"
            ON CONFLICT (sku)
            DO UPDATE SET
                internet_number = COALESCE({t}.internet_number, EXCLUDED.internet_number),
                barcode_upc = COALESCE({t}.barcode_upc, EXCLUDED.barcode_upc),
                item_name = COALESCE({t}.item_name, EXCLUDED.item_name),
                brand = COALESCE({t}.brand, EXCLUDED.brand),
                retail_price = COALESCE({t}.retail_price, EXCLUDED.retail_price),
                image_url = COALESCE({t}.image_url, EXCLUDED.image_url),
                product_link = COALESCE({t}.product_link, EXCLUDED.product_link)
            "#,
            t = STAGING_TABLE
        ));

        let result = query_builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
