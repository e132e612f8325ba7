//! `PostgreSQL`-backed store for device categories in `ast_config`.
//!
//! All metric allocation happens inside a transaction that first takes a
//! process-wide advisory lock, so concurrent creates/merges cannot observe
//! the same counter maximum. The `(cat_metric, var_metric)` unique
//! constraint in the schema backstops the allocator.

use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument};

use crate::error::{DataError, Result};

/// Target configuration file recorded on every row this store writes.
pub const CONFIG_FILENAME: &str = "sip.conf";

// Advisory lock key serialising cat_metric/var_metric allocation.
const ALLOC_LOCK_KEY: i64 = 0x0061_7374_6366_6731;

const TAKE_ALLOC_LOCK: &str = r"SELECT pg_advisory_xact_lock($1)";

const SELECT_CATEGORIES: &str = r"
    SELECT DISTINCT category, cat_metric
    FROM ast_config
    ORDER BY category
";

const SELECT_BY_CAT_METRIC: &str = r"
    SELECT id, var_name, var_val
    FROM ast_config
    WHERE cat_metric = $1
    ORDER BY category, var_metric
";

const SELECT_CAT_METRIC_FOR_CATEGORY: &str = r"
    SELECT cat_metric FROM ast_config WHERE category = $1 LIMIT 1
";

const SELECT_NEXT_CAT_METRIC: &str = r"
    SELECT COALESCE(MAX(cat_metric), 0) + 1 FROM ast_config
";

const SELECT_MAX_VAR_METRIC: &str = r"
    SELECT COALESCE(MAX(var_metric), -1) FROM ast_config WHERE category = $1
";

const INSERT_CATEGORY_BATCH: &str = r"
    INSERT INTO ast_config (cat_metric, var_metric, filename, category, var_name, var_val, commented)
    SELECT $1, (ord - 1)::int, $2, $3, name, val, 0
    FROM UNNEST($4::text[], $5::text[]) WITH ORDINALITY AS pairs(name, val, ord)
";

const UPDATE_VARIABLE: &str = r"
    UPDATE ast_config SET var_val = $3 WHERE category = $1 AND var_name = $2
";

const INSERT_VARIABLE: &str = r"
    INSERT INTO ast_config (cat_metric, var_metric, filename, category, var_name, var_val, commented)
    VALUES ($1, $2, $3, $4, $5, $6, 0)
";

const DELETE_CATEGORY: &str = r"DELETE FROM ast_config WHERE category = $1";

const PING: &str = r"SELECT 1";

/// One `(category, cat_metric)` pair from the listing query.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct DeviceSummaryRow {
    /// Device/category name.
    pub category: String,
    /// Grouping metric shared by the category's rows.
    pub cat_metric: i32,
}

/// One variable row returned by the metric lookup.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct DeviceVariableRow {
    /// Primary key of the row.
    pub id: i64,
    /// Configuration key.
    pub var_name: String,
    /// Configuration value.
    pub var_val: String,
}

/// Result of a category creation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The category was absent and its rows were inserted.
    Created {
        /// Metric allocated for the new category.
        cat_metric: i32,
        /// Number of variable rows written.
        variables: usize,
    },
    /// A category with this name already exists; nothing was written.
    AlreadyExists,
}

/// Result of a category merge attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The merge transaction committed.
    Merged {
        /// Metric of the existing category.
        cat_metric: i32,
        /// Variables appended with freshly allocated `var_metric` values.
        inserted: usize,
        /// Variables whose value was replaced in place.
        updated: usize,
    },
    /// No category with this name exists; nothing was written.
    NotFound,
}

/// Result of a category deletion attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// All rows of the category were removed.
    Deleted {
        /// Number of rows deleted.
        rows: u64,
    },
    /// No category with this name exists.
    NotFound,
}

fn map_query_err(operation: &'static str) -> impl FnOnce(sqlx::Error) -> DataError {
    move |source| DataError::QueryFailed { operation, source }
}

/// Database-backed repository for device categories.
#[derive(Clone)]
pub struct DeviceStore {
    pool: PgPool,
}

impl DeviceStore {
    /// Establish a connection pool and apply pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the `PostgreSQL` connection cannot be established
    /// or migrations fail to run.
    #[instrument(name = "device_store.connect", skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(map_query_err("pool.connect"))?;
        Self::new(pool).await
    }

    /// Initialise the store over an existing pool, applying pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if migration execution fails.
    pub async fn new(pool: PgPool) -> Result<Self> {
        let mut migrator = sqlx::migrate!("./migrations");
        migrator.set_ignore_missing(true);
        migrator
            .run(&pool)
            .await
            .map_err(|source| DataError::MigrationFailed { source })?;
        Ok(Self { pool })
    }

    /// Access the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check that the backing store answers a trivial query.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query(PING)
            .execute(&self.pool)
            .await
            .map_err(map_query_err("ping"))?;
        Ok(())
    }

    /// List every known category with its grouping metric, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_devices(&self) -> Result<Vec<DeviceSummaryRow>> {
        sqlx::query_as::<_, DeviceSummaryRow>(SELECT_CATEGORIES)
            .fetch_all(&self.pool)
            .await
            .map_err(map_query_err("list_devices"))
    }

    /// Fetch the variable rows of the category identified by `cat_metric`.
    ///
    /// An empty result means no category carries that metric; the caller
    /// decides how to surface it.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn device_by_metric(&self, cat_metric: i32) -> Result<Vec<DeviceVariableRow>> {
        sqlx::query_as::<_, DeviceVariableRow>(SELECT_BY_CAT_METRIC)
            .bind(cat_metric)
            .fetch_all(&self.pool)
            .await
            .map_err(map_query_err("device_by_metric"))
    }

    /// Create a category and its variable rows as one batch.
    ///
    /// A fresh `cat_metric` (table-wide maximum plus one) is allocated under
    /// the advisory lock; `var_metric` values 0..k-1 follow the order of
    /// `variables`. Duplicate names collapse to their last value while
    /// keeping the first occurrence's position.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement in the transaction fails; no rows
    /// are written in that case.
    #[instrument(name = "device_store.create", skip(self, variables))]
    pub async fn create_device(
        &self,
        category: &str,
        variables: &[(String, String)],
    ) -> Result<CreateOutcome> {
        let mut tx = self.begin("create_device.begin").await?;
        lock_allocator(&mut tx, "create_device.lock").await?;

        if category_metric(&mut tx, category, "create_device.exists")
            .await?
            .is_some()
        {
            return Ok(CreateOutcome::AlreadyExists);
        }

        let cat_metric: i32 = sqlx::query_scalar(SELECT_NEXT_CAT_METRIC)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_query_err("create_device.next_metric"))?;

        let collapsed = collapse_duplicates(variables);
        let names: Vec<String> = collapsed.iter().map(|(name, _)| (*name).to_owned()).collect();
        let values: Vec<String> = collapsed.iter().map(|(_, val)| (*val).to_owned()).collect();

        sqlx::query(INSERT_CATEGORY_BATCH)
            .bind(cat_metric)
            .bind(CONFIG_FILENAME)
            .bind(category)
            .bind(&names)
            .bind(&values)
            .execute(&mut *tx)
            .await
            .map_err(map_query_err("create_device.insert"))?;

        tx.commit()
            .await
            .map_err(map_query_err("create_device.commit"))?;

        info!(category, cat_metric, variables = collapsed.len(), "created device category");
        Ok(CreateOutcome::Created {
            cat_metric,
            variables: collapsed.len(),
        })
    }

    /// Merge variables into an existing category.
    ///
    /// Present names are updated in place; unseen names are appended with
    /// `var_metric` values continuing from the category's current maximum.
    /// Every decision commits in one transaction: a failure rolls the whole
    /// merge back and is returned to the caller.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement in the transaction fails.
    #[instrument(name = "device_store.merge", skip(self, variables))]
    pub async fn merge_device(
        &self,
        category: &str,
        variables: &[(String, String)],
    ) -> Result<MergeOutcome> {
        let mut tx = self.begin("merge_device.begin").await?;
        lock_allocator(&mut tx, "merge_device.lock").await?;

        let Some(cat_metric) = category_metric(&mut tx, category, "merge_device.exists").await?
        else {
            return Ok(MergeOutcome::NotFound);
        };

        let max_var_metric: i32 = sqlx::query_scalar(SELECT_MAX_VAR_METRIC)
            .bind(category)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_query_err("merge_device.max_metric"))?;

        let mut next_var_metric = max_var_metric + 1;
        let mut inserted = 0usize;
        let mut updated = 0usize;
        for (name, value) in collapse_duplicates(variables) {
            let result = sqlx::query(UPDATE_VARIABLE)
                .bind(category)
                .bind(name)
                .bind(value)
                .execute(&mut *tx)
                .await
                .map_err(map_query_err("merge_device.update"))?;
            if result.rows_affected() == 0 {
                sqlx::query(INSERT_VARIABLE)
                    .bind(cat_metric)
                    .bind(next_var_metric)
                    .bind(CONFIG_FILENAME)
                    .bind(category)
                    .bind(name)
                    .bind(value)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_query_err("merge_device.insert"))?;
                next_var_metric += 1;
                inserted += 1;
            } else {
                updated += 1;
            }
        }

        tx.commit()
            .await
            .map_err(map_query_err("merge_device.commit"))?;

        info!(category, cat_metric, inserted, updated, "merged device category");
        Ok(MergeOutcome::Merged {
            cat_metric,
            inserted,
            updated,
        })
    }

    /// Delete every row of the named category.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete statement fails.
    #[instrument(name = "device_store.delete", skip(self))]
    pub async fn delete_device(&self, category: &str) -> Result<DeleteOutcome> {
        let result = sqlx::query(DELETE_CATEGORY)
            .bind(category)
            .execute(&self.pool)
            .await
            .map_err(map_query_err("delete_device"))?;

        let rows = result.rows_affected();
        if rows == 0 {
            return Ok(DeleteOutcome::NotFound);
        }
        info!(category, rows, "deleted device category");
        Ok(DeleteOutcome::Deleted { rows })
    }

    async fn begin(&self, operation: &'static str) -> Result<Transaction<'_, Postgres>> {
        self.pool.begin().await.map_err(map_query_err(operation))
    }
}

async fn lock_allocator(
    tx: &mut Transaction<'_, Postgres>,
    operation: &'static str,
) -> Result<()> {
    sqlx::query(TAKE_ALLOC_LOCK)
        .bind(ALLOC_LOCK_KEY)
        .execute(&mut **tx)
        .await
        .map_err(map_query_err(operation))?;
    Ok(())
}

async fn category_metric(
    tx: &mut Transaction<'_, Postgres>,
    category: &str,
    operation: &'static str,
) -> Result<Option<i32>> {
    sqlx::query_scalar(SELECT_CAT_METRIC_FOR_CATEGORY)
        .bind(category)
        .fetch_optional(&mut **tx)
        .await
        .map_err(map_query_err(operation))
}

/// Collapse duplicate variable names: last value wins, first position kept.
fn collapse_duplicates(pairs: &[(String, String)]) -> Vec<(&str, &str)> {
    let mut collapsed: Vec<(&str, &str)> = Vec::with_capacity(pairs.len());
    for (name, value) in pairs {
        match collapsed
            .iter_mut()
            .find(|(seen, _)| *seen == name.as_str())
        {
            Some(entry) => entry.1 = value.as_str(),
            None => collapsed.push((name.as_str(), value.as_str())),
        }
    }
    collapsed
}
