use anyhow::Result;
use sqlx::query::{Query, QueryAs};
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteQueryResult, SqliteRow,
};
use sqlx::{FromRow, Sqlite, SqlitePool};

use crate::query::{self, Conditions, Record, Statement, Value};

/// Data access over a bounded SQLite pool.
///
/// Only `connect` and `init` can fail. Every other call logs database errors
/// and hands back an empty result (`Vec::new()`, `0`, `None`), so callers
/// check for emptiness instead of matching on errors.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(path: &str, max_connections: u32) -> Result<Self> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{}", path)
        };
        let options = SqliteConnectOptions::new()
            .filename(url.trim_start_matches("sqlite:").trim_start_matches("//"))
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub async fn init(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn get<T>(&self, table: &str, conditions: &Conditions) -> Vec<T>
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        let Some(statement) = query::select(table, conditions) else {
            tracing::error!(table, "select rejected: invalid table or column name");
            return Vec::new();
        };
        self.fetch_statement(&statement).await
    }

    pub async fn first<T>(&self, table: &str, conditions: Conditions) -> Option<T>
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        self.get(table, &conditions.limit(1)).await.into_iter().next()
    }

    pub async fn fetch_statement<T>(&self, statement: &Statement) -> Vec<T>
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        let mut select = sqlx::query_as::<_, T>(&statement.sql);
        for value in &statement.params {
            select = bind_as(select, value);
        }
        match select.fetch_all(&self.pool).await {
            Ok(rows) => rows,
            Err(err) => {
                tracing::error!(error = %err, sql = %statement.inline(), "select failed");
                Vec::new()
            }
        }
    }

    /// Returns the new row id, or 0 when nothing was inserted.
    pub async fn insert(&self, table: &str, record: &Record) -> i64 {
        let Some(statement) = query::insert(table, record) else {
            tracing::debug!(table, "insert skipped: no storable fields");
            return 0;
        };
        self.execute(&statement)
            .await
            .map(|done| done.last_insert_rowid())
            .unwrap_or(0)
    }

    /// Ids of the accepted rows in input order; empty on failure.
    pub async fn insert_many(&self, table: &str, records: &[Record]) -> Vec<i64> {
        let Some(many) = query::insert_many(table, records) else {
            tracing::debug!(table, "insert_many skipped: no acceptable records");
            return Vec::new();
        };
        if many.accepted < records.len() {
            tracing::warn!(
                table,
                accepted = many.accepted,
                total = records.len(),
                "insert_many skipped records with a different column set"
            );
        }
        match self.execute(&many.statement).await {
            Some(done) => {
                let count = many.accepted as i64;
                synthetic_ids(done.last_insert_rowid() - count + 1, many.accepted)
            }
            None => Vec::new(),
        }
    }

    pub async fn update(&self, table: &str, record: &Record, conditions: &Conditions) -> u64 {
        let Some(statement) = query::update(table, record, conditions) else {
            tracing::error!(table, "update rejected: empty field set or filter");
            return 0;
        };
        self.execute(&statement)
            .await
            .map(|done| done.rows_affected())
            .unwrap_or(0)
    }

    pub async fn delete(&self, table: &str, conditions: &Conditions) -> u64 {
        let Some(statement) = query::delete(table, conditions) else {
            tracing::error!(table, "delete rejected: empty filter");
            return 0;
        };
        self.execute(&statement)
            .await
            .map(|done| done.rows_affected())
            .unwrap_or(0)
    }

    pub async fn execute(&self, statement: &Statement) -> Option<SqliteQueryResult> {
        let mut run = sqlx::query(&statement.sql);
        for value in &statement.params {
            run = bind(run, value);
        }
        match run.execute(&self.pool).await {
            Ok(done) => Some(done),
            Err(err) => {
                tracing::error!(error = %err, sql = %statement.inline(), "statement failed");
                None
            }
        }
    }
}

/// Ids for a multi-row insert, counted up from the first generated id.
pub fn synthetic_ids(first_id: i64, count: usize) -> Vec<i64> {
    (0..count as i64).map(|offset| first_id + offset).collect()
}

fn bind<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Int(v) => query.bind(*v),
        Value::Text(s) => query.bind(s.clone()),
        Value::Null | Value::List(_) => query.bind(None::<String>),
    }
}

fn bind_as<'q, T>(
    query: QueryAs<'q, Sqlite, T, SqliteArguments<'q>>,
    value: &Value,
) -> QueryAs<'q, Sqlite, T, SqliteArguments<'q>> {
    match value {
        Value::Int(v) => query.bind(*v),
        Value::Text(s) => query.bind(s.clone()),
        Value::Null | Value::List(_) => query.bind(None::<String>),
    }
}
