//! Postgres schema executor: bound-parameter statement execution with an
//! optional per-statement timeout.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use crate::adapters::{SchemaExecutor, SqlParam};
use crate::error::AdapterError;

pub struct PgSchemaExecutor {
    pool: PgPool,
    statement_timeout: Option<Duration>,
}

impl PgSchemaExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            statement_timeout: None,
        }
    }

    /// Apply a `statement_timeout` to each statement. Long ALTERs on large
    /// tables are expected to set this generously or not at all. Timed
    /// statements run inside a transaction (`SET LOCAL`), which rules out
    /// statements that refuse to run in one, like CREATE INDEX CONCURRENTLY.
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }
}

fn timeout_statement(timeout: Duration) -> String {
    format!("SET LOCAL statement_timeout = '{}'", timeout.as_millis())
}

fn bind_params<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    params: &'q [SqlParam],
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    for param in params {
        query = match param {
            SqlParam::Text(v) => query.bind(v.clone()),
            SqlParam::Int(v) => query.bind(*v),
            SqlParam::Bool(v) => query.bind(*v),
            SqlParam::Null => query.bind(Option::<String>::None),
        };
    }
    query
}

#[async_trait]
impl SchemaExecutor for PgSchemaExecutor {
    async fn execute(&self, statement: &str, params: &[SqlParam]) -> Result<u64, AdapterError> {
        let rows_affected = match self.statement_timeout {
            // SET LOCAL and the statement must share one connection, and the
            // LOCAL scope ends with the transaction, so the timeout cannot
            // leak onto other pooled connections.
            Some(timeout) => {
                let mut tx = self.pool.begin().await?;
                sqlx::query(&timeout_statement(timeout))
                    .execute(&mut *tx)
                    .await?;
                let result = bind_params(sqlx::query(statement), params)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                result.rows_affected()
            }
            None => {
                bind_params(sqlx::query(statement), params)
                    .execute(&self.pool)
                    .await?
                    .rows_affected()
            }
        };

        debug!(
            rows = rows_affected,
            "executed schema statement: {}",
            statement.lines().next().unwrap_or(statement)
        );
        Ok(rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_transaction_scoped() {
        assert_eq!(
            timeout_statement(Duration::from_secs(5)),
            "SET LOCAL statement_timeout = '5000'"
        );
    }

    #[test]
    fn sql_param_conversions() {
        assert_eq!(SqlParam::from("x"), SqlParam::Text("x".to_string()));
        assert_eq!(SqlParam::from(7_i64), SqlParam::Int(7));
        assert_eq!(SqlParam::from(true), SqlParam::Bool(true));
    }
}
