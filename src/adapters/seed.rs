//! Postgres seed-data writer covering the recurring upgrade patterns:
//! per-company settings and staff-group permission grants.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::adapters::SeedWriter;
use crate::error::AdapterError;
use crate::sql::quote_qualified;

/// Product table names the seed writer operates on. Defaults match the
/// conventional layout; products with prefixed tables override them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedTables {
    pub schema: String,
    pub companies: String,
    pub company_settings: String,
    pub permission_grants: String,
}

impl Default for SeedTables {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            companies: "companies".to_string(),
            company_settings: "company_settings".to_string(),
            permission_grants: "permission_grants".to_string(),
        }
    }
}

impl SeedTables {
    fn companies(&self) -> Result<String, AdapterError> {
        quote_qualified(&self.schema, &self.companies).map_err(AdapterError::other)
    }

    fn company_settings(&self) -> Result<String, AdapterError> {
        quote_qualified(&self.schema, &self.company_settings).map_err(AdapterError::other)
    }

    fn permission_grants(&self) -> Result<String, AdapterError> {
        quote_qualified(&self.schema, &self.permission_grants).map_err(AdapterError::other)
    }
}

pub struct PgSeedWriter {
    pool: PgPool,
    tables: SeedTables,
}

impl PgSeedWriter {
    pub fn new(pool: PgPool, tables: SeedTables) -> Self {
        Self { pool, tables }
    }
}

#[async_trait]
impl SeedWriter for PgSeedWriter {
    async fn upsert_setting_for_all_companies(
        &self,
        name: &str,
        value: &str,
    ) -> Result<u64, AdapterError> {
        let settings = self.tables.company_settings()?;
        let companies = self.tables.companies()?;

        let result = sqlx::query(&format!(
            "INSERT INTO {settings} (company_id, name, value)
             SELECT id, $1, $2 FROM {companies}
             ON CONFLICT (company_id, name) DO UPDATE SET value = EXCLUDED.value"
        ))
        .bind(name)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn add_permission_like(
        &self,
        permission: &str,
        comparable: &str,
    ) -> Result<u64, AdapterError> {
        let grants = self.tables.permission_grants()?;

        // Mirror the grant rows of the comparable permission. The conflict
        // clause is the skip-if-already-applied guard.
        let result = sqlx::query(&format!(
            "INSERT INTO {grants} (group_id, permission, access)
             SELECT group_id, $1, access FROM {grants} WHERE permission = $2
             ON CONFLICT (group_id, permission) DO NOTHING"
        ))
        .bind(permission)
        .bind(comparable)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_permission(&self, permission: &str) -> Result<u64, AdapterError> {
        let grants = self.tables.permission_grants()?;

        let result = sqlx::query(&format!("DELETE FROM {grants} WHERE permission = $1"))
            .bind(permission)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
