//! Layered configuration resolution: defaults < file < environment < CLI.

use anyhow::Result;

use crate::adapters::SeedTables;
use crate::config::types::{Config, ConfigInput, DatabaseInput, LedgerTable};

#[derive(Default)]
pub struct ConfigBuilder {
    file: ConfigInput,
    env: ConfigInput,
    cli: ConfigInput,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, input: ConfigInput) -> Self {
        self.file = input;
        self
    }

    pub fn with_env(mut self, input: ConfigInput) -> Self {
        self.env = input;
        self
    }

    pub fn with_cli_args(mut self, input: ConfigInput) -> Self {
        self.cli = input;
        self
    }

    pub fn resolve(self) -> Result<Config> {
        let database_url = pick(
            self.cli.database.as_ref().and_then(|d| d.url.clone()),
            self.env.database.as_ref().and_then(|d| d.url.clone()),
            self.file.database.as_ref().and_then(|d| d.url.clone()),
        )
        .ok_or_else(|| {
            anyhow::anyhow!(
                "No database specified.\n\n\
                 The upgrade engine needs a database to read and write its ledger:\n\n\
                 • relup up --database-url postgres://host/db\n\
                 • export DATABASE_URL=postgres://host/db\n\
                 • Add 'database: url:' to relup.yaml"
            )
        })?;

        let environment = pick(
            self.cli.environment.clone(),
            self.env.environment.clone(),
            self.file.environment.clone(),
        )
        .unwrap_or_else(|| "default".to_string());

        let defaults = LedgerTable::default();
        let ledger_table = LedgerTable {
            schema: pick(
                self.cli.ledger.as_ref().and_then(|l| l.schema.clone()),
                self.env.ledger.as_ref().and_then(|l| l.schema.clone()),
                self.file.ledger.as_ref().and_then(|l| l.schema.clone()),
            )
            .unwrap_or(defaults.schema),
            name: pick(
                self.cli.ledger.as_ref().and_then(|l| l.table.clone()),
                self.env.ledger.as_ref().and_then(|l| l.table.clone()),
                self.file.ledger.as_ref().and_then(|l| l.table.clone()),
            )
            .unwrap_or(defaults.name),
        };

        let seed_defaults = SeedTables::default();
        let seed_tables = SeedTables {
            schema: pick(
                self.cli.seed.as_ref().and_then(|s| s.schema.clone()),
                self.env.seed.as_ref().and_then(|s| s.schema.clone()),
                self.file.seed.as_ref().and_then(|s| s.schema.clone()),
            )
            .unwrap_or(seed_defaults.schema),
            companies: pick(
                self.cli.seed.as_ref().and_then(|s| s.companies.clone()),
                self.env.seed.as_ref().and_then(|s| s.companies.clone()),
                self.file.seed.as_ref().and_then(|s| s.companies.clone()),
            )
            .unwrap_or(seed_defaults.companies),
            company_settings: pick(
                self.cli.seed.as_ref().and_then(|s| s.company_settings.clone()),
                self.env.seed.as_ref().and_then(|s| s.company_settings.clone()),
                self.file.seed.as_ref().and_then(|s| s.company_settings.clone()),
            )
            .unwrap_or(seed_defaults.company_settings),
            permission_grants: pick(
                self.cli.seed.as_ref().and_then(|s| s.permission_grants.clone()),
                self.env.seed.as_ref().and_then(|s| s.permission_grants.clone()),
                self.file.seed.as_ref().and_then(|s| s.permission_grants.clone()),
            )
            .unwrap_or(seed_defaults.permission_grants),
        };

        Ok(Config {
            database_url,
            environment,
            ledger_table,
            seed_tables,
        })
    }
}

fn pick(cli: Option<String>, env: Option<String>, file: Option<String>) -> Option<String> {
    cli.or(env).or(file)
}

/// Snapshot the process environment into a config layer.
pub fn env_input() -> ConfigInput {
    ConfigInput {
        database: Some(DatabaseInput {
            url: std::env::var("DATABASE_URL").ok(),
        }),
        environment: std::env::var("RELUP_ENVIRONMENT").ok(),
        ledger: None,
        seed: None,
    }
}
