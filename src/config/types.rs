use clap::Args;
use serde::{Deserialize, Serialize};

use crate::adapters::SeedTables;

/// Raw configuration input - all fields optional for merging.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigInput {
    pub database: Option<DatabaseInput>,
    pub environment: Option<String>,
    pub ledger: Option<LedgerInput>,
    pub seed: Option<SeedInput>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DatabaseInput {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LedgerInput {
    pub schema: Option<String>,
    pub table: Option<String>,
}

/// Overrides for the product tables the seed writer touches, for products
/// with prefixed or relocated tables.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SeedInput {
    pub schema: Option<String>,
    pub companies: Option<String>,
    pub company_settings: Option<String>,
    pub permission_grants: Option<String>,
}

/// Resolved configuration with all defaults applied.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Which deployed instance this run mutates. Ledger rows are keyed by it.
    pub environment: String,
    pub ledger_table: LedgerTable,
    pub seed_tables: SeedTables,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTable {
    pub schema: String,
    pub name: String,
}

impl Default for LedgerTable {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            name: "upgrade_ledger".to_string(),
        }
    }
}

/// Database/environment CLI arguments, shared by all subcommands.
#[derive(Args, Clone, Debug, Default)]
pub struct DatabaseArgs {
    /// Database connection URL (overrides config file and DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Environment identifier the ledger keys progress by
    #[arg(long)]
    pub environment: Option<String>,
}

impl From<DatabaseArgs> for ConfigInput {
    fn from(args: DatabaseArgs) -> Self {
        ConfigInput {
            database: Some(DatabaseInput {
                url: args.database_url,
            }),
            environment: args.environment,
            ledger: None,
            seed: None,
        }
    }
}
