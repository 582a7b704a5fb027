//! Collaborator adapters: the only surfaces a step may touch.
//!
//! Steps receive a [`StepContext`] and go through these narrow traits for
//! schema changes, seed data, config-file edits and file removal. Production
//! implementations sit on sqlx/serde_yaml/std::fs; [`testing`] provides
//! recording fakes.

pub mod config_merge;
pub mod fs;
pub mod schema;
pub mod seed;
pub mod testing;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AdapterError;

pub use config_merge::YamlConfigMerger;
pub use fs::DiskFileSystem;
pub use schema::PgSchemaExecutor;
pub use seed::{PgSeedWriter, SeedTables};

/// A bound statement parameter. Keeping this as a closed value enum keeps
/// the executor trait object-safe and lets fakes record exact calls.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Int(i64),
    Bool(bool),
    Null,
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for SqlParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Executes DDL and row-level DML. Statements carry bound parameters only;
/// no interpolated values.
#[async_trait]
pub trait SchemaExecutor: Send + Sync {
    async fn execute(&self, statement: &str, params: &[SqlParam]) -> Result<u64, AdapterError>;
}

/// Typed helpers for the recurring seed-data patterns, so steps stay
/// declarative instead of carrying raw SQL for them.
#[async_trait]
pub trait SeedWriter: Send + Sync {
    /// Insert or update one setting row for every company.
    async fn upsert_setting_for_all_companies(
        &self,
        name: &str,
        value: &str,
    ) -> Result<u64, AdapterError>;

    /// Add a permission to every staff group that already holds a comparable
    /// one, mirroring its grants. Skips groups that already have it.
    async fn add_permission_like(
        &self,
        permission: &str,
        comparable: &str,
    ) -> Result<u64, AdapterError>;

    /// Remove a permission from all staff groups.
    async fn delete_permission(&self, permission: &str) -> Result<u64, AdapterError>;
}

/// Edits shipped YAML config files without clobbering operator values.
#[async_trait]
pub trait ConfigMerger: Send + Sync {
    /// Copy top-level keys present in `template` but missing from
    /// `existing` into `existing`. Existing values are never overwritten.
    async fn merge_config(&self, existing: &Path, template: &Path) -> Result<(), AdapterError>;

    /// Add a top-level key if absent; a present key is left untouched.
    async fn add_config_key(
        &self,
        path: &Path,
        key: &str,
        value: &str,
    ) -> Result<(), AdapterError>;

    /// Overwrite an existing top-level key. Missing keys are an error.
    async fn edit_config_key(
        &self,
        path: &Path,
        key: &str,
        value: &str,
    ) -> Result<(), AdapterError>;
}

/// The few filesystem mutations upgrades historically perform: removing
/// deprecated asset trees and writing protective marker files.
#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn remove_dir_recursive(&self, path: &Path) -> Result<(), AdapterError>;

    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<(), AdapterError>;
}

/// Everything a step is allowed to reach, passed explicitly into every
/// `apply`/`revert` call. No ambient globals.
#[derive(Clone)]
pub struct StepContext {
    pub environment: String,
    pub schema: Arc<dyn SchemaExecutor>,
    pub seed: Arc<dyn SeedWriter>,
    pub config: Arc<dyn ConfigMerger>,
    pub fs: Arc<dyn FileSystem>,
}

impl StepContext {
    pub fn new(
        environment: impl Into<String>,
        schema: Arc<dyn SchemaExecutor>,
        seed: Arc<dyn SeedWriter>,
        config: Arc<dyn ConfigMerger>,
        fs: Arc<dyn FileSystem>,
    ) -> Self {
        Self {
            environment: environment.into(),
            schema,
            seed,
            config,
            fs,
        }
    }
}
