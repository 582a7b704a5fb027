//! Recording fakes for exercising steps and the engine without a database
//! or a real filesystem. Used by the crate's own tests and available to
//! embedding products for testing their plans.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::adapters::{
    ConfigMerger, FileSystem, SchemaExecutor, SeedWriter, SqlParam, StepContext,
};
use crate::error::AdapterError;

/// Shared call log with failure injection. Every fake adapter call records
/// one line; calls whose tag was registered with [`Recorder::fail_on`] fail.
#[derive(Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<String>>>,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Make every call whose tag equals `tag` fail from now on.
    pub fn fail_on(&self, tag: &str) {
        self.failing.lock().unwrap().insert(tag.to_string());
    }

    pub fn clear_failure(&self, tag: &str) {
        self.failing.lock().unwrap().remove(tag);
    }

    fn hit(&self, tag: &str, line: String) -> Result<(), AdapterError> {
        self.calls.lock().unwrap().push(line);
        if self.failing.lock().unwrap().contains(tag) {
            return Err(AdapterError::other(format!("injected failure for '{tag}'")));
        }
        Ok(())
    }
}

pub struct RecordingSchemaExecutor(pub Recorder);

#[async_trait]
impl SchemaExecutor for RecordingSchemaExecutor {
    async fn execute(&self, statement: &str, params: &[SqlParam]) -> Result<u64, AdapterError> {
        self.0.hit(
            statement,
            format!("schema.execute {statement} ({} params)", params.len()),
        )?;
        Ok(1)
    }
}

pub struct RecordingSeedWriter(pub Recorder);

#[async_trait]
impl SeedWriter for RecordingSeedWriter {
    async fn upsert_setting_for_all_companies(
        &self,
        name: &str,
        value: &str,
    ) -> Result<u64, AdapterError> {
        self.0.hit(name, format!("seed.upsert_setting {name}={value}"))?;
        Ok(1)
    }

    async fn add_permission_like(
        &self,
        permission: &str,
        comparable: &str,
    ) -> Result<u64, AdapterError> {
        self.0.hit(
            permission,
            format!("seed.add_permission {permission} like {comparable}"),
        )?;
        Ok(1)
    }

    async fn delete_permission(&self, permission: &str) -> Result<u64, AdapterError> {
        self.0
            .hit(permission, format!("seed.delete_permission {permission}"))?;
        Ok(1)
    }
}

pub struct RecordingConfigMerger(pub Recorder);

#[async_trait]
impl ConfigMerger for RecordingConfigMerger {
    async fn merge_config(&self, existing: &Path, template: &Path) -> Result<(), AdapterError> {
        let tag = existing.display().to_string();
        self.0.hit(
            &tag,
            format!("config.merge {} <- {}", tag, template.display()),
        )
    }

    async fn add_config_key(
        &self,
        path: &Path,
        key: &str,
        value: &str,
    ) -> Result<(), AdapterError> {
        self.0
            .hit(key, format!("config.add {} {key}={value}", path.display()))
    }

    async fn edit_config_key(
        &self,
        path: &Path,
        key: &str,
        value: &str,
    ) -> Result<(), AdapterError> {
        self.0
            .hit(key, format!("config.edit {} {key}={value}", path.display()))
    }
}

pub struct RecordingFileSystem(pub Recorder);

#[async_trait]
impl FileSystem for RecordingFileSystem {
    async fn remove_dir_recursive(&self, path: &Path) -> Result<(), AdapterError> {
        let tag = path.display().to_string();
        self.0.hit(&tag, format!("fs.remove_dir {tag}"))
    }

    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<(), AdapterError> {
        let tag = path.display().to_string();
        self.0
            .hit(&tag, format!("fs.write {tag} ({} bytes)", contents.len()))
    }
}

/// A context wired to one shared recorder across all four adapters.
pub fn recording_context(environment: &str, recorder: &Recorder) -> StepContext {
    StepContext::new(
        environment,
        Arc::new(RecordingSchemaExecutor(recorder.clone())),
        Arc::new(RecordingSeedWriter(recorder.clone())),
        Arc::new(RecordingConfigMerger(recorder.clone())),
        Arc::new(RecordingFileSystem(recorder.clone())),
    )
}

/// A context whose adapters accept everything and record nothing a caller
/// will look at. For tests that only care about step plumbing.
pub fn noop_context() -> StepContext {
    recording_context("test", &Recorder::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recorder_injects_failures_by_tag() {
        let recorder = Recorder::new();
        let ctx = recording_context("test", &recorder);

        ctx.schema.execute("CREATE TABLE t (id INT)", &[]).await.unwrap();
        recorder.fail_on("DROP TABLE t");
        let err = ctx.schema.execute("DROP TABLE t", &[]).await.unwrap_err();
        assert!(err.to_string().contains("injected failure"));

        assert_eq!(recorder.calls().len(), 2);
    }
}
