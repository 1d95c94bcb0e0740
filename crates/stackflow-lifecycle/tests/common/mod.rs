#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use stackflow_cloud::{
    BucketSettings, CloudError, ControlPlane, CreateStackRequest, OperationKind, ReleaseCatalog,
    Result, SnapshotCopier, StackDescriptor, StackOperation, StackOutput, StackParameter,
    TableSettings, UpdateInfo, UpdateStackRequest, VersionInfo,
};
use stackflow_lifecycle::{LifecycleError, Prompter, Reporter};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

pub const ACCOUNT: &str = "123456789012";
pub const REGION: &str = "us-east-1";

pub fn stack_id(name: &str) -> String {
    format!("arn:aws:cloudformation:{REGION}:{ACCOUNT}:stack/{name}/5f1a8c30")
}

pub fn stream_arn(table: &str, label: &str) -> String {
    format!("arn:aws:dynamodb:{REGION}:{ACCOUNT}:table/{table}/stream/{label}")
}

pub fn stack(name: &str, parameters: &[(&str, &str)], outputs: &[(&str, &str)]) -> StackDescriptor {
    StackDescriptor {
        id: stack_id(name),
        name: name.to_string(),
        status: "UPDATE_COMPLETE".to_string(),
        parameters: parameters
            .iter()
            .map(|(k, v)| StackParameter::new(*k, *v))
            .collect(),
        outputs: outputs.iter().map(|(k, v)| StackOutput::new(*k, *v)).collect(),
        termination_protection: true,
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeBucket {
    pub objects: usize,
    pub settings: BucketSettings,
}

#[derive(Default)]
pub struct CloudState {
    pub stacks: HashMap<String, StackDescriptor>,
    pub tables: HashMap<String, TableSettings>,
    pub buckets: HashMap<String, FakeBucket>,
    pub keys: HashSet<String>,
    pub log_groups: HashSet<String>,

    pub update_requests: Vec<UpdateStackRequest>,
    pub create_requests: Vec<CreateStackRequest>,
    pub delete_requests: Vec<(String, Vec<String>)>,
    pub restored_tables: Vec<(String, String, DateTime<Utc>)>,
    pub deleted: Vec<String>,
    pub scheduled_keys: Vec<String>,
    pub lifecycles: HashMap<String, serde_json::Value>,
    pub bucket_calls: Vec<String>,

    /// Errors handed out, in order, before falling back to normal behavior
    pub update_errors: VecDeque<CloudError>,
    pub delete_stack_errors: VecDeque<CloudError>,
    pub wait_errors: VecDeque<CloudError>,
    pub protection_errors: VecDeque<CloudError>,

    /// Physical ids whose deletion fails with an API error
    pub failing_deletes: HashSet<String>,

    /// Physical ids removed together with any deleted stack
    pub cascade_on_delete: HashSet<String>,
}

/// In-memory control plane
#[derive(Default)]
pub struct FakeCloud {
    pub state: Mutex<CloudState>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stack(self, stack: StackDescriptor) -> Self {
        self.state
            .lock()
            .unwrap()
            .stacks
            .insert(stack.name.clone(), stack);
        self
    }

    pub fn with_table(self, name: &str, settings: TableSettings) -> Self {
        self.state
            .lock()
            .unwrap()
            .tables
            .insert(name.to_string(), settings);
        self
    }

    pub fn with_bucket(self, name: &str, objects: usize, settings: BucketSettings) -> Self {
        self.state
            .lock()
            .unwrap()
            .buckets
            .insert(name.to_string(), FakeBucket { objects, settings });
        self
    }

    pub fn with_key(self, id: &str) -> Self {
        self.state.lock().unwrap().keys.insert(id.to_string());
        self
    }

    pub fn with_log_group(self, name: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .log_groups
            .insert(name.to_string());
        self
    }

    pub fn lock(&self) -> std::sync::MutexGuard<'_, CloudState> {
        self.state.lock().unwrap()
    }

    fn find_stack(state: &CloudState, stack: &str) -> Option<String> {
        state
            .stacks
            .values()
            .find(|s| s.name == stack || s.id == stack)
            .map(|s| s.name.clone())
    }

    fn check_delete(state: &mut CloudState, id: &str) -> Result<()> {
        if state.failing_deletes.contains(id) {
            return Err(CloudError::ApiError(format!("AccessDenied: {}", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl ControlPlane for FakeCloud {
    fn name(&self) -> &str {
        "fake"
    }

    async fn describe_stack(&self, stack: &str) -> Result<StackDescriptor> {
        let state = self.lock();
        Self::find_stack(&state, stack)
            .and_then(|name| state.stacks.get(&name).cloned())
            .ok_or_else(|| CloudError::ResourceNotFound(format!("stack {}", stack)))
    }

    async fn create_stack(&self, request: &CreateStackRequest) -> Result<StackOperation> {
        let mut state = self.lock();
        if state.stacks.contains_key(&request.stack_name) {
            return Err(CloudError::ResourceAlreadyExists(request.stack_name.clone()));
        }
        state.create_requests.push(request.clone());
        let mut created = stack(&request.stack_name, &[], &[]);
        created.parameters = request.parameters.clone();
        created.termination_protection = request.termination_protection;
        state.stacks.insert(request.stack_name.clone(), created);
        Ok(StackOperation::new(
            request.stack_name.clone(),
            OperationKind::Create,
        ))
    }

    async fn update_stack(&self, request: &UpdateStackRequest) -> Result<StackOperation> {
        let mut state = self.lock();
        if let Some(error) = state.update_errors.pop_front() {
            return Err(error);
        }
        state.update_requests.push(request.clone());
        Ok(StackOperation::new(request.stack.clone(), OperationKind::Update))
    }

    async fn delete_stack(&self, stack: &str, retain: &[String]) -> Result<StackOperation> {
        let mut state = self.lock();
        if let Some(error) = state.delete_stack_errors.pop_front() {
            return Err(error);
        }
        let Some(name) = Self::find_stack(&state, stack) else {
            return Err(CloudError::ResourceNotFound(format!("stack {}", stack)));
        };
        state.delete_requests.push((name.clone(), retain.to_vec()));
        Ok(StackOperation::new(name, OperationKind::Delete))
    }

    async fn wait_for_terminal(&self, operation: &StackOperation) -> Result<()> {
        let mut state = self.lock();
        if let Some(error) = state.wait_errors.pop_front() {
            return Err(error);
        }
        if operation.kind == OperationKind::Delete {
            state.stacks.remove(&operation.stack);
            for id in std::mem::take(&mut state.cascade_on_delete) {
                state.tables.remove(&id);
                state.buckets.remove(&id);
                state.keys.remove(&id);
                state.log_groups.remove(&id);
            }
        }
        Ok(())
    }

    async fn set_termination_protection(&self, stack: &str, enabled: bool) -> Result<()> {
        let mut state = self.lock();
        if let Some(error) = state.protection_errors.pop_front() {
            return Err(error);
        }
        let name = Self::find_stack(&state, stack)
            .ok_or_else(|| CloudError::ResourceNotFound(format!("stack {}", stack)))?;
        if let Some(s) = state.stacks.get_mut(&name) {
            s.termination_protection = enabled;
        }
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.lock().tables.contains_key(table))
    }

    async fn restore_table_to_point_in_time(
        &self,
        source: &str,
        target: &str,
        point_in_time: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.lock();
        if !state.tables.contains_key(source) {
            return Err(CloudError::ResourceNotFound(format!("table {}", source)));
        }
        if state.tables.contains_key(target) {
            return Err(CloudError::ResourceAlreadyExists(format!("table {}", target)));
        }
        state
            .tables
            .insert(target.to_string(), TableSettings::default());
        state
            .restored_tables
            .push((source.to_string(), target.to_string(), point_in_time));
        Ok(())
    }

    async fn wait_for_table(&self, table: &str) -> Result<()> {
        if self.lock().tables.contains_key(table) {
            Ok(())
        } else {
            Err(CloudError::Timeout(format!("table {} never became active", table)))
        }
    }

    async fn get_table_settings(&self, table: &str) -> Result<TableSettings> {
        self.lock()
            .tables
            .get(table)
            .cloned()
            .ok_or_else(|| CloudError::ResourceNotFound(format!("table {}", table)))
    }

    async fn apply_table_settings(
        &self,
        table: &str,
        settings: &TableSettings,
    ) -> Result<Option<String>> {
        let mut state = self.lock();
        let entry = state
            .tables
            .get_mut(table)
            .ok_or_else(|| CloudError::ResourceNotFound(format!("table {}", table)))?;
        *entry = settings.clone();
        Ok(settings
            .stream_view_type
            .as_ref()
            .map(|_| stream_arn(table, "2026-10-19T00:00:00.000")))
    }

    async fn delete_table(&self, table: &str) -> Result<()> {
        let mut state = self.lock();
        Self::check_delete(&mut state, table)?;
        state
            .tables
            .remove(table)
            .ok_or_else(|| CloudError::ResourceNotFound(format!("table {}", table)))?;
        state.deleted.push(table.to_string());
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        Ok(self.lock().buckets.contains_key(bucket))
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        let mut state = self.lock();
        state.bucket_calls.push(format!("create:{}", bucket));
        state
            .buckets
            .insert(bucket.to_string(), FakeBucket::default());
        Ok(())
    }

    async fn bucket_is_empty(&self, bucket: &str) -> Result<bool> {
        self.lock()
            .buckets
            .get(bucket)
            .map(|b| b.objects == 0)
            .ok_or_else(|| CloudError::ResourceNotFound(format!("bucket {}", bucket)))
    }

    async fn get_bucket_settings(&self, bucket: &str) -> Result<BucketSettings> {
        self.lock()
            .buckets
            .get(bucket)
            .map(|b| b.settings.clone())
            .ok_or_else(|| CloudError::ResourceNotFound(format!("bucket {}", bucket)))
    }

    async fn put_bucket_encryption(
        &self,
        bucket: &str,
        encryption: &serde_json::Value,
    ) -> Result<()> {
        let mut state = self.lock();
        state.bucket_calls.push(format!("encryption:{}", bucket));
        if let Some(b) = state.buckets.get_mut(bucket) {
            b.settings.encryption = Some(encryption.clone());
        }
        Ok(())
    }

    async fn put_bucket_versioning(&self, bucket: &str, status: &str) -> Result<()> {
        let mut state = self.lock();
        state.bucket_calls.push(format!("versioning:{}", bucket));
        if let Some(b) = state.buckets.get_mut(bucket) {
            b.settings.versioning = Some(status.to_string());
        }
        Ok(())
    }

    async fn put_bucket_lifecycle(
        &self,
        bucket: &str,
        lifecycle: &serde_json::Value,
    ) -> Result<()> {
        let mut state = self.lock();
        if !state.buckets.contains_key(bucket) {
            return Err(CloudError::ResourceNotFound(format!("bucket {}", bucket)));
        }
        state.bucket_calls.push(format!("lifecycle:{}", bucket));
        state
            .lifecycles
            .insert(bucket.to_string(), lifecycle.clone());
        Ok(())
    }

    async fn put_bucket_cors(&self, bucket: &str, cors: &serde_json::Value) -> Result<()> {
        let mut state = self.lock();
        state.bucket_calls.push(format!("cors:{}", bucket));
        if let Some(b) = state.buckets.get_mut(bucket) {
            b.settings.cors = Some(cors.clone());
        }
        Ok(())
    }

    async fn empty_bucket(&self, bucket: &str) -> Result<()> {
        let mut state = self.lock();
        let b = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| CloudError::ResourceNotFound(format!("bucket {}", bucket)))?;
        b.objects = 0;
        state.bucket_calls.push(format!("empty:{}", bucket));
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        let mut state = self.lock();
        Self::check_delete(&mut state, bucket)?;
        match state.buckets.get(bucket) {
            None => return Err(CloudError::ResourceNotFound(format!("bucket {}", bucket))),
            Some(b) if b.objects > 0 => {
                return Err(CloudError::ApiError(format!("BucketNotEmpty: {}", bucket)));
            }
            Some(_) => {}
        }
        state.buckets.remove(bucket);
        state.deleted.push(bucket.to_string());
        Ok(())
    }

    async fn key_exists(&self, key_id: &str) -> Result<bool> {
        Ok(self.lock().keys.contains(key_id))
    }

    async fn schedule_key_deletion(&self, key_id: &str) -> Result<()> {
        let mut state = self.lock();
        Self::check_delete(&mut state, key_id)?;
        if !state.keys.remove(key_id) {
            return Err(CloudError::ResourceNotFound(format!("key {}", key_id)));
        }
        state.scheduled_keys.push(key_id.to_string());
        Ok(())
    }

    async fn log_group_exists(&self, name: &str) -> Result<bool> {
        Ok(self.lock().log_groups.contains(name))
    }

    async fn delete_log_group(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        Self::check_delete(&mut state, name)?;
        if !state.log_groups.remove(name) {
            return Err(CloudError::ResourceNotFound(format!("log group {}", name)));
        }
        state.deleted.push(name.to_string());
        Ok(())
    }
}

/// In-memory release catalog
#[derive(Default)]
pub struct FakeCatalog {
    pub current: Option<VersionInfo>,
    pub updates: Vec<VersionInfo>,
    pub previous: Vec<VersionInfo>,

    /// Releases the catalog can serve, by tag
    pub releases: HashMap<String, VersionInfo>,

    /// Tags served only after they were requested
    pub on_request: HashSet<String>,

    /// Fetches answered "not staged yet" before a release is served
    pub not_ready_fetches: Mutex<u32>,

    pub up_to_date: HashSet<String>,
    pub requested: Mutex<Vec<String>>,
    pub fetches: Mutex<Vec<String>>,
}

impl FakeCatalog {
    pub fn new(current: VersionInfo) -> Self {
        Self {
            current: Some(current),
            ..Self::default()
        }
    }

    pub fn with_update(mut self, tag: &str, sortable: &str) -> Self {
        let release =
            VersionInfo::new(tag, sortable).with_template_url(format!("https://templates/{}.yaml", tag));
        self.updates.push(VersionInfo::new(tag, sortable));
        self.releases.insert(tag.to_string(), release);
        self
    }

    pub fn with_previous(mut self, tag: &str, sortable: &str) -> Self {
        let release =
            VersionInfo::new(tag, sortable).with_template_url(format!("https://templates/{}.yaml", tag));
        self.previous.push(VersionInfo::new(tag, sortable));
        self.releases.insert(tag.to_string(), release);
        self
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }
}

#[async_trait]
impl ReleaseCatalog for FakeCatalog {
    async fn current_version(&self) -> Result<Option<VersionInfo>> {
        Ok(self.current.clone())
    }

    async fn list_available_updates(&self, _provider: Option<&str>) -> Result<Vec<VersionInfo>> {
        Ok(self.updates.clone())
    }

    async fn list_previous_versions(&self) -> Result<Vec<VersionInfo>> {
        Ok(self.previous.clone())
    }

    async fn get_update_info(&self, tag: &str) -> Result<UpdateInfo> {
        self.fetches.lock().unwrap().push(tag.to_string());

        if self.up_to_date.contains(tag) {
            return Ok(UpdateInfo {
                update: None,
                up_to_date: true,
            });
        }
        if self.on_request.contains(tag) && !self.requested.lock().unwrap().iter().any(|t| t == tag) {
            return Ok(UpdateInfo::default());
        }

        let Some(release) = self.releases.get(tag) else {
            return Ok(UpdateInfo::default());
        };

        let mut not_ready = self.not_ready_fetches.lock().unwrap();
        if *not_ready > 0 {
            *not_ready -= 1;
            return Ok(UpdateInfo {
                update: Some(VersionInfo::new(&release.tag, &release.sortable_tag)),
                up_to_date: false,
            });
        }

        Ok(UpdateInfo {
            update: Some(release.clone()),
            up_to_date: false,
        })
    }

    async fn request_update(&self, tag: &str, _provider: Option<&str>) -> Result<()> {
        self.requested.lock().unwrap().push(tag.to_string());
        Ok(())
    }
}

/// Snapshot copier that records what it was asked to copy
#[derive(Default)]
pub struct FakeCopier {
    pub missing: bool,
    pub copies: Mutex<Vec<(String, String, DateTime<Utc>)>>,
}

impl FakeCopier {
    pub fn copies(&self) -> Vec<(String, String, DateTime<Utc>)> {
        self.copies.lock().unwrap().clone()
    }
}

#[async_trait]
impl SnapshotCopier for FakeCopier {
    async fn check_available(&self) -> Result<()> {
        if self.missing {
            return Err(CloudError::ToolNotFound {
                tool: "s3-pit-restore".to_string(),
                install_hint: "pip install s3-pit-restore".to_string(),
            });
        }
        Ok(())
    }

    async fn copy_at(
        &self,
        source_bucket: &str,
        destination_uri: &str,
        point_in_time: DateTime<Utc>,
    ) -> Result<()> {
        self.copies.lock().unwrap().push((
            source_bucket.to_string(),
            destination_uri.to_string(),
            point_in_time,
        ));
        Ok(())
    }
}

/// Prompter answering from a script; unexpected questions are an error
#[derive(Default)]
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<bool>>,
    selections: Mutex<VecDeque<String>>,
    always: Option<bool>,
    pub questions: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn answering(answers: &[bool]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().copied().collect()),
            ..Self::default()
        }
    }

    pub fn always(answer: bool) -> Self {
        Self {
            always: Some(answer),
            ..Self::default()
        }
    }

    pub fn selecting(mut self, choice: &str) -> Self {
        self.selections.get_mut().unwrap().push_back(choice.to_string());
        self
    }

    pub fn questions(&self) -> Vec<String> {
        self.questions.lock().unwrap().clone()
    }
}

impl Prompter for ScriptedPrompter {
    fn confirm(&self, question: &str, _default: bool) -> stackflow_lifecycle::Result<bool> {
        self.questions.lock().unwrap().push(question.to_string());
        if let Some(answer) = self.always {
            return Ok(answer);
        }
        self.answers.lock().unwrap().pop_front().ok_or_else(|| {
            LifecycleError::InvalidInput(format!("unexpected question: {}", question))
        })
    }

    fn select(&self, question: &str, choices: &[String]) -> stackflow_lifecycle::Result<String> {
        self.questions.lock().unwrap().push(question.to_string());
        let choice = self.selections.lock().unwrap().pop_front().ok_or_else(|| {
            LifecycleError::InvalidInput(format!("unexpected selection: {}", question))
        })?;
        assert!(choices.contains(&choice), "{} not offered in {:?}", choice, choices);
        Ok(choice)
    }
}

/// Reporter that keeps every message
#[derive(Default)]
pub struct RecordingReporter {
    pub messages: Mutex<Vec<(&'static str, String)>>,
}

impl RecordingReporter {
    pub fn contains(&self, needle: &str) -> bool {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .any(|(_, m)| m.contains(needle))
    }

    pub fn warnings(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(level, _)| *level == "warn")
            .map(|(_, m)| m.clone())
            .collect()
    }
}

impl Reporter for RecordingReporter {
    fn info(&self, message: &str) {
        self.messages
            .lock()
            .unwrap()
            .push(("info", message.to_string()));
    }

    fn warn(&self, message: &str) {
        self.messages
            .lock()
            .unwrap()
            .push(("warn", message.to_string()));
    }

    fn success(&self, message: &str) {
        self.messages
            .lock()
            .unwrap()
            .push(("success", message.to_string()));
    }
}
