//! Test support utilities shared across unit and integration tests.
//!
//! Everything here keeps its state behind `Arc<Mutex<..>>` so a test can
//! hold a clone of a fake while the code under test drives another clone.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::{Value, json};

use crate::bank::{BankError, BankFuture, BankPlugin, ListOptions, SortDirection};
use crate::context::RequestContext;
use crate::operation::{Operation, OperationArgs, OperationError, OperationFuture, Stage};
use crate::plugin::ProtectionPlugin;
use crate::plugin::share::{
    ClientError, ClientFuture, ShareClient, ShareClientFactory, ShareFromSnapshotRequest,
    ShareInfo, SnapshotInfo, SnapshotRequest,
};
use crate::resource::Resource;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct MemoryBankState {
    objects: BTreeMap<String, Vec<u8>>,
    fail_writes: Option<String>,
}

/// In-memory [`BankPlugin`] backed by an ordered map.
///
/// Clones share the same storage.
#[derive(Clone, Debug)]
pub struct MemoryBankPlugin {
    owner_id: String,
    state: Arc<Mutex<MemoryBankState>>,
}

impl Default for MemoryBankPlugin {
    fn default() -> Self {
        Self::with_owner("owner")
    }
}

impl MemoryBankPlugin {
    /// Creates an empty bank owned by `owner`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty bank reporting `owner_id` as its owner.
    #[must_use]
    pub fn with_owner(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            state: Arc::default(),
        }
    }

    /// Makes every subsequent write fail with `message`.
    pub fn fail_writes(&self, message: impl Into<String>) {
        lock(&self.state).fail_writes = Some(message.into());
    }

    /// Returns every stored key in ascending order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        lock(&self.state).objects.keys().cloned().collect()
    }

    /// Returns the raw value under the full `key`.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        lock(&self.state).objects.get(key).cloned()
    }

    fn write_guard(state: &MemoryBankState) -> Result<(), BankError> {
        match &state.fail_writes {
            Some(message) => Err(BankError::Backend {
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    fn page(&self, options: &ListOptions) -> Vec<String> {
        let state = lock(&self.state);
        let prefix = options.prefix.as_deref().unwrap_or_default();
        let mut keys: Vec<String> = state
            .objects
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        if options.sort_dir == SortDirection::Descending {
            keys.reverse();
        }
        if let Some(marker) = &options.marker {
            keys.retain(|key| match options.sort_dir {
                SortDirection::Ascending => key > marker,
                SortDirection::Descending => key < marker,
            });
        }
        if let Some(limit) = options.limit {
            keys.truncate(limit);
        }
        keys
    }
}

impl BankPlugin for MemoryBankPlugin {
    fn get_object<'a>(&'a self, key: &'a str) -> BankFuture<'a, Vec<u8>> {
        let found = lock(&self.state).objects.get(key).cloned();
        Box::pin(async move {
            found.ok_or_else(|| BankError::NotFound {
                key: key.to_owned(),
            })
        })
    }

    fn update_object<'a>(&'a self, key: &'a str, value: Vec<u8>) -> BankFuture<'a, ()> {
        let result = {
            let mut state = lock(&self.state);
            Self::write_guard(&state).map(|()| {
                state.objects.insert(key.to_owned(), value);
            })
        };
        Box::pin(async move { result })
    }

    fn delete_object<'a>(&'a self, key: &'a str) -> BankFuture<'a, ()> {
        let result = {
            let mut state = lock(&self.state);
            Self::write_guard(&state).map(|()| {
                state.objects.remove(key);
            })
        };
        Box::pin(async move { result })
    }

    fn list_objects<'a>(&'a self, options: &'a ListOptions) -> BankFuture<'a, Vec<String>> {
        let keys = self.page(options);
        Box::pin(async move { Ok(keys) })
    }

    fn get_owner_id(&self) -> BankFuture<'_, String> {
        Box::pin(async move { Ok(self.owner_id.clone()) })
    }
}

#[derive(Debug, Default)]
struct JournalState {
    entries: Vec<(String, Stage)>,
    in_flight: usize,
    peak_in_flight: usize,
}

/// Ordered log of the hooks invoked by [`RecordingOperation`]s.
#[derive(Clone, Debug, Default)]
pub struct Journal {
    state: Arc<Mutex<JournalState>>,
}

impl Journal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, resource: &Resource, stage: Stage) {
        lock(&self.state).entries.push((resource.id.clone(), stage));
    }

    fn enter(&self) {
        let mut state = lock(&self.state);
        state.in_flight += 1;
        state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
    }

    fn leave(&self) {
        let mut state = lock(&self.state);
        state.in_flight = state.in_flight.saturating_sub(1);
    }

    /// Returns every `(resource id, stage)` pair in invocation order.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, Stage)> {
        lock(&self.state).entries.clone()
    }

    /// Returns the stages invoked for `resource_id`, in order.
    #[must_use]
    pub fn stages_for(&self, resource_id: &str) -> Vec<Stage> {
        lock(&self.state)
            .entries
            .iter()
            .filter(|(id, _)| id == resource_id)
            .map(|(_, stage)| *stage)
            .collect()
    }

    /// Returns the ids of resources that reached `on_complete`, in order.
    #[must_use]
    pub fn completed(&self) -> Vec<String> {
        self.reached(Stage::Complete)
    }

    /// Returns the ids of resources that entered `stage`, in order.
    #[must_use]
    pub fn reached(&self, stage: Stage) -> Vec<String> {
        lock(&self.state)
            .entries
            .iter()
            .filter(|(_, seen)| *seen == stage)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Returns the largest number of `on_main` hooks that ran at once.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        lock(&self.state).peak_in_flight
    }
}

/// [`Operation`] that logs every hook to a [`Journal`] and optionally fails.
#[derive(Clone, Debug, Default)]
pub struct RecordingOperation {
    journal: Journal,
    failing_at: Option<Stage>,
    main_delay: Option<Duration>,
}

impl RecordingOperation {
    /// Creates an operation with its own journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an operation logging to `journal`.
    #[must_use]
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal,
            ..Self::default()
        }
    }

    /// Fails with a client error when `stage` runs.
    #[must_use]
    pub const fn failing_at(mut self, stage: Stage) -> Self {
        self.failing_at = Some(stage);
        self
    }

    /// Sleeps for `delay` inside `on_main`.
    #[must_use]
    pub const fn main_delay(mut self, delay: Duration) -> Self {
        self.main_delay = Some(delay);
        self
    }

    /// Returns the journal this operation writes to.
    #[must_use]
    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    fn stage<'a>(&'a self, stage: Stage, args: OperationArgs<'a>) -> OperationFuture<'a> {
        Box::pin(async move {
            self.journal.record(args.resource, stage);
            if stage == Stage::Main
                && let Some(delay) = self.main_delay
            {
                self.journal.enter();
                tokio::time::sleep(delay).await;
                self.journal.leave();
            }
            if self.failing_at == Some(stage) {
                return Err(OperationError::Client {
                    message: format!("{stage} failed for {}", args.resource),
                });
            }
            Ok(())
        })
    }
}

impl Operation for RecordingOperation {
    fn on_prepare_begin<'a>(&'a self, args: OperationArgs<'a>) -> OperationFuture<'a> {
        self.stage(Stage::PrepareBegin, args)
    }

    fn on_prepare_finish<'a>(&'a self, args: OperationArgs<'a>) -> OperationFuture<'a> {
        self.stage(Stage::PrepareFinish, args)
    }

    fn on_main<'a>(&'a self, args: OperationArgs<'a>) -> OperationFuture<'a> {
        self.stage(Stage::Main, args)
    }

    fn on_complete<'a>(&'a self, args: OperationArgs<'a>) -> OperationFuture<'a> {
        self.stage(Stage::Complete, args)
    }
}

/// Status source replaying a fixed script; the last status repeats once
/// the script is exhausted.
#[derive(Clone, Debug, Default)]
pub struct ScriptedStatuses {
    script: Arc<Mutex<VecDeque<String>>>,
    fetches: Arc<AtomicUsize>,
}

impl ScriptedStatuses {
    /// Creates a source replaying `statuses`.
    #[must_use]
    pub fn new<I, S>(statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Arc::new(Mutex::new(statuses.into_iter().map(Into::into).collect())),
            fetches: Arc::default(),
        }
    }

    /// Returns the next scripted status.
    pub fn fetch(&self) -> std::future::Ready<Result<String, String>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let mut script = lock(&self.script);
        let next = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        std::future::ready(next.ok_or_else(|| String::from("no scripted status")))
    }

    /// Returns how many statuses were fetched.
    #[must_use]
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

/// [`ProtectionPlugin`] handing out [`RecordingOperation`]s for fixed types.
#[derive(Clone, Debug)]
pub struct StaticPlugin {
    types: Vec<String>,
    journal: Journal,
    failures: HashMap<String, Stage>,
}

impl StaticPlugin {
    /// Creates a plugin supporting `types`.
    #[must_use]
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            types: types.into_iter().map(Into::into).collect(),
            journal: Journal::new(),
            failures: HashMap::new(),
        }
    }

    /// Makes operations for `resource_id` fail at `stage`.
    #[must_use]
    pub fn failing(mut self, resource_id: impl Into<String>, stage: Stage) -> Self {
        self.failures.insert(resource_id.into(), stage);
        self
    }

    /// Returns the journal shared by every operation of the plugin.
    #[must_use]
    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    fn recording(&self, resource: &Resource) -> Box<dyn Operation> {
        let operation = RecordingOperation::with_journal(self.journal.clone());
        Box::new(match self.failures.get(&resource.id) {
            Some(stage) => operation.failing_at(*stage),
            None => operation,
        })
    }

    fn schema(&self, resource_type: &str) -> Option<Value> {
        self.types
            .iter()
            .any(|kind| kind == resource_type)
            .then(|| json!({ "type": "object" }))
    }
}

impl ProtectionPlugin for StaticPlugin {
    fn supported_resource_types(&self) -> Vec<String> {
        self.types.clone()
    }

    fn options_schema(&self, resource_type: &str) -> Option<Value> {
        self.schema(resource_type)
    }

    fn restore_schema(&self, resource_type: &str) -> Option<Value> {
        self.schema(resource_type)
    }

    fn saved_info_schema(&self, resource_type: &str) -> Option<Value> {
        self.schema(resource_type)
    }

    fn protect_operation(&self, resource: &Resource) -> Box<dyn Operation> {
        self.recording(resource)
    }

    fn delete_operation(&self, resource: &Resource) -> Box<dyn Operation> {
        self.recording(resource)
    }

    fn verify_operation(&self, resource: &Resource) -> Box<dyn Operation> {
        self.recording(resource)
    }

    fn restore_operation(&self, resource: &Resource) -> Box<dyn Operation> {
        self.recording(resource)
    }
}

#[derive(Debug)]
struct ScriptedObject {
    share_id: String,
    statuses: VecDeque<String>,
}

impl ScriptedObject {
    fn status(&mut self) -> String {
        if self.statuses.len() > 1 {
            self.statuses.pop_front().unwrap_or_default()
        } else {
            self.statuses.front().cloned().unwrap_or_default()
        }
    }
}

#[derive(Debug, Default)]
struct ShareServiceState {
    shares: HashMap<String, (ShareInfo, VecDeque<String>)>,
    snapshots: HashMap<String, ScriptedObject>,
    next_snapshot_ids: VecDeque<String>,
    next_snapshot_statuses: Vec<String>,
    restored_share_statuses: Vec<String>,
    restored: usize,
    failing_calls: Vec<String>,
    refuse_connections: bool,
    calls: Vec<String>,
    snapshot_requests: Vec<SnapshotRequest>,
    restore_requests: Vec<ShareFromSnapshotRequest>,
}

/// Scripted shared file system service.
///
/// Acts as both the [`ShareClientFactory`] and the [`ShareClient`] it
/// hands out. Status scripts advance one step per fetch and repeat their
/// last entry.
#[derive(Clone, Debug, Default)]
pub struct ScriptedShareClient {
    state: Arc<Mutex<ShareServiceState>>,
}

impl ScriptedShareClient {
    /// Creates a service with no shares.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an NFS share of 1 GiB reporting `statuses` in turn.
    #[must_use]
    pub fn with_share<I, S>(self, share_id: &str, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut state = lock(&self.state);
            let statuses: VecDeque<String> = statuses.into_iter().map(Into::into).collect();
            let info = ShareInfo {
                id: share_id.to_owned(),
                status: statuses.front().cloned().unwrap_or_default(),
                size_gb: 1,
                share_proto: String::from("NFS"),
            };
            state.shares.insert(share_id.to_owned(), (info, statuses));
        }
        self
    }

    /// Adds an existing snapshot of `share_id` reporting `statuses` in turn.
    #[must_use]
    pub fn with_snapshot<I, S>(self, snapshot_id: &str, share_id: &str, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.state).snapshots.insert(
            snapshot_id.to_owned(),
            ScriptedObject {
                share_id: share_id.to_owned(),
                statuses: statuses.into_iter().map(Into::into).collect(),
            },
        );
        self
    }

    /// Identifier handed to the next created snapshot.
    #[must_use]
    pub fn next_snapshot_id(self, snapshot_id: &str) -> Self {
        lock(&self.state)
            .next_snapshot_ids
            .push_back(snapshot_id.to_owned());
        self
    }

    /// Statuses reported by snapshots created from now on.
    #[must_use]
    pub fn created_snapshot_statuses<I, S>(self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.state).next_snapshot_statuses = statuses.into_iter().map(Into::into).collect();
        self
    }

    /// Statuses reported by shares restored from snapshots.
    #[must_use]
    pub fn restored_share_statuses<I, S>(self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.state).restored_share_statuses = statuses.into_iter().map(Into::into).collect();
        self
    }

    /// Makes every call named `call` (for example `create_snapshot`) fail.
    #[must_use]
    pub fn failing_call(self, call: &str) -> Self {
        lock(&self.state).failing_calls.push(call.to_owned());
        self
    }

    /// Makes the factory refuse to build clients.
    #[must_use]
    pub fn refusing_connections(self) -> Self {
        lock(&self.state).refuse_connections = true;
        self
    }

    /// Returns every call as `name:argument`, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }

    /// Returns the number of calls named `call`.
    #[must_use]
    pub fn call_count(&self, call: &str) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|entry| entry.split(':').next() == Some(call))
            .count()
    }

    /// Returns every snapshot creation request.
    #[must_use]
    pub fn snapshot_requests(&self) -> Vec<SnapshotRequest> {
        lock(&self.state).snapshot_requests.clone()
    }

    /// Returns every restore request.
    #[must_use]
    pub fn restore_requests(&self) -> Vec<ShareFromSnapshotRequest> {
        lock(&self.state).restore_requests.clone()
    }

    /// Returns `true` while `snapshot_id` exists.
    #[must_use]
    pub fn has_snapshot(&self, snapshot_id: &str) -> bool {
        lock(&self.state).snapshots.contains_key(snapshot_id)
    }

    fn begin(&self, call: &str, argument: &str) -> Result<MutexGuard<'_, ShareServiceState>, ClientError> {
        let mut state = lock(&self.state);
        state.calls.push(format!("{call}:{argument}"));
        if state.failing_calls.iter().any(|failing| failing == call) {
            return Err(ClientError::Service {
                message: format!("{call} rejected"),
            });
        }
        Ok(state)
    }

    fn share(&self, share_id: &str) -> Result<ShareInfo, ClientError> {
        let mut state = self.begin("get_share", share_id)?;
        let (info, statuses) =
            state
                .shares
                .get_mut(share_id)
                .ok_or_else(|| ClientError::NotFound {
                    kind: String::from("share"),
                    id: share_id.to_owned(),
                })?;
        let status = if statuses.len() > 1 {
            statuses.pop_front().unwrap_or_default()
        } else {
            statuses.front().cloned().unwrap_or_default()
        };
        info.status = status;
        Ok(info.clone())
    }

    fn snapshot(&self, request: &SnapshotRequest) -> Result<SnapshotInfo, ClientError> {
        let mut state = self.begin("create_snapshot", &request.share_id)?;
        if !state.shares.contains_key(&request.share_id) {
            return Err(ClientError::NotFound {
                kind: String::from("share"),
                id: request.share_id.clone(),
            });
        }
        state.snapshot_requests.push(request.clone());
        let id = state
            .next_snapshot_ids
            .pop_front()
            .unwrap_or_else(|| format!("snap-{}", state.snapshot_requests.len()));
        let statuses: VecDeque<String> = if state.next_snapshot_statuses.is_empty() {
            VecDeque::from([String::from("available")])
        } else {
            state.next_snapshot_statuses.iter().cloned().collect()
        };
        let status = statuses.front().cloned().unwrap_or_default();
        state.snapshots.insert(
            id.clone(),
            ScriptedObject {
                share_id: request.share_id.clone(),
                statuses,
            },
        );
        Ok(SnapshotInfo {
            id,
            share_id: request.share_id.clone(),
            status,
        })
    }

    fn lookup_snapshot(&self, snapshot_id: &str) -> Result<Option<SnapshotInfo>, ClientError> {
        let mut state = self.begin("get_snapshot", snapshot_id)?;
        Ok(state.snapshots.get_mut(snapshot_id).map(|object| SnapshotInfo {
            id: snapshot_id.to_owned(),
            share_id: object.share_id.clone(),
            status: object.status(),
        }))
    }

    fn remove_snapshot(&self, snapshot_id: &str) -> Result<(), ClientError> {
        let mut state = self.begin("delete_snapshot", snapshot_id)?;
        state
            .snapshots
            .remove(snapshot_id)
            .map(|_| ())
            .ok_or_else(|| ClientError::NotFound {
                kind: String::from("snapshot"),
                id: snapshot_id.to_owned(),
            })
    }

    fn restore(&self, request: &ShareFromSnapshotRequest) -> Result<ShareInfo, ClientError> {
        let mut state = self.begin("create_share_from_snapshot", &request.snapshot_id)?;
        if !state.snapshots.contains_key(&request.snapshot_id) {
            return Err(ClientError::NotFound {
                kind: String::from("snapshot"),
                id: request.snapshot_id.clone(),
            });
        }
        state.restore_requests.push(request.clone());
        state.restored += 1;
        let statuses: VecDeque<String> = if state.restored_share_statuses.is_empty() {
            VecDeque::from([String::from("available")])
        } else {
            state.restored_share_statuses.iter().cloned().collect()
        };
        let info = ShareInfo {
            id: format!("restored-{}", state.restored),
            status: statuses.front().cloned().unwrap_or_default(),
            size_gb: request.size_gb,
            share_proto: request.share_proto.clone(),
        };
        state
            .shares
            .insert(info.id.clone(), (info.clone(), statuses));
        Ok(info)
    }
}

impl ShareClient for ScriptedShareClient {
    fn get_share<'a>(&'a self, share_id: &'a str) -> ClientFuture<'a, ShareInfo> {
        let result = self.share(share_id);
        Box::pin(async move { result })
    }

    fn create_snapshot<'a>(
        &'a self,
        request: &'a SnapshotRequest,
    ) -> ClientFuture<'a, SnapshotInfo> {
        let result = self.snapshot(request);
        Box::pin(async move { result })
    }

    fn get_snapshot<'a>(&'a self, snapshot_id: &'a str) -> ClientFuture<'a, Option<SnapshotInfo>> {
        let result = self.lookup_snapshot(snapshot_id);
        Box::pin(async move { result })
    }

    fn delete_snapshot<'a>(&'a self, snapshot_id: &'a str) -> ClientFuture<'a, ()> {
        let result = self.remove_snapshot(snapshot_id);
        Box::pin(async move { result })
    }

    fn create_share_from_snapshot<'a>(
        &'a self,
        request: &'a ShareFromSnapshotRequest,
    ) -> ClientFuture<'a, ShareInfo> {
        let result = self.restore(request);
        Box::pin(async move { result })
    }
}

impl ShareClientFactory for ScriptedShareClient {
    fn create(&self, context: &RequestContext) -> Result<Arc<dyn ShareClient>, ClientError> {
        if lock(&self.state).refuse_connections {
            return Err(ClientError::Connect {
                message: format!(
                    "no endpoint for project {}",
                    context.project_id.as_deref().unwrap_or("<none>")
                ),
            });
        }
        Ok(Arc::new(self.clone()))
    }
}
