use crate::common::{CompositeError, ManagementError, Result, TaskFailure};
use crate::dag::task_group::{PostRunDependent, TaskGroup};
use crate::dag::task_item::{PendingOperation, TaskContext, TaskItem};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::RefMut;
use futures::future::{self, BoxFuture};
use futures::stream::{self, BoxStream, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A child resource that lives under a parent but is not addressable on its
/// own, such as a pool under a Batch account.
///
/// Each operation returns the child as the service reports it afterwards.
#[async_trait]
pub trait ExternalChildResource: Clone + Send + Sync + 'static {
    /// Name of the child, unique within its parent ignoring case
    fn name(&self) -> &str;

    async fn create_resource(&self) -> Result<Self>;

    async fn update_resource(&self) -> Result<Self>;

    async fn delete_resource(&self) -> Result<()>;

    /// Read the current state of the child from the service
    async fn get_inner(&self) -> Result<Self>;
}

/// Lifecycle of a child inside its collection.
///
/// Only the transitions performed by [`ExternalChildResources`] are possible;
/// each pending state maps to exactly one commit partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildState {
    /// Loaded from the service with nothing to do
    Unchanged,
    PendingCreate,
    PendingUpdate,
    PendingDelete,
    /// Being committed
    Executing,
    /// Last commit succeeded
    Done,
    /// Last commit failed; the error is kept with the child
    Failed,
}

impl ChildState {
    pub fn pending_operation(self) -> PendingOperation {
        match self {
            ChildState::PendingCreate => PendingOperation::ToBeCreated,
            ChildState::PendingUpdate => PendingOperation::ToBeUpdated,
            ChildState::PendingDelete => PendingOperation::ToBeRemoved,
            _ => PendingOperation::None,
        }
    }

    pub fn is_pending(self) -> bool {
        self.pending_operation() != PendingOperation::None
    }
}

impl fmt::Display for ChildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ChildState::Unchanged => "unchanged",
            ChildState::PendingCreate => "pending create",
            ChildState::PendingUpdate => "pending update",
            ChildState::PendingDelete => "pending delete",
            ChildState::Executing => "executing",
            ChildState::Done => "done",
            ChildState::Failed => "failed",
        };
        f.write_str(text)
    }
}

struct ChildEntry<R> {
    resource: R,
    state: ChildState,
    last_error: Option<ManagementError>,
}

impl<R> ChildEntry<R> {
    fn new(resource: R, state: ChildState) -> Self {
        Self {
            resource,
            state,
            last_error: None,
        }
    }
}

/// Children waiting for a commit, grouped by the operation they need
#[derive(Debug, Clone)]
pub struct CommitPartitions<R> {
    pub to_delete: Vec<R>,
    pub to_create: Vec<R>,
    pub to_update: Vec<R>,
}

impl<R> CommitPartitions<R> {
    pub fn len(&self) -> usize {
        self.to_delete.len() + self.to_create.len() + self.to_update.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Collection<R> {
    kind: String,
    children: DashMap<String, ChildEntry<R>>,
    post_run: AtomicBool,
    attached: AtomicBool,
    clear_after_commit: AtomicBool,
}

/// Pending create/update/delete operations on the children of one parent.
///
/// In commit mode (the default) the operations run when
/// [`commit`](Self::commit) is called. In post-run mode they run right after
/// the parent's own task group succeeded, and an explicit commit is refused.
///
/// Names are compared ignoring case. The handle is cheap to clone; clones
/// share the same children.
pub struct ExternalChildResources<R> {
    inner: Arc<Collection<R>>,
}

impl<R> Clone for ExternalChildResources<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R> fmt::Debug for ExternalChildResources<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalChildResources")
            .field("kind", &self.inner.kind)
            .field("children", &self.inner.children.len())
            .field("post_run", &self.inner.post_run.load(Ordering::SeqCst))
            .finish()
    }
}

fn child_key(name: &str) -> String {
    name.to_lowercase()
}

impl<R: ExternalChildResource> ExternalChildResources<R> {
    /// Create an empty collection; `kind` names the children in error messages
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Collection {
                kind: kind.into(),
                children: DashMap::new(),
                post_run: AtomicBool::new(false),
                attached: AtomicBool::new(false),
                clear_after_commit: AtomicBool::new(false),
            }),
        }
    }

    pub fn kind(&self) -> &str {
        &self.inner.kind
    }

    /// Track children that already exist in the service
    pub fn load(&self, resources: impl IntoIterator<Item = R>) {
        for resource in resources {
            self.inner.children.insert(
                child_key(resource.name()),
                ChildEntry::new(resource, ChildState::Unchanged),
            );
        }
    }

    /// Stage a new child for creation.
    ///
    /// # Errors
    ///
    /// [`ManagementError::AlreadyExists`] if a child with the same name is tracked.
    pub fn define(&self, resource: R) -> Result<()> {
        let key = child_key(resource.name());
        match self.inner.children.entry(key) {
            Entry::Occupied(_) => Err(ManagementError::already_exists(
                &self.inner.kind,
                resource.name(),
            )),
            Entry::Vacant(slot) => {
                slot.insert(ChildEntry::new(resource, ChildState::PendingCreate));
                Ok(())
            }
        }
    }

    /// Stage new desired state for an existing child.
    ///
    /// # Errors
    ///
    /// [`ManagementError::NotFound`] if the child is unknown or not created
    /// yet, [`ManagementError::InvalidState`] if it is marked for removal or
    /// being committed.
    pub fn update(&self, resource: R) -> Result<()> {
        let name = resource.name().to_string();
        let mut entry = self.existing(&name)?;
        match entry.state {
            ChildState::PendingDelete | ChildState::Executing => {
                Err(ManagementError::InvalidState(format!(
                    "{} '{name}' cannot be updated while {}",
                    self.inner.kind, entry.state
                )))
            }
            _ => {
                entry.resource = resource;
                entry.state = ChildState::PendingUpdate;
                entry.last_error = None;
                Ok(())
            }
        }
    }

    /// Mark an existing child for deletion
    pub fn remove(&self, name: &str) -> Result<()> {
        let mut entry = self.existing(name)?;
        if entry.state == ChildState::Executing {
            return Err(ManagementError::InvalidState(format!(
                "{} '{name}' cannot be removed while executing",
                self.inner.kind
            )));
        }
        entry.state = ChildState::PendingDelete;
        entry.last_error = None;
        Ok(())
    }

    /// Entry for a child that exists, or is believed to exist, in the service
    fn existing(
        &self,
        name: &str,
    ) -> Result<RefMut<'_, String, ChildEntry<R>>> {
        match self.inner.children.get_mut(&child_key(name)) {
            Some(entry) if entry.state != ChildState::PendingCreate => Ok(entry),
            _ => Err(ManagementError::not_found(&self.inner.kind, name)),
        }
    }

    /// Case-insensitive lookup
    pub fn find(&self, name: &str) -> Option<R> {
        self.inner
            .children
            .get(&child_key(name))
            .map(|entry| entry.resource.clone())
    }

    pub fn state(&self, name: &str) -> Option<ChildState> {
        self.inner
            .children
            .get(&child_key(name))
            .map(|entry| entry.state)
    }

    /// Error of the last failed commit of this child
    pub fn last_error(&self, name: &str) -> Option<ManagementError> {
        self.inner
            .children
            .get(&child_key(name))
            .and_then(|entry| entry.last_error.clone())
    }

    /// Every tracked child, ordered by name
    pub fn list(&self) -> Vec<R> {
        let mut children: Vec<(String, R)> = self
            .inner
            .children
            .iter()
            .map(|entry| (entry.key().clone(), entry.resource.clone()))
            .collect();
        children.sort_by(|a, b| a.0.cmp(&b.0));
        children.into_iter().map(|(_, resource)| resource).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.children.is_empty()
    }

    pub fn clear(&self) {
        self.inner.children.clear();
    }

    /// Drop every child once a commit finished, whatever its outcome
    pub fn set_clear_after_commit(&self, clear: bool) {
        self.inner.clear_after_commit.store(clear, Ordering::SeqCst);
    }

    pub fn is_post_run_mode(&self) -> bool {
        self.inner.post_run.load(Ordering::SeqCst)
    }

    pub fn enable_commit_mode(&self) {
        self.inner.post_run.store(false, Ordering::SeqCst);
    }

    /// Run pending operations right after `parent` succeeded.
    ///
    /// The collection is attached to the first parent it is enabled on; later
    /// calls only switch the mode back on.
    pub fn enable_post_run_mode<U>(&self, parent: &mut TaskGroup<U>)
    where
        U: Clone + Send + Sync + 'static,
    {
        self.inner.post_run.store(true, Ordering::SeqCst);
        if !self.inner.attached.swap(true, Ordering::SeqCst) {
            parent.add_post_run_dependent(self.clone());
        }
    }

    /// Preview of what a commit would do, without changing any state
    pub fn partition_pending(&self) -> CommitPartitions<R> {
        let mut pending: Vec<(String, ChildState, R)> = self
            .inner
            .children
            .iter()
            .filter(|entry| entry.state.is_pending())
            .map(|entry| (entry.key().clone(), entry.state, entry.resource.clone()))
            .collect();
        pending.sort_by(|a, b| a.0.cmp(&b.0));

        let mut partitions = CommitPartitions {
            to_delete: Vec::new(),
            to_create: Vec::new(),
            to_update: Vec::new(),
        };
        for (_, state, resource) in pending {
            match state {
                ChildState::PendingDelete => partitions.to_delete.push(resource),
                ChildState::PendingCreate => partitions.to_create.push(resource),
                ChildState::PendingUpdate => partitions.to_update.push(resource),
                _ => {}
            }
        }
        partitions
    }

    /// Commit pending operations, yielding each affected child as it settles.
    ///
    /// Deleted children are yielded as they were before deletion. The stream
    /// ends with one [`ManagementError::Composite`] if any child failed, or
    /// fails immediately with [`ManagementError::InvalidState`] in post-run
    /// mode, before any remote call.
    ///
    /// Pending children are claimed on the first poll. Dropping the stream
    /// before it ends returns every child it has not settled to its pending
    /// state, so a later commit picks it up again.
    pub fn commit_stream(&self) -> BoxStream<'static, Result<R>> {
        if self.is_post_run_mode() {
            let error = ManagementError::InvalidState(format!(
                "{} collection is in post-run mode; its changes are committed with the parent",
                self.inner.kind
            ));
            return stream::once(future::ready(Err(error))).boxed();
        }

        let this = self.clone();
        stream::once(async move { this.claim() })
            .flat_map(|(group, claim)| {
                let finish = stream::once(async move { claim.finish() })
                    .filter_map(|()| future::ready(None::<Result<R>>));
                group
                    .execute_stream()
                    .map(|item| match item {
                        Ok(task) => Ok(task.result),
                        Err(composite) => Err(ManagementError::Composite(composite)),
                    })
                    .chain(finish)
            })
            .boxed()
    }

    /// Commit pending operations and return the children that succeeded
    pub async fn commit(&self) -> Result<Vec<R>> {
        let items: Vec<Result<R>> = self.commit_stream().collect().await;
        items.into_iter().collect()
    }

    /// Commit, then return every child still tracked
    pub async fn commit_and_get_all(&self) -> Result<Vec<R>> {
        self.commit().await?;
        Ok(self.list())
    }

    /// Re-read every settled child from the service
    pub async fn refresh(&self) -> Result<()> {
        let settled: Vec<(String, R)> = self
            .inner
            .children
            .iter()
            .filter(|entry| matches!(entry.state, ChildState::Unchanged | ChildState::Done))
            .map(|entry| (entry.key().clone(), entry.resource.clone()))
            .collect();

        let reads = settled.into_iter().map(|(key, resource)| async move {
            let outcome = resource.get_inner().await;
            (key, resource, outcome)
        });

        let mut failures = CompositeError::default();
        for (key, resource, outcome) in future::join_all(reads).await {
            match outcome {
                Ok(fresh) => {
                    if let Some(mut entry) = self.inner.children.get_mut(&key) {
                        entry.resource = fresh;
                        entry.state = ChildState::Unchanged;
                    }
                }
                Err(error) => failures.push(TaskFailure::new(resource.name(), error)),
            }
        }
        failures.into_result().map_err(ManagementError::from)
    }

    /// Build the graph for one commit, marking the children it covers as executing
    fn claim(&self) -> (TaskGroup<R>, CommitClaim<R>) {
        let mut claimed: Vec<(String, ChildState, R)> = Vec::new();
        for mut entry in self.inner.children.iter_mut() {
            if entry.state.is_pending() {
                claimed.push((entry.key().clone(), entry.state, entry.resource.clone()));
                entry.state = ChildState::Executing;
            }
        }
        claimed.sort_by(|a, b| a.0.cmp(&b.0));
        // deletes, then creates, then updates
        claimed.sort_by_key(|(_, state, _)| match state {
            ChildState::PendingDelete => 0,
            ChildState::PendingCreate => 1,
            _ => 2,
        });

        log::debug!(
            "Committing {} pending {} change(s)",
            claimed.len(),
            self.inner.kind
        );

        let claim = CommitClaim {
            collection: Arc::clone(&self.inner),
            claimed: claimed
                .iter()
                .map(|(key, state, _)| (key.clone(), *state))
                .collect(),
        };
        let mut group = TaskGroup::synthetic(format!("{} commit", self.inner.kind));
        for (key, state, resource) in claimed {
            let task = ChildTask {
                name: resource.name().to_string(),
                key,
                operation: state.pending_operation(),
                resource,
                collection: Arc::clone(&self.inner),
            };
            if let Err(error) = group.add_dependency(task) {
                log::error!("Failed to schedule {} change: {error}", self.inner.kind);
            }
        }
        (group, claim)
    }
}

/// Children taken out of the pending states by one commit.
///
/// Dropping the claim puts every child still `Executing` back into the state
/// it was claimed from.
struct CommitClaim<R> {
    collection: Arc<Collection<R>>,
    claimed: Vec<(String, ChildState)>,
}

impl<R> CommitClaim<R> {
    /// Called once the commit ran to the end
    fn finish(self) {
        if self.collection.clear_after_commit.load(Ordering::SeqCst) {
            self.collection.children.clear();
        }
    }
}

impl<R> Drop for CommitClaim<R> {
    fn drop(&mut self) {
        let mut restored = 0;
        for (key, previous) in &self.claimed {
            if let Some(mut entry) = self.collection.children.get_mut(key) {
                if entry.state == ChildState::Executing {
                    entry.state = *previous;
                    restored += 1;
                }
            }
        }
        if restored > 0 {
            log::warn!(
                "{} commit stopped early; {restored} change(s) are pending again",
                self.collection.kind
            );
        }
    }
}

impl<R: ExternalChildResource> PostRunDependent for ExternalChildResources<R> {
    fn key(&self) -> &str {
        &self.inner.kind
    }

    fn run_post(&self) -> BoxFuture<'static, Vec<TaskFailure>> {
        if !self.is_post_run_mode() {
            return Box::pin(future::ready(Vec::new()));
        }
        let this = self.clone();
        Box::pin(async move {
            let (group, claim) = this.claim();
            let failures = group.run_post().await;
            claim.finish();
            failures
        })
    }
}

/// One child operation scheduled by a commit
struct ChildTask<R> {
    name: String,
    key: String,
    operation: PendingOperation,
    resource: R,
    collection: Arc<Collection<R>>,
}

impl<R: ExternalChildResource> ChildTask<R> {
    fn settle(&self, outcome: &Result<R>) {
        let children = &self.collection.children;
        match (outcome, self.operation) {
            (Ok(_), PendingOperation::ToBeRemoved) => {
                children.remove(&self.key);
            }
            (Ok(resource), _) => {
                if let Some(mut entry) = children.get_mut(&self.key) {
                    entry.resource = resource.clone();
                    entry.state = ChildState::Done;
                    entry.last_error = None;
                }
            }
            (Err(_), PendingOperation::ToBeCreated) => {
                children.remove(&self.key);
            }
            (Err(error), _) => {
                if let Some(mut entry) = children.get_mut(&self.key) {
                    entry.state = ChildState::Failed;
                    entry.last_error = Some(error.clone());
                }
            }
        }
    }
}

#[async_trait]
impl<R: ExternalChildResource> TaskItem<R> for ChildTask<R> {
    fn key(&self) -> &str {
        &self.name
    }

    fn pending_operation(&self) -> PendingOperation {
        self.operation
    }

    async fn execute(&self, _context: &TaskContext<R>) -> Result<R> {
        log::debug!("{} {} '{}'", self.operation, self.collection.kind, self.name);
        let outcome = match self.operation {
            PendingOperation::ToBeRemoved => self
                .resource
                .delete_resource()
                .await
                .map(|()| self.resource.clone()),
            PendingOperation::ToBeCreated => self.resource.create_resource().await,
            PendingOperation::ToBeUpdated => self.resource.update_resource().await,
            PendingOperation::None => Ok(self.resource.clone()),
        };
        self.settle(&outcome);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Debug, Clone)]
    struct Pool {
        name: String,
        vm_size: String,
        fail: bool,
        hang: bool,
        calls: Arc<AtomicUsize>,
    }

    impl Pool {
        fn new(name: &str, calls: &Arc<AtomicUsize>) -> Self {
            Self {
                name: name.to_string(),
                vm_size: "standard_d2".to_string(),
                fail: false,
                hang: false,
                calls: Arc::clone(calls),
            }
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }

        fn hanging(mut self) -> Self {
            self.hang = true;
            self
        }

        async fn outcome(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                future::pending::<()>().await;
            }
            if self.fail {
                Err(ManagementError::ResourceOperation(format!("{} rejected", self.name)))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl ExternalChildResource for Pool {
        fn name(&self) -> &str {
            &self.name
        }

        async fn create_resource(&self) -> Result<Self> {
            self.outcome().await?;
            Ok(self.clone())
        }

        async fn update_resource(&self) -> Result<Self> {
            self.outcome().await?;
            Ok(self.clone())
        }

        async fn delete_resource(&self) -> Result<()> {
            self.outcome().await
        }

        async fn get_inner(&self) -> Result<Self> {
            let mut fresh = self.clone();
            fresh.vm_size = "refreshed".to_string();
            Ok(fresh)
        }
    }

    fn calls() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[test]
    fn test_state_transitions_are_validated() {
        let calls = calls();
        let pools = ExternalChildResources::new("Pool");
        pools.load([Pool::new("existing", &calls)]);

        pools.define(Pool::new("fresh", &calls)).unwrap();
        assert!(matches!(
            pools.define(Pool::new("FRESH", &calls)),
            Err(ManagementError::AlreadyExists { .. })
        ));
        assert!(matches!(
            pools.update(Pool::new("fresh", &calls)),
            Err(ManagementError::NotFound { .. })
        ));
        assert!(matches!(
            pools.remove("missing"),
            Err(ManagementError::NotFound { .. })
        ));

        pools.remove("Existing").unwrap();
        assert!(matches!(
            pools.update(Pool::new("existing", &calls)),
            Err(ManagementError::InvalidState(_))
        ));
        assert_eq!(pools.state("existing"), Some(ChildState::PendingDelete));
    }

    #[test]
    fn test_each_pending_child_lands_in_one_partition() {
        let calls = calls();
        let pools = ExternalChildResources::new("Pool");
        pools.load([
            Pool::new("a", &calls),
            Pool::new("b", &calls),
            Pool::new("idle", &calls),
        ]);
        pools.define(Pool::new("c", &calls)).unwrap();
        pools.update(Pool::new("a", &calls)).unwrap();
        pools.remove("b").unwrap();

        let partitions = pools.partition_pending();

        let names = |list: &[Pool]| list.iter().map(|p| p.name.clone()).collect::<Vec<_>>();
        assert_eq!(names(&partitions.to_update), vec!["a"]);
        assert_eq!(names(&partitions.to_delete), vec!["b"]);
        assert_eq!(names(&partitions.to_create), vec!["c"]);
        assert_eq!(partitions.len(), 3);
        assert_eq!(pools.state("a"), Some(ChildState::PendingUpdate));
    }

    #[tokio::test]
    async fn test_commit_settles_children() {
        let calls = calls();
        let pools = ExternalChildResources::new("Pool");
        pools.load([Pool::new("old", &calls), Pool::new("keep", &calls)]);
        pools.define(Pool::new("new", &calls)).unwrap();
        pools.remove("old").unwrap();
        pools.update(Pool::new("keep", &calls)).unwrap();

        let mut committed: Vec<String> = pools
            .commit()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        committed.sort();

        assert_eq!(committed, vec!["keep", "new", "old"]);
        assert!(pools.find("old").is_none());
        assert_eq!(pools.state("new"), Some(ChildState::Done));
        assert_eq!(pools.state("keep"), Some(ChildState::Done));
        assert!(pools.partition_pending().is_empty());
    }

    #[tokio::test]
    async fn test_failures_follow_retention_rules() {
        let calls = calls();
        let pools = ExternalChildResources::new("Pool");
        pools.load([
            Pool::new("del", &calls).failing(),
            Pool::new("upd", &calls),
        ]);
        pools.define(Pool::new("crt", &calls).failing()).unwrap();
        pools.remove("del").unwrap();
        pools.update(Pool::new("upd", &calls).failing()).unwrap();

        let error = pools.commit().await.unwrap_err();

        let ManagementError::Composite(composite) = error else {
            panic!("Expected composite error, got {error:?}");
        };
        let mut failed = composite.failed_keys();
        failed.sort();
        assert_eq!(failed, vec!["crt", "del", "upd"]);

        assert!(pools.find("crt").is_none());
        assert_eq!(pools.state("del"), Some(ChildState::Failed));
        assert_eq!(pools.state("upd"), Some(ChildState::Failed));
        assert!(pools.last_error("upd").is_some());
    }

    #[tokio::test]
    async fn test_commit_refused_in_post_run_mode() {
        let calls = calls();
        let pools = ExternalChildResources::new("Pool");
        pools.define(Pool::new("p1", &calls)).unwrap();

        let mut parent: TaskGroup<String> = TaskGroup::synthetic("account");
        pools.enable_post_run_mode(&mut parent);

        let result = pools.commit().await;

        assert!(matches!(result, Err(ManagementError::InvalidState(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(pools.state("p1"), Some(ChildState::PendingCreate));
    }

    #[tokio::test]
    async fn test_post_run_mode_attaches_once_and_runs_after_parent() {
        let calls = calls();
        let pools = ExternalChildResources::new("Pool");
        pools.define(Pool::new("p1", &calls)).unwrap();

        let mut parent: TaskGroup<String> = TaskGroup::synthetic("account");
        pools.enable_post_run_mode(&mut parent);
        pools.enable_post_run_mode(&mut parent);
        assert_eq!(parent.post_run_count(), 1);

        parent.execute().await.into_result().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(pools.state("p1"), Some(ChildState::Done));
    }

    #[tokio::test]
    async fn test_clear_after_commit_and_refresh() {
        let calls = calls();
        let pools = ExternalChildResources::new("Pool");
        pools.load([Pool::new("a", &calls)]);

        pools.refresh().await.unwrap();
        assert_eq!(pools.find("A").map(|p| p.vm_size), Some("refreshed".to_string()));

        pools.define(Pool::new("b", &calls)).unwrap();
        pools.set_clear_after_commit(true);
        let all = pools.commit_and_get_all().await.unwrap();

        assert!(all.is_empty());
        assert!(pools.is_empty());
    }

    #[tokio::test]
    async fn test_unpolled_commit_claims_nothing() {
        let calls = calls();
        let pools = ExternalChildResources::new("Pool");
        pools.define(Pool::new("p1", &calls)).unwrap();

        drop(pools.commit_stream());

        assert_eq!(pools.state("p1"), Some(ChildState::PendingCreate));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let committed = pools.commit().await.unwrap();

        assert_eq!(committed.len(), 1);
        assert_eq!(pools.state("p1"), Some(ChildState::Done));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_commit_returns_unsettled_children() {
        let calls = calls();
        let pools = ExternalChildResources::new("Pool");
        pools.load([Pool::new("stuck", &calls)]);
        pools.update(Pool::new("stuck", &calls).hanging()).unwrap();
        pools.define(Pool::new("quick", &calls)).unwrap();

        let mut stream = pools.commit_stream();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.name, "quick");
        let waited = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(waited.is_err());
        assert_eq!(pools.state("stuck"), Some(ChildState::Executing));
        assert!(matches!(
            pools.update(Pool::new("stuck", &calls)),
            Err(ManagementError::InvalidState(_))
        ));

        drop(stream);

        assert_eq!(pools.state("stuck"), Some(ChildState::PendingUpdate));
        assert_eq!(pools.state("quick"), Some(ChildState::Done));

        pools.update(Pool::new("stuck", &calls)).unwrap();
        let committed = pools.commit().await.unwrap();
        assert_eq!(committed.len(), 1);
        assert_eq!(pools.state("stuck"), Some(ChildState::Done));
    }
}
