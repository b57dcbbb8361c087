use crate::common::{CompositeError, Result};
use crate::dag::task_group::TaskGroup;
use crate::dag::task_item::{CompletedTask, TaskItem};
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::sync::Arc;

/// Synthetic root driving a batch of otherwise unrelated top-level resources
/// through a single graph execution.
///
/// Each member added with [`add_creatable`](Self::add_creatable) becomes a
/// dependency of the root. Members may bring their own dependencies; shared
/// dependencies are matched by key and created once.
///
/// # Examples
///
/// ```no_run
/// use fluent_core::dag::CreatableUpdatableResourcesRoot;
/// # use fluent_core::dag::{TaskContext, TaskItem};
/// # use fluent_core::common::Result;
/// # struct Vm;
/// # #[async_trait::async_trait]
/// # impl TaskItem<String> for Vm {
/// #     fn key(&self) -> &str { "vm1" }
/// #     async fn execute(&self, _c: &TaskContext<String>) -> Result<String> { Ok("id".into()) }
/// # }
///
/// # async fn run() -> Result<()> {
/// let mut batch = CreatableUpdatableResourcesRoot::new();
/// batch.add_creatable(Vm)?;
///
/// let created = batch.create().await?;
/// println!("{:?}", created.get("vm1"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct CreatableUpdatableResourcesRoot<T> {
    group: TaskGroup<T>,
    keys: Vec<String>,
}

impl<T> Default for CreatableUpdatableResourcesRoot<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CreatableUpdatableResourcesRoot<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        let root_key = format!("batch-root-{}", uuid::Uuid::new_v4());
        Self {
            group: TaskGroup::synthetic(root_key),
            keys: Vec::new(),
        }
    }

    /// Add a top-level member to the batch and return its key
    pub fn add_creatable(&mut self, item: impl TaskItem<T> + 'static) -> Result<String> {
        self.add_shared_creatable(Arc::new(item))
    }

    pub fn add_shared_creatable(&mut self, item: Arc<dyn TaskItem<T>>) -> Result<String> {
        let key = self.group.add_shared_dependency(item)?;
        self.remember(&key);
        Ok(key)
    }

    /// Add a member together with the dependencies already attached to it
    pub fn add_creatable_group(&mut self, group: TaskGroup<T>) -> Result<String> {
        let key = self.group.add_dependency_group(group)?;
        self.remember(&key);
        Ok(key)
    }

    fn remember(&mut self, key: &str) {
        if !self.keys.iter().any(|existing| existing == key) {
            self.keys.push(key.to_string());
        }
    }

    /// Keys of the top-level members in the order they were added
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// The underlying graph, for declaring edges between members
    pub fn task_group_mut(&mut self) -> &mut TaskGroup<T> {
        &mut self.group
    }

    pub fn task_group(&self) -> &TaskGroup<T> {
        &self.group
    }

    /// Create every member and its dependencies.
    ///
    /// # Errors
    ///
    /// Returns a [`CompositeError`] with every individual failure once all
    /// reachable work has been attempted. Members that succeeded stay created;
    /// use [`create_partial`](Self::create_partial) or
    /// [`create_stream`](Self::create_stream) to keep their results as well.
    pub async fn create(self) -> Result<CreatedResources<T>, CompositeError> {
        let (created, failures) = self.create_partial().await;
        if failures.is_empty() {
            Ok(created)
        } else {
            Err(failures)
        }
    }

    /// Create the batch and return whatever was created next to the failures.
    ///
    /// The failures are empty when every member succeeded.
    pub async fn create_partial(self) -> (CreatedResources<T>, CompositeError) {
        let execution = self.group.execute().await;
        if !execution.is_success() {
            log::warn!(
                "Batch finished with {} failure(s) out of {} task(s)",
                execution.failures().len(),
                self.group.len() - 1
            );
        }
        (
            CreatedResources::collect(&self.group, &self.keys),
            execution.failures().clone(),
        )
    }

    /// Create the batch, yielding every completed task (members and their
    /// dependencies) as it finishes. A failing batch ends with one `Err`.
    pub fn create_stream(&self) -> BoxStream<'static, Result<CompletedTask<T>, CompositeError>> {
        self.group.execute_stream()
    }
}

/// Read-only results of a batch creation.
///
/// Keyed by the top-level members of the batch. Resources created as a side
/// effect, because a member depended on them, are reachable through
/// [`created_related_resource`](Self::created_related_resource).
#[derive(Debug, Clone)]
pub struct CreatedResources<T> {
    members: Vec<(String, T)>,
    related: HashMap<String, T>,
}

impl<T> CreatedResources<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn collect(group: &TaskGroup<T>, keys: &[String]) -> Self {
        let members = keys
            .iter()
            .filter_map(|key| group.task_result(key).map(|result| (key.clone(), result)))
            .collect();
        let related = group
            .keys()
            .into_iter()
            .filter(|key| !keys.iter().any(|member| member == key))
            .filter_map(|key| group.task_result(key).map(|result| (key.to_string(), result)))
            .collect();
        Self { members, related }
    }
}

impl<T> CreatedResources<T> {
    pub fn get(&self, key: &str) -> Option<&T> {
        self.members
            .iter()
            .find(|(member, _)| member == key)
            .map(|(_, result)| result)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|(key, _)| key.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.members.iter().map(|(_, result)| result)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.members
            .iter()
            .map(|(key, result)| (key.as_str(), result))
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// A dependency created on behalf of a member
    pub fn created_related_resource(&self, key: &str) -> Option<&T> {
        self.related.get(key)
    }
}
