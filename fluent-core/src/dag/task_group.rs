use crate::common::{CompositeError, ManagementError, Result, TaskFailure};
use crate::dag::task_item::{CompletedTask, PendingOperation, TaskContext, TaskItem};
use dashmap::DashMap;
use futures::future::{self, BoxFuture};
use futures::stream::{self, BoxStream, FuturesUnordered, StreamExt};
use petgraph::Direction;
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

/// Work scheduled to run once the group it is attached to has succeeded.
///
/// Implemented by [`TaskGroup`] and by external child resource collections in
/// post-run mode, so either can follow a parent of a different result type.
pub trait PostRunDependent: Send + Sync {
    /// Key used when reporting on this dependent
    fn key(&self) -> &str;

    /// Run the dependent, returning every failure it produced
    fn run_post(&self) -> BoxFuture<'static, Vec<TaskFailure>>;
}

enum NodeKind<T> {
    Item(Arc<dyn TaskItem<T>>),
    /// Placeholder with no work of its own, completes once its dependencies do
    Synthetic,
}

impl<T> Clone for NodeKind<T> {
    fn clone(&self) -> Self {
        match self {
            NodeKind::Item(item) => NodeKind::Item(Arc::clone(item)),
            NodeKind::Synthetic => NodeKind::Synthetic,
        }
    }
}

struct TaskNode<T> {
    key: String,
    kind: NodeKind<T>,
}

impl<T> Clone for TaskNode<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            kind: self.kind.clone(),
        }
    }
}

/// A graph of [`TaskItem`]s connected by dependency edges, driven from one root.
///
/// Edges run from a dependency to its dependent. Adding an edge that would
/// close a cycle is rejected with [`ManagementError::CycleDetected`], so the
/// graph handed to the scheduler is always acyclic.
///
/// Execution starts every task whose dependencies have all completed, runs
/// unrelated tasks concurrently, and keeps going after a failure: only the
/// transitive dependents of a failed task are skipped. Failures are reported
/// together once all reachable work has been attempted.
///
/// Results are stored per key and shared between clones of the group, and
/// with every group merged into it. A task whose key already has a result is
/// not executed again.
pub struct TaskGroup<T> {
    root: NodeIndex,
    graph: DiGraph<TaskNode<T>, ()>,
    index: HashMap<String, NodeIndex>,
    results: Arc<DashMap<String, T>>,
    pending: Arc<DashMap<String, PendingOperation>>,
    merged: Vec<MergedState<T>>,
    post_run: Vec<(NodeIndex, Arc<dyn PostRunDependent>)>,
}

impl<T> Clone for TaskGroup<T> {
    fn clone(&self) -> Self {
        Self {
            root: self.root,
            graph: self.graph.clone(),
            index: self.index.clone(),
            results: Arc::clone(&self.results),
            pending: Arc::clone(&self.pending),
            merged: self.merged.clone(),
            post_run: self.post_run.clone(),
        }
    }
}

/// Result and pending maps of a group merged into another one.
///
/// Its pending map holds an entry for every task of that group, which is how
/// the keys it tracks are recognised.
struct MergedState<T> {
    results: Arc<DashMap<String, T>>,
    pending: Arc<DashMap<String, PendingOperation>>,
}

impl<T> Clone for MergedState<T> {
    fn clone(&self) -> Self {
        Self {
            results: Arc::clone(&self.results),
            pending: Arc::clone(&self.pending),
        }
    }
}

impl<T> fmt::Debug for TaskGroup<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGroup")
            .field("root", &self.graph[self.root].key)
            .field("tasks", &self.graph.node_count())
            .field("edges", &self.graph.edge_count())
            .field("post_run", &self.post_run.len())
            .finish()
    }
}

impl<T> TaskGroup<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a group rooted at `item`
    pub fn new(item: impl TaskItem<T> + 'static) -> Self {
        Self::with_root(Arc::new(item))
    }

    pub fn with_root(item: Arc<dyn TaskItem<T>>) -> Self {
        let key = item.key().to_string();
        let operation = item.pending_operation();
        let mut group = Self::empty();
        group.root = group.insert_node(key.clone(), NodeKind::Item(item));
        group.pending.insert(key, operation);
        group
    }

    /// Create a group whose root does no work of its own
    pub fn synthetic(key: impl Into<String>) -> Self {
        let key = key.into();
        let mut group = Self::empty();
        group.root = group.insert_node(key.clone(), NodeKind::Synthetic);
        group.pending.insert(key, PendingOperation::None);
        group
    }

    fn empty() -> Self {
        Self {
            root: NodeIndex::new(0),
            graph: DiGraph::new(),
            index: HashMap::new(),
            results: Arc::new(DashMap::new()),
            pending: Arc::new(DashMap::new()),
            merged: Vec::new(),
            post_run: Vec::new(),
        }
    }

    fn insert_node(&mut self, key: String, kind: NodeKind<T>) -> NodeIndex {
        let idx = self.graph.add_node(TaskNode {
            key: key.clone(),
            kind,
        });
        self.index.insert(key, idx);
        idx
    }

    pub fn root_key(&self) -> &str {
        &self.graph[self.root].key
    }

    /// Register `item` as a dependency of the root and return its key.
    ///
    /// An item whose key is already in the graph is not added twice; the
    /// existing node gains the edge instead.
    ///
    /// # Errors
    ///
    /// Returns [`ManagementError::CycleDetected`] if the item is the root itself.
    pub fn add_dependency(&mut self, item: impl TaskItem<T> + 'static) -> Result<String> {
        self.add_shared_dependency(Arc::new(item))
    }

    pub fn add_shared_dependency(&mut self, item: Arc<dyn TaskItem<T>>) -> Result<String> {
        let key = item.key().to_string();
        let idx = match self.index.get(&key) {
            Some(&idx) => idx,
            None => {
                let operation = item.pending_operation();
                self.pending.insert(key.clone(), operation);
                self.insert_node(key.clone(), NodeKind::Item(item))
            }
        };
        connect(&mut self.graph, idx, self.root)?;
        Ok(key)
    }

    /// Merge `group` into this graph and make its root a dependency of this root.
    ///
    /// Nodes are matched by key, so a task shared by both graphs runs once.
    /// Completed results and post-run dependents of `group` are carried over.
    /// The state of `group` stays linked to this one: tasks executed here are
    /// recorded in `group` and its clones, and tasks `group` executes on its
    /// own are not run again here. Nothing is changed if the merge would
    /// create a cycle.
    pub fn add_dependency_group(&mut self, group: TaskGroup<T>) -> Result<String> {
        let mut graph = self.graph.clone();
        let mut index = self.index.clone();
        let mut mapping = HashMap::with_capacity(group.graph.node_count());

        for idx in group.graph.node_indices() {
            let node = &group.graph[idx];
            let target = match index.get(&node.key) {
                Some(&existing) => existing,
                None => {
                    let new_idx = graph.add_node(node.clone());
                    index.insert(node.key.clone(), new_idx);
                    new_idx
                }
            };
            mapping.insert(idx, target);
        }

        for edge in group.graph.raw_edges() {
            connect(&mut graph, mapping[&edge.source()], mapping[&edge.target()])?;
        }
        let dependency_root = mapping[&group.root];
        connect(&mut graph, dependency_root, self.root)?;

        self.graph = graph;
        self.index = index;
        // Collected first: both groups may share the same maps
        let results: Vec<(String, T)> = group
            .results
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        for (key, value) in results {
            self.results.entry(key).or_insert(value);
        }
        let pending: Vec<(String, PendingOperation)> = group
            .pending
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        for (key, operation) in pending {
            self.pending.entry(key).or_insert(operation);
        }
        self.link(MergedState {
            results: Arc::clone(&group.results),
            pending: Arc::clone(&group.pending),
        });
        for state in group.merged {
            self.link(state);
        }
        for (anchor, dependent) in group.post_run {
            self.post_run.push((mapping[&anchor], dependent));
        }

        Ok(group.graph[group.root].key.clone())
    }

    fn link(&mut self, state: MergedState<T>) {
        let known = Arc::ptr_eq(&state.results, &self.results)
            || self
                .merged
                .iter()
                .any(|linked| Arc::ptr_eq(&linked.results, &state.results));
        if !known {
            self.merged.push(state);
        }
    }

    /// Declare that `dependent` needs `dependency`, both already in the graph
    pub fn add_dependency_edge(&mut self, dependent: &str, dependency: &str) -> Result<()> {
        let to = self.node(dependent)?;
        let from = self.node(dependency)?;
        connect(&mut self.graph, from, to)
    }

    /// Schedule `dependent` to run after this group's root succeeded
    pub fn add_post_run_dependent(&mut self, dependent: impl PostRunDependent + 'static) {
        self.add_shared_post_run_dependent(Arc::new(dependent));
    }

    pub fn add_shared_post_run_dependent(&mut self, dependent: Arc<dyn PostRunDependent>) {
        log::debug!(
            "Task {} will be followed by {}",
            self.root_key(),
            dependent.key()
        );
        self.post_run.push((self.root, dependent));
    }

    fn node(&self, key: &str) -> Result<NodeIndex> {
        self.index
            .get(key)
            .copied()
            .ok_or_else(|| ManagementError::not_found("Task", key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Keys of every task in the order they were added
    pub fn keys(&self) -> Vec<&str> {
        self.graph
            .node_indices()
            .map(|idx| self.graph[idx].key.as_str())
            .collect()
    }

    /// Direct dependencies of `key`
    pub fn dependency_keys(&self, key: &str) -> Vec<&str> {
        let Some(&idx) = self.index.get(key) else {
            return Vec::new();
        };
        let mut keys: Vec<_> = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .map(|dep| self.graph[dep].key.as_str())
            .collect();
        keys.reverse();
        keys
    }

    pub fn post_run_count(&self) -> usize {
        self.post_run.len()
    }

    /// Result of a completed task
    pub fn task_result(&self, key: &str) -> Option<T> {
        self.results.get(key).map(|entry| entry.value().clone())
    }

    /// Operation a task is still waiting to perform; `None` once it executed
    pub fn pending_operation(&self, key: &str) -> Option<PendingOperation> {
        self.pending.get(key).map(|entry| *entry.value())
    }

    /// Run the graph to completion and report what happened
    pub async fn execute(&self) -> Execution<T> {
        let schedule = self.schedule();
        let mut completed = Vec::new();
        let report = schedule.run(|task| completed.push(task)).await;

        Execution {
            root_result: self.task_result(self.root_key()),
            completed,
            skipped: report.skipped,
            failures: report.failures,
        }
    }

    /// Run the graph and return the root's result.
    ///
    /// # Errors
    ///
    /// Returns [`ManagementError::Composite`] if any task failed, or
    /// [`ManagementError::InvalidState`] if the root produces no value.
    pub async fn execute_root(&self) -> Result<T> {
        let execution = self.execute().await;
        if !execution.failures.is_empty() {
            return Err(execution.failures.into());
        }
        execution.root_result.ok_or_else(|| {
            ManagementError::InvalidState(format!(
                "Task group root '{}' produced no result",
                self.root_key()
            ))
        })
    }

    /// Run the graph, yielding each task as it completes.
    ///
    /// The stream ends with a single `Err` carrying every failure if anything
    /// failed. Nothing runs until the stream is polled.
    pub fn execute_stream(&self) -> BoxStream<'static, Result<CompletedTask<T>, CompositeError>> {
        let schedule = self.schedule();
        let (tx, rx) = flume::unbounded();

        let driver = async move {
            let report = schedule
                .run(|task| {
                    let _ = tx.send(Ok(task));
                })
                .await;
            if !report.failures.is_empty() {
                let _ = tx.send(Err(report.failures));
            }
        };
        let driver = stream::once(driver)
            .filter_map(|()| future::ready(None::<Result<CompletedTask<T>, CompositeError>>));

        stream::select(rx.into_stream(), driver).boxed()
    }

    fn schedule(&self) -> Schedule<T> {
        let count = self.graph.node_count();
        let mut keys = Vec::with_capacity(count);
        let mut kinds = Vec::with_capacity(count);
        let mut dependents = Vec::with_capacity(count);
        let mut in_degree = Vec::with_capacity(count);

        for idx in self.graph.node_indices() {
            let node = &self.graph[idx];
            keys.push(node.key.clone());
            kinds.push(node.kind.clone());
            let mut next: Vec<usize> = self
                .graph
                .neighbors_directed(idx, Direction::Outgoing)
                .map(NodeIndex::index)
                .collect();
            next.reverse();
            dependents.push(next);
            in_degree.push(
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .count(),
            );
        }

        Schedule {
            keys,
            kinds,
            dependents,
            in_degree,
            results: Arc::clone(&self.results),
            pending: Arc::clone(&self.pending),
            merged: self.merged.clone(),
            post_run: self
                .post_run
                .iter()
                .map(|(anchor, dependent)| (anchor.index(), Arc::clone(dependent)))
                .collect(),
        }
    }
}

impl<T> PostRunDependent for TaskGroup<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn key(&self) -> &str {
        self.root_key()
    }

    fn run_post(&self) -> BoxFuture<'static, Vec<TaskFailure>> {
        let schedule = self.schedule();
        Box::pin(async move { schedule.run(|_| {}).await.failures.into_failures() })
    }
}

/// Add `from -> to` unless it exists already or would close a cycle
fn connect<T>(graph: &mut DiGraph<TaskNode<T>, ()>, from: NodeIndex, to: NodeIndex) -> Result<()> {
    if graph.find_edge(from, to).is_some() {
        return Ok(());
    }
    if from == to || has_path_connecting(&*graph, to, from, None) {
        return Err(ManagementError::CycleDetected {
            dependent: graph[to].key.clone(),
            dependency: graph[from].key.clone(),
        });
    }
    graph.add_edge(from, to, ());
    Ok(())
}

/// Outcome of [`TaskGroup::execute`]
#[derive(Debug)]
pub struct Execution<T> {
    completed: Vec<CompletedTask<T>>,
    skipped: Vec<String>,
    failures: CompositeError,
    root_result: Option<T>,
}

impl<T> Execution<T> {
    /// Tasks that ran successfully, in completion order
    pub fn completed(&self) -> &[CompletedTask<T>] {
        &self.completed
    }

    /// Tasks never started because a dependency failed
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    pub fn failures(&self) -> &CompositeError {
        &self.failures
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn root_result(&self) -> Option<&T> {
        self.root_result.as_ref()
    }

    pub fn into_result(self) -> Result<Vec<CompletedTask<T>>, CompositeError> {
        self.failures.into_result()?;
        Ok(self.completed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Waiting,
    Running,
    Completed,
    Failed,
}

struct RunReport {
    skipped: Vec<String>,
    failures: CompositeError,
}

/// Owned snapshot of a graph, detached from the group so it can run in a
/// `'static` future.
struct Schedule<T> {
    keys: Vec<String>,
    kinds: Vec<NodeKind<T>>,
    dependents: Vec<Vec<usize>>,
    in_degree: Vec<usize>,
    results: Arc<DashMap<String, T>>,
    pending: Arc<DashMap<String, PendingOperation>>,
    merged: Vec<MergedState<T>>,
    post_run: Vec<(usize, Arc<dyn PostRunDependent>)>,
}

impl<T> Schedule<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn run<F>(self, mut on_completed: F) -> RunReport
    where
        F: FnMut(CompletedTask<T>) + Send,
    {
        let count = self.keys.len();
        let mut remaining = self.in_degree.clone();
        let mut state = vec![NodeState::Waiting; count];
        let mut failures = CompositeError::default();
        let mut ready: VecDeque<usize> = (0..count).filter(|&i| remaining[i] == 0).collect();
        let mut running = FuturesUnordered::new();

        loop {
            while let Some(i) = ready.pop_front() {
                let key = &self.keys[i];
                let already_done = self.results.contains_key(key) || self.adopt(key);
                match &self.kinds[i] {
                    NodeKind::Item(item) if !already_done => {
                        log::debug!("Starting task {key}");
                        state[i] = NodeState::Running;
                        let item = Arc::clone(item);
                        let context = TaskContext::new(key.clone(), Arc::clone(&self.results));
                        running.push(async move {
                            let outcome = item.execute(&context).await;
                            (i, outcome)
                        });
                    }
                    _ => {
                        state[i] = NodeState::Completed;
                        self.release(i, &mut remaining, &mut ready);
                    }
                }
            }

            let Some((i, outcome)) = running.next().await else {
                break;
            };
            let key = &self.keys[i];
            self.record(key, outcome.as_ref().ok());

            match outcome {
                Ok(value) => {
                    log::debug!("Task {key} completed");
                    state[i] = NodeState::Completed;
                    on_completed(CompletedTask {
                        key: key.clone(),
                        result: value,
                    });
                    self.release(i, &mut remaining, &mut ready);
                }
                Err(error) => {
                    log::warn!("Task {key} failed: {error}");
                    state[i] = NodeState::Failed;
                    failures.push(TaskFailure::new(key.clone(), error));
                }
            }
        }

        let skipped: Vec<String> = (0..count)
            .filter(|&i| state[i] == NodeState::Waiting)
            .map(|i| self.keys[i].clone())
            .collect();
        for key in &skipped {
            log::debug!("Skipped task {key}: a dependency failed");
        }

        let post_run: Vec<_> = self
            .post_run
            .iter()
            .filter(|(anchor, dependent)| {
                let succeeded = state[*anchor] == NodeState::Completed;
                if !succeeded {
                    log::debug!(
                        "Not running {} since {} did not complete",
                        dependent.key(),
                        self.keys[*anchor]
                    );
                }
                succeeded
            })
            .map(|(_, dependent)| dependent.run_post())
            .collect();
        for post_failures in future::join_all(post_run).await {
            failures.extend(post_failures);
        }

        RunReport { skipped, failures }
    }

    /// Reuse a result a merged group produced while running on its own
    fn adopt(&self, key: &str) -> bool {
        let found = self
            .merged
            .iter()
            .find_map(|state| state.results.get(key).map(|entry| entry.value().clone()));
        let Some(value) = found else {
            return false;
        };
        log::debug!("Task {key} already completed in a merged group");
        self.results.insert(key.to_string(), value);
        self.pending.insert(key.to_string(), PendingOperation::None);
        true
    }

    /// Mark `key` as executed here and in every merged group that has it
    fn record(&self, key: &str, value: Option<&T>) {
        self.pending.insert(key.to_string(), PendingOperation::None);
        if let Some(value) = value {
            self.results.insert(key.to_string(), value.clone());
        }
        for state in &self.merged {
            if !state.pending.contains_key(key) {
                continue;
            }
            state.pending.insert(key.to_string(), PendingOperation::None);
            if let Some(value) = value {
                state.results.insert(key.to_string(), value.clone());
            }
        }
    }

    fn release(&self, i: usize, remaining: &mut [usize], ready: &mut VecDeque<usize>) {
        for &dependent in &self.dependents[i] {
            remaining[dependent] -= 1;
            if remaining[dependent] == 0 {
                ready.push_back(dependent);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Step {
        key: String,
        fail: bool,
        log: Arc<Mutex<Vec<String>>>,
        runs: Arc<AtomicUsize>,
    }

    impl Step {
        fn new(key: &str, log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                key: key.to_string(),
                fail: false,
                log: Arc::clone(log),
                runs: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }
    }

    #[async_trait]
    impl TaskItem<String> for Step {
        fn key(&self) -> &str {
            &self.key
        }

        async fn execute(&self, context: &TaskContext<String>) -> Result<String> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.log.lock().unwrap().push(self.key.clone());
            if self.fail {
                return Err(ManagementError::ResourceOperation(format!(
                    "{} exploded",
                    self.key
                )));
            }
            Ok(format!("{}-done", context.key()))
        }
    }

    fn new_log() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn test_dependencies_run_before_root() {
        let log = new_log();
        let mut group = TaskGroup::new(Step::new("root", &log));
        group.add_dependency(Step::new("a", &log)).unwrap();
        group.add_dependency(Step::new("b", &log)).unwrap();

        let result = group.execute_root().await.unwrap();

        assert_eq!(result, "root-done");
        let order = log.lock().unwrap().clone();
        assert_eq!(order.last().map(String::as_str), Some("root"));
        assert_eq!(group.task_result("a").as_deref(), Some("a-done"));
        assert_eq!(group.pending_operation("a"), Some(PendingOperation::None));
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_only() {
        let log = new_log();
        let mut group = TaskGroup::synthetic("batch");
        group.add_dependency(Step::new("ok", &log)).unwrap();
        group.add_dependency(Step::new("bad", &log).failing()).unwrap();
        group.add_dependency(Step::new("after-bad", &log)).unwrap();
        group.add_dependency_edge("after-bad", "bad").unwrap();

        let execution = group.execute().await;

        assert!(!execution.is_success());
        assert_eq!(execution.failures().failed_keys(), vec!["bad"]);
        assert_eq!(execution.skipped(), &["batch".to_string(), "after-bad".to_string()]);
        assert_eq!(group.task_result("ok").as_deref(), Some("ok-done"));
        assert!(group.task_result("after-bad").is_none());
        assert_eq!(
            group.pending_operation("after-bad"),
            Some(PendingOperation::ToBeCreated)
        );
    }

    #[test]
    fn test_cycle_is_rejected() {
        let log = new_log();
        let mut group = TaskGroup::new(Step::new("root", &log));
        group.add_dependency(Step::new("a", &log)).unwrap();
        group.add_dependency(Step::new("b", &log)).unwrap();
        group.add_dependency_edge("a", "b").unwrap();

        let error = group.add_dependency_edge("b", "a").unwrap_err();
        assert!(matches!(
            error,
            ManagementError::CycleDetected { ref dependent, ref dependency }
                if dependent == "b" && dependency == "a"
        ));
        assert!(matches!(
            group.add_dependency_edge("root", "root"),
            Err(ManagementError::CycleDetected { .. })
        ));
        assert!(matches!(
            group.add_dependency_edge("a", "missing"),
            Err(ManagementError::NotFound { .. })
        ));
    }

    #[test]
    fn test_merge_shares_nodes_by_key() {
        let log = new_log();
        let mut network = TaskGroup::new(Step::new("vnet", &log));
        network.add_dependency(Step::new("rg", &log)).unwrap();

        let mut storage = TaskGroup::new(Step::new("storage", &log));
        storage.add_dependency(Step::new("rg", &log)).unwrap();

        let mut vm = TaskGroup::new(Step::new("vm", &log));
        assert_eq!(vm.add_dependency_group(network).unwrap(), "vnet");
        assert_eq!(vm.add_dependency_group(storage).unwrap(), "storage");

        assert_eq!(vm.len(), 4);
        assert_eq!(vm.dependency_keys("vm"), vec!["vnet", "storage"]);
        assert_eq!(vm.dependency_keys("storage"), vec!["rg"]);
    }

    #[tokio::test]
    async fn test_merged_group_sees_results_executed_by_parent() {
        let log = new_log();
        let mut network = TaskGroup::new(Step::new("vnet", &log));
        network.add_dependency(Step::new("rg", &log)).unwrap();
        let handle = network.clone();

        let mut vm = TaskGroup::new(Step::new("vm", &log));
        vm.add_dependency_group(network).unwrap();
        vm.execute().await.into_result().unwrap();

        assert_eq!(handle.task_result("vnet"), Some("vnet-done".to_string()));
        assert_eq!(handle.pending_operation("rg"), Some(PendingOperation::None));
        assert_eq!(handle.task_result("vm"), None);
        assert!(handle.execute().await.completed().is_empty());
        assert_eq!(*log.lock().unwrap(), vec!["rg", "vnet", "vm"]);
    }

    #[tokio::test]
    async fn test_parent_reuses_results_of_merged_group() {
        let log = new_log();
        let mut network = TaskGroup::new(Step::new("vnet", &log));
        network.add_dependency(Step::new("rg", &log)).unwrap();
        let handle = network.clone();

        let mut vm = TaskGroup::new(Step::new("vm", &log));
        vm.add_dependency_group(network).unwrap();
        handle.execute().await.into_result().unwrap();

        let execution = vm.execute().await;

        assert!(execution.is_success());
        assert_eq!(execution.completed().len(), 1);
        assert_eq!(vm.task_result("rg"), Some("rg-done".to_string()));
        assert_eq!(*log.lock().unwrap(), vec!["rg", "vnet", "vm"]);
    }

    #[test]
    fn test_failed_merge_leaves_graph_unchanged() {
        let log = new_log();
        let mut inner = TaskGroup::new(Step::new("a", &log));
        inner.add_dependency(Step::new("outer", &log)).unwrap();

        let mut outer = TaskGroup::new(Step::new("outer", &log));
        assert!(matches!(
            outer.add_dependency_group(inner),
            Err(ManagementError::CycleDetected { .. })
        ));
        assert_eq!(outer.keys(), vec!["outer"]);
    }

    #[tokio::test]
    async fn test_completed_tasks_are_not_rerun() {
        let log = new_log();
        let shared = Step::new("a", &log);
        let runs = Arc::clone(&shared.runs);
        let mut group = TaskGroup::new(Step::new("root", &log));
        group.add_dependency(shared).unwrap();

        group.execute().await.into_result().unwrap();
        let second = group.execute().await;

        assert!(second.is_success());
        assert!(second.completed().is_empty());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_post_run_dependent_follows_successful_root() {
        let log = new_log();
        let mut parent = TaskGroup::new(Step::new("account", &log));
        parent.add_post_run_dependent(TaskGroup::new(Step::new("pool", &log)));

        parent.execute().await.into_result().unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["account", "pool"]);
    }

    #[tokio::test]
    async fn test_post_run_dependent_skipped_when_root_fails() {
        let log = new_log();
        let mut parent = TaskGroup::new(Step::new("account", &log).failing());
        parent.add_post_run_dependent(TaskGroup::new(Step::new("pool", &log)));

        let execution = parent.execute().await;

        assert_eq!(execution.failures().failed_keys(), vec!["account"]);
        assert_eq!(*log.lock().unwrap(), vec!["account"]);
    }

    #[tokio::test]
    async fn test_stream_ends_with_composite_error() {
        let log = new_log();
        let mut group = TaskGroup::synthetic("batch");
        group.add_dependency(Step::new("a", &log)).unwrap();
        group.add_dependency(Step::new("c", &log).failing()).unwrap();

        let items: Vec<_> = group.execute_stream().collect().await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().key, "a");
        let error = items[1].as_ref().unwrap_err();
        assert_eq!(error.failed_keys(), vec!["c"]);
    }
}
