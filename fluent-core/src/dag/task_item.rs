use crate::common::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

/// Operation a task or child resource is waiting to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PendingOperation {
    #[default]
    None,
    ToBeCreated,
    ToBeUpdated,
    ToBeRemoved,
}

impl fmt::Display for PendingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingOperation::None => write!(f, "none"),
            PendingOperation::ToBeCreated => write!(f, "create"),
            PendingOperation::ToBeUpdated => write!(f, "update"),
            PendingOperation::ToBeRemoved => write!(f, "delete"),
        }
    }
}

/// One unit of work in a [`TaskGroup`](super::TaskGroup).
///
/// An item runs once every dependency it was registered with has completed
/// successfully, and produces a value of the group's result type. Results of
/// completed tasks are available through the [`TaskContext`].
///
/// # Examples
///
/// ```no_run
/// use fluent_core::common::Result;
/// use fluent_core::dag::{TaskContext, TaskItem};
/// use async_trait::async_trait;
///
/// struct CreateNetwork;
///
/// #[async_trait]
/// impl TaskItem<String> for CreateNetwork {
///     fn key(&self) -> &str {
///         "vnet1"
///     }
///
///     async fn execute(&self, _context: &TaskContext<String>) -> Result<String> {
///         Ok("/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/vnet1".to_string())
///     }
/// }
/// ```
#[async_trait]
pub trait TaskItem<T>: Send + Sync {
    /// Stable key under which the result is stored
    fn key(&self) -> &str;

    /// Operation this item performs when executed
    fn pending_operation(&self) -> PendingOperation {
        PendingOperation::ToBeCreated
    }

    async fn execute(&self, context: &TaskContext<T>) -> Result<T>;
}

/// Read access to results produced earlier in the same execution.
pub struct TaskContext<T> {
    key: String,
    results: Arc<DashMap<String, T>>,
}

impl<T: Clone> TaskContext<T> {
    pub(crate) fn new(key: String, results: Arc<DashMap<String, T>>) -> Self {
        Self { key, results }
    }

    /// Key of the task being executed
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Result of a completed task, typically one of this task's dependencies
    pub fn task_result(&self, key: &str) -> Option<T> {
        self.results.get(key).map(|entry| entry.value().clone())
    }
}

impl<T> fmt::Debug for TaskContext<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("key", &self.key)
            .field("completed", &self.results.len())
            .finish()
    }
}

/// A task that completed successfully, as emitted by a streaming execution
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedTask<T> {
    pub key: String,
    pub result: T,
}
