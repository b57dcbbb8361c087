//! Dependency-ordered execution of resource operations.
//!
//! A [`TaskGroup`] holds [`TaskItem`]s and the edges between them. Batches of
//! top-level resources run through a [`CreatableUpdatableResourcesRoot`], and
//! children that are not addressable on their own are tracked by an
//! [`ExternalChildResources`] collection, committed explicitly or after their
//! parent.

pub mod batch;
pub mod external_child;
pub mod task_group;
pub mod task_item;

pub use batch::{CreatableUpdatableResourcesRoot, CreatedResources};
pub use external_child::{
    ChildState, CommitPartitions, ExternalChildResource, ExternalChildResources,
};
pub use task_group::{Execution, PostRunDependent, TaskGroup};
pub use task_item::{CompletedTask, PendingOperation, TaskContext, TaskItem};
