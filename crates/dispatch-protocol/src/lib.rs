//! Dispatch Protocol Types
//!
//! Defines the objects exchanged over the fleet's task feed: task lists,
//! the shared claim table, and claim assertions.

pub mod error;
pub mod message;
pub mod table;
pub mod task;

pub use error::{ErrorCode, ProtocolError};
pub use message::{ClaimAssertion, FeedMessage, TableSync, TaskListAdvertise};
pub use table::{ClaimState, DroneClaim, TaskTable};
pub use task::Task;

/// Object type advertised for task lists.
pub const OBJECT_TYPE_TASKS: &str = "idrone.sync.task";

/// Object type used when syncing the claim table.
pub const OBJECT_TYPE_TABLE: &str = "idrone.sync.table";

/// Object type used for claim assertions.
pub const OBJECT_TYPE_CLAIM: &str = "idrone.sync.claim";
