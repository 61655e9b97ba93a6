// SQLite history store with sqlx

pub mod history;
pub mod models;

pub use history::{HistoryStore, StoreError};
pub use models::{ActionRow, ActionStatus, ExecutionRow, ExecutionStatus, WorkflowStats};
