//! Action approval: the automatic pipeline and manual requests.

pub mod auto_approver;
pub mod manager;
pub mod retry;

pub use auto_approver::{ApproveError, AutoApprover};
pub use manager::{ActionError, ActionManager, ActionService};
pub use retry::{RetryConfig, RetryTimer};
