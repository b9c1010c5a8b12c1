//! Deposit tasks: transfer, status polling and the deposit-status critical
//! interaction shared with sweeps.

mod poll;
mod refresh;
mod task;
mod update;

pub use poll::PollOutcome;
pub use refresh::{DepositStatusRefresher, RefreshOutcome};
pub use task::{DepositJob, DepositTask, DepositTaskContext, DepositTaskReport, DepositTaskState};
pub use update::{DepositUpdate, DepositUpdater, derive_copy_status, verify_deposit_update};
