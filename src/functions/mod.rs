//! Coordination clients for the cluster-wide services
//!
//! This module contains:
//! - The service contracts (counter, budget, speed) and their handles
//! - The per-task clients built on top of those handles
//! - In-process services for local mode
//! - The factory that builds one client triple per task slot

mod budget;
mod counter;
mod factory;
mod local;
mod speed;
mod traits;

pub use budget::BudgetApplyClient;
pub use counter::{merge_into, CounterClient, CounterSnapshot};
pub use factory::{ClientSet, RemoteClientFactory};
pub use local::{LocalBudgetService, LocalCounterService, LocalSpeedService};
pub use speed::SpeedControlClient;
pub use traits::{
    BudgetHandle, BudgetService, ClientError, ClientResult, CounterHandle, CounterService,
    SpeedHandle, SpeedService,
};
