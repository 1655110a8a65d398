//! DDL ownership: election, the owner-only guard and failover recovery.

pub mod failover;
pub mod guard;
pub mod manager;
pub mod mock;

pub use failover::{FailoverHandler, RecoveryReport, ResumePoint};
pub use guard::{OwnerGuard, OwnershipStatus};
pub use manager::{LeaseOwnerManager, OwnerLease, OwnerManager, OWNER_PARTITION};
pub use mock::MockOwnerManager;
