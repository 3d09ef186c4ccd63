//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `DirectoryHandle`: Lock-free access to the current instrument directory
//! - `SubscriptionManager`: Resolves instruments and maintains the desired set

mod directory;
mod subscription_manager;

pub use directory::DirectoryHandle;
pub use subscription_manager::SubscriptionManager;
