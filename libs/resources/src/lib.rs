//! Resource discovery for the membrane gateway.
//!
//! Application resources are found by listing the provider's tagged inventory and
//! indexed by category and logical name. Lookups go through [`ResourceIndex`], which
//! populates itself lazily and all-or-nothing.
#[cfg(feature = "aws")]
pub mod aws;
pub mod category;
pub mod index;
pub mod inventory;
pub mod tags;

#[cfg(feature = "aws")]
pub use aws::TaggingInventory;
pub use category::{ProviderId, ResourceCategory};
pub use index::{
    ApiMode, ApiTarget, HTTP_PROXY_KIND, PAGE_SIZE, ResourceError, ResourceIndex, ResourceRecord,
    Snapshot,
};
pub use inventory::{
    InMemoryInventory, Inventory, InventoryError, InventoryPage, InventoryQuery, TaggedResource,
};
pub use tags::DiscoveryTag;
