//! Tenant and datastore identity.
//!
//! Payload stores are scoped to a tenant and one of its datastores. A
//! [`DatastoreKey`] names that pair and is the cache key of the
//! [`PayloadStoreRegistry`](crate::registry::PayloadStoreRegistry).

mod id;

pub use id::{DatastoreId, DatastoreKey, TenantId, DEFAULT_DATASTORE};
