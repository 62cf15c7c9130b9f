//! Image-storage collaborator interface.
//!
//! The core only ever stores the opaque reference returned by
//! [`ImageStore::store`]; bytes, resizing and file paths belong to the
//! implementation.

use crate::error::TrackerResult;
use crate::models::tenant::TenantId;

pub trait ImageStore: Send + Sync {
    /// Persist raw image bytes and return an opaque reference.
    fn store(
        &self,
        tenant_id: &TenantId,
        bytes: Vec<u8>,
    ) -> impl Future<Output = TrackerResult<String>> + Send;

    /// Release the resource behind a reference returned by `store`.
    fn delete(&self, image_ref: &str) -> impl Future<Output = TrackerResult<()>> + Send;
}
