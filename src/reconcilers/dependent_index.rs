//! Dependent index
//!
//! Answers whether any live dependent still references a parent. Every call
//! is a fresh query against the store; nothing is cached between passes.

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::store::{DependentQuery, ObjectKey, ObjectStore};

/// Matches requested per page; only existence matters
const EXISTENCE_PAGE: u32 = 1;

/// Live reverse lookup from parent to dependents
pub struct DependentIndex {
    store: Arc<dyn ObjectStore>,
}

impl DependentIndex {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Whether at least one dependent references `parent`.
    ///
    /// `false` is only returned after every page has been read; any store
    /// error aborts the scan and is returned as is.
    pub async fn has_dependents(&self, parent: &ObjectKey) -> Result<bool> {
        let mut query = DependentQuery {
            parent: parent.clone(),
            limit: EXISTENCE_PAGE,
            continue_token: None,
        };

        loop {
            let page = self.store.list_dependents(&query).await?;
            if let Some(dependent) = page.items.first() {
                debug!(parent = %parent, dependent = %dependent.key, "Found referencing dependent");
                return Ok(true);
            }
            match page.continue_token {
                Some(token) => query.continue_token = Some(token),
                None => return Ok(false),
            }
        }
    }
}
