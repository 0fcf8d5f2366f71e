//! Per-invoice async mutexes. The orchestrator and reviewer operations take
//! the same lock, so a correction never interleaves with a processing run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Clone, Default)]
pub struct InvoiceLocks {
    inner: Arc<Mutex<HashMap<String, Weak<AsyncMutex<()>>>>>,
}

impl InvoiceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `invoice_id`.
    pub async fn lock(&self, invoice_id: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            // Entries whose guards are all gone are dead weight.
            map.retain(|_, weak| weak.strong_count() > 0);
            match map.get(invoice_id).and_then(Weak::upgrade) {
                Some(existing) => existing,
                None => {
                    let fresh = Arc::new(AsyncMutex::new(()));
                    map.insert(invoice_id.to_string(), Arc::downgrade(&fresh));
                    fresh
                }
            }
        };
        mutex.lock_owned().await
    }

    /// Number of invoices currently locked or awaited.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
