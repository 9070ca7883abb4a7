//! Caller-side tracking of in-flight correlation IDs.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

/// The set of correlation IDs with a call still awaiting resolution.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    ids: Arc<Mutex<HashSet<String>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `correlation_id` as in flight until the returned guard drops.
    ///
    /// Fails with [`Error::DuplicateCorrelation`] if the ID is already in
    /// flight.
    pub fn begin(&self, correlation_id: &str) -> Result<InFlightGuard> {
        let mut ids = self
            .ids
            .lock()
            .map_err(|_| Error::Storage("in-flight set poisoned".into()))?;
        if !ids.insert(correlation_id.to_string()) {
            return Err(Error::DuplicateCorrelation(correlation_id.to_string()));
        }
        Ok(InFlightGuard {
            ids: Arc::clone(&self.ids),
            id: correlation_id.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.ids.lock().map(|ids| ids.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases its correlation ID when dropped, whether the call resolved,
/// failed, or timed out.
#[derive(Debug)]
pub struct InFlightGuard {
    ids: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl InFlightGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut ids) = self.ids.lock() {
            ids.remove(&self.id);
        }
    }
}
