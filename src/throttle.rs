//! Vendor call pacing.
//!
//! Two limits apply process-wide: a counting limiter bounds simultaneous
//! document uploads, and every vendor call (uploads included) waits until a
//! minimum spacing has passed since the previous call started.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::error::{IliadError, IliadResult};

#[derive(Debug)]
pub struct CallThrottle {
    uploads: Arc<Semaphore>,
    spacing: Duration,
    last_call: Mutex<Option<Instant>>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl CallThrottle {
    pub fn new(max_concurrent_uploads: usize, spacing: Duration) -> Self {
        Self {
            uploads: Arc::new(Semaphore::new(max_concurrent_uploads)),
            spacing,
            last_call: Mutex::new(None),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait until the minimum spacing since the previous vendor call has passed.
    pub async fn pace(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.spacing {
                tokio::time::sleep(self.spacing - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Take an upload slot. The slot is released when the permit drops.
    pub async fn acquire_upload(&self) -> IliadResult<UploadPermit> {
        let permit = self
            .uploads
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| IliadError::LimiterClosed)?;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        Ok(UploadPermit {
            _permit: permit,
            in_flight: self.in_flight.clone(),
        })
    }

    pub fn in_flight_uploads(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of uploads ever held at once.
    pub fn peak_uploads(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn available_upload_slots(&self) -> usize {
        self.uploads.available_permits()
    }
}

#[derive(Debug)]
pub struct UploadPermit {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for UploadPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
