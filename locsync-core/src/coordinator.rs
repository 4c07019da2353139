//! Serializes every operation that touches shared state.
//!
//! All runs take the same lock, so at most one of them executes at a time.
//! Sync requests go through a queue of depth one: a request made while
//! another is already waiting is dropped, since the waiting run will see
//! its changes anyway.

use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as RunLock, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dates::{self, DayRange};
use crate::error::{SubscriptionError, SyncError};
use crate::reconcile::{ReconcileReport, Reconciler, Trigger};
use crate::source::WebhookChannel;
use crate::subscription::{RenewalOutcome, SubscriptionManager};
use crate::sync::{SyncEngine, SyncSummary};

pub struct Coordinator {
    lock: RunLock<()>,
    queue: mpsc::Sender<()>,
    requests: Mutex<Option<mpsc::Receiver<()>>>,
    sync: SyncEngine,
    reconciler: Arc<Reconciler>,
    subscription: SubscriptionManager,
    /// Days ahead of today kept populated by horizon maintenance
    horizon_days: u32,
}

impl Coordinator {
    pub fn new(
        sync: SyncEngine,
        reconciler: Arc<Reconciler>,
        subscription: SubscriptionManager,
        horizon_days: u32,
    ) -> Self {
        let (queue, requests) = mpsc::channel(1);
        Coordinator {
            lock: RunLock::new(()),
            queue,
            requests: Mutex::new(Some(requests)),
            sync,
            reconciler,
            subscription,
            horizon_days,
        }
    }

    /// Queue a sync. Returns false when one is already waiting.
    pub fn request_sync(&self) -> bool {
        match self.queue.try_send(()) {
            Ok(()) => {
                debug!("Sync requested and queued");
                true
            }
            Err(mpsc::error::TrySendError::Full(())) => {
                debug!("Sync already queued, request dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(())) => {
                warn!("Sync worker has stopped, request dropped");
                false
            }
        }
    }

    /// Start the worker draining the sync queue.
    ///
    /// Runs until `shutdown` becomes true. A sync in progress is finished
    /// first. Returns `None` if a worker was already started.
    pub fn spawn_worker(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        let mut requests = match self.requests.lock() {
            Ok(mut slot) => slot.take()?,
            Err(_) => {
                error!("Sync worker state poisoned");
                return None;
            }
        };
        let coordinator = Arc::clone(self);

        Some(tokio::spawn(async move {
            info!("Sync worker started");
            loop {
                if *shutdown.borrow_and_update() {
                    break;
                }
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    request = requests.recv() => {
                        if request.is_none() {
                            break;
                        }
                        if let Err(e) = coordinator.run_sync().await {
                            error!(error = %e, "Queued sync failed");
                        }
                    }
                }
            }
            info!("Sync worker stopped");
        }))
    }

    pub async fn run_sync(&self) -> Result<SyncSummary, SyncError> {
        let _guard = self.lock.lock().await;
        self.sync.run_sync().await
    }

    pub async fn run_full_sync(&self) -> Result<SyncSummary, SyncError> {
        let _guard = self.lock.lock().await;
        self.sync.run_full_sync().await
    }

    /// Reconcile today through the end of the horizon.
    pub async fn run_horizon_maintenance(&self) -> ReconcileReport {
        let range = DayRange::around(dates::today(), 0, self.horizon_days);
        self.reconcile_range(range, Trigger::Maintenance).await
    }

    pub async fn reconcile_range(&self, range: DayRange, trigger: Trigger) -> ReconcileReport {
        let _guard = self.lock.lock().await;
        info!(from = %range.first, to = %range.last, ?trigger, "Reconciling date range");
        self.reconciler.reconcile(range.days(), trigger).await
    }

    pub async fn renew_channel(&self) -> Result<RenewalOutcome, SubscriptionError> {
        let _guard = self.lock.lock().await;
        self.subscription.renew_if_near_expiry().await
    }

    pub async fn ensure_channel(&self) -> Result<WebhookChannel, SubscriptionError> {
        let _guard = self.lock.lock().await;
        self.subscription.ensure_channel_exists().await
    }

    pub fn stored_channel(&self) -> Option<WebhookChannel> {
        self.subscription.stored_channel()
    }
}
