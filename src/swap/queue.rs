//! Phase Queue — the orchestrator.
//!
//! One worker owns the driver and advances the head-of-queue request by one
//! phase per tick:
//!
//!   PENDING/DEPOSITING → WITHDRAWING → SWAPPING → REDEPOSITING
//!                      → READY_TO_WITHDRAW → COMPLETED
//!   (any phase, retries exhausted) → FAILED + compensation
//!
//! At most one executor call is in flight across the whole queue. The
//! custodial wallet signs with a strictly ordered nonce, so the queue is
//! FIFO with head-of-line blocking: a request waiting out its retry delay
//! keeps every request behind it waiting too.
//!
//! Producers (`QueueHandle`) only append to the book; only the driver
//! advances, retires, or removes entries.
//!
//! Calls a phase already sent stay on the request (`submitted_tx`) until the
//! phase completes. Retries confirm them instead of sending again, and a
//! request that fails with calls out is escalated rather than compensated.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy_primitives::Address;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::events::EventBus;
use super::executor::{Journal, PhaseError, PhaseExecutor};
use super::ledger::SharedLedger;
use super::messages::{QueueStatus, SwapEvent};
use super::recovery::{self, RecoveryDecision};
use super::store::SnapshotStore;
use super::types::{Deposit, DepositStatus, InputError, Phase, SwapParams, SwapRequest};

// ─────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Driver wake-up interval. Default: 1s.
    pub tick_interval: Duration,
    /// Fixed delay before the same phase is attempted again. Default: 5s.
    pub retry_delay: Duration,
    /// Attempts per phase before the request fails. Default: 3.
    pub max_retries: u32,
    /// Supervisory timeout around each executor call. Default: none.
    pub call_timeout: Option<Duration>,
    /// Terminal requests kept for status queries. Default: 256.
    pub history_limit: usize,
    /// EventBus buffer per subscriber. Default: 1024.
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            retry_delay: Duration::from_secs(5),
            max_retries: 3,
            call_timeout: None,
            history_limit: 256,
            event_capacity: 1024,
        }
    }
}

impl QueueConfig {
    /// Load overrides from environment variables (if set).
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("SWAP_TICK_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                cfg.tick_interval = Duration::from_millis(ms.max(1));
            }
        }
        if let Ok(v) = std::env::var("SWAP_RETRY_DELAY_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                cfg.retry_delay = Duration::from_millis(ms);
            }
        }
        if let Ok(v) = std::env::var("SWAP_MAX_RETRIES") {
            if let Ok(n) = v.parse::<u32>() {
                cfg.max_retries = n.max(1);
            }
        }
        if let Ok(v) = std::env::var("SWAP_CALL_TIMEOUT_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                cfg.call_timeout = (ms > 0).then(|| Duration::from_millis(ms));
            }
        }
        if let Ok(v) = std::env::var("SWAP_HISTORY_LIMIT") {
            if let Ok(n) = v.parse::<usize>() {
                cfg.history_limit = n;
            }
        }
        if let Ok(v) = std::env::var("SWAP_EVENT_CAPACITY") {
            if let Ok(n) = v.parse::<usize>() {
                cfg.event_capacity = n.max(1);
            }
        }
        cfg
    }
}

// ─────────────────────────────────────────────────────────
// Shared book
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct QueueEntry {
    request: SwapRequest,
    /// Retry scheduled; the driver skips the head until then.
    not_before: Option<Instant>,
    in_flight: bool,
}

impl QueueEntry {
    fn new(request: SwapRequest) -> Self {
        Self {
            request,
            not_before: None,
            in_flight: false,
        }
    }
}

#[derive(Debug, Default)]
struct QueueBook {
    active: VecDeque<QueueEntry>,
    history: VecDeque<SwapRequest>,
    /// Changed since the last snapshot was written.
    dirty: bool,
}

impl QueueBook {
    fn all_requests(&self) -> Vec<SwapRequest> {
        self.active
            .iter()
            .map(|e| e.request.clone())
            .chain(self.history.iter().cloned())
            .collect()
    }
}

// ─────────────────────────────────────────────────────────
// Handle (API layer → queue)
// ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct QueueHandle {
    book: Arc<RwLock<QueueBook>>,
    bus: EventBus,
    max_retries: u32,
}

impl QueueHandle {
    /// Validates a raw submission and enqueues it.
    pub async fn submit(&self, params: SwapParams) -> Result<SwapRequest, InputError> {
        let request = SwapRequest::new(params, self.max_retries)?;
        self.enqueue(request.clone()).await;
        Ok(request)
    }

    /// Appends a request to the tail. Terminal requests are ignored.
    pub async fn enqueue(&self, request: SwapRequest) -> bool {
        if request.phase.is_terminal() {
            warn!(
                "🚫 Refusing to enqueue {} already in {}",
                request.short_id(),
                request.phase
            );
            return false;
        }
        let mut book = self.book.write().await;
        info!(
            "📥 Enqueued {} {} {} → {} (position {})",
            request.short_id(),
            request.amount,
            request.from_token,
            request.to_token,
            book.active.len() + 1,
        );
        book.active.push_back(QueueEntry::new(request));
        book.dirty = true;
        true
    }

    pub async fn get_by_id(&self, id: Uuid) -> Option<SwapRequest> {
        let book = self.book.read().await;
        book.active
            .iter()
            .map(|e| &e.request)
            .chain(book.history.iter())
            .find(|r| r.id == id)
            .cloned()
    }

    pub async fn get_by_owner(&self, owner: Address) -> Vec<SwapRequest> {
        let book = self.book.read().await;
        book.active
            .iter()
            .map(|e| &e.request)
            .chain(book.history.iter())
            .filter(|r| r.user_address == owner)
            .cloned()
            .collect()
    }

    pub async fn queue_status(&self) -> QueueStatus {
        let book = self.book.read().await;
        let head = book.active.front();
        QueueStatus {
            length: book.active.len(),
            busy: head.is_some_and(|e| e.in_flight || e.not_before.is_some()),
            head_request_id: head.map(|e| e.request.id),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SwapEvent> {
        self.bus.subscribe()
    }
}

// ─────────────────────────────────────────────────────────
// Driver
// ─────────────────────────────────────────────────────────

pub struct PhaseQueue {
    cfg: QueueConfig,
    executor: Arc<dyn PhaseExecutor>,
    ledger: SharedLedger,
    bus: EventBus,
    store: Option<Arc<dyn SnapshotStore>>,
    book: Arc<RwLock<QueueBook>>,
}

impl PhaseQueue {
    pub fn new(
        cfg: QueueConfig,
        executor: Arc<dyn PhaseExecutor>,
        ledger: SharedLedger,
        bus: EventBus,
    ) -> (Self, QueueHandle) {
        let book = Arc::new(RwLock::new(QueueBook::default()));
        let handle = QueueHandle {
            book: book.clone(),
            bus: bus.clone(),
            max_retries: cfg.max_retries,
        };
        let queue = Self {
            cfg,
            executor,
            ledger,
            bus,
            store: None,
            book,
        };
        (queue, handle)
    }

    /// Write-through persistence after every transition, and on the next
    /// tick after an enqueue.
    pub fn with_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Reloads persisted requests: non-terminal ones resume in arrival order
    /// from their recorded phase, terminal ones go to history.
    pub async fn restore(&self, mut requests: Vec<SwapRequest>) -> usize {
        requests.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let mut book = self.book.write().await;
        let mut resumed = 0;
        for request in requests {
            if request.phase.is_terminal() {
                book.history.push_back(request);
            } else {
                info!("♻️ Resuming {} at {}", request.short_id(), request.phase);
                book.active.push_back(QueueEntry::new(request));
                resumed += 1;
            }
        }
        while book.history.len() > self.cfg.history_limit {
            book.history.pop_front();
        }
        resumed
    }

    /// Production loop. Ends when `shutdown` flips to true or its sender drops.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "🧭 PhaseQueue started | tick={:?} retry_delay={:?} max_retries={} call_timeout={:?}",
            self.cfg.tick_interval, self.cfg.retry_delay, self.cfg.max_retries, self.cfg.call_timeout,
        );

        let mut ticker = tokio::time::interval(self.cfg.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(Instant::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let remaining = self.book.read().await.active.len();
        info!("🧭 PhaseQueue shutting down | {} request(s) still queued", remaining);
    }

    /// One driver step for the head request. Returns false when there was
    /// nothing to do (empty queue or retry delay still pending).
    pub async fn tick(&mut self, now: Instant) -> bool {
        let Some(mut request) = self.claim_head(now).await else {
            if self.book.read().await.dirty {
                self.persist().await;
            }
            return false;
        };

        let phase = request.phase;
        match phase {
            Phase::Pending | Phase::Depositing => {
                self.advance(&mut request, None);
                self.replace_head(request).await;
            }
            Phase::ReadyToWithdraw => {
                self.advance(&mut request, None);
                info!("🏁 {} completed", request.short_id());
                self.retire_head(request.clone()).await;
                self.bus.publish(SwapEvent::RequestCompleted { request });
            }
            p if p.has_side_effect() => {
                match self.execute_phase(&mut request).await {
                    Ok(()) => {
                        self.advance(&mut request, Some(phase));
                        self.replace_head(request).await;
                    }
                    Err(e) => self.on_failure(request, phase, e, now).await,
                }
            }
            _ => {
                warn!("🧹 Dropping terminal {} from active queue", request.short_id());
                self.retire_head(request).await;
            }
        }

        self.persist().await;
        true
    }

    async fn claim_head(&self, now: Instant) -> Option<SwapRequest> {
        let mut book = self.book.write().await;
        let head = book.active.front_mut()?;
        if let Some(at) = head.not_before {
            if now < at {
                debug!(
                    "⏳ Head {} waiting {:?} before retry",
                    head.request.short_id(),
                    at - now
                );
                return None;
            }
        }
        head.not_before = None;
        head.in_flight = true;
        Some(head.request.clone())
    }

    async fn replace_head(&self, request: SwapRequest) {
        self.update_head(request, None).await;
    }

    async fn update_head(&self, request: SwapRequest, not_before: Option<Instant>) {
        let mut book = self.book.write().await;
        match book.active.front_mut() {
            Some(head) if head.request.id == request.id => {
                head.request = request;
                head.not_before = not_before;
                head.in_flight = false;
            }
            _ => error!("🚨 Head moved under driver for {}", request.short_id()),
        }
    }

    async fn retire_head(&self, request: SwapRequest) {
        let mut book = self.book.write().await;
        if book.active.front().is_some_and(|h| h.request.id == request.id) {
            book.active.pop_front();
        }
        Self::record_history(&mut book, request, self.cfg.history_limit);
    }

    fn record_history(book: &mut QueueBook, request: SwapRequest, limit: usize) {
        if let Some(slot) = book.history.iter_mut().find(|r| r.id == request.id) {
            *slot = request;
            return;
        }
        book.history.push_back(request);
        while book.history.len() > limit {
            book.history.pop_front();
        }
    }

    fn advance(&self, request: &mut SwapRequest, completed: Option<Phase>) {
        if let Some(done) = completed {
            self.bus.publish(SwapEvent::PhaseCompleted {
                phase: done,
                request: request.clone(),
            });
        }
        if let Some((from, to)) = request.advance() {
            info!("➡️ {} {} → {}", request.short_id(), from, to);
            self.bus.publish(SwapEvent::PhaseAdvanced {
                from,
                to,
                request: request.clone(),
            });
        }
    }

    // ─────────────────────────────────────────────────
    // Phase execution
    // ─────────────────────────────────────────────────

    async fn call<T>(&self, fut: impl Future<Output = Result<T, PhaseError>>) -> Result<T, PhaseError> {
        match self.cfg.call_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| PhaseError::Transient(format!("call exceeded {:?}", limit)))?,
            None => fut.await,
        }
    }

    /// Keeps whatever the attempt sent on the request, so a retry confirms
    /// it instead of sending again. An attempt cut off inside the wallet's
    /// submit leaves the outcome unknown.
    fn settle<T>(
        request: &mut SwapRequest,
        journal: &Journal,
        result: Result<T, PhaseError>,
    ) -> Result<T, PhaseError> {
        request.submitted_tx = journal.take();
        match result {
            Err(e) if journal.in_doubt() => Err(PhaseError::Unknown(format!(
                "{} cut off while submitting: {}",
                request.phase, e
            ))),
            other => other,
        }
    }

    async fn execute_phase(&self, request: &mut SwapRequest) -> Result<(), PhaseError> {
        match request.phase {
            Phase::Withdrawing => self.run_withdraw(request).await,
            Phase::Swapping => self.run_trade(request).await,
            Phase::Redepositing => self.run_redeposit(request).await,
            other => Err(PhaseError::Rejected(format!("{} has no side effect", other))),
        }
    }

    async fn run_withdraw(&self, request: &mut SwapRequest) -> Result<(), PhaseError> {
        let (deposit_ref, privacy_data) = {
            let ledger = self.ledger.read().await;
            let deposit = ledger
                .resolve(request.user_address, &request.deposit_reference)
                .ok_or_else(|| {
                    PhaseError::Transient(format!(
                        "deposit {} not tracked yet",
                        request.deposit_reference
                    ))
                })?;
            if !deposit.status.is_spendable() {
                return Err(PhaseError::Transient(format!(
                    "deposit {} is {:?}, not yet spendable",
                    deposit.tx_reference, deposit.status
                )));
            }
            if deposit.remaining() < request.amount {
                return Err(PhaseError::Rejected(format!(
                    "deposit {} holds {}, request needs {}",
                    deposit.tx_reference,
                    deposit.remaining(),
                    request.amount
                )));
            }
            (
                deposit.tx_reference.clone(),
                deposit
                    .privacy_data
                    .clone()
                    .or_else(|| request.privacy_data.clone()),
            )
        };

        if deposit_ref != request.deposit_reference {
            info!(
                "🔗 {} deposit reference {} reconciled to {}",
                request.short_id(),
                request.deposit_reference,
                deposit_ref
            );
            request.deposit_reference = deposit_ref.clone();
        }
        let privacy_data = privacy_data.ok_or_else(|| {
            PhaseError::Rejected(format!("no privacy data for deposit {}", deposit_ref))
        })?;

        let journal = Journal::resume(request.submitted_tx.clone());
        let result = self
            .call(self.executor.withdraw(&deposit_ref, request.amount, &privacy_data, &journal))
            .await;
        let tx_ref = Self::settle(request, &journal, result)?;
        request.proxy_tx_refs.withdrawal = Some(tx_ref);

        let mut ledger = self.ledger.write().await;
        if let Err(e) = ledger.consume(request.user_address, &deposit_ref, request.amount) {
            warn!("🧾 Ledger out of sync after withdrawal for {}: {}", request.short_id(), e);
        }
        Ok(())
    }

    async fn run_trade(&self, request: &mut SwapRequest) -> Result<(), PhaseError> {
        let journal = Journal::resume(request.submitted_tx.clone());
        let result = self
            .call(self.executor.trade(
                request.from_token,
                request.to_token,
                request.amount,
                request.slippage_bps,
                &journal,
            ))
            .await;
        let fill = Self::settle(request, &journal, result)?;
        request.proxy_tx_refs.trade = Some(fill.tx_ref);
        request.output_amount = Some(fill.output_amount);
        Ok(())
    }

    async fn run_redeposit(&self, request: &mut SwapRequest) -> Result<(), PhaseError> {
        let amount = request
            .output_amount
            .ok_or_else(|| PhaseError::Rejected("no realized trade output recorded".into()))?;
        let journal = Journal::resume(request.submitted_tx.clone());
        let result = self
            .call(self.executor.redeposit(request.to_token, amount, request.recipient_address, &journal))
            .await;
        let redeposit = Self::settle(request, &journal, result)?;

        self.ledger.write().await.track(
            Deposit::new(
                request.recipient_address,
                request.to_token,
                amount,
                redeposit.tx_ref.clone(),
            )
            .with_status(DepositStatus::Available)
            .with_privacy_data(redeposit.privacy_data.clone()),
        );
        request.proxy_tx_refs.redeposit = Some(redeposit.tx_ref);
        request.privacy_data = Some(redeposit.privacy_data);
        Ok(())
    }

    // ─────────────────────────────────────────────────
    // Failure, retry & compensation
    // ─────────────────────────────────────────────────

    async fn on_failure(&self, mut request: SwapRequest, phase: Phase, err: PhaseError, now: Instant) {
        request.retry_count = (request.retry_count + 1).min(request.max_retries);
        request.error = Some(err.to_string());
        request.touch();

        if err.is_retryable() && request.retry_count < request.max_retries {
            warn!(
                "🔄 {} {} failed (attempt {}/{}): {} — retrying in {:?}",
                request.short_id(),
                phase,
                request.retry_count,
                request.max_retries,
                err,
                self.cfg.retry_delay,
            );
            let attempt = request.retry_count;
            self.update_head(request.clone(), Some(now + self.cfg.retry_delay))
                .await;
            self.bus.publish(SwapEvent::RequestRetrying {
                attempt,
                retry_in_ms: self.cfg.retry_delay.as_millis() as u64,
                request,
            });
            return;
        }

        error!(
            "❌ {} FAILED in {} after {} attempt(s): {}",
            request.short_id(),
            phase,
            request.retry_count,
            err
        );
        request.fail(err.to_string());
        self.retire_head(request.clone()).await;

        self.compensate(&mut request, phase, &err).await;
        {
            let mut book = self.book.write().await;
            Self::record_history(&mut book, request.clone(), self.cfg.history_limit);
        }
        self.bus.publish(SwapEvent::RequestFailed { request });
    }

    async fn compensate(&self, request: &mut SwapRequest, failed_in: Phase, cause: &PhaseError) {
        let plan = match recovery::plan(request, failed_in, cause) {
            RecoveryDecision::NotNeeded => {
                info!("🛟 {} failed in {}: no custodial funds to recover", request.short_id(), failed_in);
                return;
            }
            RecoveryDecision::Unrecoverable(reason) => {
                self.escalate(request, reason);
                return;
            }
            RecoveryDecision::Redeposit(plan) => plan,
        };

        info!(
            "🛟 {} recovering {} of {} for {}",
            request.short_id(),
            plan.amount,
            plan.token,
            plan.beneficiary
        );
        let journal = Journal::default();
        let result = self
            .call(self.executor.redeposit(plan.token, plan.amount, plan.beneficiary, &journal))
            .await;
        match result {
            Ok(redeposit) => {
                self.ledger.write().await.track(
                    Deposit::new(plan.beneficiary, plan.token, plan.amount, redeposit.tx_ref.clone())
                        .with_status(DepositStatus::Available)
                        .with_privacy_data(redeposit.privacy_data.clone()),
                );
                request.privacy_data = Some(redeposit.privacy_data);
                request.touch();
                info!("🛟 {} funds recovered → {}", request.short_id(), redeposit.tx_ref);
                self.bus.publish(SwapEvent::FundsRecovered {
                    token: plan.token,
                    amount: plan.amount,
                    tx_ref: redeposit.tx_ref,
                    request: request.clone(),
                });
            }
            Err(e) => {
                let sent = journal
                    .peek()
                    .map(|tx| format!(" after sending {}", tx.tx_ref))
                    .unwrap_or_default();
                self.escalate(
                    request,
                    format!(
                        "re-deposit of {} {} for {} failed{}: {}",
                        plan.amount, plan.token, plan.beneficiary, sent, e
                    ),
                )
            }
        }
    }

    fn escalate(&self, request: &SwapRequest, reason: String) {
        error!(
            "🚨🚨 FUND RECOVERY FAILED for {} (user {}): {} — custodial funds may be stranded, operator action required",
            request.id, request.user_address, reason
        );
        self.bus.publish(SwapEvent::FundRecoveryFailed {
            reason,
            request: request.clone(),
        });
    }

    async fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let requests = {
            let mut book = self.book.write().await;
            book.dirty = false;
            book.all_requests()
        };
        let deposits = self.ledger.read().await.snapshot();
        if let Err(e) = store.save_requests(&requests).await {
            warn!("💾 Failed to persist requests: {:#}", e);
        }
        if let Err(e) = store.save_deposits(&deposits).await {
            warn!("💾 Failed to persist deposits: {:#}", e);
        }
    }
}
