//! # Call Dispatcher Service
//!
//! Wires admission, execution and the sweep to a bus.
//!
//! Admission runs synchronously inside the bus subscription callback, so
//! dedup decisions follow arrival order. Accepted calls execute on their own
//! task; results and errors go out through [`Bus::send`] without waiting for
//! delivery.

use crate::domain::{
    BreakerStats, CallSignature, CallStatus, CircuitBreaker, DispatchError, DispatcherConfig,
    PendingCall, PendingCallTable, Rejection,
};
use crate::registry::{normalize_tool_name, ResolvedTool, ToolRegistry};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use shared_bus::{Bus, BusMessage, Subscription};
use shared_types::{
    CallError, CallId, CallRequest, CallResult, ConfigError, SystemTimeSource, TimeSource,
    Timestamp,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Dispatcher counters.
#[derive(Debug, Default)]
pub struct DispatcherStats {
    pub received: AtomicU64,
    pub accepted: AtomicU64,
    pub rejected_duplicate_id: AtomicU64,
    pub rejected_duplicate_signature: AtomicU64,
    pub rejected_cooling_down: AtomicU64,
    pub invalid: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub errored: AtomicU64,
    pub swept: AtomicU64,
    pub released: AtomicU64,
}

/// Point-in-time copy of [`DispatcherStats`] plus table sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStatsSnapshot {
    pub received: u64,
    pub accepted: u64,
    pub rejected_duplicate_id: u64,
    pub rejected_duplicate_signature: u64,
    pub rejected_cooling_down: u64,
    pub invalid: u64,
    pub completed: u64,
    pub failed: u64,
    pub errored: u64,
    pub swept: u64,
    pub released: u64,
    pub pending: u64,
    pub breaker_signatures: u64,
}

impl DispatcherStatsSnapshot {
    pub fn rejected(&self) -> u64 {
        self.rejected_duplicate_id + self.rejected_duplicate_signature + self.rejected_cooling_down
    }
}

fn incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Executes call requests received on the bus. Cheap to clone.
#[derive(Clone)]
pub struct CallDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    bus: Bus,
    registry: Arc<ToolRegistry>,
    config: DispatcherConfig,
    time: Arc<dyn TimeSource>,
    table: Mutex<PendingCallTable>,
    breaker: CircuitBreaker,
    stats: DispatcherStats,
    started: AtomicBool,
    subscription: Mutex<Option<Subscription>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl CallDispatcher {
    pub fn new(
        bus: Bus,
        registry: Arc<ToolRegistry>,
        config: DispatcherConfig,
    ) -> Result<Self, ConfigError> {
        Self::with_time_source(bus, registry, config, Arc::new(SystemTimeSource))
    }

    pub fn with_time_source(
        bus: Bus,
        registry: Arc<ToolRegistry>,
        config: DispatcherConfig,
        time: Arc<dyn TimeSource>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let breaker = CircuitBreaker::new(config.breaker_cooldown_ms());
        Ok(Self {
            inner: Arc::new(DispatcherInner {
                bus,
                registry,
                config,
                time,
                table: Mutex::new(PendingCallTable::new()),
                breaker,
                stats: DispatcherStats::default(),
                started: AtomicBool::new(false),
                subscription: Mutex::new(None),
                sweeper: Mutex::new(None),
            }),
        })
    }

    /// Subscribe to the request topic and start the sweep.
    ///
    /// Must be called from within a Tokio runtime. Calling it twice is a
    /// no-op.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let subscription = self
            .inner
            .bus
            .subscribe(&self.inner.config.request_topic, move |message| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_message(message);
                }
            });
        *self.inner.subscription.lock() = Some(subscription);

        let interval = self.inner.config.effective_sweep_interval();
        let handle = tokio::spawn(sweep_task(Arc::downgrade(&self.inner), interval));
        *self.inner.sweeper.lock() = Some(handle);

        info!(
            topic = %self.inner.config.request_topic,
            tools = self.inner.registry.len(),
            sweep_interval_secs = interval.as_secs(),
            "Call dispatcher started"
        );
    }

    /// Stop listening and stop the sweep. In-flight executions still finish.
    pub fn shutdown(&self) {
        if let Some(subscription) = self.inner.subscription.lock().take() {
            subscription.unsubscribe();
        }
        if let Some(handle) = self.inner.sweeper.lock().take() {
            handle.abort();
        }
        self.inner.started.store(false, Ordering::Release);
        info!("Call dispatcher stopped");
    }

    /// Run a locally issued request through the same admission and
    /// execution path as one received from the bus.
    pub fn submit(&self, request: CallRequest) -> Result<(), Rejection> {
        self.inner.dispatch(request)
    }

    /// Run one sweep now. Returns the number of records removed.
    pub fn sweep(&self) -> usize {
        self.inner.sweep()
    }

    pub fn status(&self, id: &CallId) -> Option<CallStatus> {
        self.inner.table.lock().get(id).map(|call| call.status)
    }

    pub fn pending_call(&self, id: &CallId) -> Option<PendingCall> {
        self.inner.table.lock().get(id).cloned()
    }

    pub fn pending_len(&self) -> usize {
        self.inner.table.lock().len()
    }

    pub fn breaker_stats(&self) -> BreakerStats {
        self.inner.breaker.get_stats()
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.inner.registry
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> DispatcherStatsSnapshot {
        let s = &self.inner.stats;
        DispatcherStatsSnapshot {
            received: s.received.load(Ordering::Relaxed),
            accepted: s.accepted.load(Ordering::Relaxed),
            rejected_duplicate_id: s.rejected_duplicate_id.load(Ordering::Relaxed),
            rejected_duplicate_signature: s.rejected_duplicate_signature.load(Ordering::Relaxed),
            rejected_cooling_down: s.rejected_cooling_down.load(Ordering::Relaxed),
            invalid: s.invalid.load(Ordering::Relaxed),
            completed: s.completed.load(Ordering::Relaxed),
            failed: s.failed.load(Ordering::Relaxed),
            errored: s.errored.load(Ordering::Relaxed),
            swept: s.swept.load(Ordering::Relaxed),
            released: s.released.load(Ordering::Relaxed),
            pending: self.pending_len() as u64,
            breaker_signatures: self.inner.breaker.len() as u64,
        }
    }
}

impl DispatcherInner {
    fn on_message(self: &Arc<Self>, message: BusMessage) {
        incr(&self.stats.received);
        match message.decode::<CallRequest>() {
            Ok(request) => {
                let _ = self.dispatch(request);
            }
            Err(e) => self.reject_invalid(&message.payload, e.to_string()),
        }
    }

    fn dispatch(self: &Arc<Self>, request: CallRequest) -> Result<(), Rejection> {
        if request.name().trim().is_empty() {
            self.reject_invalid_request(&request.id, "missing tool name".to_string());
            return Ok(());
        }

        let resolved = self.registry.resolve(request.name());
        let canonical = match &resolved {
            Ok(tool) => tool.name.clone(),
            Err(_) => normalize_tool_name(request.name()),
        };

        let signature = match self.admit(&request, &canonical) {
            Ok(signature) => signature,
            Err(rejection) => {
                self.record_rejection(rejection);
                if self.config.debug {
                    info!(call_id = %request.id, tool = %request.name(), reason = %rejection, "Call request rejected");
                } else {
                    debug!(call_id = %request.id, tool = %request.name(), reason = %rejection, "Call request rejected");
                }
                return Err(rejection);
            }
        };

        incr(&self.stats.accepted);
        debug!(
            call_id = %request.id,
            tool = %request.name(),
            signature = signature.short(),
            "Call request accepted"
        );

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.execute(request, signature, resolved).await;
        });
        Ok(())
    }

    /// Dedup checks in order; on success the call is recorded as pending.
    ///
    /// `canonical` is the name the call resolves to, so aliases and fuzzy
    /// matches of one tool share a signature.
    fn admit(&self, request: &CallRequest, canonical: &str) -> Result<CallSignature, Rejection> {
        let now = self.time.now_ms();
        let signature = CallSignature::of(canonical, &request.payload.args);

        let mut table = self.table.lock();
        if table.contains(&request.id) {
            return Err(Rejection::DuplicateId);
        }
        if let Some(existing) =
            table.find_active_by_signature(&signature, now, self.config.duplicate_window_ms())
        {
            debug!(call_id = %request.id, existing = %existing.id, "Same signature already in flight");
            return Err(Rejection::DuplicateSignature);
        }
        if !self.breaker.should_allow(&signature, now) {
            return Err(Rejection::CoolingDown);
        }

        table.insert(PendingCall::new(
            request.id.clone(),
            request.name(),
            signature.clone(),
            request.origin.clone(),
            now,
        ));
        table.enforce_max(self.config.max_pending_calls);
        Ok(signature)
    }

    fn record_rejection(&self, rejection: Rejection) {
        match rejection {
            Rejection::DuplicateId => incr(&self.stats.rejected_duplicate_id),
            Rejection::DuplicateSignature => incr(&self.stats.rejected_duplicate_signature),
            Rejection::CoolingDown => incr(&self.stats.rejected_cooling_down),
        }
    }

    async fn execute(
        self: Arc<Self>,
        request: CallRequest,
        signature: CallSignature,
        resolved: Result<ResolvedTool, DispatchError>,
    ) {
        let started = Instant::now();
        self.table
            .lock()
            .set_status(&request.id, CallStatus::Executing, self.time.now_ms());

        let outcome = match resolved {
            Ok(tool) => tool
                .handler
                .call(request.payload.args.clone())
                .await
                .map_err(|e| (CallStatus::Failed, DispatchError::HandlerException(e.to_string()))),
            Err(e) => Err((CallStatus::Error, e)),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let now = self.time.now_ms();

        match outcome {
            Ok(result) => {
                self.breaker.record_completion(&signature, now);
                self.table
                    .lock()
                    .set_status(&request.id, CallStatus::Completed, now);
                self.publish_result(&request.id, result, elapsed_ms, now);
                incr(&self.stats.completed);
                info!(call_id = %request.id, tool = %request.name(), elapsed_ms, "Call completed");

                if self.config.release_on_completion && self.breaker.is_enabled() {
                    if self.table.lock().remove(&request.id).is_some() {
                        incr(&self.stats.released);
                    }
                }
            }
            Err((status, e)) => {
                self.table.lock().set_status(&request.id, status, now);
                self.publish_error(&request.id, e.to_string(), elapsed_ms, now);
                if status == CallStatus::Failed {
                    incr(&self.stats.failed);
                } else {
                    incr(&self.stats.errored);
                }
                warn!(call_id = %request.id, tool = %request.name(), status = %status, error = %e, "Call failed");
            }
        }
    }

    fn publish_result(&self, call_id: &CallId, result: Value, elapsed_ms: u64, now: Timestamp) {
        let message = CallResult {
            id: CallId::generate(),
            call_id: call_id.clone(),
            result,
            timestamp: now,
            execution_time_ms: elapsed_ms,
        };
        self.publish(&self.config.result_topic, &message);
    }

    fn publish_error(&self, call_id: &CallId, error: String, elapsed_ms: u64, now: Timestamp) {
        let message = CallError {
            id: CallId::generate(),
            call_id: call_id.clone(),
            error,
            timestamp: now,
            execution_time_ms: elapsed_ms,
        };
        self.publish(&self.config.error_topic, &message);
    }

    fn publish<T: Serialize>(&self, topic: &str, message: &T) {
        match serde_json::to_value(message) {
            Ok(payload) => self.bus.send(topic, payload),
            Err(e) => error!(topic = %topic, error = %e, "Failed to serialize call outcome"),
        }
    }

    /// A request on the call topic that could not be decoded. Answered with
    /// a Call Error when it carries an id, dropped otherwise.
    fn reject_invalid(&self, payload: &Value, reason: String) {
        match payload.get("id").and_then(Value::as_str) {
            Some(id) => self.reject_invalid_request(&CallId::new(id), reason),
            None => {
                incr(&self.stats.invalid);
                warn!(reason = %reason, "Undecodable call request dropped");
            }
        }
    }

    fn reject_invalid_request(&self, call_id: &CallId, reason: String) {
        incr(&self.stats.invalid);
        let error = DispatchError::InvalidRequest(reason);
        warn!(call_id = %call_id, error = %error, "Invalid call request");
        self.publish_error(call_id, error.to_string(), 0, self.time.now_ms());
    }

    fn sweep(&self) -> usize {
        let now = self.time.now_ms();
        let swept = self
            .table
            .lock()
            .sweep(now, self.config.pending_max_age_ms());
        for call in &swept {
            info!(
                call_id = %call.id,
                tool = %call.name,
                status = %call.status,
                age_ms = call.age(now),
                "Evicted stale pending call"
            );
        }
        let pruned = self.breaker.prune(now);
        if pruned > 0 {
            debug!(pruned, "Pruned elapsed breaker entries");
        }
        self.stats
            .swept
            .fetch_add(swept.len() as u64, Ordering::Relaxed);
        swept.len()
    }
}

impl Drop for DispatcherInner {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

/// Periodic sweep of the pending table.
async fn sweep_task(inner: Weak<DispatcherInner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let removed = inner.sweep();
        if removed > 0 {
            debug!(removed, "Cleaned up stale pending calls");
        }
    }
}

#[cfg(test)]
mod tests;
