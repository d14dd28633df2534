//! Tool Executor
//!
//! Runs side-effecting tool invocations against the external collaborators
//! with at-most-once effect per idempotency key:
//!
//! 1. A successful result already recorded for the key is returned unchanged.
//! 2. Otherwise the call is dispatched; transient failures (unavailable,
//!    timeout) are retried with exponential backoff, permanent failures
//!    (validation, conflict) surface immediately.
//! 3. A success is recorded under the key before the caller sees it.
//!
//! Invocations sharing a key are serialized by a per-key lock, and the
//! dispatch runs on its own task so a caller that goes away mid-call cannot
//! strand an effect that already reached the service.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::domain::tool::{
    IdempotencyKey, ToolCall, ToolFailure, ToolFailureKind, ToolInvocation, ToolKind, ToolOutput,
};
use crate::ports::{CalendarService, CrmService, EmailService, ServiceError};

/// Configuration for the tool executor
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolExecutorConfig {
    /// Additional attempts after the first for retryable failures
    pub max_retries: u32,
    /// Delay before the first retry
    pub retry_base_delay: Duration,
    /// Backoff multiplier applied per further retry
    pub retry_backoff_multiplier: u32,
    /// Deadline for a single external call
    pub call_timeout: Duration,
}

impl Default for ToolExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_base_delay: Duration::from_millis(500),
            retry_backoff_multiplier: 2,
            call_timeout: Duration::from_secs(5),
        }
    }
}

impl ToolExecutorConfig {
    /// Delay before retry number `retry` (1-based).
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = self.retry_backoff_multiplier.max(1).saturating_pow(retry.saturating_sub(1));
        self.retry_base_delay.saturating_mul(factor)
    }
}

/// The collaborators a tool invocation can reach.
#[derive(Clone)]
pub struct ToolServices {
    pub calendar: Arc<dyn CalendarService>,
    pub crm: Arc<dyn CrmService>,
    pub email: Arc<dyn EmailService>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: IdempotencyKey,
    pub tool: ToolKind,
    pub input: ToolInvocation,
    pub output: ToolOutput,
    pub attempts: u32,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn get(&self, key: &IdempotencyKey) -> Option<IdempotencyRecord>;
    async fn put(&self, record: IdempotencyRecord);
}

/// Process-wide idempotency cache.
#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    records: RwLock<HashMap<IdempotencyKey, IdempotencyRecord>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn get(&self, key: &IdempotencyKey) -> Option<IdempotencyRecord> {
        self.records.read().await.get(key).cloned()
    }

    async fn put(&self, record: IdempotencyRecord) {
        self.records.write().await.insert(record.key.clone(), record);
    }
}

#[derive(Clone)]
pub struct ToolExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    services: ToolServices,
    store: Arc<dyn IdempotencyStore>,
    config: ToolExecutorConfig,
    key_locks: Mutex<HashMap<IdempotencyKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl ToolExecutor {
    pub fn new(services: ToolServices, store: Arc<dyn IdempotencyStore>) -> Self {
        Self::with_config(services, store, ToolExecutorConfig::default())
    }

    pub fn with_config(
        services: ToolServices,
        store: Arc<dyn IdempotencyStore>,
        config: ToolExecutorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                services,
                store,
                config,
                key_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &ToolExecutorConfig {
        &self.inner.config
    }

    /// Invoke a tool under `key`. Never fails outright: failures come back
    /// inside the returned `ToolCall` so they are always recorded.
    pub async fn invoke(&self, invocation: ToolInvocation, key: IdempotencyKey) -> ToolCall {
        let inner = Arc::clone(&self.inner);
        let task_invocation = invocation.clone();
        let task_key = key.clone();
        let task =
            tokio::spawn(async move { inner.invoke_serialized(task_invocation, task_key).await });

        match task.await {
            Ok(call) => call,
            Err(join_error) => {
                warn!(
                    event_name = "executor.task_failed",
                    tool = invocation.kind().as_str(),
                    idempotency_key = %key,
                    error = %join_error,
                    "tool invocation task did not complete"
                );
                ToolCall {
                    tool: invocation.kind(),
                    input: invocation,
                    idempotency_key: key,
                    result: Err(ToolFailure::new(
                        ToolFailureKind::Transient,
                        format!("tool task aborted: {join_error}"),
                    )),
                    attempts: 0,
                    replayed: false,
                }
            }
        }
    }
}

impl ExecutorInner {
    async fn invoke_serialized(&self, invocation: ToolInvocation, key: IdempotencyKey) -> ToolCall {
        let key_lock = self.lock_for(&key);
        let call = {
            let _guard = key_lock.lock().await;
            self.invoke_once(invocation, key.clone()).await
        };
        drop(key_lock);
        self.release_lock(&key);
        call
    }

    async fn invoke_once(&self, invocation: ToolInvocation, key: IdempotencyKey) -> ToolCall {
        let tool = invocation.kind();

        if let Some(record) = self.store.get(&key).await {
            info!(
                event_name = "executor.replayed",
                tool = tool.as_str(),
                idempotency_key = %key,
                "returning recorded result for idempotency key"
            );
            return ToolCall {
                tool,
                input: invocation,
                idempotency_key: key,
                result: Ok(record.output),
                attempts: record.attempts,
                replayed: true,
            };
        }

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let call = self.dispatch(&invocation, &key);
            let outcome = match tokio::time::timeout(self.config.call_timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(ServiceError::Timeout),
            };

            match outcome {
                Ok(output) => {
                    self.store
                        .put(IdempotencyRecord {
                            key: key.clone(),
                            tool,
                            input: invocation.clone(),
                            output: output.clone(),
                            attempts,
                            recorded_at: Utc::now(),
                        })
                        .await;
                    info!(
                        event_name = "executor.succeeded",
                        tool = tool.as_str(),
                        idempotency_key = %key,
                        attempts,
                        "tool invocation succeeded"
                    );
                    return ToolCall {
                        tool,
                        input: invocation,
                        idempotency_key: key,
                        result: Ok(output),
                        attempts,
                        replayed: false,
                    };
                }
                Err(error) => {
                    let failure = ToolFailure::from(error);
                    if failure.kind.is_retryable() && attempts <= self.config.max_retries {
                        let delay = self.config.backoff_delay(attempts);
                        warn!(
                            event_name = "executor.retry",
                            tool = tool.as_str(),
                            idempotency_key = %key,
                            attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %failure,
                            "transient tool failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    warn!(
                        event_name = "executor.failed",
                        tool = tool.as_str(),
                        idempotency_key = %key,
                        attempts,
                        failure_kind = failure.kind.as_str(),
                        error = %failure,
                        "tool invocation failed"
                    );
                    return ToolCall {
                        tool,
                        input: invocation,
                        idempotency_key: key,
                        result: Err(failure),
                        attempts,
                        replayed: false,
                    };
                }
            }
        }
    }

    async fn dispatch(
        &self,
        invocation: &ToolInvocation,
        key: &IdempotencyKey,
    ) -> Result<ToolOutput, ServiceError> {
        let services = &self.services;
        match invocation {
            ToolInvocation::CheckAvailability { window } => {
                services.calendar.check_availability(window).await.map(ToolOutput::Slots)
            }
            ToolInvocation::HoldSlot { slot_id, stock_number } => {
                services.calendar.hold_slot(slot_id, stock_number, key).await.map(ToolOutput::Hold)
            }
            ToolInvocation::ConfirmBooking { hold_id } => {
                services.calendar.confirm_booking(hold_id, key).await.map(ToolOutput::Booking)
            }
            ToolInvocation::CreateLead { lead } => {
                services.crm.create_lead(lead, key).await.map(ToolOutput::Lead)
            }
            ToolInvocation::SendConfirmation { recipient, details } => services
                .email
                .send_confirmation(recipient, details, key)
                .await
                .map(ToolOutput::Delivery),
        }
    }

    fn lock_for(&self, key: &IdempotencyKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.key_locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    fn release_lock(&self, key: &IdempotencyKey) {
        let mut locks = self.key_locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    use super::{
        IdempotencyStore, InMemoryIdempotencyStore, ToolExecutor, ToolExecutorConfig,
        ToolServices,
    };
    use crate::domain::appointment::{
        AppointmentSlot, ConfirmationCode, DeliveryId, HoldId, LeadFields, LeadId, SlotId,
        TimeWindow,
    };
    use crate::domain::conversation::ConversationId;
    use crate::domain::tool::{
        IdempotencyKey, ToolFailureKind, ToolInvocation, ToolKind, ToolOutput,
    };
    use crate::domain::vehicle::StockNumber;
    use crate::ports::{CalendarService, CrmService, EmailService, ServiceError};

    #[derive(Default)]
    struct ScriptedCalendar {
        confirm_calls: AtomicUsize,
        hold_calls: AtomicUsize,
        confirm_script: Mutex<VecDeque<Result<(), ServiceError>>>,
        confirm_delay: Option<Duration>,
    }

    impl ScriptedCalendar {
        fn with_confirm_script(script: Vec<Result<(), ServiceError>>) -> Self {
            Self { confirm_script: Mutex::new(script.into()), ..Self::default() }
        }
    }

    #[async_trait]
    impl CalendarService for ScriptedCalendar {
        async fn check_availability(
            &self,
            _window: &TimeWindow,
        ) -> Result<Vec<AppointmentSlot>, ServiceError> {
            Ok(Vec::new())
        }

        async fn hold_slot(
            &self,
            slot_id: &SlotId,
            _stock_number: &StockNumber,
            _business_key: &IdempotencyKey,
        ) -> Result<HoldId, ServiceError> {
            let call = self.hold_calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(HoldId(format!("HOLD-{}-{call}", slot_id.0)))
        }

        async fn confirm_booking(
            &self,
            _hold_id: &HoldId,
            _business_key: &IdempotencyKey,
        ) -> Result<ConfirmationCode, ServiceError> {
            let call = self.confirm_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(delay) = self.confirm_delay {
                tokio::time::sleep(delay).await;
            }
            let scripted = self.confirm_script.lock().expect("script lock").pop_front();
            match scripted {
                Some(Err(error)) => Err(error),
                _ => Ok(ConfirmationCode(format!("TD-{call:05}"))),
            }
        }
    }

    struct NoopCrm;

    #[async_trait]
    impl CrmService for NoopCrm {
        async fn create_lead(
            &self,
            _lead: &LeadFields,
            _business_key: &IdempotencyKey,
        ) -> Result<LeadId, ServiceError> {
            Ok(LeadId("LEAD-1001".to_string()))
        }
    }

    struct NoopEmail;

    #[async_trait]
    impl EmailService for NoopEmail {
        async fn send_confirmation(
            &self,
            _recipient: &str,
            _details: &str,
            _business_key: &IdempotencyKey,
        ) -> Result<DeliveryId, ServiceError> {
            Ok(DeliveryId("MSG-1".to_string()))
        }
    }

    fn fast_config() -> ToolExecutorConfig {
        ToolExecutorConfig {
            max_retries: 2,
            retry_base_delay: Duration::from_millis(1),
            retry_backoff_multiplier: 2,
            call_timeout: Duration::from_millis(200),
        }
    }

    fn executor_with(
        calendar: Arc<ScriptedCalendar>,
        config: ToolExecutorConfig,
    ) -> (ToolExecutor, Arc<InMemoryIdempotencyStore>) {
        let store = Arc::new(InMemoryIdempotencyStore::new());
        let services =
            ToolServices { calendar, crm: Arc::new(NoopCrm), email: Arc::new(NoopEmail) };
        (ToolExecutor::with_config(services, store.clone(), config), store)
    }

    fn confirm(key: &str) -> (ToolInvocation, IdempotencyKey) {
        let key = IdempotencyKey::derive(
            &ConversationId("conv-1".to_string()),
            ToolKind::ConfirmBooking,
            key,
        );
        (ToolInvocation::ConfirmBooking { hold_id: HoldId("HOLD-1".to_string()) }, key)
    }

    #[test]
    fn backoff_grows_exponentially_from_base() {
        let config = ToolExecutorConfig::default();
        assert_eq!(config.backoff_delay(1), Duration::from_millis(500));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(1000));
        assert_eq!(config.backoff_delay(3), Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn same_key_twice_produces_one_side_effect_and_identical_results() {
        let calendar = Arc::new(ScriptedCalendar::default());
        let (executor, _) = executor_with(calendar.clone(), fast_config());
        let (invocation, key) = confirm("AX10000|SLOT-1");

        let first = executor.invoke(invocation.clone(), key.clone()).await;
        let second = executor.invoke(invocation, key).await;

        assert_eq!(calendar.confirm_calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.result, second.result);
        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(first.output(), Some(&ToolOutput::Booking(ConfirmationCode("TD-00001".into()))));
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let calendar = Arc::new(ScriptedCalendar::with_confirm_script(vec![
            Err(ServiceError::Unavailable("503".to_string())),
            Err(ServiceError::Unavailable("503".to_string())),
        ]));
        let (executor, store) = executor_with(calendar.clone(), fast_config());
        let (invocation, key) = confirm("retry");

        let call = executor.invoke(invocation, key.clone()).await;

        assert!(call.succeeded());
        assert_eq!(call.attempts, 3);
        assert_eq!(calendar.confirm_calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.get(&key).await.map(|record| record.attempts), Some(3));
    }

    #[tokio::test]
    async fn transient_failures_stop_after_two_retries() {
        let calendar = Arc::new(ScriptedCalendar::with_confirm_script(vec![
            Err(ServiceError::Unavailable("503".to_string())),
            Err(ServiceError::Unavailable("503".to_string())),
            Err(ServiceError::Unavailable("503".to_string())),
            Err(ServiceError::Unavailable("503".to_string())),
        ]));
        let (executor, store) = executor_with(calendar.clone(), fast_config());
        let (invocation, key) = confirm("exhausted");

        let call = executor.invoke(invocation, key.clone()).await;

        assert_eq!(call.attempts, 3);
        assert_eq!(call.failure().map(|failure| failure.kind), Some(ToolFailureKind::Transient));
        assert!(store.get(&key).await.is_none(), "failures are not cached");
    }

    #[tokio::test]
    async fn permanent_failures_surface_without_retry() {
        let calendar = Arc::new(ScriptedCalendar::with_confirm_script(vec![Err(
            ServiceError::Conflict("hold expired".to_string()),
        )]));
        let (executor, _) = executor_with(calendar.clone(), fast_config());
        let (invocation, key) = confirm("conflict");

        let call = executor.invoke(invocation.clone(), key.clone()).await;
        assert_eq!(call.attempts, 1);
        assert_eq!(call.failure().map(|failure| failure.kind), Some(ToolFailureKind::Conflict));

        let retried_later = executor.invoke(invocation, key).await;
        assert!(retried_later.succeeded(), "a later invocation reaches the service again");
        assert_eq!(calendar.confirm_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn slow_calls_time_out_and_count_as_transient() {
        let calendar = Arc::new(ScriptedCalendar {
            confirm_delay: Some(Duration::from_millis(100)),
            ..ScriptedCalendar::default()
        });
        let config = ToolExecutorConfig {
            max_retries: 0,
            call_timeout: Duration::from_millis(10),
            ..fast_config()
        };
        let (executor, _) = executor_with(calendar, config);
        let (invocation, key) = confirm("slow");

        let call = executor.invoke(invocation, key).await;

        assert_eq!(call.attempts, 1);
        assert_eq!(call.failure().map(|failure| failure.kind), Some(ToolFailureKind::Timeout));
    }

    #[tokio::test]
    async fn concurrent_invocations_with_one_key_reach_the_service_once() {
        let calendar = Arc::new(ScriptedCalendar {
            confirm_delay: Some(Duration::from_millis(20)),
            ..ScriptedCalendar::default()
        });
        let (executor, _) = executor_with(calendar.clone(), fast_config());
        let (invocation, key) = confirm("concurrent");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let executor = executor.clone();
            let invocation = invocation.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move { executor.invoke(invocation, key).await }));
        }

        let mut codes = Vec::new();
        for handle in handles {
            let call = handle.await.expect("join");
            codes.push(call.result.expect("booking succeeds"));
        }

        assert_eq!(calendar.confirm_calls.load(Ordering::SeqCst), 1);
        assert!(codes.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[tokio::test]
    async fn dropped_caller_does_not_abandon_a_sent_call() {
        let calendar = Arc::new(ScriptedCalendar {
            confirm_delay: Some(Duration::from_millis(40)),
            ..ScriptedCalendar::default()
        });
        let (executor, store) = executor_with(calendar.clone(), fast_config());
        let (invocation, key) = confirm("disconnect");

        let caller = {
            let executor = executor.clone();
            let invocation = invocation.clone();
            let key = key.clone();
            tokio::spawn(async move { executor.invoke(invocation, key).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        caller.abort();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(store.get(&key).await.is_some(), "effect recorded after caller went away");
        let replay = executor.invoke(invocation, key).await;
        assert!(replay.replayed);
        assert_eq!(calendar.confirm_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hold_slot_dispatches_to_calendar() {
        let calendar = Arc::new(ScriptedCalendar::default());
        let (executor, _) = executor_with(calendar.clone(), fast_config());
        let start = Utc.with_ymd_and_hms(2026, 10, 17, 10, 0, 0).single().expect("valid time");
        let key = IdempotencyKey::derive(
            &ConversationId("conv-1".to_string()),
            ToolKind::HoldSlot,
            &format!("AX10000|{start}"),
        );

        let call = executor
            .invoke(
                ToolInvocation::HoldSlot {
                    slot_id: SlotId("SLOT-202610171000".to_string()),
                    stock_number: StockNumber("AX10000".to_string()),
                },
                key,
            )
            .await;

        assert_eq!(call.tool, ToolKind::HoldSlot);
        assert_eq!(
            call.output(),
            Some(&ToolOutput::Hold(HoldId("HOLD-SLOT-202610171000-1".to_string())))
        );
        assert_eq!(calendar.hold_calls.load(Ordering::SeqCst), 1);
    }
}
