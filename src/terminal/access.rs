// =============================================================================
// Terminal Access Gate — bounded, timed admission to the terminal binding
// =============================================================================
//
// The terminal library is not safe for unlimited concurrent calls. Every call
// therefore:
//   - waits for a semaphore permit (default: one call at a time),
//   - runs on tokio's blocking pool with the permit moved into the closure,
//     so the permit is released only when the native call really returns,
//   - is bounded by a per-request timeout covering the waits, the call and
//     any retry.
//
// A timed-out call is not aborted. It finishes on the blocking pool and its
// result is dropped. `call` retries `Disconnected` failures once; `call_once`
// never retries and is what order-changing requests go through.
//
// Atomic counters mirror what the gate is doing so `/health` can report it
// lock-free.
// =============================================================================

use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use utoipa::ToSchema;

use super::{TerminalBinding, TerminalError};

#[derive(Default)]
struct AccessCounters {
    in_flight: AtomicU32,
    peak_in_flight: AtomicU32,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    retried: AtomicU64,
}

/// Immutable snapshot of the gate counters (suitable for serialisation into a
/// diagnostics payload).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TerminalAccessSnapshot {
    pub max_concurrent: usize,
    pub in_flight: u32,
    pub peak_in_flight: u32,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub retried: u64,
}

/// Shared handle through which every terminal call is made.
pub struct TerminalAccess {
    binding: Arc<dyn TerminalBinding>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    timeout: Duration,
    counters: Arc<AccessCounters>,
}

impl TerminalAccess {
    pub fn new(binding: Arc<dyn TerminalBinding>, max_concurrent: usize, timeout: Duration) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            binding,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            timeout,
            counters: Arc::new(AccessCounters::default()),
        }
    }

    /// The binding itself, for non-blocking probes such as `is_connected`.
    pub fn binding(&self) -> &dyn TerminalBinding {
        self.binding.as_ref()
    }

    // -------------------------------------------------------------------------
    // Calls
    // -------------------------------------------------------------------------

    /// Run `op` against the terminal, retrying once if the terminal reports a
    /// lost connection. Both attempts share one deadline.
    pub async fn call<T, F>(&self, op: &'static str, f: F) -> Result<T, TerminalError>
    where
        F: Fn(&dyn TerminalBinding) -> Result<T, TerminalError> + Clone + Send + 'static,
        T: Send + 'static,
    {
        let retrying = async move {
            match self.attempt(f.clone()).await {
                Err(e) if e.is_transient() => {
                    self.counters.retried.fetch_add(1, Ordering::Relaxed);
                    warn!(op, error = %e, "transient terminal failure — retrying once");
                    self.attempt(f).await
                }
                other => other,
            }
        };
        self.within_deadline(op, retrying).await
    }

    /// Single attempt, never retried. For requests that must not reach the
    /// terminal twice, such as sending or closing an order.
    pub async fn call_once<T, F>(&self, op: &'static str, f: F) -> Result<T, TerminalError>
    where
        F: FnOnce(&dyn TerminalBinding) -> Result<T, TerminalError> + Send + 'static,
        T: Send + 'static,
    {
        self.within_deadline(op, self.attempt(f)).await
    }

    async fn attempt<T, F>(&self, f: F) -> Result<T, TerminalError>
    where
        F: FnOnce(&dyn TerminalBinding) -> Result<T, TerminalError> + Send + 'static,
        T: Send + 'static,
    {
        let binding = Arc::clone(&self.binding);
        let counters = Arc::clone(&self.counters);

        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| TerminalError::TaskFailed("terminal gate closed".into()))?;

        let handle = tokio::task::spawn_blocking(move || {
            let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            counters.peak_in_flight.fetch_max(now, Ordering::SeqCst);

            let result = f(binding.as_ref());

            counters.in_flight.fetch_sub(1, Ordering::SeqCst);
            match &result {
                Ok(_) => counters.completed.fetch_add(1, Ordering::Relaxed),
                Err(_) => counters.failed.fetch_add(1, Ordering::Relaxed),
            };
            drop(permit);
            result
        });

        handle
            .await
            .map_err(|e| TerminalError::TaskFailed(e.to_string()))?
    }

    /// Bound `work`, permit waits included, by the configured timeout.
    async fn within_deadline<T>(
        &self,
        op: &'static str,
        work: impl Future<Output = Result<T, TerminalError>>,
    ) -> Result<T, TerminalError> {
        match tokio::time::timeout(self.timeout, work).await {
            Ok(result) => {
                debug!(op, ok = result.is_ok(), "terminal call finished");
                result
            }
            Err(_) => {
                self.counters.timed_out.fetch_add(1, Ordering::Relaxed);
                warn!(
                    op,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "terminal call timed out — result will be discarded"
                );
                Err(TerminalError::Timeout(self.timeout))
            }
        }
    }

    // -------------------------------------------------------------------------
    // Snapshot
    // -------------------------------------------------------------------------

    /// Produce a serialisable snapshot of the current counters.
    pub fn snapshot(&self) -> TerminalAccessSnapshot {
        TerminalAccessSnapshot {
            max_concurrent: self.max_concurrent,
            in_flight: self.counters.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.counters.peak_in_flight.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            timed_out: self.counters.timed_out.load(Ordering::Relaxed),
            retried: self.counters.retried.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for TerminalAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalAccess")
            .field("binding", &self.binding.name())
            .field("max_concurrent", &self.max_concurrent)
            .field("timeout", &self.timeout)
            .field("in_flight", &self.counters.in_flight.load(Ordering::SeqCst))
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::SimulatedTerminal;
    use crate::types::Timeframe;

    fn sim(latency_ms: u64) -> Arc<SimulatedTerminal> {
        let sim = SimulatedTerminal::new(&["PETR4".to_string()], 0)
            .with_latency(Duration::from_millis(latency_ms));
        sim.connect();
        Arc::new(sim)
    }

    #[tokio::test]
    async fn successful_call_is_counted() {
        let terminal = sim(0);
        let access = TerminalAccess::new(terminal.clone(), 1, Duration::from_secs(5));

        let symbols = access.call("symbols", |t| t.symbols()).await.unwrap();
        assert_eq!(symbols.len(), 1);

        let snap = access.snapshot();
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.failed, 0);
        assert_eq!(snap.in_flight, 0);
    }

    #[tokio::test]
    async fn single_permit_serialises_calls() {
        let terminal = sim(30);
        let access = Arc::new(TerminalAccess::new(terminal.clone(), 1, Duration::from_secs(5)));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let access = access.clone();
            handles.push(tokio::spawn(async move {
                access.call("symbols", |t| t.symbols()).await
            }));
        }
        for h in handles {
            assert!(h.await.unwrap().is_ok());
        }

        let snap = access.snapshot();
        assert_eq!(snap.peak_in_flight, 1);
        assert_eq!(snap.completed, 4);
    }

    #[tokio::test]
    async fn wider_gate_never_exceeds_its_bound() {
        let terminal = sim(30);
        let access = Arc::new(TerminalAccess::new(terminal.clone(), 2, Duration::from_secs(5)));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let access = access.clone();
            handles.push(tokio::spawn(async move {
                access.call("symbols", |t| t.symbols()).await
            }));
        }
        for h in handles {
            assert!(h.await.unwrap().is_ok());
        }

        assert!(access.snapshot().peak_in_flight <= 2);
    }

    #[tokio::test]
    async fn disconnect_is_retried_once() {
        let terminal = sim(0);
        terminal.inject_disconnects(1);
        let access = TerminalAccess::new(terminal.clone(), 1, Duration::from_secs(5));

        let bars = access
            .call("rates", |t| t.rates_from_pos("PETR4", Timeframe::M1, 0, 3))
            .await
            .unwrap();
        assert_eq!(bars.len(), 3);
        assert_eq!(access.snapshot().retried, 1);
    }

    #[tokio::test]
    async fn second_disconnect_surfaces() {
        let terminal = sim(0);
        terminal.inject_disconnects(2);
        let access = TerminalAccess::new(terminal.clone(), 1, Duration::from_secs(5));

        let err = access.call("symbols", |t| t.symbols()).await.unwrap_err();
        assert!(matches!(err, TerminalError::Disconnected(_)));
        assert_eq!(terminal.call_count(), 2);
    }

    #[tokio::test]
    async fn non_transient_errors_are_not_retried() {
        let terminal = sim(0);
        let access = TerminalAccess::new(terminal.clone(), 1, Duration::from_secs(5));

        let err = access
            .call("rates", |t| t.rates_from_pos("NOPE", Timeframe::M1, 0, 3))
            .await
            .unwrap_err();
        assert_eq!(err, TerminalError::UnknownSymbol("NOPE".into()));
        assert_eq!(terminal.call_count(), 1);
        assert_eq!(access.snapshot().retried, 0);
    }

    #[tokio::test]
    async fn call_once_never_retries() {
        let terminal = sim(0);
        terminal.inject_disconnects(1);
        let access = TerminalAccess::new(terminal.clone(), 1, Duration::from_secs(5));

        let err = access.call_once("symbols", |t| t.symbols()).await.unwrap_err();
        assert!(matches!(err, TerminalError::Disconnected(_)));
        assert_eq!(terminal.call_count(), 1);
        assert_eq!(access.snapshot().retried, 0);
    }

    #[tokio::test]
    async fn retry_shares_the_first_attempts_deadline() {
        // Each attempt fits the timeout on its own, the pair does not.
        let terminal = sim(80);
        terminal.inject_disconnects(1);
        let access = TerminalAccess::new(terminal.clone(), 1, Duration::from_millis(120));

        let err = access.call("symbols", |t| t.symbols()).await.unwrap_err();
        assert!(matches!(err, TerminalError::Timeout(_)));
        let snap = access.snapshot();
        assert_eq!(snap.retried, 1);
        assert_eq!(snap.timed_out, 1);
    }

    #[tokio::test]
    async fn slow_terminal_times_out_and_still_releases_permit() {
        let terminal = sim(200);
        let access = TerminalAccess::new(terminal.clone(), 1, Duration::from_millis(20));

        let err = access.call("symbols", |t| t.symbols()).await.unwrap_err();
        assert!(matches!(err, TerminalError::Timeout(_)));
        assert_eq!(access.snapshot().timed_out, 1);

        // The abandoned call finishes on the blocking pool and frees its permit.
        tokio::time::sleep(Duration::from_millis(400)).await;
        let snap = access.snapshot();
        assert_eq!(snap.in_flight, 0);
        assert_eq!(snap.completed, 1);
    }
}
