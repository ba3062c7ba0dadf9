use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::{lock_ignore_poison, log_debug, RequestId, Result, RpcError};

/// Registry shared between the send path, the reply handlers and the timers.
pub(crate) type SharedPending<V> = Arc<Mutex<PendingRequests<V>>>;

/// Settlement record of one in-flight request.
struct PendingRequest<V> {
    tx: oneshot::Sender<Result<V>>,
    timer: Option<JoinHandle<()>>,
}

/// Tracks requests waiting for a response, fault or timeout.
///
/// Maps request ids to oneshot channels. Every settlement path (response,
/// fault, timeout) goes through [`settle`](Self::settle), which removes the
/// entry, disarms its timer and delivers the outcome in one step. Whichever
/// path gets there first wins; later ones find no entry.
pub(crate) struct PendingRequests<V> {
    // ---
    requests: HashMap<RequestId, PendingRequest<V>>,
}

impl<V> PendingRequests<V> {
    // ---

    /// Create a new empty pending requests tracker
    pub fn new() -> Self {
        Self {
            requests: HashMap::new(),
        }
    }

    /// Register a new pending request
    ///
    /// Returns a receiver that is notified exactly once when the request
    /// settles.
    pub fn register(&mut self, request_id: RequestId) -> oneshot::Receiver<Result<V>> {
        // ---
        let (tx, rx) = oneshot::channel();
        self.requests
            .insert(request_id, PendingRequest { tx, timer: None });
        rx
    }

    /// Attach a timer to a pending request.
    ///
    /// If the request already settled the timer is aborted and `false` is
    /// returned.
    pub fn arm(&mut self, request_id: &RequestId, timer: JoinHandle<()>) -> bool {
        // ---
        match self.requests.get_mut(request_id) {
            Some(entry) => {
                if let Some(previous) = entry.timer.replace(timer) {
                    previous.abort();
                }
                true
            }
            None => {
                timer.abort();
                false
            }
        }
    }

    /// Settle a pending request with `outcome`, at most once.
    ///
    /// Returns true if the request was still pending. Unknown or already
    /// settled ids are ignored.
    pub fn settle(&mut self, request_id: &RequestId, outcome: Result<V>) -> bool {
        // ---
        let Some(entry) = self.requests.remove(request_id) else {
            return false;
        };

        if let Some(timer) = entry.timer {
            timer.abort();
        }

        // Ignore if the caller stopped waiting
        if entry.tx.send(outcome).is_err() {
            log_debug!("request {request_id} settled after its caller went away");
        }
        true
    }

    /// Remove a pending request without delivering anything.
    pub fn cancel(&mut self, request_id: &RequestId) -> bool {
        // ---
        match self.requests.remove(request_id) {
            Some(entry) => {
                if let Some(timer) = entry.timer {
                    timer.abort();
                }
                true
            }
            None => false,
        }
    }

    /// Get the number of pending requests
    pub fn len(&self) -> usize {
        self.requests.len()
    }
}

/// Start the timeout timer of `request_id`.
///
/// After `timeout` elapses the request is settled with
/// [`RpcError::Timeout`], unless another path settled it first.
pub(crate) fn arm_timeout<V>(pending: &SharedPending<V>, request_id: RequestId, timeout: Duration)
where
    V: Send + 'static,
{
    // ---
    let weak: Weak<Mutex<PendingRequests<V>>> = Arc::downgrade(pending);
    let timer_id = request_id.clone();

    let timer = tokio::spawn(async move {
        tokio::time::sleep(timeout).await;

        if let Some(pending) = weak.upgrade() {
            let settled = lock_ignore_poison(&pending).settle(&timer_id, Err(RpcError::Timeout(timeout)));
            if settled {
                log_debug!("request {timer_id} timed out after {timeout:?}");
            }
        }
    });

    lock_ignore_poison(pending).arm(&request_id, timer);
}

/// Removes the entry of a request whose caller stopped waiting.
pub(crate) struct PendingGuard<V> {
    pending: SharedPending<V>,
    request_id: RequestId,
}

impl<V> PendingGuard<V> {
    pub fn new(pending: SharedPending<V>, request_id: RequestId) -> Self {
        Self {
            pending,
            request_id,
        }
    }
}

impl<V> Drop for PendingGuard<V> {
    fn drop(&mut self) {
        lock_ignore_poison(&self.pending).cancel(&self.request_id);
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn shared() -> SharedPending<String> {
        Arc::new(Mutex::new(PendingRequests::new()))
    }

    #[test]
    fn test_register_and_settle() {
        // ---
        let mut pending = PendingRequests::new();
        let request_id = RequestId::generate();

        let rx = pending.register(request_id.clone());
        assert_eq!(pending.len(), 1);

        assert!(pending.settle(&request_id, Ok("response".to_string())));

        // Should be removed after settlement
        assert_eq!(pending.len(), 0);

        let received = rx.blocking_recv().unwrap().unwrap();
        assert_eq!(received, "response");
    }

    #[test]
    fn test_settles_at_most_once() {
        // ---
        let mut pending = PendingRequests::new();
        let request_id = RequestId::generate();
        let rx = pending.register(request_id.clone());

        assert!(pending.settle(&request_id, Err(RpcError::Transport("first".into()))));
        assert!(!pending.settle(&request_id, Ok("second".to_string())));

        let outcome = rx.blocking_recv().unwrap();
        assert!(matches!(outcome, Err(RpcError::Transport(msg)) if msg == "first"));
    }

    #[test]
    fn test_settle_unknown_id_leaves_others_alone() {
        // ---
        let mut pending = PendingRequests::new();
        let known = RequestId::generate();
        let _rx = pending.register(known.clone());

        assert!(!pending.settle(&RequestId::generate(), Ok("stray".to_string())));
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_cancel() {
        // ---
        let mut pending = PendingRequests::<String>::new();
        let request_id = RequestId::generate();

        let _rx = pending.register(request_id.clone());
        assert!(pending.cancel(&request_id));
        assert_eq!(pending.len(), 0);

        // Second cancel should return false
        assert!(!pending.cancel(&request_id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_settles_with_duration() {
        // ---
        let pending = shared();
        let request_id = RequestId::generate();
        let rx = lock_ignore_poison(&pending).register(request_id.clone());

        arm_timeout(&pending, request_id, Duration::from_millis(250));

        let outcome = rx.await.unwrap();
        match outcome {
            Err(RpcError::Timeout(d)) => assert_eq!(d, Duration::from_millis(250)),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(lock_ignore_poison(&pending).len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_disarms_timer() {
        // ---
        let pending = shared();
        let request_id = RequestId::generate();
        let mut rx = lock_ignore_poison(&pending).register(request_id.clone());

        arm_timeout(&pending, request_id.clone(), Duration::from_millis(100));
        assert!(lock_ignore_poison(&pending).settle(&request_id, Ok("fast".to_string())));

        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(rx.try_recv().unwrap().unwrap(), "fast");
        assert_eq!(lock_ignore_poison(&pending).len(), 0);
    }

    #[tokio::test]
    async fn test_guard_removes_abandoned_request() {
        // ---
        let pending = shared();
        let request_id = RequestId::generate();
        let _rx = lock_ignore_poison(&pending).register(request_id.clone());

        {
            let _guard = PendingGuard::new(pending.clone(), request_id);
        }

        assert_eq!(lock_ignore_poison(&pending).len(), 0);
    }
}
