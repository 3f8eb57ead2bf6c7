//! Cross-thread coordination for running many [`Continuation`]s at once
//! (§5 "Interpreter: cooperative, multi-threaded"; §9 "Cross-thread
//! wake-up"; §10's notifier-abstraction supplement).
//!
//! Three worker roles share the types in this module:
//! - the **driver** thread repeatedly calls [`ConnectionContext::drive_once`]
//!   on every connection in the current [`InterpreterCollectionManager`]
//!   snapshot;
//! - the **callback** thread drains [`ConnectionContext::take_callback_request`]
//!   and eventually calls [`ConnectionContext::deliver_callback_response`];
//! - **transport** threads push bytes in via [`ConnectionContext::feed_input`]
//!   and pull bytes out via [`ConnectionContext::drain_output`].
//!
//! None of the three ever lock more than one connection's mutex at a time,
//! and none ever block a thread on another connection's progress — a
//! connection that is `WaitingForCallback` just sits in the snapshot
//! reporting no progress until its response arrives.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::continuation::{Continuation, ContinuationState};
use crate::frame::ReasonForBlockedOperation;
use crate::value::{RuntimeErrorKind, Value};

/// One-shot/level-triggered wake-up backing a bounded queue (§9): producer
/// threads call [`Notifier::notify`] after pushing work, the consumer
/// thread awaits [`Notifier::notified`] instead of spinning. Replaces the
/// reference interpreter's raw condvars with `tokio::sync::Notify`, which
/// coalesces redundant wake-ups the same way a level-triggered condvar
/// does (a notify with no waiter is not lost, it primes the next `await`).
#[derive(Default)]
pub struct Notifier {
    inner: tokio::sync::Notify,
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            inner: tokio::sync::Notify::new(),
        }
    }

    pub fn notify(&self) {
        self.inner.notify_one();
    }

    pub fn notify_all_waiters(&self) {
        self.inner.notify_waiters();
    }

    pub async fn notified(&self) {
        self.inner.notified().await;
    }
}

/// A host-function invocation a [`Continuation`] is blocked on, queued for
/// the callback thread. `sequence` is assigned in request order by the
/// owning [`ConnectionContext`], giving the FIFO-per-continuation ordering
/// §5 requires ("callback returns are matched to the oldest outstanding
/// request of the same continuation").
#[derive(Debug, Clone)]
pub struct CallbackRequest {
    pub sequence: u64,
    pub name: String,
    pub arguments: Vec<Value>,
}

/// The callback thread's answer to a [`CallbackRequest`], matched back to
/// its continuation by `sequence`.
#[derive(Debug, Clone)]
pub struct CallbackResponse {
    pub sequence: u64,
    pub value: Value,
}

/// What [`ConnectionContext::drive_once`] accomplished on one call.
#[derive(Debug, Clone, PartialEq)]
pub enum DriveOutcome {
    /// The continuation made progress and can be driven again immediately.
    Progressed,
    /// Blocked waiting for more input bytes, output drain, or a callback
    /// response that hasn't arrived yet; nothing more to do this round.
    Idle(ReasonForBlockedOperation),
    /// The continuation ran to completion.
    Exited(Value),
}

/// Per-connection interpreter state: input/output byte buffers, callback
/// request/response queues, EOF/exited flags, and the [`Continuation`]
/// itself — all behind one mutex per field group, matching §5's "All
/// cross-thread access is protected by a mutex with a condition-variable
/// wake-up." Transport threads touch `input`/`output`; the callback thread
/// touches the callback queues; the driver thread touches `continuation`.
pub struct ConnectionContext {
    id: u64,
    continuation: Mutex<Continuation>,
    input: Mutex<VecDeque<u8>>,
    output: Mutex<VecDeque<u8>>,
    callback_requests: Mutex<VecDeque<CallbackRequest>>,
    callback_responses: Mutex<VecDeque<CallbackResponse>>,
    next_callback_sequence: AtomicU64,
    pending_request_sequence: Mutex<Option<u64>>,
    eof: AtomicBool,
    exited: AtomicBool,
    /// Signals the driver thread that input, a callback response, or an
    /// output-buffer drain is ready to be consumed.
    pub driver_wake: Notifier,
    /// Signals the callback thread that a new request was enqueued.
    pub callback_wake: Notifier,
}

impl ConnectionContext {
    pub fn new(id: u64, continuation: Continuation) -> Arc<Self> {
        Arc::new(Self {
            id,
            continuation: Mutex::new(continuation),
            input: Mutex::new(VecDeque::new()),
            output: Mutex::new(VecDeque::new()),
            callback_requests: Mutex::new(VecDeque::new()),
            callback_responses: Mutex::new(VecDeque::new()),
            next_callback_sequence: AtomicU64::new(0),
            pending_request_sequence: Mutex::new(None),
            eof: AtomicBool::new(false),
            exited: AtomicBool::new(false),
            driver_wake: Notifier::new(),
            callback_wake: Notifier::new(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    /// A transport thread appends freshly-read bytes and wakes the driver.
    pub fn feed_input(&self, bytes: &[u8]) {
        self.input.lock().expect("input mutex poisoned").extend(bytes);
        self.driver_wake.notify();
    }

    /// A transport thread tells this connection its peer closed its half.
    /// A frame already `WaitingForRead` with nothing left buffered fails
    /// with a `ProtocolMismatch` on the next `drive_once` (§4.6); a frame
    /// that never needed more bytes is unaffected.
    pub fn signal_eof(&self) {
        self.eof.store(true, Ordering::Release);
        self.driver_wake.notify();
    }

    /// A transport thread drains everything currently queued for the wire.
    pub fn drain_output(&self) -> Vec<u8> {
        let mut out = self.output.lock().expect("output mutex poisoned");
        out.drain(..).collect()
    }

    /// The callback thread's next request to service, oldest first.
    pub fn take_callback_request(&self) -> Option<CallbackRequest> {
        self.callback_requests
            .lock()
            .expect("callback_requests mutex poisoned")
            .pop_front()
    }

    /// The callback thread hands back a host function's result; the driver
    /// picks it up on its next `drive_once` and resumes the continuation
    /// that asked for it.
    pub fn deliver_callback_response(&self, response: CallbackResponse) {
        self.callback_responses
            .lock()
            .expect("callback_responses mutex poisoned")
            .push_back(response);
        self.driver_wake.notify();
    }

    /// Advances this connection's continuation as far as it can go without
    /// new external input, servicing exactly one blocking reason at a time
    /// so the driver can fairly round-robin many connections.
    pub fn drive_once(&self) -> DriveOutcome {
        if self.exited.load(Ordering::Acquire) {
            return DriveOutcome::Exited(
                self.continuation
                    .lock()
                    .expect("continuation mutex poisoned")
                    .get_result()
                    .cloned()
                    .unwrap_or(Value::Bool(false)),
            );
        }
        let mut cont = self.continuation.lock().expect("continuation mutex poisoned");
        match cont.step() {
            ContinuationState::Ready => DriveOutcome::Progressed,
            ContinuationState::Exited => {
                self.exited.store(true, Ordering::Release);
                DriveOutcome::Exited(cont.get_result().cloned().unwrap_or(Value::Bool(false)))
            }
            ContinuationState::Blocked(ReasonForBlockedOperation::WaitingForRead) => {
                let mut input = self.input.lock().expect("input mutex poisoned");
                if input.is_empty() {
                    if self.eof.load(Ordering::Acquire) {
                        drop(input);
                        cont.fail(RuntimeErrorKind::ProtocolMismatch(
                            "peer closed the connection while a read was pending".to_string(),
                        ));
                        self.exited.store(true, Ordering::Release);
                        return DriveOutcome::Exited(cont.get_result().cloned().unwrap_or(Value::Bool(false)));
                    }
                    return DriveOutcome::Idle(ReasonForBlockedOperation::WaitingForRead);
                }
                let bytes: Vec<u8> = input.drain(..).collect();
                cont.handle_read(&bytes);
                DriveOutcome::Progressed
            }
            ContinuationState::Blocked(ReasonForBlockedOperation::WaitingForWrite) => {
                let pending = cont.get_write_buffer().to_vec();
                if pending.is_empty() {
                    return DriveOutcome::Idle(ReasonForBlockedOperation::WaitingForWrite);
                }
                self.output.lock().expect("output mutex poisoned").extend(pending.iter().copied());
                cont.handle_write(pending.len());
                DriveOutcome::Progressed
            }
            ContinuationState::Blocked(ReasonForBlockedOperation::WaitingForCallback) => {
                let mut responses = self
                    .callback_responses
                    .lock()
                    .expect("callback_responses mutex poisoned");
                let mut pending_seq = self
                    .pending_request_sequence
                    .lock()
                    .expect("pending_request_sequence mutex poisoned");
                if let Some(seq) = *pending_seq {
                    if let Some(pos) = responses.iter().position(|r| r.sequence == seq) {
                        let response = responses.remove(pos).expect("position just found");
                        *pending_seq = None;
                        cont.set_callback_return(response.value);
                        return DriveOutcome::Progressed;
                    }
                    return DriveOutcome::Idle(ReasonForBlockedOperation::WaitingForCallback);
                }
                let Some(name) = cont.get_callback_key().map(str::to_string) else {
                    return DriveOutcome::Idle(ReasonForBlockedOperation::WaitingForCallback);
                };
                let arguments = cont.get_callback_arguments().map(<[Value]>::to_vec).unwrap_or_default();
                let sequence = self.next_callback_sequence.fetch_add(1, Ordering::AcqRel);
                *pending_seq = Some(sequence);
                drop(pending_seq);
                drop(responses);
                self.callback_requests
                    .lock()
                    .expect("callback_requests mutex poisoned")
                    .push_back(CallbackRequest { sequence, name, arguments });
                self.callback_wake.notify();
                DriveOutcome::Idle(ReasonForBlockedOperation::WaitingForCallback)
            }
        }
    }
}

/// An atomic, versioned snapshot of the active connection set (§5: "A
/// global 'interpreter collection manager' provides an atomic, versioned
/// snapshot of the active connection set so the driver can iterate without
/// tearing while connections are added/removed"). The driver thread calls
/// [`snapshot`](Self::snapshot) once per sweep and iterates the returned
/// `Vec` without holding the manager's lock, so `add`/`remove` calls from
/// other threads never block the driver mid-sweep.
pub struct InterpreterCollectionManager {
    connections: Mutex<Vec<Arc<ConnectionContext>>>,
    version: AtomicU64,
    exit_when_done: AtomicBool,
}

impl Default for InterpreterCollectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl InterpreterCollectionManager {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(Vec::new()),
            version: AtomicU64::new(0),
            exit_when_done: AtomicBool::new(false),
        }
    }

    pub fn add(&self, connection: Arc<ConnectionContext>) {
        let mut connections = self.connections.lock().expect("connections mutex poisoned");
        connections.push(connection);
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    pub fn remove(&self, id: u64) {
        let mut connections = self.connections.lock().expect("connections mutex poisoned");
        connections.retain(|c| c.id() != id);
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    /// A cheap clone of `Arc` handles plus the version they were taken at.
    /// Cloning `Arc`s (not the connections themselves) keeps this snapshot
    /// O(n) in connection count, not connection state size.
    pub fn snapshot(&self) -> (Vec<Arc<ConnectionContext>>, u64) {
        let connections = self.connections.lock().expect("connections mutex poisoned");
        (connections.clone(), self.version.load(Ordering::Acquire))
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Requests a graceful shutdown: the driver loop (see
    /// [`run_driver_sweep`]) exits once every connection in the current
    /// snapshot is either exited or has no pending work, rather than
    /// stopping mid-continuation (§5 "Cancellation and timeouts").
    pub fn request_exit_when_done(&self) {
        self.exit_when_done.store(true, Ordering::Release);
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_when_done.load(Ordering::Acquire)
    }
}

/// One driver-thread sweep over the current snapshot: drive every
/// connection until it stops making immediate progress, removing any that
/// exited. Returns `true` if every connection present at the start of the
/// sweep has since exited (the condition [`InterpreterCollectionManager::request_exit_when_done`]
/// waits for before the driver thread stops).
pub fn run_driver_sweep(manager: &InterpreterCollectionManager) -> bool {
    let (connections, _version) = manager.snapshot();
    let mut all_exited = true;
    for conn in &connections {
        loop {
            match conn.drive_once() {
                DriveOutcome::Progressed => continue,
                DriveOutcome::Idle(_) => {
                    all_exited = false;
                    break;
                }
                DriveOutcome::Exited(_) => {
                    manager.remove(conn.id());
                    break;
                }
            }
        }
    }
    all_exited
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optree::{OpTreeNode, Opcode};

    fn callback_tree() -> OpTreeNode {
        OpTreeNode::with_children(
            Opcode::InvokeHost { name: "lookup".to_string() },
            vec![OpTreeNode::leaf(Opcode::LiteralInt(7))],
        )
    }

    #[test]
    fn drive_once_enqueues_a_callback_request_then_resumes_on_response() {
        let ctx = ConnectionContext::new(1, Continuation::new(callback_tree()));
        assert_eq!(
            ctx.drive_once(),
            DriveOutcome::Idle(ReasonForBlockedOperation::WaitingForCallback)
        );
        let request = ctx.take_callback_request().expect("request enqueued");
        assert_eq!(request.name, "lookup");
        assert_eq!(request.arguments, vec![Value::Int(7)]);

        ctx.deliver_callback_response(CallbackResponse {
            sequence: request.sequence,
            value: Value::Bool(true),
        });
        assert_eq!(ctx.drive_once(), DriveOutcome::Progressed);
        assert_eq!(ctx.drive_once(), DriveOutcome::Exited(Value::Bool(true)));
        assert!(ctx.is_exited());
    }

    #[test]
    fn drive_once_ignores_a_response_for_a_different_sequence() {
        let ctx = ConnectionContext::new(2, Continuation::new(callback_tree()));
        ctx.drive_once();
        let request = ctx.take_callback_request().expect("request enqueued");

        ctx.deliver_callback_response(CallbackResponse {
            sequence: request.sequence + 1,
            value: Value::Bool(true),
        });
        assert_eq!(
            ctx.drive_once(),
            DriveOutcome::Idle(ReasonForBlockedOperation::WaitingForCallback)
        );
    }

    #[test]
    fn drive_once_reads_terminator_delimited_input_across_feeds() {
        let tree = OpTreeNode::leaf(Opcode::ReadUntilTerminator {
            terminator: bytes::Bytes::from_static(b"\r\n"),
        });
        let ctx = ConnectionContext::new(3, Continuation::new(tree));
        assert_eq!(
            ctx.drive_once(),
            DriveOutcome::Idle(ReasonForBlockedOperation::WaitingForRead)
        );
        ctx.feed_input(b"hello");
        assert_eq!(ctx.drive_once(), DriveOutcome::Progressed);
        assert_eq!(
            ctx.drive_once(),
            DriveOutcome::Idle(ReasonForBlockedOperation::WaitingForRead)
        );
        ctx.feed_input(b"\r\n");
        assert_eq!(ctx.drive_once(), DriveOutcome::Progressed);
        match ctx.drive_once() {
            DriveOutcome::Exited(Value::Octets(bytes)) => assert_eq!(&bytes[..], b"hello"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn signal_eof_fails_a_connection_blocked_on_read() {
        let tree = OpTreeNode::leaf(Opcode::ReadUntilTerminator {
            terminator: bytes::Bytes::from_static(b"\r\n"),
        });
        let ctx = ConnectionContext::new(4, Continuation::new(tree));
        assert_eq!(
            ctx.drive_once(),
            DriveOutcome::Idle(ReasonForBlockedOperation::WaitingForRead)
        );
        ctx.signal_eof();
        match ctx.drive_once() {
            DriveOutcome::Exited(Value::Error(RuntimeErrorKind::ProtocolMismatch(_))) => {}
            other => panic!("unexpected {other:?}"),
        }
        assert!(ctx.is_exited());
    }

    #[test]
    fn collection_manager_snapshot_excludes_removed_connections() {
        let manager = InterpreterCollectionManager::new();
        let a = ConnectionContext::new(1, Continuation::new(OpTreeNode::leaf(Opcode::LiteralInt(1))));
        let b = ConnectionContext::new(2, Continuation::new(OpTreeNode::leaf(Opcode::LiteralInt(2))));
        manager.add(a);
        manager.add(b);
        assert_eq!(manager.snapshot().0.len(), 2);

        manager.remove(1);
        let (remaining, _) = manager.snapshot();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id(), 2);
    }

    #[test]
    fn driver_sweep_runs_literals_to_completion_and_prunes_them() {
        let manager = InterpreterCollectionManager::new();
        manager.add(ConnectionContext::new(
            1,
            Continuation::new(OpTreeNode::leaf(Opcode::LiteralInt(42))),
        ));
        let all_exited = run_driver_sweep(&manager);
        assert!(all_exited);
        assert_eq!(manager.snapshot().0.len(), 0);
    }

    #[test]
    fn exit_when_done_flag_round_trips() {
        let manager = InterpreterCollectionManager::new();
        assert!(!manager.exit_requested());
        manager.request_exit_when_done();
        assert!(manager.exit_requested());
    }

    #[tokio::test]
    async fn notifier_wakes_a_waiting_task() {
        let notifier = Arc::new(Notifier::new());
        let waiter = Arc::clone(&notifier);
        let handle = tokio::spawn(async move {
            waiter.notified().await;
            true
        });
        tokio::task::yield_now().await;
        notifier.notify();
        assert!(handle.await.expect("task did not panic"));
    }
}
