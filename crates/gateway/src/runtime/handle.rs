//! Per-run control handle.
//!
//! One cancellation token plus two single-slot signal channels
//! (pause/resume) and an approval slot. Signal sends are non-blocking and
//! drop-if-full: concurrent pause requests are idempotent. The executor is
//! the only receiver; control surfaces only ever send.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

/// The human decision that unblocks a consent checkpoint.
#[derive(Debug)]
pub enum ApprovalDecision {
    Approved,
    Denied { reason: Option<String> },
}

pub struct RunHandle {
    pub cancel: CancellationToken,
    pause_tx: mpsc::Sender<()>,
    resume_tx: mpsc::Sender<()>,
    pause_rx: Mutex<mpsc::Receiver<()>>,
    resume_rx: Mutex<mpsc::Receiver<()>>,
    approval: parking_lot::Mutex<Option<oneshot::Sender<ApprovalDecision>>>,
    paused: AtomicBool,
}

impl RunHandle {
    pub fn new() -> Arc<Self> {
        let (pause_tx, pause_rx) = mpsc::channel(1);
        let (resume_tx, resume_rx) = mpsc::channel(1);
        Arc::new(Self {
            cancel: CancellationToken::new(),
            pause_tx,
            resume_tx,
            pause_rx: Mutex::new(pause_rx),
            resume_rx: Mutex::new(resume_rx),
            approval: parking_lot::Mutex::new(None),
            paused: AtomicBool::new(false),
        })
    }

    // ── Control side ──────────────────────────────────────────────

    /// Raise the pause signal. Dropped if one is already pending.
    pub fn request_pause(&self) {
        let _ = self.pause_tx.try_send(());
    }

    /// Raise the resume signal. Dropped if one is already pending.
    pub fn request_resume(&self) {
        let _ = self.resume_tx.try_send(());
    }

    /// Resolve a pending consent checkpoint. Returns false when no
    /// checkpoint is waiting.
    pub fn resolve_approval(&self, approved: bool, reason: Option<String>) -> bool {
        let Some(tx) = self.approval.lock().take() else {
            return false;
        };
        let decision = if approved {
            ApprovalDecision::Approved
        } else {
            ApprovalDecision::Denied { reason }
        };
        tx.send(decision).is_ok()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn awaiting_approval(&self) -> bool {
        self.approval.lock().is_some()
    }

    // ── Executor side ─────────────────────────────────────────────

    /// Non-blocking check for a pending pause signal.
    pub async fn pause_pending(&self) -> bool {
        self.pause_rx.lock().await.try_recv().is_ok()
    }

    /// Wait for the next resume signal. Only the executor calls this;
    /// cancellation is raced at the call site.
    pub async fn recv_resume(&self) {
        self.resume_rx.lock().await.recv().await;
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    /// Open a consent checkpoint, replacing any stale one.
    pub fn begin_checkpoint(&self) -> oneshot::Receiver<ApprovalDecision> {
        let (tx, rx) = oneshot::channel();
        *self.approval.lock() = Some(tx);
        rx
    }

    /// Drop any pending checkpoint without resolving it.
    pub fn clear_checkpoint(&self) {
        self.approval.lock().take();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
