use std::io::Read;
use std::sync::Arc;
use tokio::sync::watch;

/// A readable payload source (plain file or in-memory archive).
pub type DataSource = Box<dyn Read + Send>;

/// A progress sample emitted after each payload chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub bytes: u64,
    pub total: u64,
}

impl Progress {
    pub fn ratio(&self) -> f32 {
        if self.total == 0 {
            1.0
        } else {
            self.bytes as f32 / self.total as f32
        }
    }
}

/// Cancellation token shared by all tasks of one session.
///
/// Any task may call [`trigger`](CloseSignal::trigger); every task loop
/// selects on [`closed`](CloseSignal::closed) and releases its transport or
/// stream on the way out.
#[derive(Clone)]
pub struct CloseSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CloseSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Request teardown. Idempotent.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once teardown has been requested.
    pub async fn closed(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}
