use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

/// Creates a linked close signal pair.
///
/// Nothing is ever sent over the signal: it fires when the [`Closer`] is closed or dropped, and
/// every [`CloseNotify`] cloned from the pair observes it permanently from then on.
pub fn close_signal() -> (Closer, CloseNotify) {
    let (tx, rx) = bounded(0);
    (Closer { _tx: tx }, CloseNotify { rx })
}

/// The firing side of a close signal.
#[derive(Debug)]
pub struct Closer {
    _tx: Sender<()>,
}

impl Closer {
    /// Fires the close signal.
    pub fn close(self) {}
}

/// The observing side of a close signal.
#[derive(Clone, Debug)]
pub struct CloseNotify {
    rx: Receiver<()>,
}

impl CloseNotify {
    /// Returns `true` if the close signal has fired.
    pub fn is_closed(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Waits up to `timeout` for the close signal, returning `true` if it fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        matches!(self.rx.recv_timeout(timeout), Err(RecvTimeoutError::Disconnected))
    }

    pub(crate) fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}
