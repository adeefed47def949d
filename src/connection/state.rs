//! Lifecycle state shared by every clone of a connection.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

use super::reader::ReaderSlot;
use crate::metrics;

/// Last observed state of a [`crate::Connection`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never opened.
    #[default]
    Disconnected,
    /// Socket established; receives and sends are allowed.
    Open,
    /// A graceful close is in progress.
    Closing,
    /// Closed locally or by the peer. The connection may be opened again.
    Closed,
}

/// Receive side of one opened socket.
#[derive(Clone)]
pub(super) struct Session {
    pub(super) generation: u64,
    pub(super) reader: Arc<tokio::sync::Mutex<ReaderSlot>>,
    /// Fires when the session is torn down locally.
    pub(super) closed: CancellationToken,
}

#[derive(Default)]
struct Inner {
    state: ConnectionState,
    generation: u64,
    session: Option<Session>,
}

/// State machine guarded by a short synchronous lock.
#[derive(Default)]
pub(super) struct StateCell(Mutex<Inner>);

impl StateCell {
    fn lock(&self) -> MutexGuard<'_, Inner> { self.0.lock().unwrap_or_else(PoisonError::into_inner) }

    pub(super) fn get(&self) -> ConnectionState { self.lock().state }

    /// The current session, if the connection is open.
    pub(super) fn open_session(&self) -> Option<Session> {
        let inner = self.lock();
        match inner.state {
            ConnectionState::Open => inner.session.clone(),
            _ => None,
        }
    }

    /// Install a freshly connected reader and move to `Open`.
    pub(super) fn install(&self, reader: ReaderSlot) -> u64 {
        let mut inner = self.lock();
        inner.generation += 1;
        let generation = inner.generation;
        if let Some(stale) = inner.session.replace(Session {
            generation,
            reader: Arc::new(tokio::sync::Mutex::new(reader)),
            closed: CancellationToken::new(),
        }) {
            stale.closed.cancel();
        }
        inner.state = ConnectionState::Open;
        metrics::inc_connections();
        generation
    }

    /// Move `Open` to `Closing`. Returns false when there is nothing to close.
    pub(super) fn begin_close(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            ConnectionState::Open => {
                inner.state = ConnectionState::Closing;
                true
            }
            ConnectionState::Closing => true,
            ConnectionState::Disconnected | ConnectionState::Closed => false,
        }
    }

    /// Drop the receive side and wake anything waiting on it.
    pub(super) fn take_session(&self) {
        if let Some(session) = self.lock().session.take() {
            session.closed.cancel();
        }
    }

    /// Finish a local close.
    pub(super) fn finish_close(&self) {
        let mut inner = self.lock();
        Self::mark_closed(&mut inner);
        if let Some(session) = inner.session.take() {
            session.closed.cancel();
        }
    }

    /// Record the peer's close frame for `generation`.
    ///
    /// Ignored when the connection was reopened in the meantime. Returns
    /// true if this call moved the state to `Closed`.
    pub(super) fn observe_peer_close(&self, generation: u64) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            return false;
        }
        Self::mark_closed(&mut inner)
    }

    fn mark_closed(inner: &mut Inner) -> bool {
        let was_live = matches!(
            inner.state,
            ConnectionState::Open | ConnectionState::Closing
        );
        inner.state = ConnectionState::Closed;
        if was_live {
            metrics::dec_connections();
        }
        was_live
    }
}
