//! Lifecycle of the shared graph store connection.
//!
//! A [`GraphDriver`] is constructed once at startup, owns one
//! [`GraphStore`], and is handed to every component that talks to the graph.
//!
//! ```text
//! Uninitialized ──connect──▶ Initializing ──ok──▶ Ready ──close──▶ Closed
//!                                  │                                 ▲
//!                                  └──err──▶ Failed ──close──────────┘
//! ```
//!
//! A failed connectivity check is surfaced, never retried automatically;
//! calling [`GraphDriver::connect`] again is the explicit retry. Closing is
//! idempotent.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::error::WriteError;
use crate::store::GraphStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Uninitialized => "uninitialized",
            ConnectionState::Initializing => "initializing",
            ConnectionState::Ready => "ready",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Owner of the graph store handle and its connection state.
pub struct GraphDriver {
    store: Arc<dyn GraphStore>,
    state: Mutex<ConnectionState>,
}

impl GraphDriver {
    /// Wrap a store without touching it. The driver starts `Uninitialized`.
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            store,
            state: Mutex::new(ConnectionState::Uninitialized),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> ConnectionState {
        *self.lock()
    }

    /// Verify connectivity and move to `Ready`.
    ///
    /// A no-op when already ready. Fails with `NotReady` when closed or when
    /// another caller is mid-initialisation.
    pub async fn connect(&self) -> Result<(), WriteError> {
        {
            let mut state = self.lock();
            match *state {
                ConnectionState::Ready => return Ok(()),
                ConnectionState::Closed | ConnectionState::Initializing => {
                    return Err(WriteError::NotReady(*state))
                }
                ConnectionState::Uninitialized | ConnectionState::Failed => {
                    *state = ConnectionState::Initializing;
                }
            }
        }

        let result = self.store.verify_connectivity().await;
        let mut state = self.lock();
        match result {
            Ok(()) => {
                // close() may have won the race while we were verifying.
                if *state == ConnectionState::Initializing {
                    *state = ConnectionState::Ready;
                    tracing::info!("graph store connection ready");
                    Ok(())
                } else {
                    Err(WriteError::NotReady(*state))
                }
            }
            Err(e) => {
                if *state == ConnectionState::Initializing {
                    *state = ConnectionState::Failed;
                }
                tracing::warn!(error = %e, "graph store connectivity check failed");
                Err(WriteError::Connectivity(e))
            }
        }
    }

    /// The store, if the connection is ready.
    pub fn store(&self) -> Result<&Arc<dyn GraphStore>, WriteError> {
        match self.state() {
            ConnectionState::Ready => Ok(&self.store),
            other => Err(WriteError::NotReady(other)),
        }
    }

    /// Close the connection. Closing twice is a no-op.
    pub async fn close(&self) -> Result<(), WriteError> {
        let previous = {
            let mut state = self.lock();
            std::mem::replace(&mut *state, ConnectionState::Closed)
        };
        match previous {
            ConnectionState::Closed => Ok(()),
            ConnectionState::Ready => {
                self.store.close().await?;
                tracing::info!("graph store connection closed");
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for GraphDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphDriver")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
