//! Agent bridge
//!
//! Entry point for talking to the local agent. The bridge hands out one
//! [`Session`] per role at a time; asking for a role that is already in
//! flight fails with [`BridgeError::Busy`] before any I/O happens.
//! Different roles run concurrently.

use crate::launcher::{AgentLauncher, CommandLauncher, NoopLauncher};
use crate::session::{ConnectOutcome, Session};
use crate::transport::AgentConnector;
use crate::websocket::WebSocketConnector;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokenbridge_core::{AgentRole, BridgeConfig, BridgeError, BridgeResult, Clock, TokioClock};
use tracing::{info, warn};

type InFlight = Arc<[AtomicBool; 5]>;

/// Holds a role's in-flight slot; released on drop
#[derive(Debug)]
pub(crate) struct InFlightGuard {
    slots: InFlight,
    role: AgentRole,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.slots[self.role.index()].store(false, Ordering::Release);
    }
}

/// Shared handle to the agent, cheap to clone
#[derive(Clone)]
pub struct AgentBridge {
    config: Arc<BridgeConfig>,
    connector: Arc<dyn AgentConnector>,
    launcher: Arc<dyn AgentLauncher>,
    clock: Arc<dyn Clock>,
    in_flight: InFlight,
}

impl fmt::Debug for AgentBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let busy: Vec<AgentRole> = AgentRole::ALL
            .into_iter()
            .filter(|role| self.is_busy(*role))
            .collect();
        f.debug_struct("AgentBridge")
            .field("config", &self.config)
            .field("busy", &busy)
            .finish_non_exhaustive()
    }
}

impl AgentBridge {
    /// Bridge over an arbitrary connector and launcher
    pub fn new(
        config: BridgeConfig,
        connector: Arc<dyn AgentConnector>,
        launcher: Arc<dyn AgentLauncher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            connector,
            launcher,
            clock,
            in_flight: Arc::new(Default::default()),
        }
    }

    /// Bridge over WebSocket endpoints from `config`, launching the agent
    /// with the configured command when one is set
    pub fn websocket(config: BridgeConfig) -> BridgeResult<Self> {
        config.validate()?;
        let connector = Arc::new(WebSocketConnector::new(config.endpoints.clone()));
        let launcher: Arc<dyn AgentLauncher> = match CommandLauncher::from_config(&config.launcher) {
            Some(launcher) => Arc::new(launcher),
            None => Arc::new(NoopLauncher),
        };
        Ok(Self::new(config, connector, launcher, Arc::new(TokioClock)))
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Clock shared by every session of this bridge
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Whether a session for `role` is currently held
    pub fn is_busy(&self, role: AgentRole) -> bool {
        self.in_flight[role.index()].load(Ordering::Acquire)
    }

    /// Claim `role` and return a disconnected session for it.
    ///
    /// Fails synchronously with [`BridgeError::Busy`] while another session
    /// for the same role is alive.
    pub fn session(&self, role: AgentRole) -> BridgeResult<Session> {
        let slot = &self.in_flight[role.index()];
        if slot
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(role = %role, "Rejected request: role already in flight");
            return Err(BridgeError::busy(role));
        }

        let guard = InFlightGuard {
            slots: Arc::clone(&self.in_flight),
            role,
        };
        Ok(Session::new(
            role,
            Arc::clone(&self.connector),
            Arc::clone(&self.clock),
            self.config.connect_timeout(),
        )
        .with_guard(guard))
    }

    /// Claim `role` and open its socket.
    ///
    /// When the endpoint is unreachable the agent launch is requested and
    /// [`BridgeError::AgentUnreachable`] returned; the request itself is not
    /// retried.
    pub async fn connect(&self, role: AgentRole) -> BridgeResult<Session> {
        let mut session = self.session(role)?;
        match session.connect().await? {
            ConnectOutcome::Connected => Ok(session),
            ConnectOutcome::Unreachable => {
                info!(role = %role, "Agent unreachable, requesting launch");
                if let Err(err) = self.launcher.launch(role).await {
                    warn!(role = %role, error = %err, "Agent launch failed");
                }
                Err(BridgeError::unreachable(role))
            }
        }
    }
}
