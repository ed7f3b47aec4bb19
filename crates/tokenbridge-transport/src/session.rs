//! Agent sessions
//!
//! A [`Session`] owns one socket to one agent role for one logical
//! operation. The wire format has no correlation id, so a session runs one
//! exchange at a time through an explicit phase machine:
//!
//! ```text
//! Idle ──set-cer──▶ AwaitingCertAck ──ack──▶ Idle
//! Idle ──upload / url-download / get-file──▶ AwaitingChunks ──chunk──▶ AwaitingCompletion
//! Idle ──get-cer / get-file-ids──▶ AwaitingReply
//! ```
//!
//! Starting an exchange while another is open is rejected synchronously.
//! Transfer exchanges additionally require a validated certificate. Every
//! error path closes the session before returning.

use crate::bridge::InFlightGuard;
use crate::transport::{AgentConnector, AgentTransport};
use futures::FutureExt;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokenbridge_core::{
    with_deadline, AgentCommand, AgentMessage, AgentRole, BridgeError, BridgeResult, Clock,
    InboundFrame, OutboundFrame,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Socket lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never dialled
    Disconnected,
    /// Dial in flight
    Connecting,
    /// Socket usable
    Open,
    /// Closed by either side; a new session is needed
    Closed,
}

/// Which reply the session is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangePhase {
    /// No request outstanding
    Idle,
    /// `set-cer` sent
    AwaitingCertAck,
    /// Transfer requested, no chunk yet
    AwaitingChunks,
    /// At least one chunk received, completion sentinel pending
    AwaitingCompletion,
    /// Text-only request sent (`get-cer`, `get-file-ids`)
    AwaitingReply,
}

/// Result of [`Session::connect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Socket open
    Connected,
    /// Endpoint did not open within the connect deadline; the agent is
    /// probably not running
    Unreachable,
}

/// One socket, one role, one exchange at a time
pub struct Session {
    id: Uuid,
    role: AgentRole,
    state: ConnectionState,
    phase: ExchangePhase,
    certificate_validated: bool,
    transport: Option<Box<dyn AgentTransport>>,
    connector: Arc<dyn AgentConnector>,
    clock: Arc<dyn Clock>,
    connect_timeout: Duration,
    _in_flight: Option<InFlightGuard>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("phase", &self.phase)
            .field("certificate_validated", &self.certificate_validated)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a disconnected session. Sessions handed out by
    /// [`AgentBridge`](crate::AgentBridge) also hold the role's in-flight slot.
    pub fn new(
        role: AgentRole,
        connector: Arc<dyn AgentConnector>,
        clock: Arc<dyn Clock>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            state: ConnectionState::Disconnected,
            phase: ExchangePhase::Idle,
            certificate_validated: false,
            transport: None,
            connector,
            clock,
            connect_timeout,
            _in_flight: None,
        }
    }

    pub(crate) fn with_guard(mut self, guard: InFlightGuard) -> Self {
        self._in_flight = Some(guard);
        self
    }

    /// Random id used in log fields
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> AgentRole {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn phase(&self) -> ExchangePhase {
        self.phase
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Whether `set-cer` succeeded on this socket
    pub fn certificate_validated(&self) -> bool {
        self.certificate_validated
    }

    pub(crate) fn mark_certificate_validated(&mut self) {
        self.certificate_validated = true;
    }

    pub(crate) fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Open the socket, bounded by the connect deadline.
    ///
    /// An endpoint that does not open (or refuses) resolves to
    /// [`ConnectOutcome::Unreachable`] rather than an error, leaving the
    /// session disconnected so the caller may retry.
    pub async fn connect(&mut self) -> BridgeResult<ConnectOutcome> {
        match self.state {
            ConnectionState::Open => return Ok(ConnectOutcome::Connected),
            ConnectionState::Connecting => return Err(BridgeError::busy(self.role)),
            ConnectionState::Closed => {
                return Err(BridgeError::protocol(format!(
                    "{} session {} is closed; open a new session",
                    self.role, self.id
                )))
            }
            ConnectionState::Disconnected => {}
        }

        self.state = ConnectionState::Connecting;
        let connector = Arc::clone(&self.connector);
        let clock = Arc::clone(&self.clock);
        let opened = with_deadline(&*clock, self.connect_timeout, connector.open(self.role)).await;

        match opened {
            Some(Ok(transport)) => {
                info!(
                    role = %self.role,
                    session = %self.id,
                    transport = transport.transport_type(),
                    "Agent session opened"
                );
                self.transport = Some(transport);
                self.state = ConnectionState::Open;
                Ok(ConnectOutcome::Connected)
            }
            Some(Err(err)) => {
                warn!(role = %self.role, session = %self.id, error = %err, "Agent endpoint refused");
                self.state = ConnectionState::Disconnected;
                Ok(ConnectOutcome::Unreachable)
            }
            None => {
                warn!(
                    role = %self.role,
                    session = %self.id,
                    timeout_ms = self.connect_timeout.as_millis() as u64,
                    "Agent endpoint did not open in time"
                );
                self.state = ConnectionState::Disconnected;
                Ok(ConnectOutcome::Unreachable)
            }
        }
    }

    /// Send a text command, opening the matching exchange.
    ///
    /// Transfer commands (`url-download`, `get-file`) are refused unless the
    /// certificate handshake succeeded on this session.
    pub async fn send_command(&mut self, command: AgentCommand) -> BridgeResult<()> {
        let phase = match &command {
            AgentCommand::SetCertificate { .. } => ExchangePhase::AwaitingCertAck,
            AgentCommand::UrlDownload { .. } | AgentCommand::GetFile => {
                self.require_certificate(command.name())?;
                ExchangePhase::AwaitingChunks
            }
            AgentCommand::GetCertificate | AgentCommand::GetFileIds { .. } => {
                ExchangePhase::AwaitingReply
            }
        };

        self.begin_exchange(phase)?;
        debug!(role = %self.role, session = %self.id, command = command.name(), "Sending command");
        self.send_frame(command.into_frame()).await
    }

    /// Upload raw file bytes for the agent to transform and stream back
    pub async fn send_upload(&mut self, bytes: Vec<u8>) -> BridgeResult<()> {
        self.require_certificate("upload")?;
        self.begin_exchange(ExchangePhase::AwaitingChunks)?;
        debug!(role = %self.role, session = %self.id, bytes = bytes.len(), "Uploading file");
        self.send_frame(OutboundFrame::Binary(bytes)).await
    }

    /// Next decoded message for the open exchange.
    ///
    /// Failure sentinels and certificate rejections close the session before
    /// they are returned, as does a socket that ends mid-exchange.
    pub async fn receive(&mut self) -> BridgeResult<AgentMessage> {
        if self.phase == ExchangePhase::Idle {
            return Err(BridgeError::protocol("receive with no request outstanding"));
        }

        let transport = self.open_transport()?;
        let frame = match transport.receive().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                let err = BridgeError::network(format!(
                    "{} agent closed the socket mid-exchange",
                    self.role
                ));
                return Err(self.fail(err).await);
            }
            Err(err) => return Err(self.fail(err).await),
        };

        let message = AgentMessage::decode(frame);
        match (&message, self.phase) {
            (AgentMessage::Chunk(_), ExchangePhase::AwaitingChunks) => {
                self.phase = ExchangePhase::AwaitingCompletion;
            }
            (AgentMessage::Chunk(_), ExchangePhase::AwaitingCompletion) => {}
            (AgentMessage::Chunk(bytes), phase) => {
                let err = BridgeError::protocol(format!(
                    "binary chunk of {} bytes while {phase:?}",
                    bytes.len()
                ));
                return Err(self.fail(err).await);
            }
            (message, _) if message.is_failure() => {
                warn!(
                    role = %self.role,
                    session = %self.id,
                    message = ?message,
                    "Agent reported failure"
                );
                self.close().await;
            }
            _ => {}
        }

        Ok(message)
    }

    /// [`receive`](Self::receive) bounded by `duration`; `Ok(None)` on timeout.
    /// The session stays open on timeout so the caller can decide.
    pub async fn receive_within(&mut self, duration: Duration) -> BridgeResult<Option<AgentMessage>> {
        let clock = Arc::clone(&self.clock);
        match with_deadline(&*clock, duration, self.receive()).await {
            Some(result) => result.map(Some),
            None => Ok(None),
        }
    }

    /// Return to Idle after the reply the exchange was waiting for
    pub fn finish_exchange(&mut self) {
        self.phase = ExchangePhase::Idle;
    }

    /// Close the socket. Idempotent; close errors are logged, not returned.
    pub async fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(err) = transport.close().await {
                debug!(role = %self.role, session = %self.id, error = %err, "Close failed");
            }
            info!(role = %self.role, session = %self.id, "Agent session closed");
        }
        self.state = ConnectionState::Closed;
        self.phase = ExchangePhase::Idle;
        self.certificate_validated = false;
    }

    /// Close and hand `err` back, for `return Err(session.fail(err).await)`
    pub async fn fail(&mut self, err: BridgeError) -> BridgeError {
        self.close().await;
        err
    }

    fn require_certificate(&self, what: &str) -> BridgeResult<()> {
        if self.certificate_validated {
            Ok(())
        } else {
            Err(BridgeError::protocol(format!(
                "{what} refused: certificate not validated on {} session",
                self.role
            )))
        }
    }

    fn begin_exchange(&mut self, phase: ExchangePhase) -> BridgeResult<()> {
        if self.state != ConnectionState::Open {
            return Err(BridgeError::protocol(format!(
                "{} session is {:?}, not open",
                self.role, self.state
            )));
        }
        if self.phase != ExchangePhase::Idle {
            return Err(BridgeError::busy(self.role));
        }
        self.drain_stray()?;
        self.phase = phase;
        Ok(())
    }

    /// Inspect frames that arrived between exchanges. A stray chunk cannot
    /// belong to the request about to be sent, and a failure sentinel means
    /// the agent already gave up on this session.
    fn drain_stray(&mut self) -> BridgeResult<()> {
        loop {
            let transport = self.open_transport()?;
            let pending = match transport.receive().now_or_never() {
                None => return Ok(()),
                Some(pending) => pending,
            };

            match pending {
                Ok(Some(InboundFrame::Binary(bytes))) => {
                    self.abandon();
                    return Err(BridgeError::protocol(format!(
                        "stray chunk of {} bytes before {} request",
                        bytes.len(),
                        self.role
                    )));
                }
                Ok(Some(InboundFrame::Text(text))) => match AgentMessage::decode_text(text) {
                    AgentMessage::Failure(failure) => {
                        warn!(
                            role = %self.role,
                            session = %self.id,
                            failure = %failure,
                            "Agent reported failure between requests"
                        );
                        self.abandon();
                        return Err(BridgeError::transfer(failure));
                    }
                    AgentMessage::CertificateRejected => {
                        self.abandon();
                        return Err(BridgeError::certificate_rejected(format!(
                            "{} agent rejected the certificate between requests",
                            self.role
                        )));
                    }
                    message => {
                        debug!(role = %self.role, session = %self.id, reply = message.kind(), "Discarding stray reply");
                    }
                },
                Ok(None) => {
                    self.abandon();
                    return Err(BridgeError::network(format!(
                        "{} agent closed the socket",
                        self.role
                    )));
                }
                Err(err) => {
                    self.abandon();
                    return Err(err);
                }
            }
        }
    }

    /// Synchronous teardown: dropping the transport closes the socket
    fn abandon(&mut self) {
        self.transport = None;
        self.state = ConnectionState::Closed;
        self.phase = ExchangePhase::Idle;
        self.certificate_validated = false;
        warn!(role = %self.role, session = %self.id, "Agent session abandoned");
    }

    async fn send_frame(&mut self, frame: OutboundFrame) -> BridgeResult<()> {
        let transport = self.open_transport()?;
        match transport.send(frame).await {
            Ok(()) => Ok(()),
            Err(err) => Err(self.fail(err).await),
        }
    }

    fn open_transport(&mut self) -> BridgeResult<&mut Box<dyn AgentTransport>> {
        let role = self.role;
        self.transport
            .as_mut()
            .ok_or_else(|| BridgeError::protocol(format!("{role} session has no open socket")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryConnector;
    use assert_matches::assert_matches;
    use tokenbridge_core::{AgentFailure, TokioClock};

    fn session(connector: &MemoryConnector, role: AgentRole) -> Session {
        Session::new(
            role,
            Arc::new(connector.clone()),
            Arc::new(TokioClock),
            Duration::from_secs(10),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn silent_endpoint_resolves_unreachable_after_deadline() {
        let connector = MemoryConnector::new();
        connector.silence(AgentRole::Encrypt);
        let mut session = session(&connector, AgentRole::Encrypt);

        let started = tokio::time::Instant::now();
        let outcome = session.connect().await.unwrap();
        assert_eq!(outcome, ConnectOutcome::Unreachable);
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert_eq!(session.state(), ConnectionState::Disconnected);

        // Retry succeeds once the agent is up.
        let mut agents = connector.listen(AgentRole::Encrypt);
        assert_eq!(session.connect().await.unwrap(), ConnectOutcome::Connected);
        assert!(agents.recv().await.is_some());
    }

    #[tokio::test]
    async fn transfer_commands_need_a_validated_certificate() {
        let connector = MemoryConnector::new();
        let mut agents = connector.listen(AgentRole::DecryptDownload);
        let mut session = session(&connector, AgentRole::DecryptDownload);
        session.connect().await.unwrap();
        let mut agent = agents.recv().await.unwrap();

        assert_matches!(
            session.send_command(AgentCommand::GetFile).await,
            Err(BridgeError::ProtocolViolation { .. })
        );
        assert_matches!(
            session.send_upload(vec![1, 2, 3]).await,
            Err(BridgeError::ProtocolViolation { .. })
        );
        assert!(agent.try_recv().is_none());
    }

    #[tokio::test]
    async fn second_request_while_one_is_open_is_rejected() {
        let connector = MemoryConnector::new();
        let mut agents = connector.listen(AgentRole::TokenCheck);
        let mut session = session(&connector, AgentRole::TokenCheck);
        session.connect().await.unwrap();
        let _agent = agents.recv().await.unwrap();

        session.send_command(AgentCommand::GetCertificate).await.unwrap();
        assert_eq!(session.phase(), ExchangePhase::AwaitingReply);
        assert_matches!(
            session.send_command(AgentCommand::GetCertificate).await,
            Err(BridgeError::Busy { role: AgentRole::TokenCheck })
        );
    }

    #[tokio::test]
    async fn failure_sentinel_closes_session() {
        let connector = MemoryConnector::new();
        let mut agents = connector.listen(AgentRole::TokenCheck);
        let mut session = session(&connector, AgentRole::TokenCheck);
        session.connect().await.unwrap();
        let agent = agents.recv().await.unwrap();

        session.send_command(AgentCommand::GetCertificate).await.unwrap();
        agent.send_text("-5");
        let message = session.receive().await.unwrap();
        assert_eq!(message, AgentMessage::Failure(AgentFailure::TokenNotPresent));
        assert_eq!(session.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn chunk_during_text_exchange_is_a_violation() {
        let connector = MemoryConnector::new();
        let mut agents = connector.listen(AgentRole::TokenCheck);
        let mut session = session(&connector, AgentRole::TokenCheck);
        session.connect().await.unwrap();
        let agent = agents.recv().await.unwrap();

        session.send_command(AgentCommand::GetCertificate).await.unwrap();
        agent.send_binary(vec![0; 16]);
        assert_matches!(
            session.receive().await,
            Err(BridgeError::ProtocolViolation { .. })
        );
        assert_eq!(session.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn stray_chunk_before_next_request_is_a_violation() {
        let connector = MemoryConnector::new();
        let mut agents = connector.listen(AgentRole::TokenCheck);
        let mut session = session(&connector, AgentRole::TokenCheck);
        session.connect().await.unwrap();
        let agent = agents.recv().await.unwrap();

        session.send_command(AgentCommand::GetCertificate).await.unwrap();
        agent.send_text("MIIB");
        assert_eq!(session.receive().await.unwrap(), AgentMessage::Text("MIIB".to_string()));
        session.finish_exchange();

        agent.send_binary(vec![9; 4]);
        tokio::task::yield_now().await;
        assert_matches!(
            session.send_command(AgentCommand::GetCertificate).await,
            Err(BridgeError::ProtocolViolation { .. })
        );
        assert_eq!(session.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn failure_queued_between_requests_closes_before_upload() {
        let connector = MemoryConnector::new();
        let mut agents = connector.listen(AgentRole::Encrypt);
        let mut session = session(&connector, AgentRole::Encrypt);
        session.connect().await.unwrap();
        let mut agent = agents.recv().await.unwrap();
        session.mark_certificate_validated();

        agent.send_text("-5");
        tokio::task::yield_now().await;
        assert_matches!(
            session.send_upload(vec![1, 2, 3]).await,
            Err(BridgeError::Transfer { failure: AgentFailure::TokenNotPresent })
        );
        assert_eq!(session.state(), ConnectionState::Closed);
        assert!(agent.try_recv().is_none());
    }

    #[tokio::test]
    async fn queued_rejection_and_acknowledgements_between_requests() {
        let connector = MemoryConnector::new();
        let mut agents = connector.listen(AgentRole::Encrypt);
        let mut session = session(&connector, AgentRole::Encrypt);
        session.connect().await.unwrap();
        let mut agent = agents.recv().await.unwrap();
        session.mark_certificate_validated();

        // Plain text left over from an earlier reply is harmless.
        agent.send_text("ok");
        tokio::task::yield_now().await;
        session.send_upload(vec![1]).await.unwrap();
        assert_eq!(agent.try_recv(), Some(OutboundFrame::Binary(vec![1])));
        agent.send_text("99");
        assert_eq!(session.receive().await.unwrap(), AgentMessage::Complete);
        session.finish_exchange();

        agent.send_text("err: invalid cert");
        tokio::task::yield_now().await;
        assert_matches!(
            session.send_upload(vec![2]).await,
            Err(BridgeError::CertificateRejected { .. })
        );
        assert!(!session.certificate_validated());
        assert!(agent.try_recv().is_none());
    }

    #[tokio::test]
    async fn agent_hangup_mid_exchange_closes_session() {
        let connector = MemoryConnector::new();
        let mut agents = connector.listen(AgentRole::TokenCheck);
        let mut session = session(&connector, AgentRole::TokenCheck);
        session.connect().await.unwrap();
        let mut agent = agents.recv().await.unwrap();

        session.send_command(AgentCommand::GetCertificate).await.unwrap();
        agent.close();
        assert_matches!(session.receive().await, Err(BridgeError::Network { .. }));
        assert_eq!(session.state(), ConnectionState::Closed);
        assert_matches!(session.connect().await, Err(BridgeError::ProtocolViolation { .. }));
    }
}
