use crate::core::relay::{OutcomeKind, RelayOptions, RelaySession};
use crate::core::shutdown::ShutdownSignal;
use crate::core::supervisor::state::{SupervisorReport, SupervisorState};
use crate::domain::config::SessionPolicy;
use crate::domain::error::{BridgeError, BridgeResult};
use crate::infrastructure::serial::SerialEndpoint;
use crate::infrastructure::tcp::{is_transient_accept_error, NetworkListener};
use std::net::SocketAddr;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Owns the accept loop and serves one client at a time.
pub struct ConnectionSupervisor {
    serial: SerialEndpoint,
    listener: NetworkListener,
    policy: SessionPolicy,
    options: RelayOptions,
    state_tx: watch::Sender<SupervisorState>,
}

impl ConnectionSupervisor {
    pub fn new(
        serial: SerialEndpoint,
        listener: NetworkListener,
        policy: SessionPolicy,
        options: RelayOptions,
    ) -> Self {
        let (state_tx, _) = watch::channel(SupervisorState::Idle);
        Self {
            serial,
            listener,
            policy,
            options,
            state_tx,
        }
    }

    /// Observe state changes.
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> SupervisorState {
        *self.state_tx.borrow()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Accept and relay until the policy, a fatal error or `shutdown` stops us.
    ///
    /// The serial device is closed on return.
    pub async fn run(mut self, mut shutdown: ShutdownSignal) -> BridgeResult<SupervisorReport> {
        let mut report = SupervisorReport::default();
        let result = self.accept_loop(&mut shutdown, &mut report).await;

        self.transition(SupervisorState::Shutdown);
        self.serial.close();

        match &result {
            Ok(()) => info!(
                "Supervisor stopped after {} session(s): {} bytes to serial, {} bytes to network",
                report.sessions, report.bytes_to_serial, report.bytes_to_network
            ),
            Err(e) => error!("Supervisor stopped on fatal error: {}", e),
        }
        result.map(|_| report)
    }

    async fn accept_loop(
        &mut self,
        shutdown: &mut ShutdownSignal,
        report: &mut SupervisorReport,
    ) -> BridgeResult<()> {
        loop {
            self.transition(SupervisorState::Listening);
            info!(
                "Waiting for a TCP connection on {}...",
                self.listener.local_addr()
            );

            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                _ = shutdown.wait() => {
                    info!("Shutdown requested, no longer accepting connections");
                    return Ok(());
                }
            };

            let connection = match accepted {
                Ok(connection) => connection,
                Err(BridgeError::Accept(e)) if is_transient_accept_error(&e) => {
                    warn!("Transient accept failure: {}", e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            self.transition(SupervisorState::SessionActive);
            let outcome = RelaySession::new(&mut self.serial, connection, self.options.clone())
                .run(shutdown.clone())
                .await;
            let kind = outcome.kind;
            report.record(outcome);

            if kind == OutcomeKind::Clean {
                return Ok(());
            }
            if !self.serial.is_available() {
                return Err(BridgeError::DeviceUnavailable {
                    port: self.serial.port_name().to_string(),
                });
            }
            if self.policy == SessionPolicy::Once {
                info!("Session finished; policy is '{}', not accepting further connections", self.policy);
                return Ok(());
            }
        }
    }

    fn transition(&self, next: SupervisorState) {
        let current = self.state();
        if current == next {
            return;
        }
        if !current.can_transition_to(next) {
            warn!("Ignoring invalid supervisor transition {} -> {}", current, next);
            return;
        }

        debug!("Supervisor state {} -> {}", current, next);
        self.state_tx.send_replace(next);
    }
}
