//! Pairing coordinator
//!
//! Orchestrates the session store and the connection registry: validates a
//! user leg's admission preconditions, attaches and detaches legs, applies
//! the control-message policy to PC-leg frames, and tears down both legs of
//! a pairing when either one fails.
//!
//! Admission is validated against the live registry, not the stored
//! connection flags; the flags are best-effort observability state and a
//! crash between the two writes must not wedge a PIN.

use std::sync::Arc;

use axum::extract::ws::Message;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::envelope::{self, PcFrame};
use crate::metrics::RelayMetrics;
use crate::registry::{ConnectionRegistry, Leg, LegHandle, UserAttachError};
use crate::store::{unix_now, PairingSession, SessionStore, StoreError};

/// Why a leg was refused admission. Each precondition has its own variant so
/// callers can report the exact reason.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("PIN not registered")]
    NotFound,
    #[error("PIN expired")]
    Expired,
    #[error("PC not connected for this PIN")]
    PcNotConnected,
    #[error("Base directory not set for this PIN")]
    BaseDirNotSet,
    #[error("User already connected to this PIN")]
    UserAlreadyConnected,
    #[error(transparent)]
    Store(StoreError),
}

pub struct PairingCoordinator {
    store: Arc<dyn SessionStore>,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<RelayMetrics>,
}

impl PairingCoordinator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        registry: Arc<ConnectionRegistry>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            store,
            registry,
            metrics,
        }
    }

    /// Register a new PIN.
    pub async fn register_pin(&self, pin: &str) -> Result<PairingSession, StoreError> {
        let session = self.store.create(pin).await?;
        self.metrics.sessions_registered.inc();
        info!(pin = %pin, expires_at = session.expires_at, "PIN registered");
        Ok(session)
    }

    async fn lookup(&self, pin: &str) -> Result<PairingSession, AdmissionError> {
        match self.store.get(pin).await {
            Ok(session) => Ok(session),
            Err(StoreError::NotFound) => Err(AdmissionError::NotFound),
            Err(err) => Err(AdmissionError::Store(err)),
        }
    }

    /// A PC leg may link to any registered, unexpired PIN.
    pub async fn check_pc_admission(&self, pin: &str) -> Result<(), AdmissionError> {
        let session = self.lookup(pin).await?;
        if session.is_expired(unix_now()) {
            return Err(AdmissionError::Expired);
        }
        Ok(())
    }

    /// Preconditions for admitting a user leg, checked before the transport
    /// upgrade. The PC-leg and user-leg checks read the live registry.
    pub async fn check_user_admission(&self, pin: &str) -> Result<(), AdmissionError> {
        let session = self.lookup(pin).await?;
        if session.is_expired(unix_now()) {
            return Err(AdmissionError::Expired);
        }
        if !self.registry.has(pin, Leg::Pc) {
            return Err(AdmissionError::PcNotConnected);
        }
        if session.base_directory.is_none() {
            return Err(AdmissionError::BaseDirNotSet);
        }
        if self.registry.has(pin, Leg::User) {
            return Err(AdmissionError::UserAlreadyConnected);
        }
        Ok(())
    }

    /// Attach an upgraded PC leg. A previous PC leg for the same PIN is
    /// force-closed and replaced, so a restarted agent is never locked out
    /// by its own dead socket.
    pub async fn attach_pc(&self, pin: &str, handle: Arc<LegHandle>) {
        if let Some(displaced) = self.registry.put(pin, Leg::Pc, handle) {
            warn!(pin = %pin, "replacing existing PC leg");
            displaced.close();
        }
        if let Err(err) = self.store.set_pc_connected(pin, true).await {
            warn!(pin = %pin, error = %err, "failed to record PC connection");
        }
        self.metrics.pc_connections.inc();
    }

    /// Attach an upgraded user leg. Admission was checked before the upgrade,
    /// but the slot is re-validated here under the registry's per-PIN lock;
    /// a racer that lost gets its handle closed and an error back.
    pub async fn attach_user(&self, pin: &str, handle: Arc<LegHandle>) -> Result<(), AdmissionError> {
        match self.registry.attach_user(pin, handle.clone()) {
            Ok(()) => {}
            Err(UserAttachError::NoPcLeg) => {
                handle.close();
                return Err(AdmissionError::PcNotConnected);
            }
            Err(UserAttachError::Occupied) => {
                handle.close();
                return Err(AdmissionError::UserAlreadyConnected);
            }
        }
        if let Err(err) = self.store.set_user_connected(pin, true).await {
            warn!(pin = %pin, error = %err, "failed to record user connection");
        }
        self.metrics.user_connections.inc();
        self.metrics
            .active_pairings
            .set(self.registry.paired_count() as f64);
        info!(pin = %pin, "pairing established");
        Ok(())
    }

    /// Tear down after the PC leg failed or disconnected. The user leg, if
    /// any, is force-closed too so it is never left pointing at nothing.
    /// A leg that was already replaced by a newer one cleans up nothing.
    pub async fn detach_pc(&self, pin: &str, handle: &Arc<LegHandle>) {
        if self.registry.remove_if(pin, Leg::Pc, handle).is_none() {
            return;
        }
        handle.close();

        if let Some(user) = self.registry.remove(pin, Leg::User) {
            user.close();
            if let Err(err) = self.store.set_user_connected(pin, false).await {
                warn!(pin = %pin, error = %err, "failed to clear user connection flag");
            }
        }
        if let Err(err) = self.store.set_pc_connected(pin, false).await {
            warn!(pin = %pin, error = %err, "failed to clear PC connection flag");
        }
        self.metrics
            .active_pairings
            .set(self.registry.paired_count() as f64);
        info!(pin = %pin, "PC leg disconnected");
    }

    /// Tear down after the user leg failed or disconnected. The PC leg is
    /// closed as well; it must re-link before the PIN can pair again.
    pub async fn detach_user(&self, pin: &str, handle: &Arc<LegHandle>) {
        if self.registry.remove_if(pin, Leg::User, handle).is_none() {
            return;
        }
        handle.close();

        if let Some(pc) = self.registry.remove(pin, Leg::Pc) {
            pc.close();
            if let Err(err) = self.store.set_pc_connected(pin, false).await {
                warn!(pin = %pin, error = %err, "failed to clear PC connection flag");
            }
        }
        if let Err(err) = self.store.set_user_connected(pin, false).await {
            warn!(pin = %pin, error = %err, "failed to clear user connection flag");
        }
        self.metrics
            .active_pairings
            .set(self.registry.paired_count() as f64);
        info!(pin = %pin, "user leg disconnected");
    }

    /// Apply the control-message policy to a text frame from the PC leg:
    /// consume the base-directory announcement, relay everything else.
    pub async fn handle_pc_frame(&self, pin: &str, raw: String) {
        match envelope::classify(&raw) {
            PcFrame::BaseDir(path) => {
                match self.store.set_base_directory(pin, &path).await {
                    Ok(()) => info!(pin = %pin, path = %path, "base directory registered"),
                    Err(err) => {
                        warn!(pin = %pin, error = %err, "failed to store base directory")
                    }
                }
            }
            PcFrame::Forward => self.relay_to_user(pin, Message::Text(raw)),
            PcFrame::Invalid(reason) => {
                self.metrics.messages_dropped.inc();
                warn!(pin = %pin, reason = reason, "dropping unparseable PC frame");
            }
        }
    }

    /// Forward a frame to the user leg, dropping it when none is attached.
    pub fn relay_to_user(&self, pin: &str, frame: Message) {
        match self.registry.get(pin, Leg::User) {
            Some(user) => {
                if user.send(frame).is_err() {
                    self.metrics.relay_failures.inc();
                    warn!(pin = %pin, "user leg rejected relayed frame");
                } else {
                    self.metrics.messages_relayed.inc();
                }
            }
            None => {
                self.metrics.messages_dropped.inc();
                debug!(pin = %pin, "no user leg attached, dropping frame");
            }
        }
    }

    /// Forward a frame to the PC leg, dropping it when none is attached.
    pub fn relay_to_pc(&self, pin: &str, frame: Message) {
        match self.registry.get(pin, Leg::Pc) {
            Some(pc) => {
                if pc.send(frame).is_err() {
                    self.metrics.relay_failures.inc();
                    warn!(pin = %pin, "PC leg rejected relayed frame");
                } else {
                    self.metrics.messages_relayed.inc();
                }
            }
            None => {
                self.metrics.messages_dropped.inc();
                debug!(pin = %pin, "no PC leg attached, dropping frame");
            }
        }
    }
}
