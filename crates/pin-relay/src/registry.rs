//! In-memory registry of live connection legs
//!
//! Maps a PIN to the PC-leg and user-leg handles currently attached to it.
//! The registry is rebuilt from nothing on restart; a restart drops all live
//! pairings. Mutations for one PIN are serialized by the map's per-key entry
//! lock, so racing connect/disconnect events for the same code are linearized.

use std::sync::Arc;

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::{mpsc, watch};

/// Which side of a pairing a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    Pc,
    User,
}

/// Handle to one live leg: the outbound frame queue drained by the leg's
/// writer task, plus a close signal observed by both of the leg's tasks.
///
/// The handle does not own the socket; the connection task that accepted it
/// performs the actual close when the signal fires.
pub struct LegHandle {
    outbound: mpsc::UnboundedSender<Message>,
    closed: watch::Sender<bool>,
}

impl LegHandle {
    /// Create a handle and the receiving end of its outbound queue.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Message>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        (Arc::new(Self { outbound, closed }), rx)
    }

    /// Queue a frame for the leg's writer task.
    pub fn send(&self, frame: Message) -> Result<(), mpsc::error::SendError<Message>> {
        self.outbound.send(frame)
    }

    /// Signal both of the leg's tasks to stop. Idempotent.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once `close` has been called, including when it already has.
    pub async fn wait_closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

/// Why a guarded user attach was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAttachError {
    NoPcLeg,
    Occupied,
}

#[derive(Default)]
struct PairEntry {
    pc: Option<Arc<LegHandle>>,
    user: Option<Arc<LegHandle>>,
}

impl PairEntry {
    fn slot(&self, leg: Leg) -> &Option<Arc<LegHandle>> {
        match leg {
            Leg::Pc => &self.pc,
            Leg::User => &self.user,
        }
    }

    fn slot_mut(&mut self, leg: Leg) -> &mut Option<Arc<LegHandle>> {
        match leg {
            Leg::Pc => &mut self.pc,
            Leg::User => &mut self.user,
        }
    }

    fn is_empty(&self) -> bool {
        self.pc.is_none() && self.user.is_none()
    }

    fn is_paired(&self) -> bool {
        self.pc.is_some() && self.user.is_some()
    }
}

/// Registry of live legs, keyed by PIN.
pub struct ConnectionRegistry {
    pairs: DashMap<String, PairEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            pairs: DashMap::new(),
        }
    }

    /// Install a leg handle, returning any handle it displaced. The caller
    /// owns closing the displaced handle.
    pub fn put(&self, pin: &str, leg: Leg, handle: Arc<LegHandle>) -> Option<Arc<LegHandle>> {
        let mut entry = self.pairs.entry(pin.to_owned()).or_default();
        entry.slot_mut(leg).replace(handle)
    }

    /// Install a user handle only while a PC leg is present and the user slot
    /// is vacant. Runs under the PIN's entry lock, so it cannot race a PC-leg
    /// removal or a second user attach.
    pub fn attach_user(
        &self,
        pin: &str,
        handle: Arc<LegHandle>,
    ) -> Result<(), UserAttachError> {
        let result = {
            let mut entry = self.pairs.entry(pin.to_owned()).or_default();
            if entry.pc.is_none() {
                Err(UserAttachError::NoPcLeg)
            } else if entry.user.is_some() {
                Err(UserAttachError::Occupied)
            } else {
                entry.user = Some(handle);
                Ok(())
            }
        };
        self.prune(pin);
        result
    }

    pub fn get(&self, pin: &str, leg: Leg) -> Option<Arc<LegHandle>> {
        self.pairs.get(pin).and_then(|entry| entry.slot(leg).clone())
    }

    pub fn has(&self, pin: &str, leg: Leg) -> bool {
        self.pairs
            .get(pin)
            .map(|entry| entry.slot(leg).is_some())
            .unwrap_or(false)
    }

    /// Remove and return a leg's handle, if registered.
    pub fn remove(&self, pin: &str, leg: Leg) -> Option<Arc<LegHandle>> {
        let removed = self
            .pairs
            .get_mut(pin)
            .and_then(|mut entry| entry.slot_mut(leg).take());
        self.prune(pin);
        removed
    }

    /// Remove a leg only if `handle` is still the registered one, so a
    /// replaced leg's cleanup cannot evict its successor.
    pub fn remove_if(
        &self,
        pin: &str,
        leg: Leg,
        handle: &Arc<LegHandle>,
    ) -> Option<Arc<LegHandle>> {
        let removed = self.pairs.get_mut(pin).and_then(|mut entry| {
            let slot = entry.slot_mut(leg);
            match slot {
                Some(current) if Arc::ptr_eq(current, handle) => slot.take(),
                _ => None,
            }
        });
        self.prune(pin);
        removed
    }

    /// Number of PINs with both legs live.
    pub fn paired_count(&self) -> usize {
        self.pairs.iter().filter(|entry| entry.is_paired()).count()
    }

    fn prune(&self, pin: &str) {
        self.pairs.remove_if(pin, |_, entry| entry.is_empty());
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
