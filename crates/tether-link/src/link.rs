use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use tether_core::protocol::ProtocolSocket;
use tether_core::{ConnectionState, StatusSnapshot};

/// Connection state plus the live socket, behind one lock.
#[derive(Default)]
pub(crate) struct Slot {
    pub state: ConnectionState,
    pub socket: Option<Arc<dyn ProtocolSocket>>,
    /// Bumped on every connect attempt and every forced close. Events
    /// tagged with an older epoch are ignored.
    pub epoch: u64,
}

/// Shared read handle on the connection. Only the controller mutates it.
#[derive(Clone, Default)]
pub struct LinkState {
    slot: Arc<Mutex<Slot>>,
}

impl LinkState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.slot.lock().state.snapshot()
    }

    pub fn identity(&self) -> Option<String> {
        self.slot.lock().state.identity().map(str::to_owned)
    }

    /// The live socket, only while the session is open.
    pub fn connected_socket(&self) -> Option<Arc<dyn ProtocolSocket>> {
        let slot = self.slot.lock();
        if slot.state.is_connected() {
            slot.socket.clone()
        } else {
            None
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock()
    }

    pub(crate) fn is_current(&self, epoch: u64) -> bool {
        self.slot.lock().epoch == epoch
    }
}
