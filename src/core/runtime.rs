use std::sync::{PoisonError, RwLock};

/// Operational mode of the whole service.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum OperationalMode {
    Active,
    Inactive,
}

/// Mutable runtime flags shared by every component.
///
/// One instance is created at startup and passed into the actors that need
/// it. Mode is in-memory only; channel changes are additionally persisted
/// through the settings store by whoever flips them.
pub struct RuntimeState {
    mode: RwLock<OperationalMode>,
    channel: RwLock<String>,
}

impl RuntimeState {
    pub fn new(mode: OperationalMode, channel: String) -> Self {
        RuntimeState {
            mode: RwLock::new(mode),
            channel: RwLock::new(channel),
        }
    }

    pub fn mode(&self) -> OperationalMode {
        *self.mode.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_mode(&self, mode: OperationalMode) {
        *self.mode.write().unwrap_or_else(PoisonError::into_inner) = mode;
    }

    pub fn is_active(&self) -> bool {
        self.mode() == OperationalMode::Active
    }

    pub fn channel(&self) -> String {
        self.channel
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_channel(&self, channel: String) {
        *self
            .channel
            .write()
            .unwrap_or_else(PoisonError::into_inner) = channel;
    }
}
