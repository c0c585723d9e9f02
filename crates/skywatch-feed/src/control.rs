//! Poll scheduling rules, free of timers and I/O.
//!
//! Every activation, deactivation and reconfiguration starts a new epoch.
//! Work begun under an older epoch may still complete, but its results must
//! be dropped: callers check [`PollControl::is_current`] before applying
//! anything. At most one fetch per epoch is in flight.

use crate::PollConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollControl {
    epoch: u64,
    active: bool,
    in_flight: Option<u64>,
    config: PollConfig,
}

impl PollControl {
    pub fn new(config: PollConfig) -> Self {
        Self {
            epoch: 0,
            active: false,
            in_flight: None,
            config,
        }
    }

    /// Start polling under a fresh epoch.
    pub fn activate(&mut self) -> u64 {
        self.epoch += 1;
        self.active = true;
        self.epoch
    }

    /// Stop polling. Anything still in flight becomes stale.
    pub fn deactivate(&mut self) {
        self.epoch += 1;
        self.active = false;
    }

    /// Replace the configuration. Returns the new epoch when polling was
    /// active and must be restarted.
    pub fn reconfigure(&mut self, config: PollConfig) -> Option<u64> {
        self.config = config;
        if self.active {
            Some(self.activate())
        } else {
            None
        }
    }

    /// Whether results of `epoch` may still be applied.
    pub fn is_current(&self, epoch: u64) -> bool {
        self.active && self.epoch == epoch
    }

    /// Claim the in-flight slot for `epoch`.
    ///
    /// Fails for a stale epoch or while a fetch of the current epoch is
    /// already running. A fetch left over from an older epoch does not block.
    pub fn try_begin(&mut self, epoch: u64) -> bool {
        if !self.is_current(epoch) || self.in_flight == Some(epoch) {
            return false;
        }
        self.in_flight = Some(epoch);
        true
    }

    /// Release the in-flight slot if `epoch` still holds it.
    pub fn finish(&mut self, epoch: u64) {
        if self.in_flight == Some(epoch) {
            self.in_flight = None;
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.is_some_and(|epoch| epoch == self.epoch)
    }

    pub fn config(&self) -> PollConfig {
        self.config
    }
}
