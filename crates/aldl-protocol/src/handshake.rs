//! ECM Handshake
//!
//! Brings the ECM out of free-running broadcast mode so it will answer
//! addressed requests. The procedure retries until it succeeds or the
//! connection state becomes [`ConnectionState::Quit`].

use crate::commdef::CommDef;
use crate::error::{LinkError, TransportError};
use crate::link::{msleep, Link};
use crate::state::{ConnectionState, StateCell};
use crate::transport::SerialTransport;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Settle delay after handshake commands (ms)
const SETTLE_DELAY_MS: u64 = 50;

/// Initial chatter read window (ms)
const CHATTER_WINDOW_MS: u64 = 10;

/// Backoff step added per idle chatter round (ms)
const CHATTER_BACKOFF_MS: u64 = 50;

impl<T: SerialTransport> Link<T> {
    /// Run the handshake until the ECM is in diagnostic mode.
    ///
    /// Returns [`LinkError::Quit`] if a quit is requested in between rounds,
    /// or the transport error if the device goes away while waiting for
    /// chatter.
    pub fn reconnect(&mut self, comm: &CommDef, state: &StateCell) -> Result<(), LinkError> {
        let mut attempt: u64 = 0;
        loop {
            if state.quit_requested() {
                return Err(LinkError::Quit);
            }
            if !self.is_ready() {
                return Err(TransportError::NotReady.into());
            }
            attempt += 1;
            debug!("Handshake attempt {}", attempt);

            if let Some(cmd) = comm.return_command() {
                // Best effort, the ECM may already be in normal mode
                if let Err(e) = self.write(&cmd) {
                    debug!("Return-to-normal failed: {}", e);
                }
                self.settle();
            }

            if comm.handshake.chatter_wait {
                self.wait_for_chatter(state)?;
            }
            msleep(comm.handshake.idle_delay_ms);

            if self.shutup(comm) {
                self.settle();
                info!("ECM handshake complete after {} attempt(s)", attempt);
                return Ok(());
            }

            warn!("ECM handshake failed, retrying");
            self.settle();
        }
    }

    fn settle(&mut self) {
        msleep(SETTLE_DELAY_MS);
        if let Err(e) = self.purge() {
            debug!("Purge after handshake step failed: {}", e);
        }
    }

    /// Block until any byte shows up on the line
    fn wait_for_chatter(&mut self, state: &StateCell) -> Result<(), LinkError> {
        debug!("Waiting for idle chatter");
        let max_delay = self.timing().reconnect_max_delay_ms;
        let backoff = self.timing().reconnect_backoff;
        let mut delay = CHATTER_WINDOW_MS;
        loop {
            if state.quit_requested() {
                return Err(LinkError::Quit);
            }
            match self.skip_bytes(1, Duration::from_millis(delay)) {
                Ok(true) => {
                    debug!("Idle chatter detected");
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) => {
                    debug!("Chatter wait read failed: {}", e);
                    return Err(e);
                }
            }
            if backoff && delay < max_delay {
                delay = (delay + CHATTER_BACKOFF_MS).min(max_delay);
            }
        }
    }

    /// Send the shutup request until its echo is seen or the repeat budget runs out
    fn shutup(&mut self, comm: &CommDef) -> bool {
        let repeat = comm.handshake.shutup_repeat;
        if repeat == 0 {
            return true;
        }
        let Some(cmd) = comm.shutup_command() else {
            return true;
        };
        for attempt in 1..=repeat {
            match self.request(&cmd) {
                Ok(()) => return true,
                Err(e) => debug!("Shutup attempt {}/{} failed: {}", attempt, repeat, e),
            }
            msleep(comm.handshake.shutup_repeat_delay_ms);
        }
        false
    }
}

/// Convenience wrapper setting connection state around [`Link::reconnect`]
pub fn connect<T: SerialTransport>(
    link: &mut Link<T>,
    comm: &CommDef,
    state: &StateCell,
) -> Result<(), LinkError> {
    state.transition(ConnectionState::Connecting);
    link.reconnect(comm, state)?;
    state.transition(ConnectionState::Connected);
    info!("Connected to ECM at {:#04X}", comm.address);
    Ok(())
}
