//! Concurrency timing strategy
//!
//! Maintains N in-flight credits at all times: an initial burst of N,
//! then one new credit per return until the phase terminator fires.
//! Issue is gated on return, so this mode is self-regulating. Drop
//! timestamps are `None` (send as soon as possible).

use async_trait::async_trait;

use crate::timing::strategy::{PhaseDriver, ReturnEvent, TimingError, TimingStrategy};

pub struct ConcurrencyStrategy {
    concurrency: usize,
}

impl ConcurrencyStrategy {
    pub fn new(concurrency: usize) -> Self {
        Self { concurrency }
    }
}

#[async_trait]
impl TimingStrategy for ConcurrencyStrategy {
    async fn run_phase(&mut self, driver: &mut PhaseDriver<'_>) -> Result<(), TimingError> {
        for _ in 0..self.concurrency {
            if driver.sending_done() {
                return Ok(());
            }
            driver.issue_sampled(None)?;
        }

        while !driver.sending_done() {
            match driver.wait_return().await {
                ReturnEvent::Return(_) => {
                    if !driver.sending_done() {
                        driver.issue_sampled(None)?;
                    }
                }
                ReturnEvent::Deadline | ReturnEvent::Cancelled | ReturnEvent::Closed => break,
            }
        }
        Ok(())
    }
}
