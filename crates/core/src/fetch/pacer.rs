use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Enforces a minimum delay between consecutive provider calls.
///
/// Callers queue on an async mutex holding the next free slot, so calls
/// leave in arrival order and never closer together than `min_delay`.
#[derive(Debug)]
pub struct Pacer {
    min_delay: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl Pacer {
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            next_slot: Mutex::new(None),
        }
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    /// Waits until the caller may issue its call.
    pub async fn wait(&self) {
        let mut next_slot = self.next_slot.lock().await;
        if let Some(slot) = *next_slot {
            if slot > Instant::now() {
                tokio::time::sleep_until(slot).await;
            }
        }
        *next_slot = Some(Instant::now() + self.min_delay);
    }
}
