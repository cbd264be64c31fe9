//! Daily provider call budget.
//!
//! The budget window is the calendar day in the session timezone. Jobs
//! reserve the calls they plan to make before they start; a [`Reservation`]
//! hands out its reserved calls first and then draws from whatever is left
//! unreserved. Unused reserved calls go back to the pool on drop.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::NaiveDate;
use chrono_tz::Tz;
use log::{debug, info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::clock::Clock;
use crate::errors::Error;

/// Calls are logged every time usage crosses a multiple of this.
const USAGE_LOG_INTERVAL: u32 = 100;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("call budget exhausted: {used} used, {reserved} reserved, limit {limit}, {required} required")]
pub struct BudgetExhausted {
    pub used: u32,
    pub reserved: u32,
    pub limit: u32,
    pub required: u32,
}

impl From<BudgetExhausted> for Error {
    fn from(err: BudgetExhausted) -> Self {
        Error::BudgetExhausted {
            used: err.used,
            limit: err.limit,
            required: err.required,
        }
    }
}

/// Point-in-time view of the budget window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetUsage {
    pub window: NaiveDate,
    pub used: u32,
    pub reserved: u32,
    pub limit: u32,
}

impl BudgetUsage {
    pub fn available(&self) -> u32 {
        self.limit
            .saturating_sub(self.used)
            .saturating_sub(self.reserved)
    }
}

#[derive(Debug)]
struct BudgetWindow {
    day: NaiveDate,
    used: u32,
    reserved: u32,
}

pub struct CallBudget {
    limit: u32,
    timezone: Tz,
    clock: Arc<dyn Clock>,
    window: Mutex<BudgetWindow>,
}

impl CallBudget {
    pub fn new(limit: u32, timezone: Tz, clock: Arc<dyn Clock>) -> Arc<Self> {
        let day = clock.now().with_timezone(&timezone).date_naive();
        Arc::new(Self {
            limit,
            timezone,
            clock,
            window: Mutex::new(BudgetWindow {
                day,
                used: 0,
                reserved: 0,
            }),
        })
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Locks the window, resetting usage if the day has rolled over.
    /// Outstanding reservations carry over into the new window.
    fn lock_window(&self) -> MutexGuard<'_, BudgetWindow> {
        let mut window = self.window.lock().unwrap_or_else(|poisoned| {
            warn!("Call budget mutex was poisoned, recovering");
            poisoned.into_inner()
        });
        let today = self.clock.now().with_timezone(&self.timezone).date_naive();
        if today != window.day {
            info!(
                "Call budget window rolled over to {} ({} calls used on {})",
                today, window.used, window.day
            );
            window.day = today;
            window.used = 0;
        }
        window
    }

    pub fn usage(&self) -> BudgetUsage {
        let window = self.lock_window();
        BudgetUsage {
            window: window.day,
            used: window.used,
            reserved: window.reserved,
            limit: self.limit,
        }
    }

    /// Reserves `calls` for one job. Either the whole amount is granted or
    /// nothing is.
    pub fn reserve(self: &Arc<Self>, calls: u32) -> Result<Reservation, BudgetExhausted> {
        let mut window = self.lock_window();
        let committed = window.used.saturating_add(window.reserved);
        if committed.saturating_add(calls) > self.limit {
            debug!(
                "Refusing reservation of {} calls ({} used, {} reserved, limit {})",
                calls, window.used, window.reserved, self.limit
            );
            return Err(BudgetExhausted {
                used: window.used,
                reserved: window.reserved,
                limit: self.limit,
                required: calls,
            });
        }
        window.reserved += calls;
        drop(window);

        Ok(Reservation {
            budget: Arc::clone(self),
            remaining: AtomicU32::new(calls),
        })
    }

    fn record_call(&self, window: &mut BudgetWindow) {
        window.used += 1;
        if window.used % USAGE_LOG_INTERVAL == 0 {
            info!(
                "Provider call budget: {}/{} used on {}",
                window.used, self.limit, window.day
            );
        }
    }

    fn consume_reserved(&self) {
        let mut window = self.lock_window();
        window.reserved = window.reserved.saturating_sub(1);
        self.record_call(&mut window);
    }

    fn consume_unreserved(&self) -> Result<(), BudgetExhausted> {
        let mut window = self.lock_window();
        if window.used.saturating_add(window.reserved) >= self.limit {
            return Err(BudgetExhausted {
                used: window.used,
                reserved: window.reserved,
                limit: self.limit,
                required: 1,
            });
        }
        self.record_call(&mut window);
        Ok(())
    }

    fn release(&self, calls: u32) {
        if calls == 0 {
            return;
        }
        let mut window = self.lock_window();
        window.reserved = window.reserved.saturating_sub(calls);
    }
}

/// Calls granted to one job.
pub struct Reservation {
    budget: Arc<CallBudget>,
    remaining: AtomicU32,
}

impl Reservation {
    /// Calls still held by this reservation.
    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::Acquire)
    }

    /// Accounts for one provider call. Reserved calls are used first; after
    /// that the call must fit in the unreserved remainder of the window.
    pub fn consume(&self) -> Result<(), BudgetExhausted> {
        let took_reserved = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if took_reserved {
            self.budget.consume_reserved();
            Ok(())
        } else {
            self.budget.consume_unreserved()
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.budget.release(*self.remaining.get_mut());
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("remaining", &self.remaining())
            .finish()
    }
}
