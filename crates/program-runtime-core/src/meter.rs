//! Transferable unit meter.
//!
//! A [`Meter`] holds the non-negative unit balance of exactly one runtime.
//! Units only move between meters through [`Meter::transfer_units_to`] (or the
//! cross-program helpers below, which do the same against a running caller),
//! so the total across meters changes only by consumption.
//!
//! While its runtime executes guest code, a meter stays locked and the store's
//! fuel is the live balance. The balance is written back before the lock is
//! released, which serializes concurrent transfers into a busy meter behind the
//! running call.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};
use wasmtime::Caller;

use program_runtime_common::RuntimeError;

use crate::store::RuntimeContext;

/// Balance of a meter that will only ever be funded by transfers.
pub const NO_UNITS: u64 = 0;

static NEXT_METER_ID: AtomicU64 = AtomicU64::new(1);

/// A lock-protected unit balance.
///
/// Meters are neither `Clone` nor `Copy`; each runtime owns one and lends it
/// out by reference.
#[derive(Debug)]
pub struct Meter {
    id: u64,
    balance: Mutex<u64>,
}

impl Meter {
    /// Create a meter holding `units`.
    pub fn new(units: u64) -> Self {
        Self {
            id: NEXT_METER_ID.fetch_add(1, Ordering::Relaxed),
            balance: Mutex::new(units),
        }
    }

    /// Process-unique meter identifier; also the lock order for transfers.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current balance.
    pub fn balance(&self) -> u64 {
        *self.balance.lock()
    }

    /// Deduct `units`, returning the new balance.
    ///
    /// Fails with `InsufficientBalance` and leaves the balance unchanged if
    /// `units` exceeds it.
    pub fn consume(&self, units: u64) -> Result<u64, RuntimeError> {
        let mut balance = self.balance.lock();
        *balance = debit(*balance, units)?;
        Ok(*balance)
    }

    /// Atomically move `amount` units to `other`, returning this meter's new
    /// balance.
    ///
    /// Fails with `InsufficientBalance` (no mutation on either side) if
    /// `amount` exceeds the balance. Both meters are locked in id order, so
    /// concurrent transfers in opposite directions cannot deadlock.
    pub fn transfer_units_to(&self, other: &Meter, amount: u64) -> Result<u64, RuntimeError> {
        if self.id == other.id {
            let balance = self.balance.lock();
            debit(*balance, amount)?;
            return Ok(*balance);
        }

        let (mut from, mut to) = self.lock_pair(other);
        let new_from = debit(*from, amount)?;
        let new_to = credit(*to, amount)?;
        *from = new_from;
        *to = new_to;

        debug!(
            from_meter = self.id,
            to_meter = other.id,
            units = amount,
            "Units transferred"
        );
        Ok(new_from)
    }

    /// Atomically move the whole balance to `other`, returning the amount.
    pub fn transfer_all_to(&self, other: &Meter) -> Result<u64, RuntimeError> {
        if self.id == other.id {
            return Ok(0);
        }

        let (mut from, mut to) = self.lock_pair(other);
        let amount = *from;
        *to = credit(*to, amount)?;
        *from = 0;
        Ok(amount)
    }

    /// Lock this meter for the duration of a guest execution.
    pub(crate) fn lock(&self) -> MutexGuard<'_, u64> {
        self.balance.lock()
    }

    /// Lock `self` and `other` in id order, returning `(self, other)` guards.
    fn lock_pair<'a>(&'a self, other: &'a Meter) -> (MutexGuard<'a, u64>, MutexGuard<'a, u64>) {
        if self.id < other.id {
            let from = self.balance.lock();
            let to = other.balance.lock();
            (from, to)
        } else {
            let to = other.balance.lock();
            let from = self.balance.lock();
            (from, to)
        }
    }
}

impl Default for Meter {
    fn default() -> Self {
        Self::new(NO_UNITS)
    }
}

fn debit(balance: u64, units: u64) -> Result<u64, RuntimeError> {
    balance
        .checked_sub(units)
        .ok_or(RuntimeError::InsufficientBalance {
            requested: units,
            available: balance,
        })
}

fn credit(balance: u64, units: u64) -> Result<u64, RuntimeError> {
    balance
        .checked_add(units)
        .ok_or_else(|| RuntimeError::invalid_argument("meter balance overflow"))
}

/// Charge `units` against the live balance of a running call.
///
/// Fails with `MeterExhausted`, leaving the balance unchanged, if the call
/// cannot pay.
pub fn consume_caller_units(
    caller: &mut Caller<'_, RuntimeContext>,
    units: u64,
) -> Result<(), RuntimeError> {
    let fuel = caller_fuel(caller)?;
    if units > fuel {
        return Err(RuntimeError::MeterExhausted);
    }
    set_caller_fuel(caller, fuel - units)
}

/// Move `amount` units from a running call into `to`.
///
/// This funds a nested runtime; the caller pays up front regardless of how
/// much the nested call ends up using.
pub fn transfer_from_caller(
    caller: &mut Caller<'_, RuntimeContext>,
    to: &Meter,
    amount: u64,
) -> Result<(), RuntimeError> {
    let fuel = caller_fuel(caller)?;
    if amount > fuel {
        return Err(RuntimeError::MeterExhausted);
    }

    let mut balance = to.lock();
    *balance = credit(*balance, amount)?;
    set_caller_fuel(caller, fuel - amount)?;

    debug!(to_meter = to.id(), units = amount, "Units delegated to nested call");
    Ok(())
}

/// Move the whole balance of `from` back into a running call.
pub fn reclaim_into_caller(
    from: &Meter,
    caller: &mut Caller<'_, RuntimeContext>,
) -> Result<u64, RuntimeError> {
    let mut balance = from.lock();
    let amount = *balance;
    let fuel = caller_fuel(caller)?;
    let new_fuel = credit(fuel, amount)?;
    set_caller_fuel(caller, new_fuel)?;
    *balance = 0;

    debug!(from_meter = from.id(), units = amount, "Units reclaimed from nested call");
    Ok(amount)
}

fn caller_fuel(caller: &Caller<'_, RuntimeContext>) -> Result<u64, RuntimeError> {
    caller
        .get_fuel()
        .map_err(|e| RuntimeError::invalid_config(format!("fuel metering unavailable: {e}")))
}

fn set_caller_fuel(caller: &mut Caller<'_, RuntimeContext>, fuel: u64) -> Result<(), RuntimeError> {
    caller
        .set_fuel(fuel)
        .map_err(|e| RuntimeError::invalid_config(format!("fuel metering unavailable: {e}")))
}

/// Outcome of a best-effort operation.
///
/// This is deliberately not a `Result`: a degraded outcome is reported and
/// logged, never propagated as a failure. The only producer is
/// [`Runtime::release_units_to`](crate::Runtime::release_units_to).
#[derive(Debug)]
#[must_use = "an advisory outcome should be inspected or logged"]
pub enum Advisory {
    /// The operation completed.
    Clean,
    /// The operation could not complete; the surrounding flow may continue.
    Degraded(RuntimeError),
}

impl Advisory {
    /// Returns `true` for [`Advisory::Clean`].
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean)
    }

    /// Emit a warning for a degraded outcome and consume the advisory.
    pub fn log(self, operation: &str) {
        if let Self::Degraded(error) = self {
            warn!(operation, error = %error, "Best-effort operation degraded");
        }
    }
}
