// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Capacity accounting for the local cache.
//!
//! `used_bytes` covers bytes of resident files, bytes reserved for user
//! sessions, and bytes held for commits whose file is still being moved into
//! the cache. The accountant never lets `used_bytes` exceed `capacity_bytes`.

use std::collections::HashMap;

use tracing::{debug, error};

use crate::UserId;

/// Outcome of [`CapacityAccountant::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseOutcome {
    /// Bytes actually returned to capacity
    pub released: u64,
    /// Requested bytes the user did not own (not applied)
    pub excess: u64,
}

#[derive(Debug)]
pub struct CapacityAccountant {
    capacity_bytes: u64,
    used_bytes: u64,
    owned: HashMap<UserId, u64>,
    /// Taken out of a reservation, not yet backing a resident file
    in_flight: u64,
}

impl CapacityAccountant {
    #[must_use]
    pub fn new(capacity_bytes: u64) -> Self {
        Self {
            capacity_bytes,
            used_bytes: 0,
            owned: HashMap::new(),
            in_flight: 0,
        }
    }

    /// Reserve `bytes` for `user`. All or nothing.
    pub fn try_reserve(&mut self, user: UserId, bytes: u64) -> bool {
        if !self.fits(bytes) {
            return false;
        }
        self.used_bytes += bytes;
        *self.owned.entry(user).or_insert(0) += bytes;
        true
    }

    /// Charge a file discovered on disk at startup. It belongs to no user.
    pub fn charge_resident(&mut self, bytes: u64) -> bool {
        if !self.fits(bytes) {
            return false;
        }
        self.used_bytes += bytes;
        true
    }

    /// Return up to `bytes` of `user`'s reservation.
    ///
    /// Anything beyond what the user owns is reported in `excess` and not
    /// applied.
    pub fn release(&mut self, user: UserId, bytes: u64) -> ReleaseOutcome {
        let owned = self.owned.get(&user).copied().unwrap_or(0);
        let released = bytes.min(owned);
        let excess = bytes - released;

        if excess > 0 {
            error!(
                user_id = user,
                requested = bytes,
                owned,
                "User tried to return more space than it reserved"
            );
        }

        self.debit_user(user, released);
        self.used_bytes -= released;
        ReleaseOutcome { released, excess }
    }

    /// Re-label `bytes` of `user`'s reservation as backing a resident file.
    ///
    /// `used_bytes` does not change. If the user owns less than `bytes` the
    /// reservation is cleared and the shortfall is returned.
    pub fn attribute_to_file(&mut self, user: UserId, bytes: u64) -> u64 {
        let owned = self.owned.get(&user).copied().unwrap_or(0);
        let moved = bytes.min(owned);
        self.debit_user(user, moved);

        let shortfall = bytes - moved;
        if shortfall > 0 {
            debug!(user_id = user, bytes, owned, "Attribution exceeded reservation");
        }
        shortfall
    }

    /// Move `bytes` of `user`'s reservation into the in-flight commit pool.
    ///
    /// Fails without changing anything if the user owns less than `bytes`.
    /// `used_bytes` does not change.
    pub fn hold_for_commit(&mut self, user: UserId, bytes: u64) -> bool {
        if self.owned_bytes(user) < bytes {
            return false;
        }
        self.debit_user(user, bytes);
        self.in_flight += bytes;
        true
    }

    /// The held bytes now back a resident file.
    pub fn settle_commit(&mut self, bytes: u64) {
        self.take_in_flight(bytes);
    }

    /// Give held bytes back to `user`'s reservation.
    pub fn cancel_commit(&mut self, user: UserId, bytes: u64) {
        let bytes = self.take_in_flight(bytes);
        if bytes > 0 {
            *self.owned.entry(user).or_insert(0) += bytes;
        }
    }

    /// Return a resident file's bytes to available capacity.
    pub fn reclaim(&mut self, size_bytes: u64) {
        if size_bytes > self.used_bytes {
            error!(size_bytes, used = self.used_bytes, "Reclaiming more bytes than are in use");
        }
        self.used_bytes = self.used_bytes.saturating_sub(size_bytes);
    }

    /// Drop `user`'s reservation entirely, returning the bytes freed.
    pub fn release_user(&mut self, user: UserId) -> u64 {
        let owned = self.owned.remove(&user).unwrap_or(0);
        self.used_bytes -= owned;
        owned
    }

    #[must_use]
    pub fn owned_bytes(&self, user: UserId) -> u64 {
        self.owned.get(&user).copied().unwrap_or(0)
    }

    /// Sum of all outstanding reservations.
    #[must_use]
    pub fn reserved_bytes(&self) -> u64 {
        self.owned.values().sum()
    }

    /// Bytes held by commits that have not settled yet.
    #[must_use]
    pub fn in_flight_bytes(&self) -> u64 {
        self.in_flight
    }

    #[must_use]
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.used_bytes
    }

    #[must_use]
    pub fn available_bytes(&self) -> u64 {
        self.capacity_bytes - self.used_bytes
    }

    fn fits(&self, bytes: u64) -> bool {
        self.used_bytes
            .checked_add(bytes)
            .is_some_and(|total| total <= self.capacity_bytes)
    }

    fn take_in_flight(&mut self, bytes: u64) -> u64 {
        if bytes > self.in_flight {
            error!(bytes, in_flight = self.in_flight, "Settling more commit bytes than are held");
        }
        let taken = bytes.min(self.in_flight);
        self.in_flight -= taken;
        taken
    }

    fn debit_user(&mut self, user: UserId, bytes: u64) {
        if let Some(owned) = self.owned.get_mut(&user) {
            *owned -= bytes;
            if *owned == 0 {
                self.owned.remove(&user);
            }
        }
    }
}
