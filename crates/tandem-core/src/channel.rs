//! Durable channel state.
//!
//! A [`ChannelState`] is the agreed view of one two-party channel: who the
//! participants are, how much unallocated value each holds (the free
//! balance), which applications are installed and how much value each one
//! holds, and the dependency nonce that invalidates stale app commitments.
//!
//! # Invariants
//!
//! - Participants are stored in canonical order (lower address first), so two
//!   parties that agree on the state hold byte-identical values.
//! - Free balance plus every installed app's allocation equals the channel's
//!   funded total. Proposers check this on every transition.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tandem_proto::{Address, AppInstanceId, AppInterface, ChannelId, PeerBalance, Terms};

use crate::error::ProtocolViolation;

/// Two balances in canonical order (lower address first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// Balance of the party with the lower address
    pub first: PeerBalance,
    /// Balance of the party with the higher address
    pub second: PeerBalance,
}

impl Allocation {
    /// Build from two balances in any order.
    pub fn new(a: PeerBalance, b: PeerBalance) -> Self {
        if b.address < a.address {
            Self { first: b, second: a }
        } else {
            Self { first: a, second: b }
        }
    }

    /// Zero balances for two parties.
    pub fn zero(a: Address, b: Address) -> Self {
        Self::new(PeerBalance::new(a, 0), PeerBalance::new(b, 0))
    }

    /// Participants in canonical order.
    pub fn parties(&self) -> (Address, Address) {
        (self.first.address, self.second.address)
    }

    /// Amount held by `party`, if it is one of the two.
    pub fn amount_of(&self, party: Address) -> Option<u64> {
        if party == self.first.address {
            Some(self.first.balance)
        } else if party == self.second.address {
            Some(self.second.balance)
        } else {
            None
        }
    }

    /// Sum of both balances.
    pub fn total(&self) -> u128 {
        u128::from(self.first.balance) + u128::from(self.second.balance)
    }

    /// Whether both allocations name the same two parties.
    pub fn same_parties(&self, other: &Self) -> bool {
        self.parties() == other.parties()
    }

    /// Subtract `other` party by party.
    pub fn debit(&self, other: &Self) -> Result<Self, ProtocolViolation> {
        self.check_parties(other)?;
        let sub = |have: PeerBalance, take: PeerBalance| {
            have.balance.checked_sub(take.balance).map(|b| PeerBalance::new(have.address, b)).ok_or(
                ProtocolViolation::InsufficientBalance {
                    party: have.address,
                    available: have.balance,
                    required: take.balance,
                },
            )
        };
        Ok(Self { first: sub(self.first, other.first)?, second: sub(self.second, other.second)? })
    }

    /// Add `other` party by party.
    pub fn credit(&self, other: &Self) -> Result<Self, ProtocolViolation> {
        self.check_parties(other)?;
        let add = |have: PeerBalance, give: PeerBalance| {
            have.balance
                .checked_add(give.balance)
                .map(|b| PeerBalance::new(have.address, b))
                .ok_or(ProtocolViolation::Overflow)
        };
        Ok(Self { first: add(self.first, other.first)?, second: add(self.second, other.second)? })
    }

    fn check_parties(&self, other: &Self) -> Result<(), ProtocolViolation> {
        if self.same_parties(other) {
            return Ok(());
        }
        Err(ProtocolViolation::MalformedPayload(format!(
            "allocation for {} / {} does not match channel parties {} / {}",
            other.first.address, other.second.address, self.first.address, self.second.address
        )))
    }
}

/// Unallocated channel value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeBalance {
    /// Per-party balances
    pub balances: Allocation,
    /// Incremented on every install; the new app takes the incremented value
    pub unique_id: u64,
}

/// One installed application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInstance {
    /// Content-derived identifier
    pub id: AppInstanceId,
    /// Validity rules the app is judged against
    pub app: AppInterface,
    /// Deposit terms agreed at install
    pub terms: Terms,
    /// Dispute timeout
    pub timeout: u64,
    /// Value held by the app, fixed at install
    pub allocation: Allocation,
    /// Keys the parties sign app state with, canonical order
    pub signing_keys: (Address, Address),
    /// Current encoded application state
    pub encoded_state: Vec<u8>,
    /// Incremented by exactly one on each committed update
    pub local_nonce: u64,
    /// Channel dependency nonce at install time
    pub dependency_nonce: u64,
    /// Free balance `unique_id` the app was installed at
    pub unique_id: u64,
}

/// Agreed state of one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelState {
    /// Channel identifier
    pub channel_id: ChannelId,
    /// Unallocated value
    pub free_balance: FreeBalance,
    /// Installed applications by id
    pub app_instances: BTreeMap<AppInstanceId, AppInstance>,
    /// Incremented once per uninstall
    pub dependency_nonce: u64,
}

impl ChannelState {
    /// Freshly set up channel: zero balances, no apps.
    pub fn new(channel_id: ChannelId, a: Address, b: Address) -> Self {
        Self {
            channel_id,
            free_balance: FreeBalance { balances: Allocation::zero(a, b), unique_id: 0 },
            app_instances: BTreeMap::new(),
            dependency_nonce: 0,
        }
    }

    /// Replace the free balance, as after an observed deposit.
    #[must_use]
    pub fn with_free_balance(mut self, a: PeerBalance, b: PeerBalance) -> Self {
        self.free_balance.balances = Allocation::new(a, b);
        self
    }

    /// Participants in canonical order.
    pub fn participants(&self) -> (Address, Address) {
        self.free_balance.balances.parties()
    }

    /// Whether `party` is one of the two participants.
    pub fn is_participant(&self, party: Address) -> bool {
        let (first, second) = self.participants();
        party == first || party == second
    }

    /// Installed app by id.
    pub fn app(&self, id: &AppInstanceId) -> Option<&AppInstance> {
        self.app_instances.get(id)
    }

    /// Free balance held by `party`.
    pub fn free_balance_of(&self, party: Address) -> Option<u64> {
        self.free_balance.balances.amount_of(party)
    }

    /// Free balance plus every app allocation.
    pub fn total_value(&self) -> u128 {
        self.free_balance.balances.total()
            + self.app_instances.values().map(|app| app.allocation.total()).sum::<u128>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOW: Address = Address([0x11; 20]);
    const HIGH: Address = Address([0xee; 20]);

    #[test]
    fn allocation_is_canonical_regardless_of_argument_order() {
        let a = Allocation::new(PeerBalance::new(HIGH, 5), PeerBalance::new(LOW, 10));
        let b = Allocation::new(PeerBalance::new(LOW, 10), PeerBalance::new(HIGH, 5));
        assert_eq!(a, b);
        assert_eq!(a.first.address, LOW);
    }

    #[test]
    fn debit_rejects_overdraft() {
        let have = Allocation::new(PeerBalance::new(LOW, 1), PeerBalance::new(HIGH, 5));
        let take = Allocation::new(PeerBalance::new(LOW, 2), PeerBalance::new(HIGH, 0));
        let err = have.debit(&take).unwrap_err();
        assert_eq!(
            err,
            ProtocolViolation::InsufficientBalance { party: LOW, available: 1, required: 2 }
        );
    }

    #[test]
    fn debit_rejects_foreign_party() {
        let have = Allocation::zero(LOW, HIGH);
        let take = Allocation::zero(LOW, Address([0x77; 20]));
        assert!(matches!(have.debit(&take), Err(ProtocolViolation::MalformedPayload(_))));
    }

    #[test]
    fn credit_overflow_is_reported() {
        let have = Allocation::new(PeerBalance::new(LOW, u64::MAX), PeerBalance::new(HIGH, 0));
        let give = Allocation::new(PeerBalance::new(LOW, 1), PeerBalance::new(HIGH, 0));
        assert_eq!(have.credit(&give), Err(ProtocolViolation::Overflow));
    }

    #[test]
    fn new_channel_is_empty_and_canonical() {
        let state = ChannelState::new(ChannelId([1; 20]), HIGH, LOW);
        assert_eq!(state.participants(), (LOW, HIGH));
        assert_eq!(state.total_value(), 0);
        assert!(state.app_instances.is_empty());
        assert_eq!(state.dependency_nonce, 0);
    }
}
