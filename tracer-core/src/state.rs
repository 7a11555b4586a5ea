//! World-state access and the per-request shadow state.
//!
//! The engine never mutates the world state it traces against. Tracers
//! observe a read-only [`StateView`] supplied by the EVM host, while the
//! [`StateAddresses`] shadow accumulates the per-block effects of already
//! replayed transactions so that each transaction's state diff is computed
//! against a consistent pre-image.

use std::{collections::BTreeSet, sync::Arc};

use alloy_primitives::{Address, Bytes, B256, U256};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Read-only view over an (intra-block) world state.
///
/// Implementations answer synchronously: tracer callbacks run on the EVM
/// worker and must not suspend, so any remote data has to be pre-loaded by
/// the host before execution starts.
pub trait StateView: Send + Sync {
    /// Whether the account exists in this state.
    fn exists(&self, address: Address) -> bool;

    /// Current balance of the account, zero if absent.
    fn balance(&self, address: Address) -> U256;

    /// Current nonce of the account, zero if absent.
    fn nonce(&self, address: Address) -> u64;

    /// Current code of the account, empty if absent.
    fn code(&self, address: Address) -> Bytes;

    /// Value of the storage slot as of the start of the transaction.
    fn original_storage(&self, address: Address, key: B256) -> B256;

    /// Value of the storage slot as currently written.
    fn current_storage(&self, address: Address, key: B256) -> B256;

    /// Accounts the interpreter observed (read or written) during execution,
    /// in deterministic order.
    fn touched(&self) -> BTreeSet<Address>;
}

impl<S: StateView + ?Sized> StateView for &S {
    fn exists(&self, address: Address) -> bool {
        (**self).exists(address)
    }

    fn balance(&self, address: Address) -> U256 {
        (**self).balance(address)
    }

    fn nonce(&self, address: Address) -> u64 {
        (**self).nonce(address)
    }

    fn code(&self, address: Address) -> Bytes {
        (**self).code(address)
    }

    fn original_storage(&self, address: Address, key: B256) -> B256 {
        (**self).original_storage(address, key)
    }

    fn current_storage(&self, address: Address, key: B256) -> B256 {
        (**self).current_storage(address, key)
    }

    fn touched(&self) -> BTreeSet<Address> {
        (**self).touched()
    }
}

impl<S: StateView + ?Sized> StateView for Arc<S> {
    fn exists(&self, address: Address) -> bool {
        (**self).exists(address)
    }

    fn balance(&self, address: Address) -> U256 {
        (**self).balance(address)
    }

    fn nonce(&self, address: Address) -> u64 {
        (**self).nonce(address)
    }

    fn code(&self, address: Address) -> Bytes {
        (**self).code(address)
    }

    fn original_storage(&self, address: Address, key: B256) -> B256 {
        (**self).original_storage(address, key)
    }

    fn current_storage(&self, address: Address, key: B256) -> B256 {
        (**self).current_storage(address, key)
    }

    fn touched(&self) -> BTreeSet<Address> {
        (**self).touched()
    }
}

/// Cached snapshot of `(balance, nonce, code)` per address, backed by an
/// initial read-only state.
///
/// Lookups return the shadow value if one has been recorded, falling back to
/// the backing state otherwise. Mutations only ever write to the shadow; the
/// backing state is never modified. The shadow lives for the duration of one
/// block-level trace request and is advanced between transactions by
/// [`crate::tracers::IntraBlockStateTracer`].
#[derive(Debug)]
pub struct StateAddresses<S> {
    initial: S,
    balances: RwLock<HashMap<Address, U256>>,
    nonces: RwLock<HashMap<Address, u64>>,
    codes: RwLock<HashMap<Address, Bytes>>,
}

impl<S: StateView> StateAddresses<S> {
    /// Creates an empty shadow over the given backing state.
    pub fn new(initial: S) -> Self {
        Self {
            initial,
            balances: RwLock::new(HashMap::new()),
            nonces: RwLock::new(HashMap::new()),
            codes: RwLock::new(HashMap::new()),
        }
    }

    /// Whether the account exists in the *backing* state.
    ///
    /// Distinct from [`Self::balance_exists`], which only consults the shadow.
    pub fn exists(&self, address: Address) -> bool {
        self.initial.exists(address)
    }

    /// Whether the shadow has recorded a balance for this address.
    pub fn balance_exists(&self, address: Address) -> bool {
        self.balances.read().contains_key(&address)
    }

    pub fn balance(&self, address: Address) -> U256 {
        if let Some(balance) = self.balances.read().get(&address) {
            return *balance;
        }
        self.initial.balance(address)
    }

    pub fn nonce(&self, address: Address) -> u64 {
        if let Some(nonce) = self.nonces.read().get(&address) {
            return *nonce;
        }
        self.initial.nonce(address)
    }

    pub fn code(&self, address: Address) -> Bytes {
        if let Some(code) = self.codes.read().get(&address) {
            return code.clone();
        }
        self.initial.code(address)
    }

    pub fn set_balance(&self, address: Address, balance: U256) {
        self.balances.write().insert(address, balance);
    }

    pub fn set_nonce(&self, address: Address, nonce: u64) {
        self.nonces.write().insert(address, nonce);
    }

    pub fn set_code(&self, address: Address, code: Bytes) {
        self.codes.write().insert(address, code);
    }
}
