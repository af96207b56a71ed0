//! Test utilities: an in-process [`RelationshipChain`] and shared fixtures.
//!
//! Enabled for this crate's own tests and, through the `testing` feature,
//! for dependants' tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::chain::{RelationshipChain, RelationshipInfo, TokenId};
use crate::contract::normalize_wallet;
use crate::error::{Error, Result};
use crate::lifecycle::NewContract;
use crate::status::OnChainStatus;

pub const ALICE: &str = "0xa11ce00000000000000000000000000000000001";
pub const BOB: &str = "0xb0b0000000000000000000000000000000000002";
pub const CAROL: &str = "0xca7017000000000000000000000000000000003c";

/// Request for a contract from `creator` to `partner` with the given amount.
pub fn new_contract(creator: &str, partner: &str, amount: &str) -> NewContract {
    NewContract {
        creator_wallet: creator.to_string(),
        partner_wallet: partner.to_string(),
        amount: amount.to_string(),
        ..Default::default()
    }
}

/// Alice → Bob, 100 units, refund on early exit.
pub fn sample_request() -> NewContract {
    new_contract(ALICE, BOB, "100")
}

#[derive(Default)]
struct MockState {
    relationships: BTreeMap<TokenId, RelationshipInfo>,
    owners: HashMap<String, TokenId>,
    hidden_partners: HashSet<String>,
    certificates: Vec<String>,
    withdrawals: Vec<(TokenId, String)>,
    failing: bool,
}

/// In-memory relationship contract. Starting a relationship gives both
/// partners the relationship token.
#[derive(Default)]
pub struct MockChain {
    state: Mutex<MockState>,
    status_reads: AtomicUsize,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, MockState>> {
        let guard = self
            .state
            .lock()
            .map_err(|_| Error::Chain("mock chain poisoned".into()))?;
        if guard.failing {
            return Err(Error::Chain("node unreachable".into()));
        }
        Ok(guard)
    }

    /// Make every call fail with [`Error::Chain`] until reset.
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().unwrap().failing = failing;
    }

    /// Make `partnerOf(wallet)` answer the zero address while keeping the
    /// relationship itself.
    pub fn clear_partner_of(&self, wallet: &str) {
        self.state
            .lock()
            .unwrap()
            .hidden_partners
            .insert(normalize_wallet(wallet));
    }

    /// Overwrite a relationship's status directly.
    pub fn set_status(&self, token_id: TokenId, status: OnChainStatus) {
        if let Some(rel) = self.state.lock().unwrap().relationships.get_mut(&token_id) {
            rel.status = status;
        }
    }

    /// Number of `getStatus` calls served.
    pub fn status_reads(&self) -> usize {
        self.status_reads.load(Ordering::SeqCst)
    }

    pub fn certificates(&self) -> Vec<String> {
        self.state.lock().unwrap().certificates.clone()
    }

    pub fn withdrawals(&self) -> Vec<(TokenId, String)> {
        self.state.lock().unwrap().withdrawals.clone()
    }
}

impl RelationshipChain for MockChain {
    fn partner_of(&self, wallet: &str) -> Result<Option<String>> {
        let state = self.state()?;
        let wallet = normalize_wallet(wallet);
        if state.hidden_partners.contains(&wallet) {
            return Ok(None);
        }
        let partner = state
            .owners
            .get(&wallet)
            .and_then(|id| state.relationships.get(id))
            .map(|rel| {
                if rel.partner_a == wallet {
                    rel.partner_b.clone()
                } else {
                    rel.partner_a.clone()
                }
            });
        Ok(partner)
    }

    fn is_partner(&self, wallet: &str, other: &str) -> Result<bool> {
        let state = self.state()?;
        let (a, b) = (normalize_wallet(wallet), normalize_wallet(other));
        Ok(state.relationships.values().any(|rel| {
            (rel.partner_a == a && rel.partner_b == b) || (rel.partner_a == b && rel.partner_b == a)
        }))
    }

    fn balance_of(&self, wallet: &str) -> Result<u64> {
        let state = self.state()?;
        Ok(u64::from(state.owners.contains_key(&normalize_wallet(wallet))))
    }

    fn token_of_owner(&self, wallet: &str) -> Result<Option<TokenId>> {
        let state = self.state()?;
        Ok(state.owners.get(&normalize_wallet(wallet)).copied())
    }

    fn get_status(&self, token_id: TokenId) -> Result<OnChainStatus> {
        self.status_reads.fetch_add(1, Ordering::SeqCst);
        self.relationship(token_id).map(|rel| rel.status)
    }

    fn relationship(&self, token_id: TokenId) -> Result<RelationshipInfo> {
        let state = self.state()?;
        state
            .relationships
            .get(&token_id)
            .cloned()
            .ok_or_else(|| Error::Chain(format!("unknown token {token_id}")))
    }

    fn start_relationship(
        &self,
        from: &str,
        partner: &str,
        deposit_token: &str,
        deposit_amount: &str,
    ) -> Result<TokenId> {
        let mut state = self.state()?;
        let (a, b) = (normalize_wallet(from), normalize_wallet(partner));
        if state.owners.contains_key(&a) || state.owners.contains_key(&b) {
            return Err(Error::Chain("already in a relationship".into()));
        }
        let token_id = state.relationships.len() as TokenId + 1;
        state.relationships.insert(
            token_id,
            RelationshipInfo {
                token_id,
                partner_a: a.clone(),
                partner_b: b.clone(),
                deposit_token: normalize_wallet(deposit_token),
                deposit_amount: deposit_amount.to_string(),
                status: OnChainStatus::Dating,
            },
        );
        state.owners.insert(a, token_id);
        state.owners.insert(b, token_id);
        Ok(token_id)
    }

    fn set_married(&self, token_id: TokenId) -> Result<()> {
        let mut state = self.state()?;
        let rel = state
            .relationships
            .get_mut(&token_id)
            .ok_or_else(|| Error::Chain(format!("unknown token {token_id}")))?;
        if rel.status != OnChainStatus::Dating {
            return Err(Error::Chain(format!("relationship is {}", rel.status)));
        }
        rel.status = OnChainStatus::Married;
        Ok(())
    }

    fn mint(&self, to: &str) -> Result<TokenId> {
        let mut state = self.state()?;
        state.certificates.push(normalize_wallet(to));
        Ok(state.certificates.len() as TokenId)
    }

    fn withdraw_deposit(&self, token_id: TokenId, to: &str) -> Result<()> {
        let mut state = self.state()?;
        if !state.relationships.contains_key(&token_id) {
            return Err(Error::Chain(format!("unknown token {token_id}")));
        }
        state.withdrawals.push((token_id, normalize_wallet(to)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixtures_are_distinct_normalized_addresses() {
        for w in [ALICE, BOB, CAROL] {
            assert_eq!(normalize_wallet(w), w);
            assert_eq!(w.len(), 42);
        }
        assert_ne!(ALICE, BOB);
        assert_eq!(sample_request().amount, "100");
    }

    #[test]
    fn writes_follow_the_relationship_rules() {
        let chain = MockChain::new();
        let token = chain.start_relationship(ALICE, BOB, CAROL, "7").unwrap();
        assert!(chain.start_relationship(BOB, CAROL, CAROL, "1").is_err());

        chain.set_married(token).unwrap();
        assert!(chain.set_married(token).is_err());
        assert_eq!(chain.relationship(token).unwrap().status, OnChainStatus::Married);

        assert_eq!(chain.mint(ALICE).unwrap(), 1);
        chain.withdraw_deposit(token, BOB).unwrap();
        assert!(chain.withdraw_deposit(99, BOB).is_err());
        assert_eq!(chain.certificates(), vec![ALICE.to_string()]);
        assert_eq!(chain.withdrawals(), vec![(token, BOB.to_string())]);
    }
}
