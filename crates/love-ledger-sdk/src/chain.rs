use serde::{Deserialize, Serialize};

use crate::contract::normalize_wallet;
use crate::error::{Error, Result};
use crate::status::OnChainStatus;

/// Returned by `partnerOf` for a wallet with no relationship.
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Relationship NFT id.
pub type TokenId = u64;

/// Decimals of the native coin.
pub const NATIVE_DECIMALS: u32 = 18;

/// A row of the relationship contract's `relationships(tokenId)` mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipInfo {
    pub token_id: TokenId,
    pub partner_a: String,
    pub partner_b: String,
    /// ERC-20 token address, or [`ZERO_ADDRESS`] for the native coin.
    pub deposit_token: String,
    /// Base units, as a decimal string.
    pub deposit_amount: String,
    pub status: OnChainStatus,
}

/// What the status watcher last saw on chain for a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedStatus {
    /// The watched wallet, normalized.
    pub wallet: String,
    pub token_id: TokenId,
    pub status: OnChainStatus,
    pub partner: Option<String>,
}

/// The deployed relationship, NFT and vault contracts.
///
/// Calls are blocking; the watcher drives them from its own thread. Node
/// and transport failures are reported as [`Error::Chain`](crate::Error::Chain).
pub trait RelationshipChain: Send + Sync + 'static {
    /// `partnerOf(address)`; `None` when the contract answers the zero address.
    fn partner_of(&self, wallet: &str) -> Result<Option<String>>;

    fn is_partner(&self, wallet: &str, other: &str) -> Result<bool>;

    /// Relationship NFTs held by `wallet`.
    fn balance_of(&self, wallet: &str) -> Result<u64>;

    /// Relationship NFT held by `wallet`, resolved from the transfer log index.
    fn token_of_owner(&self, wallet: &str) -> Result<Option<TokenId>>;

    fn get_status(&self, token_id: TokenId) -> Result<OnChainStatus>;

    fn relationship(&self, token_id: TokenId) -> Result<RelationshipInfo>;

    // ── Writes ──────────────────────────────────────────────────────────

    /// `startRelationship(partner, depositToken, depositAmount)` sent from
    /// `from`. Returns the new relationship's token id.
    fn start_relationship(
        &self,
        from: &str,
        partner: &str,
        deposit_token: &str,
        deposit_amount: &str,
    ) -> Result<TokenId>;

    fn set_married(&self, token_id: TokenId) -> Result<()>;

    /// Mint a certificate NFT to `to`.
    fn mint(&self, to: &str) -> Result<TokenId>;

    /// Vault `withdrawDeposit(tokenId, to)`.
    fn withdraw_deposit(&self, token_id: TokenId, to: &str) -> Result<()>;
}

/// Find `wallet`'s relationship and read its status.
///
/// A wallet has a relationship if `partnerOf` is set, or if it is partnered
/// with `partner_hint`. Without a held relationship NFT the answer is `None`.
pub fn resolve_relationship<C: RelationshipChain + ?Sized>(
    chain: &C,
    wallet: &str,
    partner_hint: Option<&str>,
) -> Result<Option<ObservedStatus>> {
    let wallet = normalize_wallet(wallet);
    let partner = chain
        .partner_of(&wallet)?
        .map(|p| normalize_wallet(&p))
        .filter(|p| p != ZERO_ADDRESS);

    let has_relationship = match (&partner, partner_hint) {
        (Some(_), _) => true,
        (None, Some(hint)) => chain.is_partner(&wallet, &normalize_wallet(hint))?,
        (None, None) => false,
    };
    if !has_relationship || chain.balance_of(&wallet)? == 0 {
        return Ok(None);
    }

    let Some(token_id) = chain.token_of_owner(&wallet)? else {
        return Ok(None);
    };
    let status = chain.get_status(token_id)?;
    Ok(Some(ObservedStatus {
        token_id,
        status,
        partner: partner.or_else(|| partner_hint.map(normalize_wallet)),
        wallet,
    }))
}

/// Convert a decimal amount such as `"1.5"` into base units with `decimals`
/// fractional digits, as a decimal string.
pub fn to_base_units(amount: &str, decimals: u32) -> Result<String> {
    let amount = amount.trim();
    let invalid = || Error::Validation(format!("invalid amount: {amount:?}"));

    let (whole, frac) = amount.split_once('.').unwrap_or((amount, ""));
    if whole.is_empty() && frac.is_empty() {
        return Err(invalid());
    }
    if !whole.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let frac = frac.trim_end_matches('0');
    let width = decimals as usize;
    if frac.len() > width {
        return Err(Error::Validation(format!(
            "amount {amount} has more than {decimals} decimal places"
        )));
    }

    let digits = format!("{whole}{frac:0<width$}");
    let digits = digits.trim_start_matches('0');
    Ok(if digits.is_empty() {
        "0".to_string()
    } else {
        digits.to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ALICE, BOB, CAROL, MockChain};

    #[test]
    fn no_relationship_resolves_to_none() {
        let chain = MockChain::new();
        assert_eq!(resolve_relationship(&chain, ALICE, None).unwrap(), None);
        assert_eq!(resolve_relationship(&chain, ALICE, Some(BOB)).unwrap(), None);
    }

    #[test]
    fn started_relationship_is_found_for_both_partners() {
        let chain = MockChain::new();
        let token = chain.start_relationship(ALICE, BOB, ZERO_ADDRESS, "1000").unwrap();

        let seen = resolve_relationship(&chain, ALICE, None).unwrap().unwrap();
        assert_eq!(seen.wallet, ALICE);
        assert_eq!(seen.token_id, token);
        assert_eq!(seen.status, OnChainStatus::Dating);
        assert_eq!(seen.partner.as_deref(), Some(BOB));

        chain.set_married(token).unwrap();
        let shouted = format!("0x{}", BOB[2..].to_uppercase());
        let seen = resolve_relationship(&chain, &shouted, None).unwrap().unwrap();
        assert_eq!(seen.wallet, BOB);
        assert_eq!(seen.status, OnChainStatus::Married);
        assert_eq!(seen.partner.as_deref(), Some(ALICE));
    }

    #[test]
    fn partner_hint_is_checked_with_is_partner() {
        let chain = MockChain::new();
        let token = chain.start_relationship(ALICE, BOB, ZERO_ADDRESS, "5").unwrap();
        chain.clear_partner_of(ALICE);

        assert_eq!(resolve_relationship(&chain, ALICE, None).unwrap(), None);
        assert_eq!(resolve_relationship(&chain, ALICE, Some(CAROL)).unwrap(), None);
        let seen = resolve_relationship(&chain, ALICE, Some(BOB)).unwrap().unwrap();
        assert_eq!(seen.token_id, token);
        assert_eq!(seen.partner.as_deref(), Some(BOB));
    }

    #[test]
    fn chain_failures_propagate() {
        let chain = MockChain::new();
        chain.set_failing(true);
        let err = resolve_relationship(&chain, ALICE, None).unwrap_err();
        assert!(matches!(err, crate::Error::Chain(_)));
    }

    #[test]
    fn amounts_scale_to_base_units() {
        assert_eq!(to_base_units("1.5", NATIVE_DECIMALS).unwrap(), "1500000000000000000");
        assert_eq!(to_base_units(" 200 ", 2).unwrap(), "20000");
        assert_eq!(to_base_units(".25", 2).unwrap(), "25");
        assert_eq!(to_base_units("0.10", 1).unwrap(), "1");
        assert_eq!(to_base_units("0.000", 18).unwrap(), "0");

        for bad in ["", ".", "abc", "-1", "1e2", "1.2.3", "0.001"] {
            assert!(
                matches!(to_base_units(bad, 2), Err(crate::Error::Validation(_))),
                "{bad:?}"
            );
        }
    }
}
