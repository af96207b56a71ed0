//! Client session controller.
//!
//! Owns the session state a front end renders from: connected wallet,
//! loaded contract, global stats, loading flag, screen, pending notices and
//! the on-chain mirror. Contracts are only ever replaced with what the server
//! returns; the controller never edits server-owned fields itself.
//!
//! With a [`RelationshipChain`] attached the controller also drives the
//! on-chain side: the deposit on create, `setMarried` once both parties
//! verified, the certificate mint and the deposit withdrawal. Chain calls
//! block, so they run on `spawn_blocking`.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use love_ledger_sdk::{
    Contract, ContractStatus, DisplayStatus, NATIVE_DECIMALS, ObservedStatus, OnChainStatus,
    RefundOption, RelationshipChain, RelationshipInfo, Role, StatusEvent, Stats, TokenId,
    ZERO_ADDRESS, normalize_wallet, to_base_units,
};

use crate::client::{ClientError, LedgerApi};
use crate::wire::CreateContractBody;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Screen {
    #[default]
    Landing,
    Create,
    Dashboard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Error,
}

/// A toast-style message for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Notice {
    fn new(level: NoticeLevel, title: &str, description: Option<String>) -> Self {
        Self {
            level,
            title: title.to_string(),
            description,
        }
    }
}

/// Input of the create-contract form.
#[derive(Debug, Clone, Default)]
pub struct ContractForm {
    pub partner_wallet: String,
    pub amount: String,
    /// Days; `None` or `0` means no expiry.
    pub duration: Option<u32>,
    pub refund_option: RefundOption,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no wallet connected")]
    NoWallet,

    #[error("no contract loaded")]
    NoContract,

    #[error("no chain connection")]
    NoChain,

    #[error("{0}")]
    NotEligible(&'static str),

    #[error(transparent)]
    Api(#[from] ClientError),

    #[error(transparent)]
    Chain(#[from] love_ledger_sdk::Error),
}

#[derive(Debug, Clone, Default)]
pub struct Session {
    pub wallet: Option<String>,
    pub contract: Option<Contract>,
    pub stats: Stats,
    pub loading: bool,
    pub screen: Screen,
    /// Latest on-chain observation for the wallet, if any.
    pub chain_status: Option<ObservedStatus>,
    /// Last read of the wallet's relationship record.
    pub relationship: Option<RelationshipInfo>,
    /// Bumped on every state change.
    pub revision: u64,
    notices: Vec<Notice>,
}

impl Session {
    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }
}

/// Serializable view of the session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub revision: u64,
    pub wallet: Option<String>,
    pub screen: Screen,
    pub loading: bool,
    pub contract: Option<Contract>,
    pub role: Option<Role>,
    pub display_status: Option<DisplayStatus>,
    pub days_remaining: Option<i64>,
    pub days_since_created: Option<i64>,
    pub progress_percent: Option<f64>,
    pub relationship: Option<RelationshipInfo>,
    pub stats: Stats,
    pub notices: Vec<Notice>,
}

// Notice titles and descriptions.
const CONNECT_FIRST: &str = "Please connect your wallet first";
const TRY_AGAIN: &str = "Please try again";

struct ActionText {
    failure: &'static str,
    transport: &'static str,
}

const CREATE: ActionText = ActionText {
    failure: "Failed to create contract",
    transport: "Error creating contract",
};
const PAIR: ActionText = ActionText {
    failure: "Failed to pair",
    transport: "Error pairing wallet",
};
const VERIFY: ActionText = ActionText {
    failure: "Failed to verify",
    transport: "Error verifying marriage",
};
const UNPAIR: ActionText = ActionText {
    failure: "Failed to terminate",
    transport: "Error terminating contract",
};
const OPEN: ActionText = ActionText {
    failure: "Failed to load contract",
    transport: "Error loading contract",
};

const MINT_FAILED: &str = "Mint failed!";
const WITHDRAW_FAILED: &str = "Withdrawal failed";

pub struct SessionController<A: LedgerApi> {
    api: A,
    chain: Option<Arc<dyn RelationshipChain>>,
    session: Session,
}

impl<A: LedgerApi> SessionController<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            chain: None,
            session: Session::default(),
        }
    }

    /// Drive the on-chain side of each action through `chain`.
    pub fn with_chain(mut self, chain: Arc<dyn RelationshipChain>) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    // ── Wallet ──────────────────────────────────────────────────────────

    /// Connect `address` and load the contract it is party to, if any.
    pub async fn connect_wallet(&mut self, address: &str) -> Result<(), SessionError> {
        let wallet = normalize_wallet(address);
        if wallet.is_empty() {
            return Err(SessionError::NoWallet);
        }
        let short: String = wallet.chars().take(10).collect();
        log::info!("session: wallet connected {short}...");

        self.session.wallet = Some(wallet.clone());
        self.session.contract = None;
        self.session.chain_status = None;
        self.session.relationship = None;
        self.notify(
            NoticeLevel::Success,
            "Wallet Connected",
            Some(format!("Connected: {short}...")),
        );
        self.fetch_contract(&wallet).await;
        Ok(())
    }

    pub fn disconnect_wallet(&mut self) {
        self.session.wallet = None;
        self.session.contract = None;
        self.session.chain_status = None;
        self.session.relationship = None;
        self.session.screen = Screen::Landing;
        self.notify(NoticeLevel::Success, "Wallet Disconnected", None);
    }

    async fn fetch_contract(&mut self, wallet: &str) {
        match self.api.get_contract_by_wallet(wallet).await {
            Ok(Some(contract)) => {
                self.session.contract = Some(contract);
                self.bump_revision();
            }
            Ok(None) => {}
            Err(e) => log::warn!("session: failed to fetch contract for {wallet}: {e}"),
        }
    }

    // ── Navigation ──────────────────────────────────────────────────────

    pub fn open_create(&mut self) -> Result<(), SessionError> {
        self.require_connected()?;
        self.session.screen = Screen::Create;
        self.bump_revision();
        Ok(())
    }

    pub fn open_dashboard(&mut self) -> Result<(), SessionError> {
        self.require_connected()?;
        self.session.screen = Screen::Dashboard;
        self.bump_revision();
        Ok(())
    }

    pub fn go_home(&mut self) {
        self.session.screen = Screen::Landing;
        self.bump_revision();
    }

    fn require_connected(&mut self) -> Result<(), SessionError> {
        if self.session.wallet.is_some() {
            return Ok(());
        }
        self.notify(NoticeLevel::Error, CONNECT_FIRST, None);
        Err(SessionError::NoWallet)
    }

    /// Load a contract by id, e.g. from a link shared by the creator, so the
    /// partner can pair before the wallet index knows about them.
    pub async fn open_contract(&mut self, contract_id: &str) -> Result<(), SessionError> {
        self.require_connected()?;
        self.begin();
        let result = self.api.get_contract(contract_id.trim()).await;
        let contract = self.finish(result, &OPEN)?;
        self.session.contract = Some(contract);
        self.session.screen = Screen::Dashboard;
        self.bump_revision();
        Ok(())
    }

    // ── Lifecycle actions ───────────────────────────────────────────────

    /// With a chain attached the deposit is locked on chain first; the ledger
    /// record is only created once that succeeded.
    pub async fn create_contract(&mut self, form: ContractForm) -> Result<(), SessionError> {
        let Some(wallet) = self.session.wallet.clone() else {
            return Err(SessionError::NoWallet);
        };

        self.begin();
        if self.chain.is_some() {
            let (from, partner) = (wallet.clone(), normalize_wallet(&form.partner_wallet));
            let amount = form.amount.clone();
            let started = self
                .chain_call(move |chain| {
                    let deposit = to_base_units(&amount, NATIVE_DECIMALS)?;
                    let token_id =
                        chain.start_relationship(&from, &partner, ZERO_ADDRESS, &deposit)?;
                    chain.relationship(token_id)
                })
                .await;
            match started {
                Ok(info) => {
                    log::info!("session: relationship {} started on chain", info.token_id);
                    self.session.relationship = Some(info);
                }
                Err(err) => return Err(self.chain_failed(CREATE.transport, err)),
            }
        }

        let body = CreateContractBody {
            creator_wallet: Some(wallet),
            partner_wallet: Some(form.partner_wallet),
            amount: Some(Value::String(form.amount)),
            duration: form.duration.map(Value::from),
            refund_option: Some(form.refund_option.as_str().to_string()),
        };
        let result = self.api.create_contract(&body).await;
        let contract = self.finish(result, &CREATE)?;

        self.session.contract = Some(contract);
        self.session.screen = Screen::Dashboard;
        self.notify(
            NoticeLevel::Success,
            "Contract Created!",
            Some("Love Fund locked and awaiting pairing.".into()),
        );
        self.refresh_stats().await;
        Ok(())
    }

    /// Pair the connected wallet as the loaded contract's partner.
    pub async fn pair(&mut self) -> Result<(), SessionError> {
        let (wallet, contract_id) = self.party()?;

        self.begin();
        let result = self.api.pair(&contract_id, &wallet).await;
        let contract = self.finish(result, &PAIR)?;

        self.session.contract = Some(contract);
        self.notify(
            NoticeLevel::Success,
            "Wallets Paired!",
            Some("Both wallets connected. Commitment active.".into()),
        );
        self.refresh_stats().await;
        Ok(())
    }

    /// Returns whether both parties have now verified.
    pub async fn verify(&mut self) -> Result<bool, SessionError> {
        let (wallet, contract_id) = self.party()?;

        self.begin();
        let result = self.api.verify(&contract_id, &wallet).await;
        let outcome = self.finish(result, &VERIFY)?;

        self.session.contract = Some(outcome.contract);
        if outcome.both_verified {
            self.record_marriage().await;
            self.notify(
                NoticeLevel::Success,
                "Marriage Verified!",
                Some("Love Fund released and NFT minted.".into()),
            );
        } else {
            self.notify(
                NoticeLevel::Success,
                "You've Verified!",
                Some("Waiting for your partner to verify...".into()),
            );
        }
        self.refresh_stats().await;
        Ok(outcome.both_verified)
    }

    /// Terminate the loaded contract. Irreversible; confirmation is up to
    /// the caller.
    pub async fn unpair(&mut self) -> Result<(), SessionError> {
        let (wallet, contract_id) = self.party()?;

        self.begin();
        let result = self.api.unpair(&contract_id, &wallet).await;
        let contract = self.finish(result, &UNPAIR)?;

        self.session.contract = Some(contract);
        self.notify(
            NoticeLevel::Error,
            "Contract Terminated",
            Some("Contract has been terminated by one party.".into()),
        );
        self.refresh_stats().await;
        Ok(())
    }

    // ── On-chain actions ────────────────────────────────────────────────

    /// Mark the relationship married on chain. The ledger already holds the
    /// verification, so a failure here is reported but not returned.
    async fn record_marriage(&mut self) {
        if self.chain.is_none() {
            return;
        }
        let Some(token_id) = self.token_id() else {
            log::info!("session: no relationship on chain to mark married");
            return;
        };
        let result = self
            .chain_call(move |chain| {
                if chain.get_status(token_id)? == OnChainStatus::Dating {
                    chain.set_married(token_id)?;
                }
                chain.relationship(token_id)
            })
            .await;
        match result {
            Ok(info) => {
                self.session.relationship = Some(info);
                self.bump_revision();
            }
            Err(err) => {
                log::warn!("session: failed to mark {token_id} married: {err}");
                self.notify(
                    NoticeLevel::Error,
                    "Error recording marriage on chain",
                    Some(err.to_string()),
                );
            }
        }
    }

    /// Mint the marriage certificate NFT to the connected wallet.
    pub async fn mint_certificate(&mut self) -> Result<TokenId, SessionError> {
        self.require_connected()?;
        let wallet = self.session.wallet.clone().ok_or(SessionError::NoWallet)?;
        if self.chain.is_none() {
            return Err(SessionError::NoChain);
        }
        if self.display_status().map(DisplayStatus::phase) != Some(ContractStatus::Verified) {
            return Err(self.not_eligible(MINT_FAILED, "Marriage must be verified first"));
        }

        self.begin();
        let result = self.chain_call(move |chain| chain.mint(&wallet)).await;
        self.session.loading = false;
        let certificate = result.map_err(|err| self.chain_failed(MINT_FAILED, err))?;
        self.notify(
            NoticeLevel::Success,
            "Certificate Minted!",
            Some(format!("Certificate #{certificate} is in your wallet.")),
        );
        Ok(certificate)
    }

    /// Withdraw the deposit from the vault to the connected wallet.
    ///
    /// After a marriage the depositor withdraws. After an early exit with
    /// [`RefundOption::Refund`] the partner who did not terminate does.
    pub async fn withdraw(&mut self) -> Result<(), SessionError> {
        self.require_connected()?;
        let wallet = self.session.wallet.clone().ok_or(SessionError::NoWallet)?;
        if self.chain.is_none() {
            return Err(SessionError::NoChain);
        }
        let Some(token_id) = self.token_id() else {
            return Err(self.not_eligible(WITHDRAW_FAILED, "No relationship on chain"));
        };
        let depositor_only = match self.withdrawal_block(&wallet) {
            Ok(depositor_only) => depositor_only,
            Err(reason) => return Err(self.not_eligible(WITHDRAW_FAILED, reason)),
        };

        self.begin();
        let to = wallet.clone();
        let result = self
            .chain_call(move |chain| {
                let info = chain.relationship(token_id)?;
                if depositor_only && info.partner_a != to {
                    return Err(love_ledger_sdk::Error::Unauthorized(
                        "Only the depositor can withdraw".into(),
                    ));
                }
                chain.withdraw_deposit(token_id, &to)?;
                Ok(info)
            })
            .await;
        self.session.loading = false;
        let info = result.map_err(|err| self.chain_failed(WITHDRAW_FAILED, err))?;
        log::info!("session: deposit of {} withdrawn to {wallet}", info.token_id);
        self.session.relationship = Some(info);
        self.notify(
            NoticeLevel::Success,
            "Love Fund Withdrawn",
            Some("The deposit was sent to your wallet.".into()),
        );
        Ok(())
    }

    /// Re-read the relationship record. Failures are logged and the previous
    /// record kept.
    pub async fn refresh_relationship(&mut self) {
        let (Some(token_id), Some(_)) = (self.token_id(), &self.chain) else {
            return;
        };
        match self.chain_call(move |chain| chain.relationship(token_id)).await {
            Ok(info) => {
                self.session.relationship = Some(info);
                self.bump_revision();
            }
            Err(e) => log::warn!("session: failed to read relationship {token_id}: {e}"),
        }
    }

    fn token_id(&self) -> Option<TokenId> {
        self.session
            .relationship
            .as_ref()
            .map(|r| r.token_id)
            .or_else(|| self.session.chain_status.as_ref().map(|s| s.token_id))
    }

    /// `Ok(true)` when only the depositor may withdraw, `Err` with the reason
    /// when nobody may withdraw yet.
    fn withdrawal_block(&self, wallet: &str) -> Result<bool, &'static str> {
        match self.display_status().map(DisplayStatus::phase) {
            Some(ContractStatus::Verified) => Ok(true),
            Some(ContractStatus::Terminated) => match &self.session.contract {
                Some(c) if c.refund_option == RefundOption::Burn => Err("The Love Fund was burned"),
                Some(c) if c.terminated_by.as_deref() == Some(wallet) => {
                    Err("The Love Fund goes to your partner")
                }
                Some(_) => Ok(false),
                None => Err("No contract loaded"),
            },
            _ => Err("The Love Fund is still locked"),
        }
    }

    async fn chain_call<T, F>(&self, f: F) -> Result<T, SessionError>
    where
        F: FnOnce(&dyn RelationshipChain) -> love_ledger_sdk::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let chain = self.chain.clone().ok_or(SessionError::NoChain)?;
        tokio::task::spawn_blocking(move || f(chain.as_ref()))
            .await
            .map_err(|e| love_ledger_sdk::Error::Chain(format!("task join error: {e}")))?
            .map_err(SessionError::Chain)
    }

    fn chain_failed(&mut self, title: &str, err: SessionError) -> SessionError {
        log::warn!("session: {title}: {err}");
        self.session.loading = false;
        self.notify(NoticeLevel::Error, title, Some(err.to_string()));
        err
    }

    fn not_eligible(&mut self, title: &str, reason: &'static str) -> SessionError {
        self.notify(NoticeLevel::Error, title, Some(reason.to_string()));
        SessionError::NotEligible(reason)
    }

    fn party(&self) -> Result<(String, String), SessionError> {
        let wallet = self.session.wallet.clone().ok_or(SessionError::NoWallet)?;
        let contract = self.session.contract.as_ref().ok_or(SessionError::NoContract)?;
        Ok((wallet, contract.id.clone()))
    }

    fn begin(&mut self) {
        self.session.loading = true;
        self.bump_revision();
    }

    /// Clear the loading flag and turn a failed call into a notice.
    fn finish<T>(
        &mut self,
        result: Result<T, ClientError>,
        text: &ActionText,
    ) -> Result<T, SessionError> {
        self.session.loading = false;
        self.bump_revision();
        result.map_err(|err| {
            log::warn!("session: {}: {err}", text.failure);
            let notice = match &err {
                ClientError::Api { message, .. } => Notice::new(
                    NoticeLevel::Error,
                    text.failure,
                    Some(message.clone().unwrap_or_else(|| TRY_AGAIN.to_string())),
                ),
                ClientError::Transport(_) | ClientError::Decode(_) => {
                    Notice::new(NoticeLevel::Error, text.transport, Some(err.to_string()))
                }
            };
            self.session.notices.push(notice);
            SessionError::Api(err)
        })
    }

    // ── Stats ───────────────────────────────────────────────────────────

    /// Failures are logged and the previous stats kept.
    pub async fn refresh_stats(&mut self) {
        match self.api.stats().await {
            Ok(stats) => {
                self.session.stats = stats;
                self.bump_revision();
            }
            Err(e) => log::warn!("session: failed to fetch stats: {e}"),
        }
    }

    // ── On-chain mirror ─────────────────────────────────────────────────

    /// Events from a watcher on any wallet but the connected one are dropped.
    pub fn apply_status_event(&mut self, event: StatusEvent) {
        if self.session.wallet.as_deref() != Some(event.wallet()) {
            log::debug!("session: ignoring status event for {}", event.wallet());
            return;
        }
        match event {
            StatusEvent::Observed(status) => {
                log::debug!(
                    "session: token {} is {} on chain",
                    status.token_id,
                    status.status
                );
                if self
                    .session
                    .relationship
                    .as_ref()
                    .is_some_and(|r| r.token_id != status.token_id)
                {
                    self.session.relationship = None;
                }
                self.session.chain_status = Some(status);
            }
            StatusEvent::Cleared { .. } => {
                self.session.chain_status = None;
                self.session.relationship = None;
            }
            StatusEvent::Error { message, .. } => {
                log::warn!("session: chain status fetch failed: {message}");
                return;
            }
        }
        self.bump_revision();
    }

    /// On-chain status when known, otherwise the ledger's.
    pub fn display_status(&self) -> Option<DisplayStatus> {
        DisplayStatus::reconcile(
            self.session.contract.as_ref().map(|c| c.status),
            self.session.chain_status.as_ref().map(|s| s.status),
        )
    }

    // ── Views ───────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> SessionSnapshot {
        let now = Utc::now();
        let contract = self.session.contract.as_ref();
        let role = match (contract, &self.session.wallet) {
            (Some(c), Some(w)) => c.role_of(w),
            _ => None,
        };
        SessionSnapshot {
            revision: self.session.revision,
            wallet: self.session.wallet.clone(),
            screen: self.session.screen,
            loading: self.session.loading,
            contract: contract.cloned(),
            role,
            display_status: self.display_status(),
            days_remaining: contract.and_then(|c| c.days_remaining(now)),
            days_since_created: contract.map(|c| c.days_since_created(now)),
            progress_percent: contract
                .filter(|c| c.duration.is_some())
                .map(|c| c.progress_percent(now)),
            relationship: self.session.relationship.clone(),
            stats: self.session.stats.clone(),
            notices: self.session.notices.clone(),
        }
    }

    /// Drain pending notices.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        if self.session.notices.is_empty() {
            return Vec::new();
        }
        self.bump_revision();
        std::mem::take(&mut self.session.notices)
    }

    fn notify(&mut self, level: NoticeLevel, title: &str, description: Option<String>) {
        self.session
            .notices
            .push(Notice::new(level, title, description));
        self.bump_revision();
    }

    fn bump_revision(&mut self) {
        self.session.revision += 1;
    }
}
