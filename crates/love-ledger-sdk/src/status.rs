use serde::{Deserialize, Serialize};

/// Lifecycle of a custodial relationship contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractStatus {
    /// Created and funded by the creator, waiting for the partner to pair.
    Pending,
    /// Paired. Each party may now verify independently.
    Active,
    /// Both parties verified. Terminal.
    Verified,
    /// Unpaired by one of the parties. Terminal.
    Terminated,
}

impl ContractStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Verified => "verified",
            Self::Terminated => "terminated",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Verified | Self::Terminated)
    }

    /// The on-chain vocabulary for this status. A pending contract has no
    /// on-chain counterpart: the relationship only exists once started.
    pub fn to_onchain(self) -> Option<OnChainStatus> {
        match self {
            Self::Pending => None,
            Self::Active => Some(OnChainStatus::Dating),
            Self::Verified => Some(OnChainStatus::Married),
            Self::Terminated => Some(OnChainStatus::BrokeUp),
        }
    }
}

impl std::fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContractStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "verified" => Ok(Self::Verified),
            "terminated" => Ok(Self::Terminated),
            _ => Err(format!("invalid contract status: {s}")),
        }
    }
}

/// Status codes returned by the relationship contract's `getStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u64)]
pub enum OnChainStatus {
    Dating = 0,
    Married = 1,
    BrokeUp = 2,
}

impl OnChainStatus {
    pub fn from_u64(v: u64) -> Option<Self> {
        match v {
            0 => Some(Self::Dating),
            1 => Some(Self::Married),
            2 => Some(Self::BrokeUp),
            _ => None,
        }
    }

    pub fn as_u64(self) -> u64 {
        self as u64
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dating => "Dating",
            Self::Married => "Married",
            Self::BrokeUp => "BrokeUp",
        }
    }

    pub fn to_custodial(self) -> ContractStatus {
        match self {
            Self::Dating => ContractStatus::Active,
            Self::Married => ContractStatus::Verified,
            Self::BrokeUp => ContractStatus::Terminated,
        }
    }
}

impl std::fmt::Display for OnChainStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The status shown for a contract, tagged with the authority it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "source", content = "status", rename_all = "lowercase")]
pub enum DisplayStatus {
    Ledger(ContractStatus),
    Chain(OnChainStatus),
}

impl DisplayStatus {
    /// On-chain status wins whenever it is known.
    pub fn reconcile(ledger: Option<ContractStatus>, chain: Option<OnChainStatus>) -> Option<Self> {
        match (chain, ledger) {
            (Some(c), _) => Some(Self::Chain(c)),
            (None, Some(l)) => Some(Self::Ledger(l)),
            (None, None) => None,
        }
    }

    /// Custodial phase, regardless of source.
    pub fn phase(self) -> ContractStatus {
        match self {
            Self::Ledger(s) => s,
            Self::Chain(s) => s.to_custodial(),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Ledger(s) => s.as_str(),
            Self::Chain(s) => s.as_str(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn onchain_roundtrip() {
        for v in 0..=2 {
            let status = OnChainStatus::from_u64(v).unwrap();
            assert_eq!(status.as_u64(), v);
        }
        assert!(OnChainStatus::from_u64(3).is_none());
    }

    #[test]
    fn vocabularies_map_both_ways() {
        for s in [
            OnChainStatus::Dating,
            OnChainStatus::Married,
            OnChainStatus::BrokeUp,
        ] {
            assert_eq!(s.to_custodial().to_onchain(), Some(s));
        }
        assert_eq!(ContractStatus::Pending.to_onchain(), None);
    }

    #[test]
    fn terminal_states() {
        assert!(!ContractStatus::Pending.is_terminal());
        assert!(!ContractStatus::Active.is_terminal());
        assert!(ContractStatus::Verified.is_terminal());
        assert!(ContractStatus::Terminated.is_terminal());
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&ContractStatus::Terminated).unwrap();
        assert_eq!(json, "\"terminated\"");
        let parsed: ContractStatus = serde_json::from_str("\"active\"").unwrap();
        assert_eq!(parsed, ContractStatus::Active);
        assert_eq!("Verified".parse::<ContractStatus>().unwrap(), ContractStatus::Verified);
        assert!("married".parse::<ContractStatus>().is_err());
    }

    #[test]
    fn chain_status_takes_precedence() {
        let shown =
            DisplayStatus::reconcile(Some(ContractStatus::Active), Some(OnChainStatus::Married))
                .unwrap();
        assert_eq!(shown, DisplayStatus::Chain(OnChainStatus::Married));
        assert_eq!(shown.phase(), ContractStatus::Verified);
        assert_eq!(shown.label(), "Married");

        let shown = DisplayStatus::reconcile(Some(ContractStatus::Pending), None).unwrap();
        assert_eq!(shown.label(), "pending");
        assert!(DisplayStatus::reconcile(None, None).is_none());
    }
}
