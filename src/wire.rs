//! JSON bodies exchanged between the HTTP API and its clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use love_ledger_sdk::{Contract, Error, NewContract, RefundOption, Stats};

/// `POST /contracts/create`.
///
/// `amount` may be a string or a number; `duration` a number or a numeric
/// string, with `0`, `""` and `null` meaning no expiry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateContractBody {
    #[serde(default)]
    pub creator_wallet: Option<String>,
    #[serde(default)]
    pub partner_wallet: Option<String>,
    #[serde(default)]
    pub amount: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_option: Option<String>,
}

impl CreateContractBody {
    pub fn into_request(self) -> Result<NewContract, Error> {
        let amount = match self.amount {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => {
                return Err(Error::Validation(format!(
                    "amount must be a string or number, got {other}"
                )))
            }
        };

        let refund_option = match self.refund_option.as_deref().map(str::trim) {
            None | Some("") => RefundOption::default(),
            Some(s) => s.parse().map_err(Error::Validation)?,
        };

        Ok(NewContract {
            creator_wallet: self.creator_wallet.unwrap_or_default(),
            partner_wallet: self.partner_wallet.unwrap_or_default(),
            amount,
            duration: parse_duration(self.duration)?,
            refund_option,
        })
    }
}

fn parse_duration(value: Option<Value>) -> Result<Option<u32>, Error> {
    let invalid = |v: &dyn std::fmt::Display| {
        Error::Validation(format!("duration must be a whole number of days, got {v}"))
    };
    let days = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => match n.as_u64() {
            Some(days) => days,
            None => match n.as_f64() {
                Some(f) if f >= 0.0 && f.fract() == 0.0 => f as u64,
                _ => return Err(invalid(&n)),
            },
        },
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            s.parse::<u64>().map_err(|_| invalid(&s))?
        }
        Some(other) => return Err(invalid(&other)),
    };
    let days = u32::try_from(days).map_err(|_| invalid(&days))?;
    Ok((days > 0).then_some(days))
}

/// `POST /contracts/pair`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairBody {
    #[serde(default)]
    pub contract_id: String,
    #[serde(default)]
    pub partner_wallet: String,
}

/// `POST /contracts/verify` and `POST /contracts/unpair`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractActionBody {
    #[serde(default)]
    pub contract_id: String,
    #[serde(default)]
    pub wallet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractEnvelope {
    pub success: bool,
    pub contract: Contract,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyEnvelope {
    pub success: bool,
    pub contract: Contract,
    pub both_verified: bool,
}

/// `GET /contracts/wallet/:wallet`; `contract` is `null` when the wallet has none.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletContractEnvelope {
    pub success: bool,
    pub contract: Option<Contract>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsEnvelope {
    pub success: bool,
    pub stats: Stats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
