//! Contract purchase parameters.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Direction of a binary contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContractKind {
    Call,
    Put,
}

impl ContractKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractKind::Call => "CALL",
            ContractKind::Put => "PUT",
        }
    }
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContractKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CALL" => Ok(ContractKind::Call),
            "PUT" => Ok(ContractKind::Put),
            other => Err(format!("invalid contract type '{other}' (use CALL or PUT)")),
        }
    }
}

/// Duration unit for a contract, serialized to its wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DurationUnit {
    #[serde(rename = "s")]
    Seconds,
    #[serde(rename = "m")]
    Minutes,
    #[serde(rename = "h")]
    Hours,
    #[serde(rename = "d")]
    Days,
}

impl DurationUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            DurationUnit::Seconds => "s",
            DurationUnit::Minutes => "m",
            DurationUnit::Hours => "h",
            DurationUnit::Days => "d",
        }
    }
}

impl FromStr for DurationUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "s" => Ok(DurationUnit::Seconds),
            "m" => Ok(DurationUnit::Minutes),
            "h" => Ok(DurationUnit::Hours),
            "d" => Ok(DurationUnit::Days),
            other => Err(format!(
                "invalid duration unit '{other}' (use 's', 'm', 'h' or 'd')"
            )),
        }
    }
}

/// Immutable purchase parameters, serialized to the wire `parameters` object.
///
/// Validated before transmission; a request that fails [`validate`] never
/// reaches the network.
///
/// [`validate`]: ContractRequest::validate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractRequest {
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub basis: String,
    pub contract_type: ContractKind,
    pub currency: String,
    pub duration: u32,
    pub duration_unit: DurationUnit,
    pub symbol: String,
}

impl ContractRequest {
    /// Minimum stake accepted by the backend.
    pub const MINIMUM_AMOUNT: Decimal = dec!(1);

    /// Check the invariants that cannot be enforced by construction.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.amount < Self::MINIMUM_AMOUNT {
            return Err(SessionError::InvalidContractParameters(format!(
                "amount must be at least {}",
                Self::MINIMUM_AMOUNT
            )));
        }
        if self.duration == 0 {
            return Err(SessionError::InvalidContractParameters(
                "duration must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reusable contract parameters; an amount turns it into a [`ContractRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractTemplate {
    pub basis: String,
    pub contract_type: ContractKind,
    pub currency: String,
    pub duration: u32,
    pub duration_unit: DurationUnit,
    pub symbol: String,
}

impl Default for ContractTemplate {
    fn default() -> Self {
        Self {
            basis: "stake".to_string(),
            contract_type: ContractKind::Call,
            currency: "USD".to_string(),
            duration: 5,
            duration_unit: DurationUnit::Minutes,
            symbol: "R_100".to_string(),
        }
    }
}

impl ContractTemplate {
    pub fn with_amount(&self, amount: Decimal) -> ContractRequest {
        ContractRequest {
            amount,
            basis: self.basis.clone(),
            contract_type: self.contract_type,
            currency: self.currency.clone(),
            duration: self.duration,
            duration_unit: self.duration_unit,
            symbol: self.symbol.clone(),
        }
    }
}
