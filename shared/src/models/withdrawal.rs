//! Withdrawal workflow record

use super::wallet::BalanceSnapshot;
use crate::money::Currency;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// `requested` is transient: a stored withdrawal starts in
/// `pending_approval` or, when auto-approved, in `approved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum WithdrawalStatus {
    PendingApproval,
    Approved,
    Rejected,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::PendingApproval => "pending_approval",
            WithdrawalStatus::Approved => "approved",
            WithdrawalStatus::Rejected => "rejected",
            WithdrawalStatus::Processing => "processing",
            WithdrawalStatus::Completed => "completed",
            WithdrawalStatus::Failed => "failed",
            WithdrawalStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WithdrawalStatus::Rejected
                | WithdrawalStatus::Completed
                | WithdrawalStatus::Failed
                | WithdrawalStatus::Cancelled
        )
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum WithdrawalMethod {
    BankTransfer,
    MobileMoney,
}

impl WithdrawalMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalMethod::BankTransfer => "bank_transfer",
            WithdrawalMethod::MobileMoney => "mobile_money",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub withdrawal_id: String,
    pub account_id: String,
    pub user_id: String,
    pub amount: Decimal,
    pub fee: Decimal,
    /// Paid out to the destination
    pub net_amount: Decimal,
    pub currency: Currency,
    pub method: WithdrawalMethod,
    pub destination: String,
    pub status: WithdrawalStatus,
    pub requires_manual_review: bool,
    pub risk_score: f64,
    pub approved_by: Option<String>,
    pub approved_at: Option<i64>,
    pub reject_reason: Option<String>,
    pub failure_reason: Option<String>,
    pub external_txn_id: Option<String>,
    pub balance_before: BalanceSnapshot,
    pub balance_after: Option<BalanceSnapshot>,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

impl Withdrawal {
    /// Amount frozen for the lifetime of the withdrawal
    pub fn hold_amount(&self) -> Decimal {
        self.amount + self.fee
    }
}

/// Withdrawal request payload; `withdrawal_id` makes retries idempotent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub withdrawal_id: Option<String>,
    pub account_id: String,
    pub amount: Decimal,
    pub method: WithdrawalMethod,
    pub destination: String,
    /// Supplied by the upstream risk service
    #[serde(default)]
    pub risk_score: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WithdrawalDecision {
    pub reason: Option<String>,
}
