//! Wallet ledger: account heads and transaction rows

use crate::money::Currency;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum UserType {
    Rider,
    Driver,
}

/// Balance head of a wallet
///
/// `available`, `frozen` and `pending` are never negative and every
/// mutation bumps `version` by exactly one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAccount {
    pub account_id: String,
    pub user_id: String,
    pub user_type: UserType,
    pub currency: Currency,
    pub available: Decimal,
    pub frozen: Decimal,
    pub pending: Decimal,
    pub version: i64,
    pub last_balance_update_at: i64,
    /// Withdrawal counters, keyed by UTC day (YYYYMMDD) and month (YYYYMM)
    pub day_key: i64,
    pub day_withdrawn: Decimal,
    pub month_key: i64,
    pub month_withdrawn: Decimal,
    pub total_earned: Decimal,
    pub total_spent: Decimal,
    pub total_withdrawn: Decimal,
    pub created_at: i64,
}

impl UserAccount {
    pub fn total(&self) -> Decimal {
        self.available + self.frozen + self.pending
    }

    pub fn balances(&self) -> BalanceSnapshot {
        BalanceSnapshot {
            available: self.available,
            frozen: self.frozen,
            pending: self.pending,
        }
    }
}

/// Point-in-time copy of the three balances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub available: Decimal,
    pub frozen: Decimal,
    pub pending: Decimal,
}

/// Superset view returned by GetWallet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    #[serde(flatten)]
    pub account: UserAccount,
    pub daily_limit: Decimal,
    pub monthly_limit: Decimal,
    pub daily_remaining: Decimal,
    pub monthly_remaining: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum TransactionType {
    Income,
    Expense,
    Transfer,
    Withdrawal,
    Refund,
    Bonus,
    Penalty,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Income => "income",
            TransactionType::Expense => "expense",
            TransactionType::Transfer => "transfer",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Refund => "refund",
            TransactionType::Bonus => "bonus",
            TransactionType::Penalty => "penalty",
        }
    }

    /// Sign in the ledger-sum invariant; transfers move money between
    /// buckets of the same account and net to zero
    pub fn ledger_sign(&self) -> i32 {
        match self {
            TransactionType::Income | TransactionType::Refund | TransactionType::Bonus => 1,
            TransactionType::Expense | TransactionType::Withdrawal | TransactionType::Penalty => {
                -1
            }
            TransactionType::Transfer => 0,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which balance operation produced a transaction row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum BalanceOp {
    AddAvailable,
    SubtractAvailable,
    Freeze,
    Unfreeze,
    MoveToPending,
    MoveFromPending,
    DeductFromFrozen,
    DeductFromPending,
}

impl BalanceOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalanceOp::AddAvailable => "add_available",
            BalanceOp::SubtractAvailable => "subtract_available",
            BalanceOp::Freeze => "freeze",
            BalanceOp::Unfreeze => "unfreeze",
            BalanceOp::MoveToPending => "move_to_pending",
            BalanceOp::MoveFromPending => "move_from_pending",
            BalanceOp::DeductFromFrozen => "deduct_from_frozen",
            BalanceOp::DeductFromPending => "deduct_from_pending",
        }
    }

    /// Transaction types each operation may be recorded under
    pub fn allowed_types(&self) -> &'static [TransactionType] {
        use TransactionType::*;
        match self {
            BalanceOp::AddAvailable => &[Income, Refund, Bonus],
            BalanceOp::SubtractAvailable
            | BalanceOp::DeductFromFrozen
            | BalanceOp::DeductFromPending => &[Expense, Withdrawal, Penalty],
            BalanceOp::Freeze
            | BalanceOp::Unfreeze
            | BalanceOp::MoveToPending
            | BalanceOp::MoveFromPending => &[Transfer],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "snake_case"))]
pub enum ReviewStatus {
    #[default]
    NotRequired,
    Pending,
    Approved,
    Rejected,
}

/// Immutable, append-only ledger row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: i64,
    pub transaction_id: String,
    pub account_id: String,
    pub tx_type: TransactionType,
    pub category: String,
    pub op: BalanceOp,
    pub amount: Decimal,
    pub fee: Decimal,
    pub currency: Currency,
    pub status: TransactionStatus,
    pub balance_after: BalanceSnapshot,
    pub version_after: i64,
    pub related_order_id: Option<String>,
    pub related_withdrawal_id: Option<String>,
    pub related_payment_id: Option<String>,
    pub review_status: ReviewStatus,
    pub risk_score: Option<f64>,
    pub note: Option<String>,
    pub created_at: i64,
}

/// Open-account payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAccountRequest {
    pub user_id: String,
    pub user_type: UserType,
    pub currency: Currency,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_types_partition() {
        assert!(
            BalanceOp::AddAvailable
                .allowed_types()
                .contains(&TransactionType::Refund)
        );
        assert!(
            !BalanceOp::AddAvailable
                .allowed_types()
                .contains(&TransactionType::Expense)
        );
        assert_eq!(
            BalanceOp::Freeze.allowed_types(),
            &[TransactionType::Transfer]
        );
    }

    #[test]
    fn test_ledger_signs() {
        assert_eq!(TransactionType::Income.ledger_sign(), 1);
        assert_eq!(TransactionType::Withdrawal.ledger_sign(), -1);
        assert_eq!(TransactionType::Transfer.ledger_sign(), 0);
    }
}
