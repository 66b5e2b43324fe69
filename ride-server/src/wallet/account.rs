//! Balance operations on an account head
//!
//! Pure: [`apply`] takes the current head and returns the next one. The
//! service persists it with a version CAS and writes the ledger row.

use super::error::{WalletError, WalletResult};
use rust_decimal::Decimal;
use shared::models::{BalanceOp, TransactionType, UserAccount};

/// Validate an amount for `account`'s currency
pub fn check_amount(account: &UserAccount, amount: Decimal) -> WalletResult<()> {
    if amount <= Decimal::ZERO {
        return Err(WalletError::InvalidAmount {
            amount,
            reason: "must be positive",
        });
    }
    if account.currency.round(amount) != amount {
        return Err(WalletError::InvalidAmount {
            amount,
            reason: "more decimals than the currency allows",
        });
    }
    Ok(())
}

/// Next head after `op`; balances stay non-negative and `version` moves by one
pub fn apply(
    account: &UserAccount,
    op: BalanceOp,
    tx_type: TransactionType,
    amount: Decimal,
    freeze_limit: Option<Decimal>,
    now: i64,
) -> WalletResult<UserAccount> {
    if !op.allowed_types().contains(&tx_type) {
        return Err(WalletError::InvalidTransactionType { op, tx_type });
    }
    check_amount(account, amount)?;

    let insufficient = || WalletError::InsufficientBalance {
        account_id: account.account_id.clone(),
        op,
        amount,
    };

    let mut next = account.clone();
    match op {
        BalanceOp::AddAvailable => next.available += amount,
        BalanceOp::SubtractAvailable => {
            if next.available < amount {
                return Err(insufficient());
            }
            next.available -= amount;
        }
        BalanceOp::Freeze => {
            if next.available < amount {
                return Err(insufficient());
            }
            next.available -= amount;
            next.frozen += amount;
            if let Some(limit) = freeze_limit
                && next.frozen > limit
            {
                return Err(WalletError::FreezeLimitExceeded {
                    account_id: account.account_id.clone(),
                    limit,
                });
            }
        }
        BalanceOp::Unfreeze => {
            if next.frozen < amount {
                return Err(insufficient());
            }
            next.frozen -= amount;
            next.available += amount;
        }
        BalanceOp::MoveToPending => {
            if next.available < amount {
                return Err(insufficient());
            }
            next.available -= amount;
            next.pending += amount;
        }
        BalanceOp::MoveFromPending => {
            if next.pending < amount {
                return Err(insufficient());
            }
            next.pending -= amount;
            next.available += amount;
        }
        BalanceOp::DeductFromFrozen => {
            if next.frozen < amount {
                return Err(insufficient());
            }
            next.frozen -= amount;
        }
        BalanceOp::DeductFromPending => {
            if next.pending < amount {
                return Err(insufficient());
            }
            next.pending -= amount;
        }
    }

    match tx_type {
        TransactionType::Income | TransactionType::Bonus => next.total_earned += amount,
        TransactionType::Expense => next.total_spent += amount,
        TransactionType::Refund => next.total_spent = (next.total_spent - amount).max(Decimal::ZERO),
        TransactionType::Withdrawal => next.total_withdrawn += amount,
        TransactionType::Transfer | TransactionType::Penalty => {}
    }

    next.version = account.version + 1;
    next.last_balance_update_at = now;
    check_invariants(&next)?;
    Ok(next)
}

/// I1/I2: no bucket is negative
pub fn check_invariants(account: &UserAccount) -> WalletResult<()> {
    if account.available < Decimal::ZERO
        || account.frozen < Decimal::ZERO
        || account.pending < Decimal::ZERO
    {
        return Err(WalletError::Invariant(format!(
            "account {} has a negative balance (available {}, frozen {}, pending {})",
            account.account_id, account.available, account.frozen, account.pending
        )));
    }
    Ok(())
}
