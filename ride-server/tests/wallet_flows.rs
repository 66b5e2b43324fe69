//! 提现流程: 冻结 → 审核 → 打款 → 完成 / 失败

mod common;

use common::*;
use ride_server::Config;
use ride_server::wallet::{GatewayError, WalletError};
use rust_decimal_macros::dec;
use shared::models::{TransactionType, UserType, WithdrawalMethod, WithdrawalRequest, WithdrawalStatus};

fn withdrawal(account_id: &str, amount: rust_decimal::Decimal, risk_score: f64) -> WithdrawalRequest {
    WithdrawalRequest {
        withdrawal_id: None,
        account_id: account_id.into(),
        amount,
        method: WithdrawalMethod::MobileMoney,
        destination: "+250788000005".into(),
        risk_score,
    }
}

#[tokio::test]
async fn test_manual_review_withdrawal_pays_out() {
    let mut config = Config::for_tests();
    config.withdrawal.fee_fixed = dec!(500);
    let (state, gateway) = state_with_gateway(config).await;
    gateway.push_reference("EX-XYZ");
    let account = funded_wallet(&state, "D5", UserType::Driver, dec!(100000)).await;

    let requested = state
        .withdrawals
        .request(withdrawal(&account.account_id, dec!(50000), 85.0), &driver_ctx("D5").actor)
        .await
        .unwrap();
    assert_eq!(requested.status, WithdrawalStatus::PendingApproval);
    assert!(requested.requires_manual_review);
    assert_eq!(requested.fee, dec!(500));

    let held = state.wallet.get_account(&account.account_id).await.unwrap();
    assert_eq!(held.available, dec!(49500));
    assert_eq!(held.frozen, dec!(50500));

    let approved = state
        .withdrawals
        .approve(&requested.withdrawal_id, &admin())
        .await
        .unwrap();
    assert_eq!(approved.status, WithdrawalStatus::Approved);
    assert_eq!(approved.approved_by.as_deref(), Some("ops"));

    let done = state
        .withdrawals
        .process(&requested.withdrawal_id, &admin())
        .await
        .unwrap();
    assert_eq!(done.status, WithdrawalStatus::Completed);
    assert_eq!(done.external_txn_id.as_deref(), Some("EX-XYZ"));
    assert!(done.completed_at.is_some());

    let after = state.wallet.get_account(&account.account_id).await.unwrap();
    assert_eq!(after.available, dec!(49500));
    assert_eq!(after.frozen, dec!(0));
    assert_eq!(after.total_withdrawn, dec!(50000));

    let rows = state
        .wallet
        .list_transactions(&account.account_id, None)
        .await
        .unwrap();
    assert!(rows
        .iter()
        .any(|r| r.tx_type == TransactionType::Withdrawal && r.amount == dec!(50000)));
    // 手续费单独记一笔
    assert!(rows.iter().any(|r| r.tx_type == TransactionType::Expense
        && r.category == "withdrawal_fee"
        && r.amount == dec!(500)));
    assert_balanced(&state, &account.account_id).await;

    // 已完成的提现重复处理不会再次打款
    let calls = gateway.call_count();
    let replay = state
        .withdrawals
        .process(&requested.withdrawal_id, &admin())
        .await
        .unwrap();
    assert_eq!(replay.status, WithdrawalStatus::Completed);
    assert_eq!(gateway.call_count(), calls);
}

#[tokio::test]
async fn test_declined_payout_unfreezes_and_restores_limits() {
    let (state, gateway) = state_with_gateway(Config::for_tests()).await;
    let account = funded_wallet(&state, "D6", UserType::Driver, dec!(100000)).await;

    let requested = state
        .withdrawals
        .request(withdrawal(&account.account_id, dec!(20000), 10.0), &driver_ctx("D6").actor)
        .await
        .unwrap();
    // 低风险自动审核
    assert_eq!(requested.status, WithdrawalStatus::Approved);
    assert!(!requested.requires_manual_review);

    let wallet = state.wallet.get_wallet(&account.account_id).await.unwrap();
    assert_eq!(wallet.daily_remaining, wallet.daily_limit - dec!(20000));

    gateway.fail_next([GatewayError::Declined("destination closed".into())]);
    let failed = state
        .withdrawals
        .process(&requested.withdrawal_id, &admin())
        .await
        .unwrap();
    assert_eq!(failed.status, WithdrawalStatus::Failed);
    assert!(failed.failure_reason.is_some());

    let wallet = state.wallet.get_wallet(&account.account_id).await.unwrap();
    assert_eq!(wallet.account.available, dec!(100000));
    assert_eq!(wallet.account.frozen, dec!(0));
    assert_eq!(wallet.daily_remaining, wallet.daily_limit);
    assert_balanced(&state, &account.account_id).await;
}

#[tokio::test]
async fn test_withdrawal_over_daily_limit_is_refused() {
    let state = state().await;
    let account = funded_wallet(&state, "D7", UserType::Driver, dec!(2000000)).await;

    let over = state
        .withdrawals
        .request(withdrawal(&account.account_id, dec!(600000), 0.0), &driver_ctx("D7").actor)
        .await;
    assert!(matches!(over, Err(WalletError::DailyLimitExceeded { .. })));

    let untouched = state.wallet.get_account(&account.account_id).await.unwrap();
    assert_eq!(untouched.available, dec!(2000000));
    assert_eq!(untouched.frozen, dec!(0));
}

#[tokio::test]
async fn test_rejected_withdrawal_returns_hold() {
    let state = state().await;
    let account = funded_wallet(&state, "D8", UserType::Driver, dec!(10000)).await;

    let requested = state
        .withdrawals
        .request(withdrawal(&account.account_id, dec!(4000), 95.0), &driver_ctx("D8").actor)
        .await
        .unwrap();
    let rejected = state
        .withdrawals
        .reject(&requested.withdrawal_id, Some("kyc incomplete".into()), &admin())
        .await
        .unwrap();
    assert_eq!(rejected.status, WithdrawalStatus::Rejected);
    assert_eq!(rejected.reject_reason.as_deref(), Some("kyc incomplete"));

    let account = state.wallet.get_account(&account.account_id).await.unwrap();
    assert_eq!(account.available, dec!(10000));
    assert_eq!(account.frozen, dec!(0));

    // 驳回后不可再审批
    let late = state.withdrawals.approve(&requested.withdrawal_id, &admin()).await;
    assert!(matches!(late, Err(WalletError::WithdrawalNotInState { .. })));
}
