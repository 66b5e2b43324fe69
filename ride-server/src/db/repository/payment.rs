//! Payment channels, routers and payment records

use super::{RepoResult, decimal, json_or_default, opt_decimal, to_json};
use shared::models::{Payment, PaymentChannel, PaymentMethod, PaymentRouter, PaymentStatus};
use shared::money::Currency;
use sqlx::SqliteConnection;

#[derive(sqlx::FromRow)]
struct ChannelRow {
    channel_code: String,
    name: String,
    methods: String,
    is_active: bool,
    created_at: i64,
}

impl From<ChannelRow> for PaymentChannel {
    fn from(row: ChannelRow) -> Self {
        Self {
            methods: json_or_default(&row.methods, "methods"),
            channel_code: row.channel_code,
            name: row.name,
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RouterRow {
    router_id: String,
    channel_code: String,
    channel_account_id: String,
    payment_method: String,
    currency: String,
    min_amount: Option<String>,
    max_amount: Option<String>,
    region: Option<String>,
    priority: i64,
    valid_from: Option<i64>,
    valid_until: Option<i64>,
    is_active: bool,
    created_at: i64,
}

impl RouterRow {
    fn into_router(self) -> RepoResult<PaymentRouter> {
        Ok(PaymentRouter {
            min_amount: opt_decimal(self.min_amount.as_deref(), "min_amount")?,
            max_amount: opt_decimal(self.max_amount.as_deref(), "max_amount")?,
            router_id: self.router_id,
            channel_code: self.channel_code,
            channel_account_id: self.channel_account_id,
            payment_method: self.payment_method,
            currency: self.currency,
            region: self.region,
            priority: self.priority as i32,
            valid_from: self.valid_from,
            valid_until: self.valid_until,
            is_active: self.is_active,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    payment_id: String,
    order_id: String,
    method: PaymentMethod,
    channel_code: String,
    channel_account_id: String,
    amount: String,
    currency: Currency,
    status: PaymentStatus,
    external_ref: Option<String>,
    failure_reason: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl PaymentRow {
    fn into_payment(self) -> RepoResult<Payment> {
        Ok(Payment {
            amount: decimal(&self.amount, "t_payment.amount")?,
            payment_id: self.payment_id,
            order_id: self.order_id,
            method: self.method,
            channel_code: self.channel_code,
            channel_account_id: self.channel_account_id,
            currency: self.currency,
            status: self.status,
            external_ref: self.external_ref,
            failure_reason: self.failure_reason,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

// ========== Channels ==========

pub async fn save_channel(conn: &mut SqliteConnection, channel: &PaymentChannel) -> RepoResult<()> {
    sqlx::query(
        "INSERT INTO t_payment_channel (channel_code, name, methods, is_active, created_at) VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(channel_code) DO UPDATE SET name = excluded.name, methods = excluded.methods, is_active = excluded.is_active",
    )
    .bind(&channel.channel_code)
    .bind(&channel.name)
    .bind(to_json(&channel.methods)?)
    .bind(channel.is_active)
    .bind(channel.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn list_channels(conn: &mut SqliteConnection) -> RepoResult<Vec<PaymentChannel>> {
    let rows = sqlx::query_as::<_, ChannelRow>(
        "SELECT channel_code, name, methods, is_active, created_at FROM t_payment_channel ORDER BY channel_code",
    )
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(Into::into).collect())
}

// ========== Routers ==========

pub async fn insert_router(conn: &mut SqliteConnection, router: &PaymentRouter) -> RepoResult<()> {
    sqlx::query(
        "INSERT INTO t_payment_router (router_id, channel_code, channel_account_id, payment_method, currency, min_amount, max_amount, region, priority, valid_from, valid_until, is_active, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
    )
    .bind(&router.router_id)
    .bind(&router.channel_code)
    .bind(&router.channel_account_id)
    .bind(&router.payment_method)
    .bind(&router.currency)
    .bind(router.min_amount.map(|d| d.to_string()))
    .bind(router.max_amount.map(|d| d.to_string()))
    .bind(&router.region)
    .bind(router.priority as i64)
    .bind(router.valid_from)
    .bind(router.valid_until)
    .bind(router.is_active)
    .bind(router.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Active rows; time windows and amount bounds are filtered by the router
pub async fn list_active_routers(conn: &mut SqliteConnection) -> RepoResult<Vec<PaymentRouter>> {
    let rows = sqlx::query_as::<_, RouterRow>(
        "SELECT router_id, channel_code, channel_account_id, payment_method, currency, min_amount, max_amount, region, priority, valid_from, valid_until, is_active, created_at FROM t_payment_router WHERE is_active = 1",
    )
    .fetch_all(&mut *conn)
    .await?;
    rows.into_iter().map(RouterRow::into_router).collect()
}

// ========== Payments ==========

pub async fn insert_payment(conn: &mut SqliteConnection, payment: &Payment) -> RepoResult<()> {
    sqlx::query(
        "INSERT INTO t_payment (payment_id, order_id, method, channel_code, channel_account_id, amount, currency, status, external_ref, failure_reason, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
    )
    .bind(&payment.payment_id)
    .bind(&payment.order_id)
    .bind(payment.method)
    .bind(&payment.channel_code)
    .bind(&payment.channel_account_id)
    .bind(payment.amount.to_string())
    .bind(payment.currency)
    .bind(payment.status)
    .bind(&payment.external_ref)
    .bind(&payment.failure_reason)
    .bind(payment.created_at)
    .bind(payment.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn find_payments_by_order(
    conn: &mut SqliteConnection,
    order_id: &str,
) -> RepoResult<Vec<Payment>> {
    let rows = sqlx::query_as::<_, PaymentRow>(
        "SELECT payment_id, order_id, method, channel_code, channel_account_id, amount, currency, status, external_ref, failure_reason, created_at, updated_at FROM t_payment WHERE order_id = ? ORDER BY id",
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;
    rows.into_iter().map(PaymentRow::into_payment).collect()
}

/// Compare-and-set on status
pub async fn update_payment_status(
    conn: &mut SqliteConnection,
    payment_id: &str,
    from: PaymentStatus,
    to: PaymentStatus,
    now: i64,
) -> RepoResult<bool> {
    let result = sqlx::query("UPDATE t_payment SET status = ?1, updated_at = ?2 WHERE payment_id = ?3 AND status = ?4")
        .bind(to)
        .bind(now)
        .bind(payment_id)
        .bind(from)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() == 1)
}
