//! Order Repository

use super::{RepoResult, decimal};
use shared::geo::Coordinate;
use shared::models::{Order, OrderStatus, OrderType, PaymentMethod, VehicleCategory, VehicleLevel};
use shared::money::Currency;
use sqlx::SqliteConnection;

const ORDER_SELECT: &str = "SELECT order_id, rider_id, order_type, pickup_lat, pickup_lng, dropoff_lat, dropoff_lng, scheduled_at, vehicle_category, vehicle_level, snapshot_id, driver_id, status, payment_method, currency, fare, cancel_reason, created_at, priced_at, dispatch_started_at, accepted_at, arrived_at, started_at, completed_at, cancelled_at, refunded_at, rejected_at, updated_at FROM t_order";

#[derive(sqlx::FromRow)]
struct OrderRow {
    order_id: String,
    rider_id: String,
    order_type: OrderType,
    pickup_lat: f64,
    pickup_lng: f64,
    dropoff_lat: f64,
    dropoff_lng: f64,
    scheduled_at: Option<i64>,
    vehicle_category: VehicleCategory,
    vehicle_level: VehicleLevel,
    snapshot_id: String,
    driver_id: Option<String>,
    status: OrderStatus,
    payment_method: PaymentMethod,
    currency: Currency,
    fare: String,
    cancel_reason: Option<String>,
    created_at: i64,
    priced_at: Option<i64>,
    dispatch_started_at: Option<i64>,
    accepted_at: Option<i64>,
    arrived_at: Option<i64>,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    cancelled_at: Option<i64>,
    refunded_at: Option<i64>,
    rejected_at: Option<i64>,
    updated_at: i64,
}

impl OrderRow {
    fn into_order(self) -> RepoResult<Order> {
        Ok(Order {
            fare: decimal(&self.fare, "t_order.fare")?,
            order_id: self.order_id,
            rider_id: self.rider_id,
            order_type: self.order_type,
            pickup: Coordinate::new(self.pickup_lat, self.pickup_lng),
            dropoff: Coordinate::new(self.dropoff_lat, self.dropoff_lng),
            scheduled_at: self.scheduled_at,
            vehicle_category: self.vehicle_category,
            vehicle_level: self.vehicle_level,
            snapshot_id: self.snapshot_id,
            driver_id: self.driver_id,
            status: self.status,
            payment_method: self.payment_method,
            currency: self.currency,
            cancel_reason: self.cancel_reason,
            created_at: self.created_at,
            priced_at: self.priced_at,
            dispatch_started_at: self.dispatch_started_at,
            accepted_at: self.accepted_at,
            arrived_at: self.arrived_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            cancelled_at: self.cancelled_at,
            refunded_at: self.refunded_at,
            rejected_at: self.rejected_at,
            updated_at: self.updated_at,
        })
    }
}

/// Timestamp column stamped when entering `status`
fn timestamp_column(status: OrderStatus) -> Option<&'static str> {
    match status {
        OrderStatus::Created => None,
        OrderStatus::Pricing | OrderStatus::PendingDispatch => Some("priced_at"),
        OrderStatus::Dispatching => Some("dispatch_started_at"),
        OrderStatus::Accepted => Some("accepted_at"),
        OrderStatus::DriverArriving => Some("arrived_at"),
        OrderStatus::InProgress => Some("started_at"),
        OrderStatus::Completed => Some("completed_at"),
        OrderStatus::Cancelled => Some("cancelled_at"),
        OrderStatus::Refunded => Some("refunded_at"),
        OrderStatus::Rejected => Some("rejected_at"),
    }
}

pub async fn insert(conn: &mut SqliteConnection, order: &Order) -> RepoResult<()> {
    sqlx::query(
        "INSERT INTO t_order (order_id, rider_id, order_type, pickup_lat, pickup_lng, dropoff_lat, dropoff_lng, scheduled_at, vehicle_category, vehicle_level, snapshot_id, driver_id, status, payment_method, currency, fare, cancel_reason, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
    )
    .bind(&order.order_id)
    .bind(&order.rider_id)
    .bind(order.order_type)
    .bind(order.pickup.lat)
    .bind(order.pickup.lng)
    .bind(order.dropoff.lat)
    .bind(order.dropoff.lng)
    .bind(order.scheduled_at)
    .bind(order.vehicle_category)
    .bind(order.vehicle_level)
    .bind(&order.snapshot_id)
    .bind(&order.driver_id)
    .bind(order.status)
    .bind(order.payment_method)
    .bind(order.currency)
    .bind(order.fare.to_string())
    .bind(&order.cancel_reason)
    .bind(order.created_at)
    .bind(order.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn find_by_id(conn: &mut SqliteConnection, order_id: &str) -> RepoResult<Option<Order>> {
    let sql = format!("{ORDER_SELECT} WHERE order_id = ?");
    let row = sqlx::query_as::<_, OrderRow>(&sql)
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(OrderRow::into_order).transpose()
}

pub async fn find_by_status(
    conn: &mut SqliteConnection,
    status: OrderStatus,
) -> RepoResult<Vec<Order>> {
    let sql = format!("{ORDER_SELECT} WHERE status = ? ORDER BY created_at");
    let rows = sqlx::query_as::<_, OrderRow>(&sql)
        .bind(status)
        .fetch_all(&mut *conn)
        .await?;
    rows.into_iter().map(OrderRow::into_order).collect()
}

/// Scheduled orders waiting in `pending_dispatch` whose activation time has come
pub async fn find_due_scheduled(
    conn: &mut SqliteConnection,
    activate_before: i64,
) -> RepoResult<Vec<Order>> {
    let sql = format!(
        "{ORDER_SELECT} WHERE status = 'pending_dispatch' AND scheduled_at IS NOT NULL AND scheduled_at <= ? ORDER BY scheduled_at"
    );
    let rows = sqlx::query_as::<_, OrderRow>(&sql)
        .bind(activate_before)
        .fetch_all(&mut *conn)
        .await?;
    rows.into_iter().map(OrderRow::into_order).collect()
}

/// Status compare-and-set. Returns false when the order is not in `from`.
pub async fn update_status(
    conn: &mut SqliteConnection,
    order_id: &str,
    from: OrderStatus,
    to: OrderStatus,
    now: i64,
    cancel_reason: Option<&str>,
) -> RepoResult<bool> {
    let stamp = timestamp_column(to)
        .map(|col| format!(", {col} = ?5"))
        .unwrap_or_default();
    let sql = format!(
        "UPDATE t_order SET status = ?1, updated_at = ?5, cancel_reason = COALESCE(?4, cancel_reason){stamp} WHERE order_id = ?2 AND status = ?3"
    );
    let result = sqlx::query(&sql)
        .bind(to)
        .bind(order_id)
        .bind(from)
        .bind(cancel_reason)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// At-most-one-acceptance: `driver_id` null → candidate while dispatching
pub async fn assign_driver(
    conn: &mut SqliteConnection,
    order_id: &str,
    driver_id: &str,
    now: i64,
) -> RepoResult<bool> {
    let result = sqlx::query(
        "UPDATE t_order SET driver_id = ?1, status = 'accepted', accepted_at = ?2, updated_at = ?2 WHERE order_id = ?3 AND driver_id IS NULL AND status = 'dispatching'",
    )
    .bind(driver_id)
    .bind(now)
    .bind(order_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Dispatch records, history and payments are removed by cascade
pub async fn delete(conn: &mut SqliteConnection, order_id: &str) -> RepoResult<bool> {
    let result = sqlx::query("DELETE FROM t_order WHERE order_id = ?")
        .bind(order_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}
