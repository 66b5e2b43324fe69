//! Price Rule Repository

use super::{RepoError, RepoResult, decimal, json_opt, json_or_default, opt_decimal, to_json};
use shared::models::{PriceRule, PriceRuleCreate, RuleKind, ServiceArea, TimeWindow};
use shared::money::Currency;
use sqlx::SqliteConnection;

const RULE_SELECT: &str = "SELECT id, rule_id, name, kind, value, is_percentage, priority, vehicle_categories, vehicle_levels, service_area, valid_from, valid_until, active_days, active_start_time, active_end_time, currency, requires_code, code, case_sensitive, max_discount, min_order_amount, is_exclusive, is_active, created_at FROM t_price_rule";

#[derive(sqlx::FromRow)]
struct RuleRow {
    id: i64,
    rule_id: String,
    name: String,
    kind: RuleKind,
    value: String,
    is_percentage: bool,
    priority: i64,
    vehicle_categories: String,
    vehicle_levels: String,
    service_area: String,
    valid_from: Option<i64>,
    valid_until: Option<i64>,
    active_days: Option<String>,
    active_start_time: Option<String>,
    active_end_time: Option<String>,
    currency: Option<Currency>,
    requires_code: bool,
    code: Option<String>,
    case_sensitive: bool,
    max_discount: Option<String>,
    min_order_amount: Option<String>,
    is_exclusive: bool,
    is_active: bool,
    created_at: i64,
}

impl RuleRow {
    fn into_rule(self) -> RepoResult<PriceRule> {
        Ok(PriceRule {
            id: self.id,
            value: decimal(&self.value, "t_price_rule.value")?,
            max_discount: opt_decimal(self.max_discount.as_deref(), "max_discount")?,
            min_order_amount: opt_decimal(self.min_order_amount.as_deref(), "min_order_amount")?,
            vehicle_categories: json_or_default(&self.vehicle_categories, "vehicle_categories"),
            vehicle_levels: json_or_default(&self.vehicle_levels, "vehicle_levels"),
            service_area: json_or_default::<ServiceArea>(&self.service_area, "service_area"),
            window: TimeWindow {
                valid_from: self.valid_from,
                valid_until: self.valid_until,
                active_days: json_opt(self.active_days.as_deref(), "active_days"),
                active_start_time: self.active_start_time,
                active_end_time: self.active_end_time,
            },
            rule_id: self.rule_id,
            name: self.name,
            kind: self.kind,
            is_percentage: self.is_percentage,
            priority: self.priority as i32,
            currency: self.currency,
            requires_code: self.requires_code,
            code: self.code,
            case_sensitive: self.case_sensitive,
            is_exclusive: self.is_exclusive,
            is_active: self.is_active,
            created_at: self.created_at,
        })
    }
}

pub async fn create(conn: &mut SqliteConnection, data: PriceRuleCreate) -> RepoResult<PriceRule> {
    if data.requires_code && data.code.as_deref().is_none_or(str::is_empty) {
        return Err(RepoError::Validation(format!(
            "Rule '{}' requires a code",
            data.name
        )));
    }
    let rule_id = shared::util::domain_id("PR");
    let now = shared::util::now_millis();
    let active_days = data.window.active_days.as_ref().map(to_json).transpose()?;

    sqlx::query(
        "INSERT INTO t_price_rule (rule_id, name, kind, value, is_percentage, priority, vehicle_categories, vehicle_levels, service_area, valid_from, valid_until, active_days, active_start_time, active_end_time, currency, requires_code, code, case_sensitive, max_discount, min_order_amount, is_exclusive, is_active, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, 1, ?22)",
    )
    .bind(&rule_id)
    .bind(&data.name)
    .bind(data.kind)
    .bind(data.value.to_string())
    .bind(data.is_percentage)
    .bind(data.priority as i64)
    .bind(to_json(&data.vehicle_categories)?)
    .bind(to_json(&data.vehicle_levels)?)
    .bind(to_json(&data.service_area)?)
    .bind(data.window.valid_from)
    .bind(data.window.valid_until)
    .bind(active_days)
    .bind(&data.window.active_start_time)
    .bind(&data.window.active_end_time)
    .bind(data.currency)
    .bind(data.requires_code)
    .bind(&data.code)
    .bind(data.case_sensitive)
    .bind(data.max_discount.map(|d| d.to_string()))
    .bind(data.min_order_amount.map(|d| d.to_string()))
    .bind(data.is_exclusive)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    find_by_id(conn, &rule_id)
        .await?
        .ok_or_else(|| RepoError::Database("Failed to create price rule".into()))
}

pub async fn find_by_id(conn: &mut SqliteConnection, rule_id: &str) -> RepoResult<Option<PriceRule>> {
    let sql = format!("{RULE_SELECT} WHERE rule_id = ?");
    let row = sqlx::query_as::<_, RuleRow>(&sql)
        .bind(rule_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(RuleRow::into_rule).transpose()
}

/// Active rules, lower priority first
pub async fn find_active(conn: &mut SqliteConnection) -> RepoResult<Vec<PriceRule>> {
    let sql = format!("{RULE_SELECT} WHERE is_active = 1 ORDER BY priority ASC, id ASC");
    let rows = sqlx::query_as::<_, RuleRow>(&sql)
        .fetch_all(&mut *conn)
        .await?;
    rows.into_iter().map(RuleRow::into_rule).collect()
}

pub async fn set_active(conn: &mut SqliteConnection, rule_id: &str, active: bool) -> RepoResult<bool> {
    let result = sqlx::query("UPDATE t_price_rule SET is_active = ? WHERE rule_id = ?")
        .bind(active)
        .bind(rule_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}
