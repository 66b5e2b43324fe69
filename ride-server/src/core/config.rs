use rust_decimal::Decimal;
use shared::models::ScoreWeights;
use shared::money::Currency;
use std::path::PathBuf;
use std::str::FromStr;

/// 服务器配置
///
/// # 环境变量
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | WORK_DIR | ./data | 工作目录 (数据库、日志) |
/// | HTTP_PORT | 3000 | HTTP 服务端口 |
/// | DATABASE_PATH | <WORK_DIR>/ride.db | SQLite 文件 |
/// | DATABASE_MAX_CONNECTIONS | 1 | 连接池大小 |
/// | DISPATCH_OFFER_TTL_MS | 15000 | 单次派单等待时间 |
/// | DISPATCH_GLOBAL_DEADLINE_MS | 180000 | 派单总时限 |
/// | DISPATCH_MAX_ROUNDS | 5 | 最大轮次 |
/// | DISPATCH_FANOUT_PER_ROUND | 1 | 每批并行派单司机数 (最大 5) |
/// | DISPATCH_RADIUS_SCHEDULE_KM | 2,4,6,8,10 | 每轮搜索半径 |
/// | DISPATCH_SCORE_WEIGHTS | 0.5,0.2,0.2,0.1 | 距离/评分/空闲/队列 权重 |
/// | DISPATCH_REJECT_COOLDOWN_MS | 10000 | 拒单冷却 |
/// | DISPATCH_SCHEDULED_LEAD_MS | 900000 | 预约单提前派单 |
/// | PRICING_SNAPSHOT_TTL_MS | 1800000 | 报价有效期 |
/// | PRICING_CURRENCY | RWF | 默认币种 |
/// | PRICING_MAX_TOTAL_DISCOUNT | - | 全局优惠上限 |
/// | PRICING_CALC_TIMEOUT_MS | 2000 | 计价超时 |
/// | PRICING_MAX_DISTANCE_KM | 1000 | 报价距离上限 |
/// | PRICING_MAX_DURATION_MIN | 1440 | 报价时长上限 |
/// | SETTLEMENT_DRIVER_SHARE_PERCENT | 80 | 司机分成 |
/// | PROMOTIONS_RELEASE_ON_REFUND | true | 退款时释放优惠券 |
/// | WALLET_MAX_FREEZE_PER_ACCOUNT | - | 单账户冻结上限 |
/// | WITHDRAWAL_DAILY_LIMIT | 500000 | 日提现限额 |
/// | WITHDRAWAL_MONTHLY_LIMIT | 5000000 | 月提现限额 |
/// | WITHDRAWAL_AUTO_APPROVE_RISK_THRESHOLD | 80.0 | 风险分阈值 |
/// | WITHDRAWAL_FEE_FIXED | 0 | 固定手续费 |
/// | WITHDRAWAL_FEE_PERCENT | 0 | 比例手续费 |
/// | GATEWAY_ATTEMPT_TIMEOUT_MS | 15000 | 单次网关调用超时 |
/// | GATEWAY_MAX_RETRIES | 3 | 最大重试次数 |
/// | GATEWAY_BACKOFF_BASE_MS | 200 | 退避基数 |
/// | GATEWAY_BACKOFF_CAP_MS | 2000 | 退避上限 |
///
/// 格式错误的值回退到默认值并记录 warn。
#[derive(Debug, Clone)]
pub struct Config {
    /// 工作目录
    pub work_dir: String,
    /// HTTP API 服务端口
    pub http_port: u16,
    pub database: DatabaseConfig,
    pub dispatch: DispatchConfig,
    pub pricing: PricingConfig,
    pub settlement: SettlementConfig,
    pub wallet: WalletConfig,
    pub withdrawal: WithdrawalConfig,
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// None = in-memory
    pub path: Option<PathBuf>,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub offer_ttl_ms: i64,
    pub global_deadline_ms: i64,
    pub max_rounds: u32,
    pub fanout_per_round: u32,
    pub radius_schedule_km: Vec<f64>,
    pub score_weights: ScoreWeights,
    pub reject_cooldown_ms: i64,
    pub scheduled_lead_ms: i64,
}

impl DispatchConfig {
    /// Radius for a 1-based round; rounds past the schedule reuse its last entry
    pub fn radius_for_round(&self, round: u32) -> f64 {
        let idx = (round.max(1) - 1) as usize;
        self.radius_schedule_km
            .get(idx)
            .or_else(|| self.radius_schedule_km.last())
            .copied()
            .unwrap_or(DEFAULT_RADIUS_SCHEDULE_KM[0])
    }
}

#[derive(Debug, Clone)]
pub struct PricingConfig {
    pub snapshot_ttl_ms: i64,
    pub currency: Currency,
    pub max_total_discount: Option<Decimal>,
    pub calc_timeout_ms: u64,
    /// 报价输入上限，超出即 value_out_of_range
    pub max_distance_km: f64,
    pub max_duration_min: f64,
}

#[derive(Debug, Clone)]
pub struct SettlementConfig {
    pub driver_share_percent: Decimal,
    pub release_promotions_on_refund: bool,
}

#[derive(Debug, Clone)]
pub struct WalletConfig {
    pub max_freeze_per_account: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct WithdrawalConfig {
    pub daily_limit: Decimal,
    pub monthly_limit: Decimal,
    pub auto_approve_risk_threshold: f64,
    pub fee_fixed: Decimal,
    pub fee_percent: Decimal,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub attempt_timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

pub const MAX_FANOUT: u32 = 5;
const DEFAULT_RADIUS_SCHEDULE_KM: [f64; 5] = [2.0, 4.0, 6.0, 8.0, 10.0];

/// Parse an env var, falling back to `default` (with a warning) when malformed
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "Malformed config value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// Optional value: unset or empty = None
fn env_opt<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    if raw.trim().is_empty() {
        return None;
    }
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Malformed config value, ignoring");
            None
        }
    }
}

/// Comma separated list of positive floats
pub fn parse_f64_list(raw: &str) -> Option<Vec<f64>> {
    let values: Option<Vec<f64>> = raw
        .split(',')
        .map(|s| s.trim().parse::<f64>().ok().filter(|v| v.is_finite() && *v > 0.0))
        .collect();
    values.filter(|v| !v.is_empty())
}

pub fn parse_score_weights(raw: &str) -> Option<ScoreWeights> {
    let parts: Vec<f64> = raw
        .split(',')
        .map(|s| s.trim().parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0))
        .collect::<Option<Vec<f64>>>()?;
    match parts.as_slice() {
        [proximity, rating, idle, queue] => Some(ScoreWeights {
            proximity: *proximity,
            rating: *rating,
            idle: *idle,
            queue: *queue,
        }),
        _ => None,
    }
}

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        let work_dir = std::env::var("WORK_DIR").unwrap_or_else(|_| "./data".into());
        let db_path = std::env::var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(&work_dir).join("ride.db"));

        let radius_schedule_km = match std::env::var("DISPATCH_RADIUS_SCHEDULE_KM") {
            Ok(raw) => parse_f64_list(&raw).unwrap_or_else(|| {
                tracing::warn!(value = %raw, "Malformed DISPATCH_RADIUS_SCHEDULE_KM, using default");
                DEFAULT_RADIUS_SCHEDULE_KM.to_vec()
            }),
            Err(_) => DEFAULT_RADIUS_SCHEDULE_KM.to_vec(),
        };
        let score_weights = match std::env::var("DISPATCH_SCORE_WEIGHTS") {
            Ok(raw) => parse_score_weights(&raw).unwrap_or_else(|| {
                tracing::warn!(value = %raw, "Malformed DISPATCH_SCORE_WEIGHTS, using default");
                ScoreWeights::default()
            }),
            Err(_) => ScoreWeights::default(),
        };

        let fanout: u32 = env_or("DISPATCH_FANOUT_PER_ROUND", 1);

        Self {
            http_port: env_or("HTTP_PORT", 3000),
            database: DatabaseConfig {
                path: Some(db_path),
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", 1u32).max(1),
            },
            dispatch: DispatchConfig {
                offer_ttl_ms: env_or("DISPATCH_OFFER_TTL_MS", 15_000),
                global_deadline_ms: env_or("DISPATCH_GLOBAL_DEADLINE_MS", 180_000),
                max_rounds: env_or("DISPATCH_MAX_ROUNDS", 5u32).max(1),
                fanout_per_round: fanout.clamp(1, MAX_FANOUT),
                radius_schedule_km,
                score_weights,
                reject_cooldown_ms: env_or("DISPATCH_REJECT_COOLDOWN_MS", 10_000),
                scheduled_lead_ms: env_or("DISPATCH_SCHEDULED_LEAD_MS", 900_000),
            },
            pricing: PricingConfig {
                snapshot_ttl_ms: env_or("PRICING_SNAPSHOT_TTL_MS", 1_800_000),
                currency: env_or("PRICING_CURRENCY", Currency::Rwf),
                max_total_discount: env_opt("PRICING_MAX_TOTAL_DISCOUNT"),
                calc_timeout_ms: env_or("PRICING_CALC_TIMEOUT_MS", 2_000),
                max_distance_km: env_or("PRICING_MAX_DISTANCE_KM", 1_000.0),
                max_duration_min: env_or("PRICING_MAX_DURATION_MIN", 1_440.0),
            },
            settlement: SettlementConfig {
                driver_share_percent: env_or("SETTLEMENT_DRIVER_SHARE_PERCENT", Decimal::from(80)),
                release_promotions_on_refund: env_or("PROMOTIONS_RELEASE_ON_REFUND", true),
            },
            wallet: WalletConfig {
                max_freeze_per_account: env_opt("WALLET_MAX_FREEZE_PER_ACCOUNT"),
            },
            withdrawal: WithdrawalConfig {
                daily_limit: env_or("WITHDRAWAL_DAILY_LIMIT", Decimal::from(500_000)),
                monthly_limit: env_or("WITHDRAWAL_MONTHLY_LIMIT", Decimal::from(5_000_000)),
                auto_approve_risk_threshold: env_or("WITHDRAWAL_AUTO_APPROVE_RISK_THRESHOLD", 80.0),
                fee_fixed: env_or("WITHDRAWAL_FEE_FIXED", Decimal::ZERO),
                fee_percent: env_or("WITHDRAWAL_FEE_PERCENT", Decimal::ZERO),
            },
            gateway: GatewayConfig {
                attempt_timeout_ms: env_or("GATEWAY_ATTEMPT_TIMEOUT_MS", 15_000),
                max_retries: env_or("GATEWAY_MAX_RETRIES", 3),
                backoff_base_ms: env_or("GATEWAY_BACKOFF_BASE_MS", 200),
                backoff_cap_ms: env_or("GATEWAY_BACKOFF_CAP_MS", 2_000),
            },
            work_dir,
        }
    }

    /// Defaults with an in-memory database and short timers
    ///
    /// 常用于测试场景
    pub fn for_tests() -> Self {
        Self {
            work_dir: std::env::temp_dir().to_string_lossy().into_owned(),
            http_port: 0,
            database: DatabaseConfig {
                path: None,
                max_connections: 1,
            },
            dispatch: DispatchConfig {
                offer_ttl_ms: 300,
                global_deadline_ms: 20_000,
                max_rounds: 5,
                fanout_per_round: 1,
                radius_schedule_km: DEFAULT_RADIUS_SCHEDULE_KM.to_vec(),
                score_weights: ScoreWeights::default(),
                reject_cooldown_ms: 10_000,
                scheduled_lead_ms: 900_000,
            },
            pricing: PricingConfig {
                snapshot_ttl_ms: 1_800_000,
                currency: Currency::Rwf,
                max_total_discount: None,
                calc_timeout_ms: 2_000,
                max_distance_km: 1_000.0,
                max_duration_min: 1_440.0,
            },
            settlement: SettlementConfig {
                driver_share_percent: Decimal::from(80),
                release_promotions_on_refund: true,
            },
            wallet: WalletConfig {
                max_freeze_per_account: None,
            },
            withdrawal: WithdrawalConfig {
                daily_limit: Decimal::from(500_000),
                monthly_limit: Decimal::from(5_000_000),
                auto_approve_risk_threshold: 80.0,
                fee_fixed: Decimal::ZERO,
                fee_percent: Decimal::ZERO,
            },
            gateway: GatewayConfig {
                attempt_timeout_ms: 500,
                max_retries: 3,
                backoff_base_ms: 5,
                backoff_cap_ms: 20,
            },
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("logs")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_radius_schedule() {
        assert_eq!(parse_f64_list("2,4,8"), Some(vec![2.0, 4.0, 8.0]));
        assert_eq!(parse_f64_list(" 1.5 , 3 "), Some(vec![1.5, 3.0]));
        assert_eq!(parse_f64_list("2,abc"), None);
        assert_eq!(parse_f64_list("2,-1"), None);
        assert_eq!(parse_f64_list(""), None);
    }

    #[test]
    fn test_parse_score_weights() {
        let w = parse_score_weights("0.4,0.3,0.2,0.1").unwrap();
        assert_eq!(w.proximity, 0.4);
        assert_eq!(w.queue, 0.1);
        assert!(parse_score_weights("0.5,0.5").is_none());
        assert!(parse_score_weights("a,b,c,d").is_none());
    }

    #[test]
    fn test_radius_for_round_clamps_to_last() {
        let config = Config::for_tests();
        assert_eq!(config.dispatch.radius_for_round(1), 2.0);
        assert_eq!(config.dispatch.radius_for_round(3), 6.0);
        assert_eq!(config.dispatch.radius_for_round(9), 10.0);
    }
}
