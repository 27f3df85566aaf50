use chrono::Duration;
use thiserror::Error;

use crate::application::circulation::{CirculationPolicy, RetryPolicy};
use crate::domain::Money;

/// 設定読み込みのエラー
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?} ({reason})")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// アプリケーション設定
///
/// 環境変数から読み込む。未設定の項目は既定値を使う。
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub policy: CirculationPolicy,
    /// 保留中の予約充足を再試行する間隔
    pub fulfillment_retry_interval: std::time::Duration,
}

impl AppConfig {
    /// プロセスの環境変数から読み込む
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// 任意の参照関数から読み込む（テスト用に環境変数を差し替えられる）
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = CirculationPolicy::default();

        let database_url = lookup("DATABASE_URL")
            .unwrap_or_else(|| "postgres://localhost/library".to_string());
        let port = parse_or(&lookup, "PORT", 3000u16)?;

        let loan_period_days = parse_or(&lookup, "LOAN_PERIOD_DAYS", 14i64)?;
        if loan_period_days <= 0 {
            return Err(ConfigError::InvalidValue {
                name: "LOAN_PERIOD_DAYS",
                value: loan_period_days.to_string(),
                reason: "must be positive".to_string(),
            });
        }

        let late_fee_per_day = parse_or(&lookup, "LATE_FEE_PER_DAY", defaults.late_fee_per_day)?;
        let daily_rate = parse_or(&lookup, "DAILY_RATE", defaults.daily_rate)?;
        for (name, value) in [
            ("LATE_FEE_PER_DAY", late_fee_per_day),
            ("DAILY_RATE", daily_rate),
        ] {
            if value < Money::ZERO {
                return Err(ConfigError::InvalidValue {
                    name,
                    value: value.to_string(),
                    reason: "must not be negative".to_string(),
                });
            }
        }

        let retry_secs = parse_or(&lookup, "FULFILLMENT_RETRY_INTERVAL_SECS", 30u64)?;
        if retry_secs == 0 {
            return Err(ConfigError::InvalidValue {
                name: "FULFILLMENT_RETRY_INTERVAL_SECS",
                value: retry_secs.to_string(),
                reason: "must be positive".to_string(),
            });
        }

        let attempts = parse_or(
            &lookup,
            "CONFLICT_RETRY_ATTEMPTS",
            defaults.retry.max_attempts,
        )?;

        Ok(Self {
            database_url,
            port,
            policy: CirculationPolicy {
                loan_period: Duration::days(loan_period_days),
                daily_rate,
                late_fee_per_day,
                retry: RetryPolicy::with_max_attempts(attempts.max(1)),
            },
            fulfillment_retry_interval: std::time::Duration::from_secs(retry_secs),
        })
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            name,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
