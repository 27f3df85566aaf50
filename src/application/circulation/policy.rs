use chrono::Duration;

use crate::domain::{
    Money, borrow::DEFAULT_LOAN_PERIOD_DAYS, payment::DEFAULT_LATE_FEE_PER_DAY,
};

use super::retry::RetryPolicy;

/// 既定の日額貸出料（2.00）
pub const DEFAULT_DAILY_RATE: Money = Money::from_cents(200);

/// 貸出業務のポリシー値
#[derive(Debug, Clone, PartialEq)]
pub struct CirculationPolicy {
    /// 貸出期間
    pub loan_period: Duration,
    /// 延滞返却時の基本料金の日額
    pub daily_rate: Money,
    /// 延滞1日あたりの料金
    pub late_fee_per_day: Money,
    /// 競合時の再試行
    pub retry: RetryPolicy,
}

impl Default for CirculationPolicy {
    fn default() -> Self {
        Self {
            loan_period: Duration::days(DEFAULT_LOAN_PERIOD_DAYS),
            daily_rate: DEFAULT_DAILY_RATE,
            late_fee_per_day: DEFAULT_LATE_FEE_PER_DAY,
            retry: RetryPolicy::default(),
        }
    }
}
