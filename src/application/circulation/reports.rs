use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{
    self, Borrow, BorrowId, DomainEvent, MemberId, Money, OpenBorrow, Payment, PaymentId,
    PaymentStatus,
};

use super::circulation_service::ServiceDependencies;
use super::errors::{CirculationError, Result};

/// 延滞レポートの1行
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverdueEntry {
    pub borrow: OpenBorrow,
    /// 返却予定日からの経過日数（暦日）
    pub days_overdue: i64,
}

/// 会員の料金の集計
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FineSummary {
    pub member_id: MemberId,
    pub unpaid_total: Money,
    pub paid_total: Money,
    pub payments: Vec<Payment>,
}

/// IDで貸出を取得する
pub async fn get_borrow(deps: &ServiceDependencies, borrow_id: BorrowId) -> Result<Borrow> {
    deps.circulation_store
        .get_borrow(borrow_id)
        .await
        .map_err(CirculationError::StoreError)?
        .ok_or_else(|| CirculationError::NotFound(format!("Borrow {}", borrow_id)))
}

/// 会員の貸出履歴（新しい順）
pub async fn member_history(
    deps: &ServiceDependencies,
    member_id: MemberId,
) -> Result<Vec<Borrow>> {
    deps.circulation_store
        .borrows_for_member(member_id)
        .await
        .map_err(CirculationError::StoreError)
}

/// 貸出の監査イベント（発生順）
pub async fn borrow_events(
    deps: &ServiceDependencies,
    borrow_id: BorrowId,
) -> Result<Vec<DomainEvent>> {
    // 存在しない貸出は空リストではなくNotFound
    get_borrow(deps, borrow_id).await?;

    deps.circulation_store
        .events_for_borrow(borrow_id)
        .await
        .map_err(CirculationError::StoreError)
}

/// IDで支払を取得する
pub async fn get_payment(deps: &ServiceDependencies, payment_id: PaymentId) -> Result<Payment> {
    deps.circulation_store
        .get_payment(payment_id)
        .await
        .map_err(CirculationError::StoreError)?
        .ok_or_else(|| CirculationError::NotFound(format!("Payment {}", payment_id)))
}

/// 延滞レポート
///
/// 返却予定日時が`now`より前の未返却の貸出を返却予定日の古い順で返す。
/// 読み取りのみで、状態は変更しない。
pub async fn overdue_report(
    deps: &ServiceDependencies,
    now: DateTime<Utc>,
) -> Result<Vec<OverdueEntry>> {
    let overdue = deps
        .circulation_store
        .overdue_borrows(now)
        .await
        .map_err(CirculationError::StoreError)?;

    let entries: Vec<OverdueEntry> = overdue
        .into_iter()
        .filter(|borrow| domain::borrow::is_overdue(borrow, now))
        .map(|borrow| OverdueEntry {
            days_overdue: domain::borrow::days_late(borrow.expected_return_date, now),
            borrow,
        })
        .collect();

    tracing::debug!(count = entries.len(), "overdue report built");

    Ok(entries)
}

/// 会員の料金を未払い・支払済みに分けて集計する
pub async fn fine_summary(deps: &ServiceDependencies, member_id: MemberId) -> Result<FineSummary> {
    let member_exists = deps
        .member_store
        .exists(member_id)
        .await
        .map_err(CirculationError::MemberStoreError)?;

    if !member_exists {
        return Err(CirculationError::NotFound(format!(
            "Member {}",
            member_id.value()
        )));
    }

    let payments = deps
        .circulation_store
        .payments_for_member(member_id)
        .await
        .map_err(CirculationError::StoreError)?;

    let total_with = |status: PaymentStatus| -> Money {
        payments
            .iter()
            .filter(|p| p.status == status)
            .map(|p| p.total_amount)
            .sum()
    };

    Ok(FineSummary {
        member_id,
        unpaid_total: total_with(PaymentStatus::Unpaid),
        paid_total: total_with(PaymentStatus::Paid),
        payments,
    })
}
