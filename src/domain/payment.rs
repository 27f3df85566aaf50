use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    BorrowId, EmployeeId, LateFineRecorded, Money, PaymentId, PaymentSettled, RecordFineError,
    ReturnedBorrow,
    borrow::{days_late, whole_days_between},
};

/// 1日あたりの既定の延滞料金（5.00）
pub const DEFAULT_LATE_FEE_PER_DAY: Money = Money::from_cents(500);

/// 支払ステータス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// 未払い
    Unpaid,
    /// 支払済み（終端状態）
    Paid,
}

impl PaymentStatus {
    /// 文字列表現を取得する
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Paid => "paid",
        }
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpaid" => Ok(PaymentStatus::Unpaid),
            "paid" => Ok(PaymentStatus::Paid),
            _ => Err(format!("Invalid payment status: {}", s)),
        }
    }
}

/// 支払
///
/// 延滞返却時にのみ作成される。status以外は作成後に変化しない。
/// 不変条件：total_amount = amount + fine_amount、1貸出につき最大1件。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: PaymentId,
    pub borrowing_id: BorrowId,
    pub employee_id: EmployeeId,
    pub amount: Money,
    pub fine_amount: Money,
    pub total_amount: Money,
    pub note: String,
    pub status: PaymentStatus,
}

/// 料金の内訳
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FineBreakdown {
    pub days_held: i64,
    pub days_late: i64,
    pub amount: Money,
    pub fine_amount: Money,
    pub total_amount: Money,
}

/// 純粋関数：料金の内訳を計算する
///
/// - amount = 貸出日数 × 日額
/// - fine_amount = 延滞日数 × 延滞料金日額
///
/// 延滞日数は返却予定日時を過ぎていれば最低1日（`borrow::days_late`）。
pub fn compute_fine(
    borrow: &ReturnedBorrow,
    daily_rate: Money,
    late_fee_per_day: Money,
) -> FineBreakdown {
    let days_held = whole_days_between(borrow.borrow_date, borrow.actual_return_date);
    let days_late = days_late(borrow.expected_return_date, borrow.actual_return_date);

    let amount = daily_rate * days_held;
    let fine_amount = late_fee_per_day * days_late;

    FineBreakdown {
        days_held,
        days_late,
        amount,
        fine_amount,
        total_amount: amount + fine_amount,
    }
}

/// 純粋関数：延滞料金を記録する
///
/// 返却予定日時を過ぎていない返却には支払を作らない（`Ok(None)`）。
/// 既存の支払がある貸出には`DuplicatePayment`を返す。
pub fn record_late_fine(
    borrow: &ReturnedBorrow,
    existing_payment: Option<&Payment>,
    daily_rate: Money,
    late_fee_per_day: Money,
) -> Result<Option<(Payment, LateFineRecorded)>, RecordFineError> {
    if borrow.actual_return_date <= borrow.expected_return_date {
        return Ok(None);
    }

    if existing_payment.is_some() {
        return Err(RecordFineError::DuplicatePayment);
    }

    let breakdown = compute_fine(borrow, daily_rate, late_fee_per_day);

    let payment = Payment {
        payment_id: PaymentId::new(),
        borrowing_id: borrow.borrow_id,
        employee_id: borrow.employee_id,
        amount: breakdown.amount,
        fine_amount: breakdown.fine_amount,
        total_amount: breakdown.total_amount,
        note: format!(
            "Late return: {} day(s) overdue, held {} day(s)",
            breakdown.days_late, breakdown.days_held
        ),
        status: PaymentStatus::Unpaid,
    };

    let event = LateFineRecorded {
        payment_id: payment.payment_id,
        borrow_id: borrow.borrow_id,
        amount: payment.amount,
        fine_amount: payment.fine_amount,
        total_amount: payment.total_amount,
        recorded_at: borrow.actual_return_date,
    };

    Ok(Some((payment, event)))
}

/// 純粋関数：支払を完了にする
///
/// 既に支払済みの場合は変更せずイベントも発行しない。
pub fn mark_paid(payment: Payment, settled_at: DateTime<Utc>) -> (Payment, Option<PaymentSettled>) {
    match payment.status {
        PaymentStatus::Paid => (payment, None),
        PaymentStatus::Unpaid => {
            let event = PaymentSettled {
                payment_id: payment.payment_id,
                borrow_id: payment.borrowing_id,
                settled_at,
            };
            let paid = Payment {
                status: PaymentStatus::Paid,
                ..payment
            };
            (paid, Some(event))
        }
    }
}
