use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BookId, BorrowId, CopyId, EmployeeId, MemberId, Money, PaymentId, ReservationId};

/// イベント：書籍が貸し出された
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookBorrowed {
    pub borrow_id: BorrowId,
    pub member_id: MemberId,
    pub copy_id: CopyId,
    pub employee_id: EmployeeId,
    pub serial_number: String,
    pub borrow_date: DateTime<Utc>,
    pub expected_return_date: DateTime<Utc>,
}

/// イベント：書籍が返却された
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookReturned {
    pub borrow_id: BorrowId,
    pub member_id: MemberId,
    pub copy_id: CopyId,
    pub actual_return_date: DateTime<Utc>,
    pub was_late: bool,
}

/// イベント：延滞料金が記録された
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LateFineRecorded {
    pub payment_id: PaymentId,
    pub borrow_id: BorrowId,
    pub amount: Money,
    pub fine_amount: Money,
    pub total_amount: Money,
    pub recorded_at: DateTime<Utc>,
}

/// イベント：予約が登録された
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationPlaced {
    pub reservation_id: ReservationId,
    pub book_id: BookId,
    pub member_id: MemberId,
    pub reservation_date: DateTime<Utc>,
}

/// イベント：予約が貸出に変換された
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationFulfilled {
    pub reservation_id: ReservationId,
    pub book_id: BookId,
    pub member_id: MemberId,
    pub borrow_id: BorrowId,
    pub fulfilled_at: DateTime<Utc>,
}

/// イベント：返却時の予約充足が保留された
///
/// 空いたコピーは保留が解消されるまで予約キューのために確保される。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentDeferred {
    pub copy_id: CopyId,
    pub book_id: BookId,
    /// コピーを空けた返却の貸出ID
    pub borrow_id: BorrowId,
    pub reason: String,
    pub deferred_at: DateTime<Utc>,
}

/// イベント：支払が完了した
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSettled {
    pub payment_id: PaymentId,
    pub borrow_id: BorrowId,
    pub settled_at: DateTime<Utc>,
}

/// ドメインイベント統合型
///
/// 各コミットで状態変更と同じ単位の監査ログとして保存される。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DomainEvent {
    BookBorrowed(BookBorrowed),
    BookReturned(BookReturned),
    LateFineRecorded(LateFineRecorded),
    ReservationPlaced(ReservationPlaced),
    ReservationFulfilled(ReservationFulfilled),
    FulfillmentDeferred(FulfillmentDeferred),
    PaymentSettled(PaymentSettled),
}

impl DomainEvent {
    /// 永続化用のイベント種別
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::BookBorrowed(_) => "BookBorrowed",
            DomainEvent::BookReturned(_) => "BookReturned",
            DomainEvent::LateFineRecorded(_) => "LateFineRecorded",
            DomainEvent::ReservationPlaced(_) => "ReservationPlaced",
            DomainEvent::ReservationFulfilled(_) => "ReservationFulfilled",
            DomainEvent::FulfillmentDeferred(_) => "FulfillmentDeferred",
            DomainEvent::PaymentSettled(_) => "PaymentSettled",
        }
    }

    /// イベントの発生時刻
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::BookBorrowed(e) => e.borrow_date,
            DomainEvent::BookReturned(e) => e.actual_return_date,
            DomainEvent::LateFineRecorded(e) => e.recorded_at,
            DomainEvent::ReservationPlaced(e) => e.reservation_date,
            DomainEvent::ReservationFulfilled(e) => e.fulfilled_at,
            DomainEvent::FulfillmentDeferred(e) => e.deferred_at,
            DomainEvent::PaymentSettled(e) => e.settled_at,
        }
    }

    /// 関連する貸出ID（予約登録は貸出を持たない）
    pub fn borrow_id(&self) -> Option<BorrowId> {
        match self {
            DomainEvent::BookBorrowed(e) => Some(e.borrow_id),
            DomainEvent::BookReturned(e) => Some(e.borrow_id),
            DomainEvent::LateFineRecorded(e) => Some(e.borrow_id),
            DomainEvent::ReservationPlaced(_) => None,
            DomainEvent::ReservationFulfilled(e) => Some(e.borrow_id),
            DomainEvent::FulfillmentDeferred(e) => Some(e.borrow_id),
            DomainEvent::PaymentSettled(e) => Some(e.borrow_id),
        }
    }
}
