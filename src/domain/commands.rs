use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BookId, BorrowId, CopyId, EmployeeId, MemberId, PaymentId};

/// コマンド：書籍を貸し出す
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowBook {
    pub member_id: MemberId,
    pub copy_id: CopyId,
    pub employee_id: EmployeeId,
    pub borrowed_at: DateTime<Utc>,
}

/// コマンド：書籍を返却する
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnBook {
    pub borrow_id: BorrowId,
    pub returned_at: DateTime<Utc>,
}

/// コマンド：書籍を予約する
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceReservation {
    pub book_id: BookId,
    pub member_id: MemberId,
    pub reserved_at: DateTime<Utc>,
}

/// コマンド：先頭の予約を貸出に変換する
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillNextReservation {
    pub book_id: BookId,
    pub employee_id: EmployeeId,
    pub fulfilled_at: DateTime<Utc>,
}

/// コマンド：支払を完了にする
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkPaid {
    pub payment_id: PaymentId,
    pub settled_at: DateTime<Utc>,
}
