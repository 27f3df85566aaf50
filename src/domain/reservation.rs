use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{
    BookBorrowed, BookCopy, BookId, BorrowBookError, BorrowId, CopyId, EmployeeId,
    FulfillmentDeferred, MemberId, OpenBorrow, ReservationFulfilled, ReservationId,
    ReservationPlaced, borrow::issue_borrow,
};

/// 予約
///
/// 書籍ごとのFIFOキューの1要素。充足時に削除される。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub reservation_id: ReservationId,
    pub book_id: BookId,
    pub member_id: MemberId,
    pub reservation_date: DateTime<Utc>,
}

/// 予約充足の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fulfillment {
    pub reservation: Reservation,
    pub borrow: OpenBorrow,
    pub borrowed: BookBorrowed,
    pub fulfilled: ReservationFulfilled,
}

/// 保留中の予約充足
///
/// 返却時に充足を準備できなかったコピー。解消されるまで予約キューのために
/// 確保され、通常の貸出には使えない。1コピーにつき最大1件。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingFulfillment {
    pub copy_id: CopyId,
    pub book_id: BookId,
    /// コピーを空けた返却の貸出ID
    pub borrow_id: BorrowId,
    pub reason: String,
    pub deferred_at: DateTime<Utc>,
}

/// 純粋関数：予約を登録する
///
/// 同一会員・同一書籍の重複予約も受け付ける（重複排除なし）。
pub fn place_reservation(
    book_id: BookId,
    member_id: MemberId,
    reserved_at: DateTime<Utc>,
) -> (Reservation, ReservationPlaced) {
    let reservation = Reservation {
        reservation_id: ReservationId::new(),
        book_id,
        member_id,
        reservation_date: reserved_at,
    };

    let event = ReservationPlaced {
        reservation_id: reservation.reservation_id,
        book_id,
        member_id,
        reservation_date: reserved_at,
    };

    (reservation, event)
}

/// 純粋関数：キューの先頭を選ぶ
///
/// 予約日時の昇順。同時刻の場合は渡された順（登録順）を優先する。
pub fn next_in_queue(queue: &[Reservation]) -> Option<&Reservation> {
    queue.iter().min_by_key(|r| r.reservation_date)
}

/// 純粋関数：予約をキュー順に並べる
pub fn queue_order(mut queue: Vec<Reservation>) -> Vec<Reservation> {
    // sort_by_keyは安定ソートなので同時刻は登録順を保つ
    queue.sort_by_key(|r| r.reservation_date);
    queue
}

/// 純粋関数：自動充足に使う職員を選ぶ
///
/// ポリシー：有効な職員IDのうち最小のもの。
pub fn pick_fulfillment_employee(valid_ids: &[EmployeeId]) -> Option<EmployeeId> {
    valid_ids.iter().copied().min()
}

/// 純粋関数：先頭の予約を空いたコピーで貸出に変換する
///
/// ビジネスルール：
/// - 予約日時が最も早い予約を充足する
/// - 延滞ゲートは確認しない（自動充足は延滞中の会員にも貸し出す）
/// - コピーは同じ書籍のものでなければならない
///
/// キューが空、またはコピーが別書籍の場合は`Ok(None)`。
pub fn fulfill_next(
    queue: &[Reservation],
    copy: &BookCopy,
    employee_id: EmployeeId,
    fulfilled_at: DateTime<Utc>,
    loan_period: Duration,
) -> Result<Option<Fulfillment>, BorrowBookError> {
    let candidates: Vec<Reservation> = queue
        .iter()
        .filter(|r| r.book_id == copy.book_id)
        .cloned()
        .collect();

    let Some(next) = next_in_queue(&candidates) else {
        return Ok(None);
    };

    let (borrow, borrowed) = issue_borrow(
        next.member_id,
        copy,
        employee_id,
        fulfilled_at,
        loan_period,
    )?;

    let fulfilled = ReservationFulfilled {
        reservation_id: next.reservation_id,
        book_id: next.book_id,
        member_id: next.member_id,
        borrow_id: borrow.borrow_id,
        fulfilled_at,
    };

    Ok(Some(Fulfillment {
        reservation: next.clone(),
        borrow,
        borrowed,
        fulfilled,
    }))
}

/// 純粋関数：空いたコピーの予約充足を保留にする
pub fn defer_fulfillment(
    freed_copy: &BookCopy,
    borrow_id: BorrowId,
    reason: impl Into<String>,
    deferred_at: DateTime<Utc>,
) -> (PendingFulfillment, FulfillmentDeferred) {
    let pending = PendingFulfillment {
        copy_id: freed_copy.copy_id,
        book_id: freed_copy.book_id,
        borrow_id,
        reason: reason.into(),
        deferred_at,
    };

    let event = FulfillmentDeferred {
        copy_id: pending.copy_id,
        book_id: pending.book_id,
        borrow_id,
        reason: pending.reason.clone(),
        deferred_at,
    };

    (pending, event)
}
