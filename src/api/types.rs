use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::application::circulation::{
    FineSummary, FulfillmentOutcome, OverdueEntry, PendingResolution, ReturnResult,
};
use crate::domain::{
    BookId, Borrow, CopyId, DomainEvent, EmployeeId, MemberId, OpenBorrow, Payment,
    PendingFulfillment, Reservation,
    commands::{BorrowBook, FulfillNextReservation, PlaceReservation},
};

// ============================================================================
// Requests
// ============================================================================

/// POST /borrows のリクエスト
///
/// 日時を省略した場合はリクエスト受信時刻を使う。
#[derive(Debug, Deserialize)]
pub struct BorrowBookRequest {
    pub member_id: i64,
    pub copy_id: i64,
    pub employee_id: i64,
    pub borrowed_at: Option<DateTime<Utc>>,
}

impl BorrowBookRequest {
    pub fn to_command(&self, now: DateTime<Utc>) -> BorrowBook {
        BorrowBook {
            member_id: MemberId::new(self.member_id),
            copy_id: CopyId::new(self.copy_id),
            employee_id: EmployeeId::new(self.employee_id),
            borrowed_at: self.borrowed_at.unwrap_or(now),
        }
    }
}

/// POST /borrows/:id/return のリクエスト（ボディは省略可）
#[derive(Debug, Default, Deserialize)]
pub struct ReturnBookRequest {
    pub returned_at: Option<DateTime<Utc>>,
}

/// POST /reservations のリクエスト
#[derive(Debug, Deserialize)]
pub struct PlaceReservationRequest {
    pub book_id: i64,
    pub member_id: i64,
    pub reserved_at: Option<DateTime<Utc>>,
}

impl PlaceReservationRequest {
    pub fn to_command(&self, now: DateTime<Utc>) -> PlaceReservation {
        PlaceReservation {
            book_id: BookId::new(self.book_id),
            member_id: MemberId::new(self.member_id),
            reserved_at: self.reserved_at.unwrap_or(now),
        }
    }
}

/// POST /books/:id/reservations/fulfill のリクエスト
#[derive(Debug, Deserialize)]
pub struct FulfillReservationRequest {
    pub employee_id: i64,
    pub fulfilled_at: Option<DateTime<Utc>>,
}

impl FulfillReservationRequest {
    pub fn to_command(&self, book_id: BookId, now: DateTime<Utc>) -> FulfillNextReservation {
        FulfillNextReservation {
            book_id,
            employee_id: EmployeeId::new(self.employee_id),
            fulfilled_at: self.fulfilled_at.unwrap_or(now),
        }
    }
}

/// POST /payments/:id/pay のリクエスト（ボディは省略可）
#[derive(Debug, Default, Deserialize)]
pub struct MarkPaidRequest {
    pub settled_at: Option<DateTime<Utc>>,
}

/// POST /fulfillments/retry のリクエスト（ボディは省略可）
#[derive(Debug, Default, Deserialize)]
pub struct RetryFulfillmentsRequest {
    pub as_of: Option<DateTime<Utc>>,
}

/// 貸出一覧取得のクエリパラメータ
#[derive(Debug, Deserialize)]
pub struct ListBorrowsQuery {
    /// 会員IDでフィルタリング（必須）
    pub member_id: Option<i64>,
}

/// 延滞レポートのクエリパラメータ
#[derive(Debug, Deserialize)]
pub struct OverdueReportQuery {
    /// 基準日時（省略時は現在時刻）
    pub as_of: Option<DateTime<Utc>>,
}

// ============================================================================
// Responses
// ============================================================================

/// 貸出レスポンス
#[derive(Debug, Serialize)]
pub struct BorrowResponse {
    pub borrow_id: Uuid,
    pub member_id: i64,
    pub copy_id: i64,
    pub employee_id: i64,
    pub serial_number: String,
    pub borrow_date: DateTime<Utc>,
    pub expected_return_date: DateTime<Utc>,
    pub actual_return_date: Option<DateTime<Utc>>,
    pub status: String,
}

impl From<&Borrow> for BorrowResponse {
    fn from(borrow: &Borrow) -> Self {
        let core = borrow.core();
        Self {
            borrow_id: core.borrow_id.value(),
            member_id: core.member_id.value(),
            copy_id: core.copy_id.value(),
            employee_id: core.employee_id.value(),
            serial_number: core.serial_number.clone(),
            borrow_date: core.borrow_date,
            expected_return_date: core.expected_return_date,
            actual_return_date: borrow.actual_return_date(),
            status: if borrow.is_open() { "open" } else { "returned" }.to_string(),
        }
    }
}

impl From<Borrow> for BorrowResponse {
    fn from(borrow: Borrow) -> Self {
        Self::from(&borrow)
    }
}

impl From<OpenBorrow> for BorrowResponse {
    fn from(borrow: OpenBorrow) -> Self {
        Self::from(Borrow::Open(borrow))
    }
}

/// 支払レスポンス（金額は"18.00"形式の文字列）
#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub payment_id: Uuid,
    pub borrowing_id: Uuid,
    pub employee_id: i64,
    pub amount: String,
    pub fine_amount: String,
    pub total_amount: String,
    pub note: String,
    pub status: String,
}

impl From<Payment> for PaymentResponse {
    fn from(payment: Payment) -> Self {
        Self {
            payment_id: payment.payment_id.value(),
            borrowing_id: payment.borrowing_id.value(),
            employee_id: payment.employee_id.value(),
            amount: payment.amount.to_string(),
            fine_amount: payment.fine_amount.to_string(),
            total_amount: payment.total_amount.to_string(),
            note: payment.note,
            status: payment.status.as_str().to_string(),
        }
    }
}

/// 予約レスポンス
#[derive(Debug, Serialize)]
pub struct ReservationResponse {
    pub reservation_id: Uuid,
    pub book_id: i64,
    pub member_id: i64,
    pub reservation_date: DateTime<Utc>,
}

impl From<Reservation> for ReservationResponse {
    fn from(reservation: Reservation) -> Self {
        Self {
            reservation_id: reservation.reservation_id.value(),
            book_id: reservation.book_id.value(),
            member_id: reservation.member_id.value(),
            reservation_date: reservation.reservation_date,
        }
    }
}

/// 予約キューの1行（positionは1始まり）
#[derive(Debug, Serialize)]
pub struct QueueEntryResponse {
    pub position: usize,
    #[serde(flatten)]
    pub reservation: ReservationResponse,
}

/// 予約充足の結果
#[derive(Debug, Serialize)]
pub struct FulfillmentResponse {
    /// no_waiters / fulfilled / deferred
    pub status: String,
    pub reservation: Option<ReservationResponse>,
    pub borrow: Option<BorrowResponse>,
    pub reason: Option<String>,
}

impl From<FulfillmentOutcome> for FulfillmentResponse {
    fn from(outcome: FulfillmentOutcome) -> Self {
        match outcome {
            FulfillmentOutcome::NoWaiters => Self {
                status: "no_waiters".to_string(),
                reservation: None,
                borrow: None,
                reason: None,
            },
            FulfillmentOutcome::Fulfilled {
                reservation,
                borrow,
            } => Self {
                status: "fulfilled".to_string(),
                reservation: Some(reservation.into()),
                borrow: Some(borrow.into()),
                reason: None,
            },
            FulfillmentOutcome::Deferred { reason } => Self {
                status: "deferred".to_string(),
                reservation: None,
                borrow: None,
                reason: Some(reason),
            },
        }
    }
}

/// 返却レスポンス
#[derive(Debug, Serialize)]
pub struct BookReturnedResponse {
    pub borrow: BorrowResponse,
    pub copy_available: bool,
    pub fine: Option<PaymentResponse>,
    pub fulfillment: FulfillmentResponse,
}

impl From<ReturnResult> for BookReturnedResponse {
    fn from(result: ReturnResult) -> Self {
        Self {
            borrow: Borrow::Returned(result.borrow).into(),
            copy_available: result.copy_available,
            fine: result.fine.map(PaymentResponse::from),
            fulfillment: result.fulfillment.into(),
        }
    }
}

/// 単独の予約充足のレスポンス（充足しなかった場合はborrowがnull）
#[derive(Debug, Serialize)]
pub struct FulfillReservationResponse {
    pub borrow: Option<BorrowResponse>,
}

/// 保留中の予約充足
#[derive(Debug, Serialize)]
pub struct PendingFulfillmentResponse {
    pub copy_id: i64,
    pub book_id: i64,
    pub borrow_id: Uuid,
    pub reason: String,
    pub deferred_at: DateTime<Utc>,
}

impl From<PendingFulfillment> for PendingFulfillmentResponse {
    fn from(pending: PendingFulfillment) -> Self {
        Self {
            copy_id: pending.copy_id.value(),
            book_id: pending.book_id.value(),
            borrow_id: pending.borrow_id.value(),
            reason: pending.reason,
            deferred_at: pending.deferred_at,
        }
    }
}

/// 保留の再試行結果
#[derive(Debug, Serialize)]
pub struct PendingResolutionResponse {
    pub copy_id: i64,
    pub book_id: i64,
    pub fulfillment: FulfillmentResponse,
}

impl From<PendingResolution> for PendingResolutionResponse {
    fn from(resolution: PendingResolution) -> Self {
        Self {
            copy_id: resolution.pending.copy_id.value(),
            book_id: resolution.pending.book_id.value(),
            fulfillment: resolution.outcome.into(),
        }
    }
}

/// 延滞レポートの1行
#[derive(Debug, Serialize)]
pub struct OverdueEntryResponse {
    pub borrow: BorrowResponse,
    pub days_overdue: i64,
}

impl From<OverdueEntry> for OverdueEntryResponse {
    fn from(entry: OverdueEntry) -> Self {
        Self {
            borrow: entry.borrow.into(),
            days_overdue: entry.days_overdue,
        }
    }
}

/// 会員の料金集計レスポンス
#[derive(Debug, Serialize)]
pub struct FineSummaryResponse {
    pub member_id: i64,
    pub unpaid_total: String,
    pub paid_total: String,
    pub payments: Vec<PaymentResponse>,
}

impl From<FineSummary> for FineSummaryResponse {
    fn from(summary: FineSummary) -> Self {
        Self {
            member_id: summary.member_id.value(),
            unpaid_total: summary.unpaid_total.to_string(),
            paid_total: summary.paid_total.to_string(),
            payments: summary
                .payments
                .into_iter()
                .map(PaymentResponse::from)
                .collect(),
        }
    }
}

/// 監査イベントのレスポンス
#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub data: DomainEvent,
}

impl From<DomainEvent> for EventResponse {
    fn from(event: DomainEvent) -> Self {
        Self {
            event_type: event.event_type().to_string(),
            occurred_at: event.occurred_at(),
            data: event,
        }
    }
}

/// エラーレスポンス
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}
