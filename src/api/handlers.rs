use crate::application::circulation::{
    self, ServiceDependencies, borrow_book as execute_borrow_book,
    fulfill_next_reservation as execute_fulfill_next, mark_paid as execute_mark_paid,
    place_reservation as execute_place_reservation, return_book as execute_return_book,
};
use crate::domain::{
    BookId, BorrowId, MemberId, PaymentId,
    commands::{MarkPaid, ReturnBook},
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use std::sync::Arc;
use uuid::Uuid;

use super::{
    error::ApiError,
    types::{
        BookReturnedResponse, BorrowBookRequest, BorrowResponse, EventResponse,
        FineSummaryResponse, FulfillReservationRequest, FulfillReservationResponse,
        ListBorrowsQuery, MarkPaidRequest, OverdueEntryResponse, OverdueReportQuery,
        PaymentResponse, PendingFulfillmentResponse, PendingResolutionResponse,
        PlaceReservationRequest, QueueEntryResponse, ReservationResponse, RetryFulfillmentsRequest,
        ReturnBookRequest,
    },
};

// ============================================================================
// State
// ============================================================================

/// ハンドラー間で共有されるアプリケーション状態
#[derive(Clone)]
pub struct AppState {
    pub service_deps: ServiceDependencies,
}

// ============================================================================
// Command handlers (POST)
// ============================================================================

/// POST /borrows - 新しい貸出を作成
///
/// 強制されるビジネスルール:
/// - 会員とコピーが存在すること
/// - 会員に延滞中の貸出がないこと
/// - コピーが貸出可能であること
pub async fn create_borrow(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BorrowBookRequest>,
) -> Result<(StatusCode, Json<BorrowResponse>), ApiError> {
    let cmd = req.to_command(chrono::Utc::now());

    let borrow = execute_borrow_book(&state.service_deps, cmd).await?;

    Ok((StatusCode::CREATED, Json(borrow.into())))
}

/// POST /borrows/:id/return - 書籍を返却
///
/// 延滞料金の記録と予約の自動充足も同じ単位で行われる。
pub async fn return_book(
    State(state): State<Arc<AppState>>,
    Path(borrow_id): Path<Uuid>,
    req: Option<Json<ReturnBookRequest>>,
) -> Result<Json<BookReturnedResponse>, ApiError> {
    let Json(req) = req.unwrap_or_default();

    let cmd = ReturnBook {
        borrow_id: BorrowId::from_uuid(borrow_id),
        returned_at: req.returned_at.unwrap_or_else(chrono::Utc::now),
    };

    let result = execute_return_book(&state.service_deps, cmd).await?;

    Ok(Json(result.into()))
}

/// POST /reservations - 予約を登録
pub async fn create_reservation(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PlaceReservationRequest>,
) -> Result<(StatusCode, Json<ReservationResponse>), ApiError> {
    let cmd = req.to_command(chrono::Utc::now());

    let reservation = execute_place_reservation(&state.service_deps, cmd).await?;

    Ok((StatusCode::CREATED, Json(reservation.into())))
}

/// POST /books/:id/reservations/fulfill - 先頭の予約を貸出に変換
///
/// 貸出可能なコピーか予約がなければborrowはnull。
pub async fn fulfill_reservation(
    State(state): State<Arc<AppState>>,
    Path(book_id): Path<i64>,
    Json(req): Json<FulfillReservationRequest>,
) -> Result<Json<FulfillReservationResponse>, ApiError> {
    let cmd = req.to_command(BookId::new(book_id), chrono::Utc::now());

    let borrow = execute_fulfill_next(&state.service_deps, cmd).await?;

    Ok(Json(FulfillReservationResponse {
        borrow: borrow.map(BorrowResponse::from),
    }))
}

/// POST /payments/:id/pay - 支払を完了にする
///
/// 既に支払済みの場合も200で現在の支払を返す。
pub async fn pay_payment(
    State(state): State<Arc<AppState>>,
    Path(payment_id): Path<Uuid>,
    req: Option<Json<MarkPaidRequest>>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let Json(req) = req.unwrap_or_default();

    let cmd = MarkPaid {
        payment_id: PaymentId::from_uuid(payment_id),
        settled_at: req.settled_at.unwrap_or_else(chrono::Utc::now),
    };

    let payment = execute_mark_paid(&state.service_deps, cmd).await?;

    Ok(Json(payment.into()))
}

/// POST /fulfillments/retry - 保留中の予約充足を再試行
///
/// 解消できなかった保留は残り、結果にdeferredとして現れる。
pub async fn retry_fulfillments(
    State(state): State<Arc<AppState>>,
    req: Option<Json<RetryFulfillmentsRequest>>,
) -> Result<Json<Vec<PendingResolutionResponse>>, ApiError> {
    let Json(req) = req.unwrap_or_default();
    let now = req.as_of.unwrap_or_else(chrono::Utc::now);

    let resolutions = circulation::retry_pending_fulfillments(&state.service_deps, now).await?;

    Ok(Json(
        resolutions
            .into_iter()
            .map(PendingResolutionResponse::from)
            .collect(),
    ))
}

// ============================================================================
// Query handlers (GET)
// ============================================================================

/// GET /borrows/:id - 貸出詳細をIDで取得
pub async fn get_borrow(
    State(state): State<Arc<AppState>>,
    Path(borrow_id): Path<Uuid>,
) -> Result<Json<BorrowResponse>, ApiError> {
    let borrow = circulation::get_borrow(&state.service_deps, BorrowId::from_uuid(borrow_id)).await?;

    Ok(Json(borrow.into()))
}

/// GET /borrows?member_id= - 会員の貸出履歴（新しい順）
///
/// member_idパラメータは必須。
pub async fn list_borrows(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListBorrowsQuery>,
) -> Result<Json<Vec<BorrowResponse>>, ApiError> {
    let member_id = query.member_id.ok_or_else(|| {
        ApiError::BadRequest("member_id query parameter is required".to_string())
    })?;

    let borrows = circulation::member_history(&state.service_deps, MemberId::new(member_id)).await?;

    Ok(Json(borrows.into_iter().map(BorrowResponse::from).collect()))
}

/// GET /borrows/:id/events - 貸出の監査イベント
pub async fn list_borrow_events(
    State(state): State<Arc<AppState>>,
    Path(borrow_id): Path<Uuid>,
) -> Result<Json<Vec<EventResponse>>, ApiError> {
    let events =
        circulation::borrow_events(&state.service_deps, BorrowId::from_uuid(borrow_id)).await?;

    Ok(Json(events.into_iter().map(EventResponse::from).collect()))
}

/// GET /reports/overdue - 延滞レポート
pub async fn overdue_report(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OverdueReportQuery>,
) -> Result<Json<Vec<OverdueEntryResponse>>, ApiError> {
    let now = query.as_of.unwrap_or_else(chrono::Utc::now);

    let entries = circulation::overdue_report(&state.service_deps, now).await?;

    Ok(Json(
        entries.into_iter().map(OverdueEntryResponse::from).collect(),
    ))
}

/// GET /books/:id/reservations - 予約キュー（キュー順、positionは1始まり）
pub async fn list_reservations(
    State(state): State<Arc<AppState>>,
    Path(book_id): Path<i64>,
) -> Result<Json<Vec<QueueEntryResponse>>, ApiError> {
    let queue = circulation::peek_reservations(&state.service_deps, BookId::new(book_id)).await?;

    Ok(Json(
        queue
            .into_iter()
            .enumerate()
            .map(|(i, reservation)| QueueEntryResponse {
                position: i + 1,
                reservation: reservation.into(),
            })
            .collect(),
    ))
}

/// GET /payments/:id - 支払をIDで取得
pub async fn get_payment(
    State(state): State<Arc<AppState>>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let payment =
        circulation::get_payment(&state.service_deps, PaymentId::from_uuid(payment_id)).await?;

    Ok(Json(payment.into()))
}

/// GET /members/:id/fines - 会員の料金集計
pub async fn member_fines(
    State(state): State<Arc<AppState>>,
    Path(member_id): Path<i64>,
) -> Result<Json<FineSummaryResponse>, ApiError> {
    let summary = circulation::fine_summary(&state.service_deps, MemberId::new(member_id)).await?;

    Ok(Json(summary.into()))
}

/// GET /fulfillments/pending - 保留中の予約充足（古い順）
pub async fn list_pending_fulfillments(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<PendingFulfillmentResponse>>, ApiError> {
    let pending = circulation::pending_fulfillments(&state.service_deps).await?;

    Ok(Json(
        pending
            .into_iter()
            .map(PendingFulfillmentResponse::from)
            .collect(),
    ))
}
