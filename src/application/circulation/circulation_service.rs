use crate::domain::{
    self, AvailabilityChange, BookCopy, DomainEvent, OpenBorrow, Payment, RecordFineError,
    Reservation, ReturnedBorrow, commands::*, reservation::Fulfillment,
};
use crate::ports::*;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::errors::{CirculationError, Result};
use super::policy::CirculationPolicy;
use super::retry::retry_on_conflict;

/// サービスの依存関係
///
/// 関数型DDDの原則に従い、データ構造として定義。
/// 振る舞い（メソッド）は持たず、純粋な関数に依存関係を渡す。
#[derive(Clone)]
pub struct ServiceDependencies {
    pub circulation_store: Arc<dyn CirculationStore>,
    pub catalog_store: Arc<dyn CatalogStore>,
    pub member_store: Arc<dyn MemberStore>,
    pub librarian_directory: Arc<dyn LibrarianDirectory>,
    pub policy: CirculationPolicy,
}

/// 予約充足の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FulfillmentOutcome {
    /// 待っている予約がなかった
    NoWaiters,
    /// 予約を貸出に変換した
    Fulfilled {
        reservation: Reservation,
        borrow: OpenBorrow,
    },
    /// 充足を準備できなかった
    ///
    /// コピーは保留として予約キューのために確保され、
    /// `retry_pending_fulfillments`で再試行される。
    Deferred { reason: String },
}

/// 返却の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnResult {
    /// 返却済みになった貸出
    pub borrow: ReturnedBorrow,
    /// コミット後のコピーの可用性（予約充足で再貸出された場合はfalse）
    ///
    /// `Deferred`の場合はtrueだが、保留が解消されるまで予約者以外には貸し出されない。
    pub copy_available: bool,
    /// 延滞料金の支払（延滞時のみ）
    pub fine: Option<Payment>,
    /// 予約充足の結果
    pub fulfillment: FulfillmentOutcome,
}

/// 書籍を貸し出す
///
/// ビジネスルール：
/// - 会員とコピーが存在すること
/// - 会員に延滞中の貸出がないこと（会員の全貸出が対象）
/// - コピーが貸出可能であること（予約充足の保留中のコピーは予約者のために確保済み）
///
/// # 一貫性保証
///
/// 貸出の作成とコピーの可用性変更は1回のコミットで反映される。
/// 同じコピーへの同時貸出はコミット時の比較で1件だけが成功し、
/// 残りは`StorageConflict`として読み取りから再実行され`CopyUnavailable`になる。
pub async fn borrow_book(deps: &ServiceDependencies, cmd: BorrowBook) -> Result<OpenBorrow> {
    let cmd = &cmd;
    retry_on_conflict(&deps.policy.retry, "borrow_book", || try_borrow_book(deps, cmd)).await
}

async fn try_borrow_book(deps: &ServiceDependencies, cmd: &BorrowBook) -> Result<OpenBorrow> {
    // 1. 会員・コピー・会員の未返却貸出・コピーの保留を並行して取得
    let (member_exists, copy, open_borrows, pending) = futures::try_join!(
        async {
            deps.member_store
                .exists(cmd.member_id)
                .await
                .map_err(CirculationError::MemberStoreError)
        },
        async {
            deps.catalog_store
                .get_copy(cmd.copy_id)
                .await
                .map_err(CirculationError::CatalogError)
        },
        async {
            deps.circulation_store
                .open_borrows_for_member(cmd.member_id)
                .await
                .map_err(CirculationError::StoreError)
        },
        async {
            deps.circulation_store
                .pending_fulfillment_for_copy(cmd.copy_id)
                .await
                .map_err(CirculationError::StoreError)
        },
    )?;

    if !member_exists {
        return Err(CirculationError::NotFound(format!(
            "Member {}",
            cmd.member_id.value()
        )));
    }
    let mut copy = copy.ok_or_else(|| {
        CirculationError::NotFound(format!("Copy {}", cmd.copy_id.value()))
    })?;
    // 保留中のコピーは予約キューのために確保されている
    if pending.is_some() {
        copy.available = false;
    }

    // 2. ドメイン層の純粋関数を呼び出し
    let (borrow, event) = domain::borrow::borrow_book(
        &open_borrows,
        cmd.member_id,
        &copy,
        cmd.employee_id,
        cmd.borrowed_at,
        deps.policy.loan_period,
    )
    .inspect_err(|e| {
        tracing::debug!(
            member_id = cmd.member_id.value(),
            copy_id = cmd.copy_id.value(),
            reason = ?e,
            "borrow rejected"
        );
    })?;

    // 3. 貸出と可用性変更を1トランザクションで保存
    let changeset = CirculationChangeset {
        availability: vec![AvailabilityChange::checkout(copy.copy_id)],
        new_borrows: vec![borrow.clone()],
        events: vec![DomainEvent::BookBorrowed(event)],
        ..Default::default()
    };
    deps.circulation_store.commit(changeset).await?;

    tracing::info!(
        borrow_id = %borrow.borrow_id,
        member_id = borrow.member_id.value(),
        copy_id = borrow.copy_id.value(),
        "book borrowed"
    );

    Ok(borrow)
}

/// 書籍を返却する
///
/// 1回のコミットで以下を反映する（この順序で組み立てる）：
/// 1. 返却日の設定（未返却の場合のみ）
/// 2. コピーを貸出可能に戻す
/// 3. 延滞していれば支払を記録（既存の支払があれば作らない）
/// 4. 同じ書籍の先頭の予約を、空いたコピーで貸出に変換
///
/// 4の準備（予約キューの取得、担当職員の選定）に失敗しても返却は取り消さない。
/// 空いたコピーを保留として同じコミットに記録し、結果に`Deferred`を返す。
/// 保留は`retry_pending_fulfillments`（または`fulfill_next_reservation`）で
/// 解消されるまで残る。
pub async fn return_book(deps: &ServiceDependencies, cmd: ReturnBook) -> Result<ReturnResult> {
    let cmd = &cmd;
    retry_on_conflict(&deps.policy.retry, "return_book", || try_return_book(deps, cmd)).await
}

async fn try_return_book(deps: &ServiceDependencies, cmd: &ReturnBook) -> Result<ReturnResult> {
    // 1. 貸出を取得して返却
    let borrow = deps
        .circulation_store
        .get_borrow(cmd.borrow_id)
        .await
        .map_err(CirculationError::StoreError)?
        .ok_or_else(|| CirculationError::NotFound(format!("Borrow {}", cmd.borrow_id)))?;

    let (returned, returned_event) = domain::borrow::return_book(borrow, cmd.returned_at)?;
    let book_id = deps
        .catalog_store
        .book_id_for_copy(returned.copy_id)
        .await
        .map_err(CirculationError::CatalogError)?
        .ok_or_else(|| {
            CirculationError::NotFound(format!("Copy {}", returned.copy_id.value()))
        })?;

    let mut changeset = CirculationChangeset {
        returned_borrows: vec![returned.clone()],
        availability: vec![AvailabilityChange::release(returned.copy_id)],
        events: vec![DomainEvent::BookReturned(returned_event)],
        ..Default::default()
    };

    // 2. 延滞料金（1貸出につき最大1件）
    let existing_payment = deps
        .circulation_store
        .payment_for_borrow(returned.borrow_id)
        .await
        .map_err(CirculationError::StoreError)?;

    let fine = match domain::payment::record_late_fine(
        &returned,
        existing_payment.as_ref(),
        deps.policy.daily_rate,
        deps.policy.late_fee_per_day,
    ) {
        Ok(Some((payment, event))) => {
            changeset.new_payments.push(payment.clone());
            changeset.events.push(DomainEvent::LateFineRecorded(event));
            Some(payment)
        }
        Ok(None) => None,
        Err(RecordFineError::DuplicatePayment) => {
            tracing::warn!(
                borrow_id = %returned.borrow_id,
                "payment already exists for borrow, not recording another"
            );
            None
        }
    };

    // 3. 予約の自動充足（空いたコピーを使う）
    let freed_copy = BookCopy {
        copy_id: returned.copy_id,
        book_id,
        serial_number: returned.serial_number.clone(),
        available: true,
    };
    let fulfillment = match prepare_cascade(deps, &freed_copy, cmd.returned_at).await {
        Ok(Some(fulfillment)) => stage_fulfillment(&mut changeset, &freed_copy, fulfillment),
        Ok(None) => FulfillmentOutcome::NoWaiters,
        Err(e) => {
            tracing::warn!(
                borrow_id = %returned.borrow_id,
                book_id = freed_copy.book_id.value(),
                error = %e,
                "reservation fulfillment deferred"
            );
            let reason = e.to_string();
            let (pending, deferred) = domain::reservation::defer_fulfillment(
                &freed_copy,
                returned.borrow_id,
                reason.clone(),
                cmd.returned_at,
            );
            changeset.new_pending.push(pending);
            changeset
                .events
                .push(DomainEvent::FulfillmentDeferred(deferred));
            FulfillmentOutcome::Deferred { reason }
        }
    };

    // 4. すべてを1トランザクションで保存
    deps.circulation_store.commit(changeset).await?;

    let copy_available = !matches!(fulfillment, FulfillmentOutcome::Fulfilled { .. });

    tracing::info!(
        borrow_id = %returned.borrow_id,
        copy_id = returned.copy_id.value(),
        fine = ?fine.as_ref().map(|p| p.total_amount.to_string()),
        fulfilled = !copy_available,
        "book returned"
    );

    Ok(ReturnResult {
        borrow: returned,
        copy_available,
        fine,
        fulfillment,
    })
}

/// 予約充足を変更の集合に積む
///
/// 空いたコピーの貸出、新しい貸出、予約の削除と2つのイベント。
pub(super) fn stage_fulfillment(
    changeset: &mut CirculationChangeset,
    copy: &BookCopy,
    fulfillment: Fulfillment,
) -> FulfillmentOutcome {
    changeset
        .availability
        .push(AvailabilityChange::checkout(copy.copy_id));
    changeset.new_borrows.push(fulfillment.borrow.clone());
    changeset
        .removed_reservations
        .push(fulfillment.reservation.reservation_id);
    changeset
        .events
        .push(DomainEvent::BookBorrowed(fulfillment.borrowed));
    changeset
        .events
        .push(DomainEvent::ReservationFulfilled(fulfillment.fulfilled));

    FulfillmentOutcome::Fulfilled {
        reservation: fulfillment.reservation,
        borrow: fulfillment.borrow,
    }
}

/// 空いたコピーに対する予約充足を組み立てる
///
/// 担当職員は有効な職員IDの最小値（自動割当ポリシー）。
/// 予約がなければ`Ok(None)`。
pub(super) async fn prepare_cascade(
    deps: &ServiceDependencies,
    freed_copy: &BookCopy,
    now: DateTime<Utc>,
) -> Result<Option<domain::reservation::Fulfillment>> {
    let queue = deps
        .circulation_store
        .reservations_for_book(freed_copy.book_id)
        .await
        .map_err(CirculationError::StoreError)?;

    if queue.is_empty() {
        return Ok(None);
    }

    let employee_ids = deps
        .librarian_directory
        .valid_employee_ids()
        .await
        .map_err(CirculationError::DirectoryError)?;

    let employee_id = domain::reservation::pick_fulfillment_employee(&employee_ids)
        .ok_or_else(|| CirculationError::NotFound("Valid librarian".to_string()))?;

    let fulfillment = domain::reservation::fulfill_next(
        &queue,
        freed_copy,
        employee_id,
        now,
        deps.policy.loan_period,
    )?;

    Ok(fulfillment)
}
