use crate::domain::{
    self, BookId, CopyId, DomainEvent, OpenBorrow, PendingFulfillment, Reservation, commands::*,
};
use crate::ports::*;
use chrono::{DateTime, Utc};

use super::circulation_service::{
    FulfillmentOutcome, ServiceDependencies, prepare_cascade, stage_fulfillment,
};
use super::errors::{CirculationError, Result};
use super::retry::retry_on_conflict;

/// 保留中の予約充足を再試行した結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingResolution {
    pub pending: PendingFulfillment,
    pub outcome: FulfillmentOutcome,
}

/// 予約を登録する（キューの末尾に追加）
///
/// 会員が存在しなければNotFound。
/// 同じ会員による同じ書籍の重複予約も受け付ける。
pub async fn place_reservation(
    deps: &ServiceDependencies,
    cmd: PlaceReservation,
) -> Result<Reservation> {
    let member_exists = deps
        .member_store
        .exists(cmd.member_id)
        .await
        .map_err(CirculationError::MemberStoreError)?;

    if !member_exists {
        return Err(CirculationError::NotFound(format!(
            "Member {}",
            cmd.member_id.value()
        )));
    }

    let (reservation, event) =
        domain::reservation::place_reservation(cmd.book_id, cmd.member_id, cmd.reserved_at);

    let changeset = CirculationChangeset {
        new_reservations: vec![reservation.clone()],
        events: vec![DomainEvent::ReservationPlaced(event)],
        ..Default::default()
    };
    deps.circulation_store.commit(changeset).await?;

    tracing::info!(
        book_id = reservation.book_id.value(),
        member_id = reservation.member_id.value(),
        "reservation placed"
    );

    Ok(reservation)
}

/// 予約キューを参照する（キュー順）
pub async fn peek_reservations(
    deps: &ServiceDependencies,
    book_id: BookId,
) -> Result<Vec<Reservation>> {
    deps.circulation_store
        .reservations_for_book(book_id)
        .await
        .map_err(CirculationError::StoreError)
}

/// 先頭の予約を貸出に変換する
///
/// 書籍の貸出可能なコピーと予約の両方がある場合のみ貸出を作成し、
/// 予約を削除する。どちらかがなければ`Ok(None)`。
///
/// 延滞中の会員であっても貸し出す（自動充足は延滞ゲートを通らない）。
/// 保留中のコピーがあればそれを優先して使い、保留を解消する。
pub async fn fulfill_next_reservation(
    deps: &ServiceDependencies,
    cmd: FulfillNextReservation,
) -> Result<Option<OpenBorrow>> {
    let cmd = &cmd;
    retry_on_conflict(&deps.policy.retry, "fulfill_next_reservation", || {
        try_fulfill_next_reservation(deps, cmd)
    })
    .await
}

async fn try_fulfill_next_reservation(
    deps: &ServiceDependencies,
    cmd: &FulfillNextReservation,
) -> Result<Option<OpenBorrow>> {
    let held = deps
        .circulation_store
        .pending_fulfillments()
        .await
        .map_err(CirculationError::StoreError)?
        .into_iter()
        .find(|p| p.book_id == cmd.book_id);

    let mut changeset = CirculationChangeset::default();
    let copy = match held {
        Some(pending) => {
            changeset.cleared_pending.push(pending.copy_id);
            load_copy(deps, pending.copy_id).await?
        }
        None => {
            let Some(copy) = deps
                .catalog_store
                .find_available_copy(cmd.book_id)
                .await
                .map_err(CirculationError::CatalogError)?
            else {
                return Ok(None);
            };
            copy
        }
    };

    let queue = deps
        .circulation_store
        .reservations_for_book(cmd.book_id)
        .await
        .map_err(CirculationError::StoreError)?;

    let fulfillment = domain::reservation::fulfill_next(
        &queue,
        &copy,
        cmd.employee_id,
        cmd.fulfilled_at,
        deps.policy.loan_period,
    )?;

    let Some(fulfillment) = fulfillment else {
        // 予約がなくなっていれば保留だけを解消する
        if !changeset.is_empty() {
            deps.circulation_store.commit(changeset).await?;
        }
        return Ok(None);
    };

    let borrow = fulfillment.borrow.clone();
    stage_fulfillment(&mut changeset, &copy, fulfillment);
    deps.circulation_store.commit(changeset).await?;

    tracing::info!(
        book_id = cmd.book_id.value(),
        member_id = borrow.member_id.value(),
        borrow_id = %borrow.borrow_id,
        "reservation fulfilled"
    );

    Ok(Some(borrow))
}

/// 保留中の予約充足の一覧（保留日時の古い順）
pub async fn pending_fulfillments(deps: &ServiceDependencies) -> Result<Vec<PendingFulfillment>> {
    deps.circulation_store
        .pending_fulfillments()
        .await
        .map_err(CirculationError::StoreError)
}

/// 保留中の予約充足を再試行する
///
/// 保留日時の古い順に、返却時と同じ手順（自動割当の職員で先頭の予約を
/// 空いたコピーの貸出に変換）を試みる。
/// - 充足できた：貸出を作成し、予約と保留を削除する（`Fulfilled`）
/// - 予約がなくなっていた：保留だけを削除し、通常の貸出に戻す（`NoWaiters`）
/// - まだ準備できない：保留を残す（`Deferred`）
///
/// 保留は解消されるまで残るため、定期的に呼び出すことで
/// 返却後の充足は少なくとも1回実行される。
pub async fn retry_pending_fulfillments(
    deps: &ServiceDependencies,
    now: DateTime<Utc>,
) -> Result<Vec<PendingResolution>> {
    let pending = pending_fulfillments(deps).await?;

    let mut resolutions = Vec::with_capacity(pending.len());
    for item in pending {
        let copy_id = item.copy_id;
        let resolved = retry_on_conflict(&deps.policy.retry, "retry_pending_fulfillment", || {
            try_resolve_pending(deps, copy_id, now)
        })
        .await?;

        // 他の呼び出しが先に解消していれば結果に含めない
        if let Some(outcome) = resolved {
            resolutions.push(PendingResolution {
                pending: item,
                outcome,
            });
        }
    }

    Ok(resolutions)
}

async fn try_resolve_pending(
    deps: &ServiceDependencies,
    copy_id: CopyId,
    now: DateTime<Utc>,
) -> Result<Option<FulfillmentOutcome>> {
    let Some(pending) = deps
        .circulation_store
        .pending_fulfillment_for_copy(copy_id)
        .await
        .map_err(CirculationError::StoreError)?
    else {
        return Ok(None);
    };

    let copy = load_copy(deps, copy_id).await?;

    let mut changeset = CirculationChangeset {
        cleared_pending: vec![copy_id],
        ..Default::default()
    };

    let outcome = match prepare_cascade(deps, &copy, now).await {
        Ok(Some(fulfillment)) => stage_fulfillment(&mut changeset, &copy, fulfillment),
        Ok(None) => FulfillmentOutcome::NoWaiters,
        Err(e) => {
            tracing::warn!(
                copy_id = copy_id.value(),
                book_id = pending.book_id.value(),
                deferred_at = %pending.deferred_at,
                error = %e,
                "pending fulfillment still deferred"
            );
            return Ok(Some(FulfillmentOutcome::Deferred {
                reason: e.to_string(),
            }));
        }
    };

    deps.circulation_store.commit(changeset).await?;

    tracing::info!(
        copy_id = copy_id.value(),
        book_id = pending.book_id.value(),
        fulfilled = matches!(outcome, FulfillmentOutcome::Fulfilled { .. }),
        "pending fulfillment resolved"
    );

    Ok(Some(outcome))
}

async fn load_copy(deps: &ServiceDependencies, copy_id: CopyId) -> Result<domain::BookCopy> {
    deps.catalog_store
        .get_copy(copy_id)
        .await
        .map_err(CirculationError::CatalogError)?
        .ok_or_else(|| CirculationError::NotFound(format!("Copy {}", copy_id.value())))
}
