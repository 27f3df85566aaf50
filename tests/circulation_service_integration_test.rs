use chrono::{DateTime, Duration, TimeZone, Utc};
use library_circulation::adapters::mock::InMemoryLibrary;
use library_circulation::application::circulation::{
    CirculationError, CirculationPolicy, FulfillmentOutcome, ServiceDependencies, borrow_book,
    borrow_events, fine_summary, fulfill_next_reservation, get_borrow, mark_paid,
    member_history, overdue_report, peek_reservations, pending_fulfillments, place_reservation,
    retry_pending_fulfillments, return_book,
};
use library_circulation::domain::commands::*;
use library_circulation::domain::*;
use std::sync::Arc;

// ============================================================================
// テストヘルパー
// ============================================================================

const LIBRARIAN: EmployeeId = EmployeeId::new(7);

fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 10, 0, 0).unwrap()
}

fn deps_with_policy(library: &InMemoryLibrary, policy: CirculationPolicy) -> ServiceDependencies {
    let shared = Arc::new(library.clone());
    ServiceDependencies {
        circulation_store: shared.clone(),
        catalog_store: shared.clone(),
        member_store: shared.clone(),
        librarian_directory: shared,
        policy,
    }
}

fn deps_for(library: &InMemoryLibrary) -> ServiceDependencies {
    deps_with_policy(library, CirculationPolicy::default())
}

/// 会員1・2、司書7、書籍100のコピー10と11を登録した図書館
fn setup_library() -> InMemoryLibrary {
    let library = InMemoryLibrary::new();
    library.add_member(MemberId::new(1));
    library.add_member(MemberId::new(2));
    library.add_librarian(LIBRARIAN);
    library.add_copy(CopyId::new(10), BookId::new(100), "SN-10");
    library.add_copy(CopyId::new(11), BookId::new(100), "SN-11");
    library
}

fn borrow_cmd(member: i64, copy: i64, borrowed_at: DateTime<Utc>) -> BorrowBook {
    BorrowBook {
        member_id: MemberId::new(member),
        copy_id: CopyId::new(copy),
        employee_id: LIBRARIAN,
        borrowed_at,
    }
}

fn return_cmd(borrow_id: BorrowId, returned_at: DateTime<Utc>) -> ReturnBook {
    ReturnBook {
        borrow_id,
        returned_at,
    }
}

fn reserve_cmd(book: i64, member: i64, reserved_at: DateTime<Utc>) -> PlaceReservation {
    PlaceReservation {
        book_id: BookId::new(book),
        member_id: MemberId::new(member),
        reserved_at,
    }
}

// ============================================================================
// 貸出
// ============================================================================

#[tokio::test]
async fn test_borrow_marks_copy_unavailable() {
    let library = setup_library();
    let deps = deps_for(&library);

    let borrow = borrow_book(&deps, borrow_cmd(1, 10, at(2025, 4, 1)))
        .await
        .unwrap();

    assert_eq!(borrow.member_id, MemberId::new(1));
    assert_eq!(borrow.serial_number, "SN-10");
    assert_eq!(borrow.expected_return_date, at(2025, 4, 15));
    assert_eq!(library.copy_available(CopyId::new(10)), Some(false));
    assert_eq!(library.copy_available(CopyId::new(11)), Some(true));

    let stored = get_borrow(&deps, borrow.borrow_id).await.unwrap();
    assert!(stored.is_open());
}

#[tokio::test]
async fn test_borrow_unavailable_copy_fails() {
    let library = setup_library();
    let deps = deps_for(&library);

    borrow_book(&deps, borrow_cmd(1, 10, at(2025, 4, 1)))
        .await
        .unwrap();
    let result = borrow_book(&deps, borrow_cmd(2, 10, at(2025, 4, 2))).await;

    assert!(matches!(result, Err(CirculationError::CopyUnavailable)));
    assert!(member_history(&deps, MemberId::new(2)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_borrow_unknown_member_or_copy_is_not_found() {
    let library = setup_library();
    let deps = deps_for(&library);

    let unknown_member = borrow_book(&deps, borrow_cmd(99, 10, at(2025, 4, 1))).await;
    let unknown_copy = borrow_book(&deps, borrow_cmd(1, 999, at(2025, 4, 1))).await;

    assert!(matches!(unknown_member, Err(CirculationError::NotFound(_))));
    assert!(matches!(unknown_copy, Err(CirculationError::NotFound(_))));
    assert_eq!(library.copy_available(CopyId::new(10)), Some(true));
}

#[tokio::test]
async fn test_overdue_member_is_locked_out_of_every_copy() {
    let library = setup_library();
    library.add_copy(CopyId::new(20), BookId::new(200), "SN-20");
    let deps = deps_for(&library);

    // 4/15が返却予定、4/20時点で延滞
    borrow_book(&deps, borrow_cmd(1, 10, at(2025, 4, 1)))
        .await
        .unwrap();

    for copy in [11, 20] {
        let result = borrow_book(&deps, borrow_cmd(1, copy, at(2025, 4, 20))).await;
        assert!(matches!(result, Err(CirculationError::OverdueLockout)));
        assert_eq!(library.copy_available(CopyId::new(copy)), Some(true));
    }

    // 延滞前なら2冊目も借りられる
    let second = borrow_book(&deps, borrow_cmd(1, 11, at(2025, 4, 10))).await;
    assert!(second.is_ok());
}

#[tokio::test]
async fn test_due_date_itself_is_not_overdue() {
    let library = setup_library();
    let deps = deps_for(&library);

    borrow_book(&deps, borrow_cmd(1, 10, at(2025, 4, 1)))
        .await
        .unwrap();

    // 返却予定日時ちょうどは延滞ではない
    let result = borrow_book(&deps, borrow_cmd(1, 11, at(2025, 4, 15))).await;

    assert!(result.is_ok());
}

// ============================================================================
// 返却と延滞料金
// ============================================================================

#[tokio::test]
async fn test_on_time_return_releases_copy_without_payment() {
    let library = setup_library();
    let deps = deps_for(&library);

    let borrow = borrow_book(&deps, borrow_cmd(1, 10, at(2025, 4, 1)))
        .await
        .unwrap();
    let result = return_book(&deps, return_cmd(borrow.borrow_id, at(2025, 4, 10)))
        .await
        .unwrap();

    assert!(result.copy_available);
    assert_eq!(result.fine, None);
    assert_eq!(result.fulfillment, FulfillmentOutcome::NoWaiters);
    assert_eq!(result.borrow.actual_return_date, at(2025, 4, 10));
    assert_eq!(library.copy_available(CopyId::new(10)), Some(true));
    assert!(library.payments().is_empty());
}

#[tokio::test]
async fn test_late_return_records_fine() {
    let library = setup_library();
    let policy = CirculationPolicy {
        loan_period: Duration::days(7),
        ..CirculationPolicy::default()
    };
    let deps = deps_with_policy(&library, policy);

    // 4/1貸出、4/8返却予定、4/10返却、日額2.00
    let borrow = borrow_book(&deps, borrow_cmd(1, 10, at(2025, 4, 1)))
        .await
        .unwrap();
    let result = return_book(&deps, return_cmd(borrow.borrow_id, at(2025, 4, 10)))
        .await
        .unwrap();

    let fine = result.fine.expect("late return should record a payment");
    assert_eq!(fine.amount.to_string(), "18.00");
    assert_eq!(fine.fine_amount.to_string(), "10.00");
    assert_eq!(fine.total_amount.to_string(), "28.00");
    assert_eq!(fine.status, PaymentStatus::Unpaid);
    assert_eq!(fine.borrowing_id, borrow.borrow_id);
    assert_eq!(library.payments(), vec![fine]);
}

#[tokio::test]
async fn test_return_hours_after_due_time_is_fined_like_lockout() {
    let library = setup_library();
    let deps = deps_for(&library);

    let borrow = borrow_book(&deps, borrow_cmd(1, 10, at(2025, 4, 1)))
        .await
        .unwrap();
    let later = borrow.expected_return_date + Duration::hours(5);

    // 同じ時刻で会員は延滞ゲートに掛かる
    let locked = borrow_book(&deps, borrow_cmd(1, 11, later)).await;
    assert!(matches!(locked, Err(CirculationError::OverdueLockout)));

    let result = return_book(&deps, return_cmd(borrow.borrow_id, later))
        .await
        .unwrap();

    let fine = result
        .fine
        .expect("a return after the due time should record a payment");
    assert_eq!(fine.amount.to_string(), "28.00");
    assert_eq!(fine.fine_amount.to_string(), "5.00");
    assert_eq!(fine.total_amount.to_string(), "33.00");
}

#[tokio::test]
async fn test_return_before_borrow_date_is_rejected() {
    let library = setup_library();
    let deps = deps_for(&library);

    let borrow = borrow_book(&deps, borrow_cmd(1, 10, at(2025, 4, 10)))
        .await
        .unwrap();
    let result = return_book(&deps, return_cmd(borrow.borrow_id, at(2025, 4, 9))).await;

    assert!(matches!(
        result,
        Err(CirculationError::InvalidReturnDate { .. })
    ));
    assert!(get_borrow(&deps, borrow.borrow_id).await.unwrap().is_open());
    assert_eq!(library.copy_available(CopyId::new(10)), Some(false));
}

#[tokio::test]
async fn test_second_return_fails_without_side_effects() {
    let library = setup_library();
    let deps = deps_for(&library);

    let borrow = borrow_book(&deps, borrow_cmd(1, 10, at(2025, 4, 1)))
        .await
        .unwrap();
    return_book(&deps, return_cmd(borrow.borrow_id, at(2025, 4, 20)))
        .await
        .unwrap();

    // 2回目の返却の前に別の会員がコピーを借りる
    borrow_book(&deps, borrow_cmd(2, 10, at(2025, 4, 21)))
        .await
        .unwrap();
    let events_before = library.events().len();

    let second = return_book(&deps, return_cmd(borrow.borrow_id, at(2025, 4, 22))).await;

    assert!(matches!(second, Err(CirculationError::AlreadyReturned)));
    assert_eq!(library.payments().len(), 1);
    assert_eq!(library.copy_available(CopyId::new(10)), Some(false));
    assert_eq!(library.events().len(), events_before);
}

#[tokio::test]
async fn test_return_unknown_borrow_is_not_found() {
    let library = setup_library();
    let deps = deps_for(&library);

    let result = return_book(&deps, return_cmd(BorrowId::new(), at(2025, 4, 1))).await;

    assert!(matches!(result, Err(CirculationError::NotFound(_))));
}

// ============================================================================
// 予約の自動充足
// ============================================================================

#[tokio::test]
async fn test_return_fulfills_waiting_reservation() {
    let library = InMemoryLibrary::new();
    library.add_member(MemberId::new(1037));
    library.add_member(MemberId::new(5));
    library.add_librarian(EmployeeId::new(3));
    library.add_librarian(EmployeeId::new(9));
    library.add_copy(CopyId::new(1170), BookId::new(117), "SN-1170");
    let deps = deps_for(&library);

    let first = borrow_book(&deps, borrow_cmd(5, 1170, at(2025, 4, 1)))
        .await
        .unwrap();
    let reservation = place_reservation(&deps, reserve_cmd(117, 1037, at(2025, 4, 2)))
        .await
        .unwrap();

    let result = return_book(&deps, return_cmd(first.borrow_id, at(2025, 4, 10)))
        .await
        .unwrap();

    let FulfillmentOutcome::Fulfilled {
        reservation: fulfilled,
        borrow,
    } = result.fulfillment
    else {
        panic!("expected fulfillment, got {:?}", result.fulfillment);
    };
    assert_eq!(fulfilled, reservation);
    assert_eq!(borrow.member_id, MemberId::new(1037));
    assert_eq!(borrow.copy_id, CopyId::new(1170));
    // 最小の職員IDが担当
    assert_eq!(borrow.employee_id, EmployeeId::new(3));
    assert_eq!(borrow.borrow_date, at(2025, 4, 10));

    assert!(!result.copy_available);
    assert_eq!(library.copy_available(CopyId::new(1170)), Some(false));
    assert!(peek_reservations(&deps, BookId::new(117)).await.unwrap().is_empty());

    let history = member_history(&deps, MemberId::new(1037)).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].is_open());

    let events = borrow_events(&deps, borrow.borrow_id).await.unwrap();
    assert!(matches!(events[0], DomainEvent::BookBorrowed(_)));
    assert!(matches!(events[1], DomainEvent::ReservationFulfilled(_)));
}

#[tokio::test]
async fn test_reservations_are_fulfilled_in_reservation_date_order() {
    let library = setup_library();
    library.add_member(MemberId::new(3));
    library.add_member(MemberId::new(4));
    let deps = deps_for(&library);

    let first = borrow_book(&deps, borrow_cmd(1, 10, at(2025, 4, 1)))
        .await
        .unwrap();
    let second = borrow_book(&deps, borrow_cmd(1, 11, at(2025, 4, 1)))
        .await
        .unwrap();

    // 登録順ではなく予約日時順。同時刻は登録順
    place_reservation(&deps, reserve_cmd(100, 2, at(2025, 4, 5)))
        .await
        .unwrap();
    place_reservation(&deps, reserve_cmd(100, 3, at(2025, 4, 3)))
        .await
        .unwrap();
    place_reservation(&deps, reserve_cmd(100, 4, at(2025, 4, 5)))
        .await
        .unwrap();

    let queue: Vec<MemberId> = peek_reservations(&deps, BookId::new(100))
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.member_id)
        .collect();
    assert_eq!(
        queue,
        vec![MemberId::new(3), MemberId::new(2), MemberId::new(4)]
    );

    let r1 = return_book(&deps, return_cmd(first.borrow_id, at(2025, 4, 6)))
        .await
        .unwrap();
    let r2 = return_book(&deps, return_cmd(second.borrow_id, at(2025, 4, 7)))
        .await
        .unwrap();

    let winner = |outcome: &FulfillmentOutcome| match outcome {
        FulfillmentOutcome::Fulfilled { borrow, .. } => Some(borrow.member_id),
        _ => None,
    };
    assert_eq!(winner(&r1.fulfillment), Some(MemberId::new(3)));
    assert_eq!(winner(&r2.fulfillment), Some(MemberId::new(2)));

    let remaining = peek_reservations(&deps, BookId::new(100)).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].member_id, MemberId::new(4));
}

#[tokio::test]
async fn test_fulfillment_ignores_overdue_lockout() {
    let library = setup_library();
    library.add_copy(CopyId::new(20), BookId::new(200), "SN-20");
    let deps = deps_for(&library);

    // 会員2は書籍200を延滞中
    borrow_book(&deps, borrow_cmd(2, 20, at(2025, 3, 1)))
        .await
        .unwrap();
    let first = borrow_book(&deps, borrow_cmd(1, 10, at(2025, 4, 1)))
        .await
        .unwrap();
    place_reservation(&deps, reserve_cmd(100, 2, at(2025, 4, 2)))
        .await
        .unwrap();

    let result = return_book(&deps, return_cmd(first.borrow_id, at(2025, 4, 10)))
        .await
        .unwrap();

    assert!(matches!(
        result.fulfillment,
        FulfillmentOutcome::Fulfilled { ref borrow, .. } if borrow.member_id == MemberId::new(2)
    ));
}

#[tokio::test]
async fn test_fulfillment_deferred_without_librarian() {
    let library = setup_library();
    library.remove_librarian(LIBRARIAN);
    let deps = deps_for(&library);

    // 職員IDは貸出時にバリデーションされない
    let first = borrow_book(&deps, borrow_cmd(1, 10, at(2025, 4, 1)))
        .await
        .unwrap();
    place_reservation(&deps, reserve_cmd(100, 2, at(2025, 4, 2)))
        .await
        .unwrap();

    let result = return_book(&deps, return_cmd(first.borrow_id, at(2025, 4, 10)))
        .await
        .unwrap();

    assert!(matches!(
        result.fulfillment,
        FulfillmentOutcome::Deferred { .. }
    ));
    assert!(result.copy_available);
    assert_eq!(library.copy_available(CopyId::new(10)), Some(true));
    assert_eq!(
        peek_reservations(&deps, BookId::new(100)).await.unwrap().len(),
        1
    );

    // 後から単独で充足できる
    let borrow = fulfill_next_reservation(
        &deps,
        FulfillNextReservation {
            book_id: BookId::new(100),
            employee_id: EmployeeId::new(8),
            fulfilled_at: at(2025, 4, 11),
        },
    )
    .await
    .unwrap()
    .expect("reservation should be fulfilled");

    assert_eq!(borrow.member_id, MemberId::new(2));
    assert_eq!(borrow.copy_id, CopyId::new(10));
    assert_eq!(library.copy_available(CopyId::new(10)), Some(false));
    assert!(peek_reservations(&deps, BookId::new(100)).await.unwrap().is_empty());
    assert!(pending_fulfillments(&deps).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_fulfillment_deferred_when_directory_fails() {
    let library = setup_library();
    library.set_directory_unavailable(true);
    let deps = deps_for(&library);

    let first = borrow_book(&deps, borrow_cmd(1, 10, at(2025, 4, 1)))
        .await
        .unwrap();
    place_reservation(&deps, reserve_cmd(100, 2, at(2025, 4, 2)))
        .await
        .unwrap();

    let result = return_book(&deps, return_cmd(first.borrow_id, at(2025, 4, 10)))
        .await
        .unwrap();

    assert!(matches!(
        result.fulfillment,
        FulfillmentOutcome::Deferred { .. }
    ));
    let stored = get_borrow(&deps, first.borrow_id).await.unwrap();
    assert!(!stored.is_open());
}

#[tokio::test]
async fn test_deferred_copy_is_held_for_queue_until_retry() {
    let library = setup_library();
    library.add_member(MemberId::new(3));
    let deps = deps_for(&library);

    let first = borrow_book(&deps, borrow_cmd(1, 10, at(2025, 4, 1)))
        .await
        .unwrap();
    place_reservation(&deps, reserve_cmd(100, 2, at(2025, 4, 2)))
        .await
        .unwrap();

    library.set_directory_unavailable(true);
    let result = return_book(&deps, return_cmd(first.borrow_id, at(2025, 4, 10)))
        .await
        .unwrap();
    assert!(matches!(
        result.fulfillment,
        FulfillmentOutcome::Deferred { .. }
    ));

    // 保留は返却と同じコミットで記録される
    let pending = pending_fulfillments(&deps).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].copy_id, CopyId::new(10));
    assert_eq!(pending[0].book_id, BookId::new(100));
    assert_eq!(pending[0].borrow_id, first.borrow_id);
    let events = borrow_events(&deps, first.borrow_id).await.unwrap();
    assert!(
        events
            .iter()
            .any(|e| e.event_type() == "FulfillmentDeferred")
    );

    // 予約していない会員は保留中のコピーを借りられない
    let walk_in = borrow_book(&deps, borrow_cmd(3, 10, at(2025, 4, 10))).await;
    assert!(matches!(walk_in, Err(CirculationError::CopyUnavailable)));
    assert_eq!(
        peek_reservations(&deps, BookId::new(100)).await.unwrap()[0].member_id,
        MemberId::new(2)
    );

    // 障害中の再試行では保留が残る
    let still_deferred = retry_pending_fulfillments(&deps, at(2025, 4, 10))
        .await
        .unwrap();
    assert_eq!(still_deferred.len(), 1);
    assert!(matches!(
        still_deferred[0].outcome,
        FulfillmentOutcome::Deferred { .. }
    ));
    assert_eq!(pending_fulfillments(&deps).await.unwrap().len(), 1);

    library.set_directory_unavailable(false);
    let resolved = retry_pending_fulfillments(&deps, at(2025, 4, 11))
        .await
        .unwrap();

    assert_eq!(resolved.len(), 1);
    let FulfillmentOutcome::Fulfilled { borrow, .. } = &resolved[0].outcome else {
        panic!("expected fulfillment, got {:?}", resolved[0].outcome);
    };
    assert_eq!(borrow.member_id, MemberId::new(2));
    assert_eq!(borrow.copy_id, CopyId::new(10));
    assert_eq!(borrow.employee_id, LIBRARIAN);
    assert_eq!(library.copy_available(CopyId::new(10)), Some(false));
    assert!(pending_fulfillments(&deps).await.unwrap().is_empty());
    assert!(peek_reservations(&deps, BookId::new(100)).await.unwrap().is_empty());

    // 解消済みなので二度目は何もしない
    assert!(
        retry_pending_fulfillments(&deps, at(2025, 4, 12))
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_retry_releases_hold_when_queue_is_gone() {
    let library = setup_library();
    library.remove_librarian(LIBRARIAN);
    let deps = deps_for(&library);

    let first = borrow_book(&deps, borrow_cmd(1, 10, at(2025, 4, 1)))
        .await
        .unwrap();
    let second = borrow_book(&deps, borrow_cmd(1, 11, at(2025, 4, 1)))
        .await
        .unwrap();
    place_reservation(&deps, reserve_cmd(100, 2, at(2025, 4, 2)))
        .await
        .unwrap();

    // 待っている予約は1件だが、両方のコピーが保留になる
    return_book(&deps, return_cmd(first.borrow_id, at(2025, 4, 10)))
        .await
        .unwrap();
    return_book(&deps, return_cmd(second.borrow_id, at(2025, 4, 11)))
        .await
        .unwrap();
    assert_eq!(pending_fulfillments(&deps).await.unwrap().len(), 2);

    library.add_librarian(LIBRARIAN);
    let resolved = retry_pending_fulfillments(&deps, at(2025, 4, 12))
        .await
        .unwrap();

    // 古い保留から順に処理される
    assert_eq!(resolved.len(), 2);
    assert_eq!(resolved[0].pending.copy_id, CopyId::new(10));
    assert!(matches!(
        resolved[0].outcome,
        FulfillmentOutcome::Fulfilled { .. }
    ));
    assert_eq!(resolved[1].pending.copy_id, CopyId::new(11));
    assert_eq!(resolved[1].outcome, FulfillmentOutcome::NoWaiters);

    assert!(pending_fulfillments(&deps).await.unwrap().is_empty());
    assert_eq!(library.copy_available(CopyId::new(10)), Some(false));
    assert_eq!(library.copy_available(CopyId::new(11)), Some(true));

    // 保留が外れたコピーは通常どおり貸し出せる
    let walk_in = borrow_book(&deps, borrow_cmd(1, 11, at(2025, 4, 12)))
        .await
        .unwrap();
    assert_eq!(walk_in.copy_id, CopyId::new(11));
}

#[tokio::test]
async fn test_fulfill_next_without_copy_or_queue_is_noop() {
    let library = setup_library();
    let deps = deps_for(&library);
    let cmd = FulfillNextReservation {
        book_id: BookId::new(100),
        employee_id: LIBRARIAN,
        fulfilled_at: at(2025, 4, 1),
    };

    // 予約なし
    assert_eq!(
        fulfill_next_reservation(&deps, cmd.clone()).await.unwrap(),
        None
    );

    // 予約はあるが空きコピーなし
    borrow_book(&deps, borrow_cmd(1, 10, at(2025, 4, 1)))
        .await
        .unwrap();
    borrow_book(&deps, borrow_cmd(1, 11, at(2025, 4, 1)))
        .await
        .unwrap();
    place_reservation(&deps, reserve_cmd(100, 2, at(2025, 4, 1)))
        .await
        .unwrap();

    assert_eq!(fulfill_next_reservation(&deps, cmd).await.unwrap(), None);
    assert_eq!(
        peek_reservations(&deps, BookId::new(100)).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_reservation_requires_member_and_allows_duplicates() {
    let library = setup_library();
    let deps = deps_for(&library);

    let unknown = place_reservation(&deps, reserve_cmd(100, 99, at(2025, 4, 1))).await;
    assert!(matches!(unknown, Err(CirculationError::NotFound(_))));

    place_reservation(&deps, reserve_cmd(100, 1, at(2025, 4, 1)))
        .await
        .unwrap();
    place_reservation(&deps, reserve_cmd(100, 1, at(2025, 4, 2)))
        .await
        .unwrap();

    assert_eq!(
        peek_reservations(&deps, BookId::new(100)).await.unwrap().len(),
        2
    );
}

// ============================================================================
// 支払
// ============================================================================

#[tokio::test]
async fn test_mark_paid_is_one_way_and_idempotent() {
    let library = setup_library();
    let deps = deps_for(&library);

    let borrow = borrow_book(&deps, borrow_cmd(1, 10, at(2025, 4, 1)))
        .await
        .unwrap();
    let fine = return_book(&deps, return_cmd(borrow.borrow_id, at(2025, 4, 18)))
        .await
        .unwrap()
        .fine
        .unwrap();

    let cmd = MarkPaid {
        payment_id: fine.payment_id,
        settled_at: at(2025, 4, 19),
    };
    let paid = mark_paid(&deps, cmd.clone()).await.unwrap();
    let again = mark_paid(&deps, cmd).await.unwrap();

    assert_eq!(paid.status, PaymentStatus::Paid);
    assert_eq!(again, paid);
    assert_eq!(paid.total_amount, fine.total_amount);

    let settled = library
        .events()
        .into_iter()
        .filter(|e| matches!(e, DomainEvent::PaymentSettled(_)))
        .count();
    assert_eq!(settled, 1);
}

#[tokio::test]
async fn test_mark_paid_unknown_payment_is_not_found() {
    let library = setup_library();
    let deps = deps_for(&library);

    let result = mark_paid(
        &deps,
        MarkPaid {
            payment_id: PaymentId::new(),
            settled_at: at(2025, 4, 1),
        },
    )
    .await;

    assert!(matches!(result, Err(CirculationError::NotFound(_))));
}

#[tokio::test]
async fn test_fine_summary_splits_paid_and_unpaid() {
    let library = setup_library();
    let policy = CirculationPolicy {
        loan_period: Duration::days(7),
        ..CirculationPolicy::default()
    };
    let deps = deps_with_policy(&library, policy);

    // 28.00（4/1 → 4/10）
    let b1 = borrow_book(&deps, borrow_cmd(1, 10, at(2025, 4, 1)))
        .await
        .unwrap();
    let p1 = return_book(&deps, return_cmd(b1.borrow_id, at(2025, 4, 10)))
        .await
        .unwrap()
        .fine
        .unwrap();
    // 21.00（4/11 → 4/19）: 8日 × 2.00 + 1日 × 5.00
    let b2 = borrow_book(&deps, borrow_cmd(1, 11, at(2025, 4, 11)))
        .await
        .unwrap();
    return_book(&deps, return_cmd(b2.borrow_id, at(2025, 4, 19)))
        .await
        .unwrap();

    mark_paid(
        &deps,
        MarkPaid {
            payment_id: p1.payment_id,
            settled_at: at(2025, 4, 20),
        },
    )
    .await
    .unwrap();

    let summary = fine_summary(&deps, MemberId::new(1)).await.unwrap();

    assert_eq!(summary.paid_total.to_string(), "28.00");
    assert_eq!(summary.unpaid_total.to_string(), "21.00");
    assert_eq!(summary.payments.len(), 2);

    let other = fine_summary(&deps, MemberId::new(2)).await.unwrap();
    assert_eq!(other.unpaid_total, Money::ZERO);
    assert!(other.payments.is_empty());
}

// ============================================================================
// レポート
// ============================================================================

#[tokio::test]
async fn test_overdue_report_lists_open_overdue_borrows_oldest_first() {
    let library = setup_library();
    library.add_copy(CopyId::new(12), BookId::new(100), "SN-12");
    let deps = deps_for(&library);

    let newer = borrow_book(&deps, borrow_cmd(1, 10, at(2025, 4, 5)))
        .await
        .unwrap();
    let older = borrow_book(&deps, borrow_cmd(2, 11, at(2025, 4, 1)))
        .await
        .unwrap();
    // 返却済みは対象外
    let returned = borrow_book(&deps, borrow_cmd(1, 12, at(2025, 4, 1)))
        .await
        .unwrap();
    return_book(&deps, return_cmd(returned.borrow_id, at(2025, 4, 30)))
        .await
        .unwrap();

    let report = overdue_report(&deps, at(2025, 5, 1)).await.unwrap();

    let ids: Vec<BorrowId> = report.iter().map(|e| e.borrow.borrow_id).collect();
    assert_eq!(ids, vec![older.borrow_id, newer.borrow_id]);
    assert_eq!(report[0].days_overdue, 16);
    assert_eq!(report[1].days_overdue, 12);

    assert!(overdue_report(&deps, at(2025, 4, 10)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_member_history_newest_first() {
    let library = setup_library();
    let deps = deps_for(&library);

    let old = borrow_book(&deps, borrow_cmd(1, 10, at(2025, 4, 1)))
        .await
        .unwrap();
    return_book(&deps, return_cmd(old.borrow_id, at(2025, 4, 5)))
        .await
        .unwrap();
    let new = borrow_book(&deps, borrow_cmd(1, 10, at(2025, 4, 6)))
        .await
        .unwrap();

    let history = member_history(&deps, MemberId::new(1)).await.unwrap();

    assert_eq!(history.len(), 2);
    assert_eq!(history[0].borrow_id(), new.borrow_id);
    assert_eq!(history[1].borrow_id(), old.borrow_id);
    assert_eq!(history[1].actual_return_date(), Some(at(2025, 4, 5)));
}

#[tokio::test]
async fn test_borrow_events_follow_commit_order() {
    let library = setup_library();
    let deps = deps_for(&library);

    let borrow = borrow_book(&deps, borrow_cmd(1, 10, at(2025, 4, 1)))
        .await
        .unwrap();
    return_book(&deps, return_cmd(borrow.borrow_id, at(2025, 4, 20)))
        .await
        .unwrap();

    let types: Vec<&str> = borrow_events(&deps, borrow.borrow_id)
        .await
        .unwrap()
        .iter()
        .map(|e| e.event_type())
        .collect();

    assert_eq!(types, vec!["BookBorrowed", "BookReturned", "LateFineRecorded"]);

    let missing = borrow_events(&deps, BorrowId::new()).await;
    assert!(matches!(missing, Err(CirculationError::NotFound(_))));
}

// ============================================================================
// 競合と再試行
// ============================================================================

#[tokio::test]
async fn test_conflicting_commit_is_retried() {
    let library = setup_library();
    let deps = deps_for(&library);

    library.fail_next_commits(2);
    let borrow = borrow_book(&deps, borrow_cmd(1, 10, at(2025, 4, 1))).await;

    assert!(borrow.is_ok());
    assert_eq!(library.copy_available(CopyId::new(10)), Some(false));
}

#[tokio::test]
async fn test_conflict_surfaces_after_retries_exhausted() {
    let library = setup_library();
    let deps = deps_for(&library);

    library.fail_next_commits(10);
    let result = borrow_book(&deps, borrow_cmd(1, 10, at(2025, 4, 1))).await;

    assert!(matches!(result, Err(CirculationError::StorageConflict(_))));
    assert_eq!(library.copy_available(CopyId::new(10)), Some(true));
    assert!(library.events().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_borrows_of_one_copy_only_one_wins() {
    let library = setup_library();
    for member in 3..=8 {
        library.add_member(MemberId::new(member));
    }
    let deps = deps_for(&library);

    let handles: Vec<_> = (1..=8)
        .map(|member| {
            let deps = deps.clone();
            tokio::spawn(async move {
                borrow_book(&deps, borrow_cmd(member, 10, at(2025, 4, 1))).await
            })
        })
        .collect();

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(CirculationError::CopyUnavailable) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(library.copy_available(CopyId::new(10)), Some(false));
    let open_on_copy = library
        .events()
        .iter()
        .filter(|e| matches!(e, DomainEvent::BookBorrowed(b) if b.copy_id == CopyId::new(10)))
        .count();
    assert_eq!(open_on_copy, 1);
}
