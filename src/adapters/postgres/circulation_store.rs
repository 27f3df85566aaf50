use crate::domain::{
    BookId, Borrow, BorrowCore, BorrowId, CopyId, DomainEvent, EmployeeId, MemberId, Money,
    OpenBorrow, Payment, PaymentId, PaymentStatus, PendingFulfillment, Reservation,
    ReservationId, ReturnedBorrow,
};
use crate::ports::circulation_store::{
    CirculationChangeset, CirculationStore as CirculationStoreTrait, CommitError, Result,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use std::str::FromStr;

const BORROW_COLUMNS: &str = r#"
    borrow_id, member_id, copy_id, employee_id, serial_number,
    borrow_date, expected_return_date, actual_return_date
"#;

const PAYMENT_COLUMNS: &str = r#"
    payment_id, borrowing_id, employee_id, amount_cents, fine_amount_cents,
    total_amount_cents, note, status
"#;

fn invalid_data(message: String) -> Box<dyn std::error::Error + Send + Sync> {
    Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message))
}

/// PostgreSQLの行データを貸出に変換する
///
/// actual_return_dateの有無で未返却/返却済みを判定する。
fn map_row_to_borrow(row: &PgRow) -> Borrow {
    let core = BorrowCore {
        borrow_id: BorrowId::from_uuid(row.get("borrow_id")),
        member_id: MemberId::new(row.get("member_id")),
        copy_id: CopyId::new(row.get("copy_id")),
        employee_id: EmployeeId::new(row.get("employee_id")),
        serial_number: row.get("serial_number"),
        borrow_date: row.get("borrow_date"),
        expected_return_date: row.get("expected_return_date"),
    };

    let actual_return_date: Option<DateTime<Utc>> = row.get("actual_return_date");
    match actual_return_date {
        None => Borrow::Open(OpenBorrow { core }),
        Some(actual_return_date) => Borrow::Returned(ReturnedBorrow {
            core,
            actual_return_date,
        }),
    }
}

fn map_row_to_payment(row: &PgRow) -> Result<Payment> {
    let status_str: &str = row.get("status");
    let status = PaymentStatus::from_str(status_str).map_err(invalid_data)?;

    Ok(Payment {
        payment_id: PaymentId::from_uuid(row.get("payment_id")),
        borrowing_id: BorrowId::from_uuid(row.get("borrowing_id")),
        employee_id: EmployeeId::new(row.get("employee_id")),
        amount: Money::from_cents(row.get("amount_cents")),
        fine_amount: Money::from_cents(row.get("fine_amount_cents")),
        total_amount: Money::from_cents(row.get("total_amount_cents")),
        note: row.get("note"),
        status,
    })
}

fn map_row_to_reservation(row: &PgRow) -> Reservation {
    Reservation {
        reservation_id: ReservationId::from_uuid(row.get("reservation_id")),
        book_id: BookId::new(row.get("book_id")),
        member_id: MemberId::new(row.get("member_id")),
        reservation_date: row.get("reservation_date"),
    }
}

fn map_row_to_pending(row: &PgRow) -> PendingFulfillment {
    PendingFulfillment {
        copy_id: CopyId::new(row.get("copy_id")),
        book_id: BookId::new(row.get("book_id")),
        borrow_id: BorrowId::from_uuid(row.get("borrow_id")),
        reason: row.get("reason"),
        deferred_at: row.get("deferred_at"),
    }
}

fn backend(err: sqlx::Error) -> CommitError {
    CommitError::Backend(Box::new(err))
}

/// 一意制約違反を判定する
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

/// CirculationStoreのPostgreSQL実装
///
/// コミットは1つのトランザクション内で条件付きUPDATE（比較と更新）を行い、
/// 影響行数が1でなければ競合としてロールバックする。
/// トランザクションはドロップ時にロールバックされる。
pub struct CirculationStore {
    pool: PgPool,
}

impl CirculationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn apply_returns(
        tx: &mut Transaction<'_, Postgres>,
        returned_borrows: &[ReturnedBorrow],
    ) -> std::result::Result<(), CommitError> {
        for returned in returned_borrows {
            let result = sqlx::query(
                r#"
                UPDATE borrows
                SET actual_return_date = $2
                WHERE borrow_id = $1 AND actual_return_date IS NULL
                "#,
            )
            .bind(returned.borrow_id.value())
            .bind(returned.actual_return_date)
            .execute(&mut **tx)
            .await
            .map_err(backend)?;

            if result.rows_affected() != 1 {
                return Err(CommitError::Conflict(format!(
                    "borrow {} is no longer open",
                    returned.borrow_id
                )));
            }
        }
        Ok(())
    }

    async fn apply_availability(
        tx: &mut Transaction<'_, Postgres>,
        changeset: &CirculationChangeset,
    ) -> std::result::Result<(), CommitError> {
        for change in &changeset.availability {
            let result = sqlx::query(
                r#"
                UPDATE book_copies
                SET available = $3
                WHERE id = $1 AND available = $2
                "#,
            )
            .bind(change.copy_id.value())
            .bind(change.expected)
            .bind(change.new_value)
            .execute(&mut **tx)
            .await
            .map_err(backend)?;

            if result.rows_affected() != 1 {
                return Err(CommitError::Conflict(format!(
                    "copy {} availability changed",
                    change.copy_id.value()
                )));
            }
        }
        Ok(())
    }

    async fn insert_borrows(
        tx: &mut Transaction<'_, Postgres>,
        borrows: &[OpenBorrow],
    ) -> std::result::Result<(), CommitError> {
        for borrow in borrows {
            sqlx::query(
                r#"
                INSERT INTO borrows (
                    borrow_id,
                    member_id,
                    copy_id,
                    employee_id,
                    serial_number,
                    borrow_date,
                    expected_return_date
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(borrow.borrow_id.value())
            .bind(borrow.member_id.value())
            .bind(borrow.copy_id.value())
            .bind(borrow.employee_id.value())
            .bind(&borrow.serial_number)
            .bind(borrow.borrow_date)
            .bind(borrow.expected_return_date)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                // 部分一意インデックス（1コピー1未返却）に当たった
                if is_unique_violation(&e) {
                    CommitError::Conflict(format!(
                        "copy {} already has an open borrow",
                        borrow.copy_id.value()
                    ))
                } else {
                    backend(e)
                }
            })?;
        }
        Ok(())
    }

    async fn insert_payments(
        tx: &mut Transaction<'_, Postgres>,
        payments: &[Payment],
    ) -> std::result::Result<(), CommitError> {
        for payment in payments {
            sqlx::query(
                r#"
                INSERT INTO payments (
                    payment_id,
                    borrowing_id,
                    employee_id,
                    amount_cents,
                    fine_amount_cents,
                    total_amount_cents,
                    note,
                    status
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(payment.payment_id.value())
            .bind(payment.borrowing_id.value())
            .bind(payment.employee_id.value())
            .bind(payment.amount.cents())
            .bind(payment.fine_amount.cents())
            .bind(payment.total_amount.cents())
            .bind(&payment.note)
            .bind(payment.status.as_str())
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    CommitError::DuplicatePayment(payment.borrowing_id)
                } else {
                    backend(e)
                }
            })?;
        }
        Ok(())
    }

    async fn apply_reservations(
        tx: &mut Transaction<'_, Postgres>,
        changeset: &CirculationChangeset,
    ) -> std::result::Result<(), CommitError> {
        for reservation_id in &changeset.removed_reservations {
            let result = sqlx::query("DELETE FROM reservations WHERE reservation_id = $1")
                .bind(reservation_id.value())
                .execute(&mut **tx)
                .await
                .map_err(backend)?;

            if result.rows_affected() != 1 {
                return Err(CommitError::Conflict(format!(
                    "reservation {} already removed",
                    reservation_id.value()
                )));
            }
        }

        for reservation in &changeset.new_reservations {
            sqlx::query(
                r#"
                INSERT INTO reservations (reservation_id, book_id, member_id, reservation_date)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(reservation.reservation_id.value())
            .bind(reservation.book_id.value())
            .bind(reservation.member_id.value())
            .bind(reservation.reservation_date)
            .execute(&mut **tx)
            .await
            .map_err(backend)?;
        }
        Ok(())
    }

    async fn settle_payments(
        tx: &mut Transaction<'_, Postgres>,
        payment_ids: &[PaymentId],
    ) -> std::result::Result<(), CommitError> {
        for payment_id in payment_ids {
            let result = sqlx::query(
                r#"
                UPDATE payments
                SET status = 'paid'
                WHERE payment_id = $1 AND status = 'unpaid'
                "#,
            )
            .bind(payment_id.value())
            .execute(&mut **tx)
            .await
            .map_err(backend)?;

            if result.rows_affected() != 1 {
                return Err(CommitError::Conflict(format!(
                    "payment {} is no longer unpaid",
                    payment_id
                )));
            }
        }
        Ok(())
    }

    async fn apply_pending(
        tx: &mut Transaction<'_, Postgres>,
        changeset: &CirculationChangeset,
    ) -> std::result::Result<(), CommitError> {
        for copy_id in &changeset.cleared_pending {
            let result = sqlx::query("DELETE FROM pending_fulfillments WHERE copy_id = $1")
                .bind(copy_id.value())
                .execute(&mut **tx)
                .await
                .map_err(backend)?;

            if result.rows_affected() != 1 {
                return Err(CommitError::Conflict(format!(
                    "pending fulfillment for copy {} already cleared",
                    copy_id.value()
                )));
            }
        }

        for pending in &changeset.new_pending {
            sqlx::query(
                r#"
                INSERT INTO pending_fulfillments (copy_id, book_id, borrow_id, reason, deferred_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(pending.copy_id.value())
            .bind(pending.book_id.value())
            .bind(pending.borrow_id.value())
            .bind(&pending.reason)
            .bind(pending.deferred_at)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                // 主キー（1コピー1保留）に当たった
                if is_unique_violation(&e) {
                    CommitError::Conflict(format!(
                        "copy {} already has a pending fulfillment",
                        pending.copy_id.value()
                    ))
                } else {
                    backend(e)
                }
            })?;
        }
        Ok(())
    }

    async fn append_events(
        tx: &mut Transaction<'_, Postgres>,
        events: &[DomainEvent],
    ) -> std::result::Result<(), CommitError> {
        for event in events {
            let event_data =
                serde_json::to_value(event).map_err(|e| CommitError::Backend(Box::new(e)))?;

            sqlx::query(
                r#"
                INSERT INTO circulation_events (borrow_id, event_type, event_data, occurred_at)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(event.borrow_id().map(|id| id.value()))
            .bind(event.event_type())
            .bind(event_data)
            .bind(event.occurred_at())
            .execute(&mut **tx)
            .await
            .map_err(backend)?;
        }
        Ok(())
    }
}

#[async_trait]
impl CirculationStoreTrait for CirculationStore {
    async fn get_borrow(&self, borrow_id: BorrowId) -> Result<Option<Borrow>> {
        let row = sqlx::query(&format!(
            "SELECT {BORROW_COLUMNS} FROM borrows WHERE borrow_id = $1"
        ))
        .bind(borrow_id.value())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(map_row_to_borrow))
    }

    async fn open_borrows_for_member(&self, member_id: MemberId) -> Result<Vec<OpenBorrow>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {BORROW_COLUMNS}
            FROM borrows
            WHERE member_id = $1 AND actual_return_date IS NULL
            ORDER BY borrow_date
            "#
        ))
        .bind(member_id.value())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .filter_map(|row| match map_row_to_borrow(row) {
                Borrow::Open(open) => Some(open),
                Borrow::Returned(_) => None,
            })
            .collect())
    }

    async fn borrows_for_member(&self, member_id: MemberId) -> Result<Vec<Borrow>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {BORROW_COLUMNS}
            FROM borrows
            WHERE member_id = $1
            ORDER BY borrow_date DESC, created_at DESC
            "#
        ))
        .bind(member_id.value())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(map_row_to_borrow).collect())
    }

    async fn overdue_borrows(&self, now: DateTime<Utc>) -> Result<Vec<OpenBorrow>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {BORROW_COLUMNS}
            FROM borrows
            WHERE actual_return_date IS NULL AND expected_return_date < $1
            ORDER BY expected_return_date
            "#
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .filter_map(|row| match map_row_to_borrow(row) {
                Borrow::Open(open) => Some(open),
                Borrow::Returned(_) => None,
            })
            .collect())
    }

    async fn reservations_for_book(&self, book_id: BookId) -> Result<Vec<Reservation>> {
        let rows = sqlx::query(
            r#"
            SELECT reservation_id, book_id, member_id, reservation_date
            FROM reservations
            WHERE book_id = $1
            ORDER BY reservation_date, queue_seq
            "#,
        )
        .bind(book_id.value())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(map_row_to_reservation).collect())
    }

    async fn payment_for_borrow(&self, borrow_id: BorrowId) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE borrowing_id = $1"
        ))
        .bind(borrow_id.value())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_row_to_payment).transpose()
    }

    async fn get_payment(&self, payment_id: PaymentId) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE payment_id = $1"
        ))
        .bind(payment_id.value())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_row_to_payment).transpose()
    }

    async fn payments_for_member(&self, member_id: MemberId) -> Result<Vec<Payment>> {
        let rows = sqlx::query(
            r#"
            SELECT p.payment_id, p.borrowing_id, p.employee_id, p.amount_cents,
                   p.fine_amount_cents, p.total_amount_cents, p.note, p.status
            FROM payments p
            JOIN borrows b ON b.borrow_id = p.borrowing_id
            WHERE b.member_id = $1
            ORDER BY b.borrow_date
            "#,
        )
        .bind(member_id.value())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_row_to_payment).collect()
    }

    async fn events_for_borrow(&self, borrow_id: BorrowId) -> Result<Vec<DomainEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT event_data
            FROM circulation_events
            WHERE borrow_id = $1
            ORDER BY event_id
            "#,
        )
        .bind(borrow_id.value())
        .fetch_all(&self.pool)
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let event_data: serde_json::Value = row.get("event_data");
            events.push(serde_json::from_value(event_data)?);
        }
        Ok(events)
    }

    async fn pending_fulfillments(&self) -> Result<Vec<PendingFulfillment>> {
        let rows = sqlx::query(
            r#"
            SELECT copy_id, book_id, borrow_id, reason, deferred_at
            FROM pending_fulfillments
            ORDER BY deferred_at, copy_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(map_row_to_pending).collect())
    }

    async fn pending_fulfillment_for_copy(
        &self,
        copy_id: CopyId,
    ) -> Result<Option<PendingFulfillment>> {
        let row = sqlx::query(
            r#"
            SELECT copy_id, book_id, borrow_id, reason, deferred_at
            FROM pending_fulfillments
            WHERE copy_id = $1
            "#,
        )
        .bind(copy_id.value())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(map_row_to_pending))
    }

    /// 変更の集合を1トランザクションで反映する
    ///
    /// 適用順はポートの定義どおり。途中でエラーになった場合は
    /// コミットせずに戻り、トランザクションはロールバックされる。
    async fn commit(&self, changeset: CirculationChangeset) -> std::result::Result<(), CommitError> {
        if changeset.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(backend)?;

        Self::apply_returns(&mut tx, &changeset.returned_borrows).await?;
        Self::apply_availability(&mut tx, &changeset).await?;
        Self::insert_borrows(&mut tx, &changeset.new_borrows).await?;
        Self::insert_payments(&mut tx, &changeset.new_payments).await?;
        Self::apply_reservations(&mut tx, &changeset).await?;
        Self::settle_payments(&mut tx, &changeset.settled_payments).await?;
        Self::apply_pending(&mut tx, &changeset).await?;
        Self::append_events(&mut tx, &changeset.events).await?;

        tx.commit().await.map_err(backend)?;
        Ok(())
    }
}
