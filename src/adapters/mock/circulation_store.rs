use crate::domain::{
    self, BookId, Borrow, BorrowId, CopyId, DomainEvent, MemberId, OpenBorrow, Payment,
    PaymentId, PaymentStatus, PendingFulfillment, Reservation,
};
use crate::ports::circulation_store::{CirculationChangeset, CirculationStore, CommitError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::InMemoryLibrary;
use super::library::LibraryState;

#[async_trait]
impl CirculationStore for InMemoryLibrary {
    async fn get_borrow(&self, borrow_id: BorrowId) -> Result<Option<Borrow>> {
        Ok(self
            .lock_state()
            .borrows
            .iter()
            .find(|b| b.borrow_id() == borrow_id)
            .cloned())
    }

    async fn open_borrows_for_member(&self, member_id: MemberId) -> Result<Vec<OpenBorrow>> {
        Ok(self
            .lock_state()
            .borrows
            .iter()
            .filter_map(|b| match b {
                Borrow::Open(open) if open.member_id == member_id => Some(open.clone()),
                _ => None,
            })
            .collect())
    }

    async fn borrows_for_member(&self, member_id: MemberId) -> Result<Vec<Borrow>> {
        let mut borrows: Vec<Borrow> = self
            .lock_state()
            .borrows
            .iter()
            .filter(|b| b.core().member_id == member_id)
            .cloned()
            .collect();
        // 新しい順。同時刻は後から追加した方が先
        borrows.reverse();
        borrows.sort_by(|a, b| b.core().borrow_date.cmp(&a.core().borrow_date));
        Ok(borrows)
    }

    async fn overdue_borrows(&self, now: DateTime<Utc>) -> Result<Vec<OpenBorrow>> {
        let mut overdue: Vec<OpenBorrow> = self
            .lock_state()
            .borrows
            .iter()
            .filter_map(|b| match b {
                Borrow::Open(open) if domain::borrow::is_overdue(open, now) => Some(open.clone()),
                _ => None,
            })
            .collect();
        overdue.sort_by_key(|b| b.expected_return_date);
        Ok(overdue)
    }

    async fn reservations_for_book(&self, book_id: BookId) -> Result<Vec<Reservation>> {
        let state = self.lock_state();
        let mut queue: Vec<&(u64, Reservation)> = state
            .reservations
            .iter()
            .filter(|(_, r)| r.book_id == book_id)
            .collect();
        queue.sort_by_key(|(seq, _)| *seq);
        Ok(domain::reservation::queue_order(
            queue.into_iter().map(|(_, r)| r.clone()).collect(),
        ))
    }

    async fn payment_for_borrow(&self, borrow_id: BorrowId) -> Result<Option<Payment>> {
        Ok(self
            .lock_state()
            .payments
            .iter()
            .find(|p| p.borrowing_id == borrow_id)
            .cloned())
    }

    async fn get_payment(&self, payment_id: PaymentId) -> Result<Option<Payment>> {
        Ok(self
            .lock_state()
            .payments
            .iter()
            .find(|p| p.payment_id == payment_id)
            .cloned())
    }

    async fn payments_for_member(&self, member_id: MemberId) -> Result<Vec<Payment>> {
        let state = self.lock_state();
        Ok(state
            .payments
            .iter()
            .filter(|p| {
                state
                    .borrows
                    .iter()
                    .any(|b| b.borrow_id() == p.borrowing_id && b.core().member_id == member_id)
            })
            .cloned()
            .collect())
    }

    async fn events_for_borrow(&self, borrow_id: BorrowId) -> Result<Vec<DomainEvent>> {
        Ok(self
            .lock_state()
            .events
            .iter()
            .filter(|e| e.borrow_id() == Some(borrow_id))
            .cloned()
            .collect())
    }

    async fn pending_fulfillments(&self) -> Result<Vec<PendingFulfillment>> {
        let mut pending: Vec<PendingFulfillment> =
            self.lock_state().pending.values().cloned().collect();
        pending.sort_by_key(|p| p.deferred_at);
        Ok(pending)
    }

    async fn pending_fulfillment_for_copy(
        &self,
        copy_id: CopyId,
    ) -> Result<Option<PendingFulfillment>> {
        Ok(self.lock_state().pending.get(&copy_id).cloned())
    }

    /// 状態のコピーに変更を適用し、すべてのガードを通った場合のみ差し替える。
    /// コミット中はロックを保持し続ける。
    async fn commit(&self, changeset: CirculationChangeset) -> std::result::Result<(), CommitError> {
        {
            let mut faults = self.lock_faults();
            if faults.conflicting_commits > 0 {
                faults.conflicting_commits -= 1;
                return Err(CommitError::Conflict("injected conflict".to_string()));
            }
        }

        let mut state = self.lock_state();
        let mut next = state.clone();
        apply(&mut next, changeset)?;
        *state = next;
        Ok(())
    }
}

fn apply(
    state: &mut LibraryState,
    changeset: CirculationChangeset,
) -> std::result::Result<(), CommitError> {
    for returned in changeset.returned_borrows {
        let slot = state
            .borrows
            .iter_mut()
            .find(|b| b.borrow_id() == returned.borrow_id)
            .ok_or_else(|| CommitError::Conflict(format!("borrow {} missing", returned.borrow_id)))?;
        if !slot.is_open() {
            return Err(CommitError::Conflict(format!(
                "borrow {} already returned",
                returned.borrow_id
            )));
        }
        *slot = Borrow::Returned(returned);
    }

    for change in changeset.availability {
        let copy = state.copies.get_mut(&change.copy_id).ok_or_else(|| {
            CommitError::Conflict(format!("copy {} missing", change.copy_id.value()))
        })?;
        if copy.available != change.expected {
            return Err(CommitError::Conflict(format!(
                "copy {} availability changed",
                change.copy_id.value()
            )));
        }
        copy.available = change.new_value;
    }

    for borrow in changeset.new_borrows {
        let copy_taken = state
            .borrows
            .iter()
            .any(|b| b.is_open() && b.core().copy_id == borrow.copy_id);
        if copy_taken {
            return Err(CommitError::Conflict(format!(
                "copy {} already has an open borrow",
                borrow.copy_id.value()
            )));
        }
        state.borrows.push(Borrow::Open(borrow));
    }

    for payment in changeset.new_payments {
        if state
            .payments
            .iter()
            .any(|p| p.borrowing_id == payment.borrowing_id)
        {
            return Err(CommitError::DuplicatePayment(payment.borrowing_id));
        }
        state.payments.push(payment);
    }

    for reservation_id in changeset.removed_reservations {
        let position = state
            .reservations
            .iter()
            .position(|(_, r)| r.reservation_id == reservation_id)
            .ok_or_else(|| {
                CommitError::Conflict(format!(
                    "reservation {} already removed",
                    reservation_id.value()
                ))
            })?;
        state.reservations.remove(position);
    }

    for reservation in changeset.new_reservations {
        let seq = state.next_reservation_seq;
        state.next_reservation_seq += 1;
        state.reservations.push((seq, reservation));
    }

    for payment_id in changeset.settled_payments {
        let payment = state
            .payments
            .iter_mut()
            .find(|p| p.payment_id == payment_id)
            .ok_or_else(|| CommitError::Conflict(format!("payment {} missing", payment_id)))?;
        if payment.status != PaymentStatus::Unpaid {
            return Err(CommitError::Conflict(format!(
                "payment {} already settled",
                payment_id
            )));
        }
        payment.status = PaymentStatus::Paid;
    }

    for copy_id in changeset.cleared_pending {
        if state.pending.remove(&copy_id).is_none() {
            return Err(CommitError::Conflict(format!(
                "pending fulfillment for copy {} already cleared",
                copy_id.value()
            )));
        }
    }

    for pending in changeset.new_pending {
        if state.pending.contains_key(&pending.copy_id) {
            return Err(CommitError::Conflict(format!(
                "copy {} already has a pending fulfillment",
                pending.copy_id.value()
            )));
        }
        state.pending.insert(pending.copy_id, pending);
    }

    state.events.extend(changeset.events);
    Ok(())
}
