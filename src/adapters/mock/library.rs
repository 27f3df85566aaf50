use crate::domain::{
    BookCopy, BookId, Borrow, CopyId, DomainEvent, EmployeeId, MemberId, Payment,
    PendingFulfillment, Reservation,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// 全ポート実装で共有するインメモリの状態
#[derive(Debug, Clone, Default)]
pub(super) struct LibraryState {
    pub members: BTreeSet<MemberId>,
    pub librarians: BTreeSet<EmployeeId>,
    pub copies: BTreeMap<CopyId, BookCopy>,
    /// 挿入順を保持する（borrow_dateが同じ場合の順序を決定的にする）
    pub borrows: Vec<Borrow>,
    /// (キュー連番, 予約)
    pub reservations: Vec<(u64, Reservation)>,
    pub next_reservation_seq: u64,
    pub payments: Vec<Payment>,
    pub pending: BTreeMap<CopyId, PendingFulfillment>,
    pub events: Vec<DomainEvent>,
}

#[derive(Debug, Default)]
pub(super) struct Faults {
    /// 競合として失敗させる残りコミット数
    pub conflicting_commits: usize,
    pub directory_unavailable: bool,
}

/// 全ポートを実装するインメモリの図書館
///
/// すべてのポートが1つの`Mutex`で守られた状態を共有するため、コミットは
/// どの読み取りに対しても原子的かつ分離される。コミットのガードはPostgres
/// アダプターと同じ。クローンは同じ状態への別のハンドルになる。
#[derive(Debug, Clone, Default)]
pub struct InMemoryLibrary {
    pub(super) state: Arc<Mutex<LibraryState>>,
    pub(super) faults: Arc<Mutex<Faults>>,
}

impl InMemoryLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) fn lock_state(&self) -> MutexGuard<'_, LibraryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn lock_faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 会員を登録する
    pub fn add_member(&self, member_id: MemberId) {
        self.lock_state().members.insert(member_id);
    }

    /// 有効な司書を登録する
    pub fn add_librarian(&self, employee_id: EmployeeId) {
        self.lock_state().librarians.insert(employee_id);
    }

    /// 司書を無効にする
    pub fn remove_librarian(&self, employee_id: EmployeeId) {
        self.lock_state().librarians.remove(&employee_id);
    }

    /// 書籍の貸出可能なコピーを登録する
    pub fn add_copy(&self, copy_id: CopyId, book_id: BookId, serial_number: impl Into<String>) {
        self.lock_state().copies.insert(
            copy_id,
            BookCopy {
                copy_id,
                book_id,
                serial_number: serial_number.into(),
                available: true,
            },
        );
    }

    /// コピーの現在の可用性
    pub fn copy_available(&self, copy_id: CopyId) -> Option<bool> {
        self.lock_state().copies.get(&copy_id).map(|c| c.available)
    }

    /// コミットのガードを通さずに貸出を直接追加する（テストの準備用）
    pub fn seed_borrow(&self, borrow: Borrow) {
        let mut state = self.lock_state();
        if borrow.is_open() {
            if let Some(copy) = state.copies.get_mut(&borrow.core().copy_id) {
                copy.available = false;
            }
        }
        state.borrows.push(borrow);
    }

    /// 記録済みの全支払
    pub fn payments(&self) -> Vec<Payment> {
        self.lock_state().payments.clone()
    }

    /// コミット順の監査ログ全体
    pub fn events(&self) -> Vec<DomainEvent> {
        self.lock_state().events.clone()
    }

    /// 次の`count`回のコミットを競合で失敗させる
    pub fn fail_next_commits(&self, count: usize) {
        self.lock_faults().conflicting_commits = count;
    }

    /// 司書名簿をエラーにする
    pub fn set_directory_unavailable(&self, unavailable: bool) {
        self.lock_faults().directory_unavailable = unavailable;
    }
}
