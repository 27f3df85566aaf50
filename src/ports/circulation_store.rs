use crate::domain::{
    AvailabilityChange, BookId, Borrow, BorrowId, CopyId, DomainEvent, MemberId, OpenBorrow,
    Payment, PaymentId, PendingFulfillment, Reservation, ReservationId, ReturnedBorrow,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// コミットのエラー
#[derive(Debug, Error)]
pub enum CommitError {
    /// 読み取り後に他のトランザクションが同じ行を変更した
    #[error("Concurrent modification: {0}")]
    Conflict(String),

    /// 同じ貸出に2件目の支払を作ろうとした
    #[error("Payment already exists for borrow {0}")]
    DuplicatePayment(BorrowId),

    /// ストレージ層の障害
    #[error("Storage backend error")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// 1トランザクションで反映する変更の集合
///
/// 適用順：返却 → 可用性変更（記載順） → 新規貸出 → 新規支払 → 予約削除 →
/// 新規予約 → 支払完了 → 保留の解消 → 新規保留 → 監査イベント。
///
/// ガード（いずれかが失敗するとすべて破棄され`CommitError::Conflict`）：
/// - 返却対象の貸出がまだ未返却であること
/// - 可用性の現在値が`expected`と一致すること
/// - 削除対象の予約がまだ存在すること
/// - 完了対象の支払がまだ未払いであること
/// - 解消対象の保留がまだ存在し、新規保留のコピーには保留がないこと
#[derive(Debug, Clone, Default)]
pub struct CirculationChangeset {
    pub returned_borrows: Vec<ReturnedBorrow>,
    pub availability: Vec<AvailabilityChange>,
    pub new_borrows: Vec<OpenBorrow>,
    pub new_payments: Vec<Payment>,
    pub removed_reservations: Vec<ReservationId>,
    pub new_reservations: Vec<Reservation>,
    pub settled_payments: Vec<PaymentId>,
    pub cleared_pending: Vec<CopyId>,
    pub new_pending: Vec<PendingFulfillment>,
    pub events: Vec<DomainEvent>,
}

impl CirculationChangeset {
    pub fn is_empty(&self) -> bool {
        self.returned_borrows.is_empty()
            && self.availability.is_empty()
            && self.new_borrows.is_empty()
            && self.new_payments.is_empty()
            && self.removed_reservations.is_empty()
            && self.new_reservations.is_empty()
            && self.settled_payments.is_empty()
            && self.cleared_pending.is_empty()
            && self.new_pending.is_empty()
            && self.events.is_empty()
    }
}

/// 貸出ストアポート
///
/// 貸出・予約・支払の唯一の正となるストア。
/// すべての状態遷移は`commit`により原子的かつ分離された単位で反映される。
/// 部分的に適用された状態は他の読み取りから観測されてはならない。
#[async_trait]
pub trait CirculationStore: Send + Sync {
    /// IDで貸出を取得する
    async fn get_borrow(&self, borrow_id: BorrowId) -> Result<Option<Borrow>>;

    /// 会員の未返却の貸出を取得する
    ///
    /// 延滞ゲートの確認に使用される。
    async fn open_borrows_for_member(&self, member_id: MemberId) -> Result<Vec<OpenBorrow>>;

    /// 会員の全貸出（履歴）を貸出日の新しい順で取得する
    async fn borrows_for_member(&self, member_id: MemberId) -> Result<Vec<Borrow>>;

    /// 返却予定日時が`now`より前の未返却の貸出を返却予定日の古い順で取得する
    async fn overdue_borrows(&self, now: DateTime<Utc>) -> Result<Vec<OpenBorrow>>;

    /// 書籍の予約キューをキュー順（予約日時昇順、同時刻は登録順）で取得する
    async fn reservations_for_book(&self, book_id: BookId) -> Result<Vec<Reservation>>;

    /// 貸出に紐づく支払を取得する
    async fn payment_for_borrow(&self, borrow_id: BorrowId) -> Result<Option<Payment>>;

    /// IDで支払を取得する
    async fn get_payment(&self, payment_id: PaymentId) -> Result<Option<Payment>>;

    /// 会員の貸出に紐づく全支払を取得する
    async fn payments_for_member(&self, member_id: MemberId) -> Result<Vec<Payment>>;

    /// 貸出に関する監査イベントを発生順で取得する
    async fn events_for_borrow(&self, borrow_id: BorrowId) -> Result<Vec<DomainEvent>>;

    /// 保留中の予約充足を保留日時の古い順で取得する
    async fn pending_fulfillments(&self) -> Result<Vec<PendingFulfillment>>;

    /// コピーに対する保留中の予約充足を取得する
    async fn pending_fulfillment_for_copy(
        &self,
        copy_id: CopyId,
    ) -> Result<Option<PendingFulfillment>>;

    /// 変更の集合を1トランザクションで反映する
    async fn commit(&self, changeset: CirculationChangeset)
    -> std::result::Result<(), CommitError>;
}
