use crate::domain::value_objects::EmployeeId;
use async_trait::async_trait;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// 司書名簿ポート
///
/// 予約の自動充足で貸出担当者を割り当てるために使用される。
/// どのIDを選ぶかはドメインのポリシー（`pick_fulfillment_employee`）が決める。
#[async_trait]
pub trait LibrarianDirectory: Send + Sync {
    /// 現在有効な職員IDの一覧
    async fn valid_employee_ids(&self) -> Result<Vec<EmployeeId>>;
}
