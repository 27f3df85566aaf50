use crate::domain::{self, DomainEvent, Payment, commands::MarkPaid};
use crate::ports::*;

use super::circulation_service::ServiceDependencies;
use super::errors::{CirculationError, Result};
use super::retry::retry_on_conflict;

/// 支払を完了にする
///
/// ビジネスルール：
/// - 支払が存在すること
/// - 未払い → 支払済み の一方向のみ（取り消し操作はない）
/// - 既に支払済みなら何もせず現在の支払を返す
pub async fn mark_paid(deps: &ServiceDependencies, cmd: MarkPaid) -> Result<Payment> {
    let cmd = &cmd;
    retry_on_conflict(&deps.policy.retry, "mark_paid", || try_mark_paid(deps, cmd)).await
}

async fn try_mark_paid(deps: &ServiceDependencies, cmd: &MarkPaid) -> Result<Payment> {
    let payment = deps
        .circulation_store
        .get_payment(cmd.payment_id)
        .await
        .map_err(CirculationError::StoreError)?
        .ok_or_else(|| CirculationError::NotFound(format!("Payment {}", cmd.payment_id)))?;

    let (paid, event) = domain::payment::mark_paid(payment, cmd.settled_at);

    if let Some(event) = event {
        let changeset = CirculationChangeset {
            settled_payments: vec![paid.payment_id],
            events: vec![DomainEvent::PaymentSettled(event)],
            ..Default::default()
        };
        deps.circulation_store.commit(changeset).await?;

        tracing::info!(
            payment_id = %paid.payment_id,
            total = %paid.total_amount,
            "payment settled"
        );
    }

    Ok(paid)
}
