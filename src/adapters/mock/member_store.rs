use crate::domain::MemberId;
use crate::ports::member_store::{MemberStore, Result};
use async_trait::async_trait;

use super::InMemoryLibrary;

#[async_trait]
impl MemberStore for InMemoryLibrary {
    async fn exists(&self, member_id: MemberId) -> Result<bool> {
        Ok(self.lock_state().members.contains(&member_id))
    }
}
