use crate::domain::EmployeeId;
use crate::ports::librarian_directory::{LibrarianDirectory, Result};
use async_trait::async_trait;

use super::InMemoryLibrary;

#[async_trait]
impl LibrarianDirectory for InMemoryLibrary {
    /// 有効な司書をID昇順で返す
    async fn valid_employee_ids(&self) -> Result<Vec<EmployeeId>> {
        if self.lock_faults().directory_unavailable {
            return Err("librarian directory unavailable".into());
        }
        Ok(self.lock_state().librarians.iter().copied().collect())
    }
}
