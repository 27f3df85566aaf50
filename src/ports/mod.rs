pub mod catalog_store;
pub mod circulation_store;
pub mod librarian_directory;
pub mod member_store;

pub use catalog_store::CatalogStore;
pub use circulation_store::{CirculationChangeset, CirculationStore, CommitError};
pub use librarian_directory::LibrarianDirectory;
pub use member_store::MemberStore;
