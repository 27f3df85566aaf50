pub mod catalog_store;
pub mod circulation_store;
pub mod librarian_directory;
pub mod member_store;

// パブリックに型を再エクスポート
pub use catalog_store::CatalogStore as PostgresCatalogStore;
pub use circulation_store::CirculationStore as PostgresCirculationStore;
pub use librarian_directory::LibrarianDirectory as PostgresLibrarianDirectory;
pub use member_store::MemberStore as PostgresMemberStore;
