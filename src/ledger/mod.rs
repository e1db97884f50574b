// Durable removal ledger and its file backups
pub mod backup;
pub mod models;
pub mod repository;

pub use backup::BackupManager;
pub use repository::LedgerRepository;
