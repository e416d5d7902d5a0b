//! 任务存储后端实现：进程内存储与SQLite持久化存储

pub mod memory;
pub mod sqlite;

pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;
