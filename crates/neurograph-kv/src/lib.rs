pub mod backend;
pub mod batch;
pub mod changelog;
pub mod disk;
pub mod keys;
pub mod lock;
pub mod memory;
pub mod object;
pub mod stats;
pub mod store;

pub use backend::{list_all, KvBackend, ListPage};
pub use changelog::ChangeLog;
pub use disk::DiskBackend;
pub use lock::{DistributedLock, LockGuard};
pub use memory::MemoryBackend;
pub use object::ObjectBackend;
pub use stats::{StatisticsTracker, STATISTICS_LOCK};
pub use store::KvStore;
