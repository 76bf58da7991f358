pub mod admission;
pub mod buffer;
pub mod coalescer;
pub mod retry;

pub use admission::AdmissionController;
pub use buffer::WriteBuffer;
pub use coalescer::ReadCoalescer;
pub use retry::{backoff_delay, with_retry};
