mod in_memory;
mod pgmq;

pub use in_memory::InMemoryMessagingService;
pub use pgmq::PgmqMessagingService;
