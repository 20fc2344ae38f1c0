pub mod engine;
pub mod error;
pub mod queue;

pub use engine::CommandEngine;
pub use error::BrokerError;
pub use queue::QueueStore;
