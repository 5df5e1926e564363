// Port Layer - Interfaces for external dependencies

pub mod id_provider; // For deterministic testing
pub mod node_registry;
pub mod queue_broker;
pub mod result_sink;
pub mod scanner;
pub mod time_provider;

// Re-exports
pub use id_provider::IdProvider;
pub use node_registry::NodeRegistry;
pub use queue_broker::QueueBroker;
pub use result_sink::ResultSink;
pub use scanner::{ScanError, ScanVerdict, Scanner};
pub use time_provider::TimeProvider;
