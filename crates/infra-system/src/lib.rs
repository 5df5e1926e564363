// Rangescan Infrastructure - System Adapters
// Implements: Scanner (HTTP, subprocess), host identity

pub mod command_scanner;
pub mod http_scanner;
pub mod node_identity;

pub use command_scanner::CommandScanner;
pub use http_scanner::HttpScanner;
pub use node_identity::default_node_id;
