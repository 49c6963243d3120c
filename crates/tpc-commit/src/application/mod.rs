//! Application layer: the node registry and coordinator.

pub mod node;

pub use node::Node;
