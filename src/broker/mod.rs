pub mod local;

pub use local::{LocalBroker, LocalBus};
