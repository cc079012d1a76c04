//! Capability contracts.
//!
//! Each capability slot of the runtime holds one trait object implementing
//! one of these traits. The runtime only ever talks to backends through them.

pub mod authn;
pub mod broker;
pub mod configuration;
pub mod processor;
pub mod registry;
pub mod service;
pub mod store;
pub mod transport;

pub use authn::AuthN;
pub use broker::{Broker, Message, MessageHandler, message_handler};
pub use configuration::Configuration;
pub use processor::Processor;
pub use registry::Registry;
pub use service::{Service, ServiceInfo};
pub use store::Store;
pub use transport::{HandlerFn, Middleware, Next, Request, Response, Transport, handler};
