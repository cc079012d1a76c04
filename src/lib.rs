// ============================================================================
// capstan: composable microservice runtime
// ============================================================================

pub mod authn;
pub mod broker;
pub mod configuration;
pub mod core;
pub mod interfaces;
pub mod processor;
pub mod registry;
pub mod runtime;
pub mod store;
pub mod transport;
pub mod vault;

pub use core::{BuildError, Logger, Result, RuntimeError};
pub use interfaces::{
    AuthN, Broker, Configuration, HandlerFn, Message, MessageHandler, Middleware, Next,
    Processor, Registry, Request, Response, Service, ServiceInfo, Store, Transport, handler,
    message_handler,
};

pub use authn::{LocalFileAuthN, PasswordHasher, UserRecord, VaultAuthN};
pub use broker::{LocalBroker, LocalBus};
pub use configuration::JsonConfiguration;
pub use processor::{EchoProcessor, ProcessorRegistry};
pub use registry::ConsulRegistry;
pub use runtime::{BuildContext, Runtime, RuntimeBuilder, RuntimeState, ShutdownHandle};
pub use store::VaultStore;
pub use transport::{Dialer, PortNegotiator, RequestMetrics, Rest, TlsFiles};
pub use vault::VaultConfig;
