use super::{Runtime, ShutdownHandle};
use crate::authn::LocalFileAuthN;
use crate::broker::LocalBroker;
use crate::configuration::JsonConfiguration;
use crate::core::{BuildError, Logger, Result, RuntimeError};
use crate::interfaces::{
    AuthN, Broker, Configuration, HandlerFn, Middleware, Processor, Registry, ServiceInfo, Store,
    Transport,
};
use crate::processor::ProcessorRegistry;
use crate::registry::ConsulRegistry;
use crate::transport::Rest;
use http::Method;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

pub const DEFAULT_NAME: &str = "default";

/// What a deferred backend constructor gets to look at.
pub struct BuildContext<'a> {
    pub service: &'a ServiceInfo,
    pub logger: &'a Logger,
    pub configuration: Option<&'a dyn Configuration>,
}

impl BuildContext<'_> {
    fn string_or(&self, key: &str, default: &str) -> String {
        self.configuration
            .map(|c| c.get_string_or_default(key, default))
            .unwrap_or_else(|| default.to_string())
    }

    fn int_or(&self, key: &str, default: i64) -> i64 {
        self.configuration
            .map(|c| c.get_int_or_default(key, default))
            .unwrap_or(default)
    }

    fn bool_or(&self, key: &str, default: bool) -> bool {
        self.configuration
            .map(|c| c.get_bool_or_default(key, default))
            .unwrap_or(default)
    }
}

type Factory<T> = Box<dyn FnOnce(&BuildContext<'_>) -> Result<T>>;
type Slot<T> = Option<Factory<T>>;

fn ready<T: 'static>(value: T) -> Factory<T> {
    Box::new(move |_: &BuildContext<'_>| -> Result<T> { Ok(value) })
}

enum Wiring {
    Handler(Method, String, HandlerFn),
    Middleware(Arc<dyn Middleware>),
    StaticFiles(String, PathBuf),
}

/// Collects capabilities and settings, then assembles a [`Runtime`].
///
/// Settings are validated as they are recorded; backends are constructed in
/// [`RuntimeBuilder::build`], configuration first so the other defaults can
/// read it. Installing a capability twice keeps the last one.
pub struct RuntimeBuilder {
    id: String,
    name: String,
    config_paths: Vec<PathBuf>,
    configuration: Slot<Box<dyn Configuration>>,
    registry: Slot<Box<dyn Registry>>,
    transport: Slot<Box<dyn Transport>>,
    broker: Slot<Box<dyn Broker>>,
    store: Slot<Box<dyn Store>>,
    authn: Slot<Arc<dyn AuthN>>,
    processor: Slot<Box<dyn Processor>>,
    wiring: Vec<Wiring>,
    errors: Vec<RuntimeError>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: DEFAULT_NAME.to_string(),
            config_paths: Vec::new(),
            configuration: None,
            registry: None,
            transport: None,
            broker: None,
            store: None,
            authn: None,
            processor: None,
            wiring: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn reject(mut self, err: RuntimeError) -> Self {
        self.errors.push(err);
        self
    }

    pub fn id(mut self, id: &str) -> Self {
        if id.is_empty() {
            return self.reject(RuntimeError::InvalidInput("id cannot be empty".into()));
        }
        self.id = id.to_string();
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        if name.is_empty() {
            return self.reject(RuntimeError::InvalidInput("name cannot be empty".into()));
        }
        self.name = name.to_string();
        self
    }

    pub fn registry(mut self, registry: impl Registry + 'static) -> Self {
        self.registry = Some(ready(Box::new(registry) as Box<dyn Registry>));
        self
    }

    /// Consul agent at `registry.address`, announcing this service.
    pub fn default_registry(mut self) -> Self {
        self.registry = Some(Box::new(|ctx: &BuildContext<'_>| -> Result<Box<dyn Registry>> {
            let address = ctx.string_or("registry.address", crate::registry::consul::DEFAULT_AGENT_ADDRESS);
            let registry = ConsulRegistry::new()
                .with_id(&ctx.service.id)?
                .with_name(&ctx.service.name)?
                .with_address(&address)?
                .with_health_endpoint(crate::transport::rest::HEALTHCHECK_ROUTE)?
                .with_logger(ctx.logger);
            Ok(Box::new(registry) as Box<dyn Registry>)
        }));
        self
    }

    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(ready(Box::new(transport) as Box<dyn Transport>));
        self
    }

    /// Transport built during `build`, once the service logger exists.
    pub fn transport_with<T, F>(mut self, factory: F) -> Self
    where
        T: Transport + 'static,
        F: FnOnce(&BuildContext<'_>) -> Result<T> + 'static,
    {
        self.transport = Some(Box::new(move |ctx: &BuildContext<'_>| -> Result<Box<dyn Transport>> {
            Ok(Box::new(factory(ctx)?) as Box<dyn Transport>)
        }));
        self
    }

    /// REST transport negotiating from `transport.port`. Setting both
    /// `transport.tls.cert` and `transport.tls.key` serves HTTPS;
    /// `transport.metrics` turns the request counters off.
    pub fn default_transport(mut self) -> Self {
        self.transport = Some(Box::new(|ctx: &BuildContext<'_>| -> Result<Box<dyn Transport>> {
            let port = ctx.int_or("transport.port", i64::from(crate::transport::rest::DEFAULT_PORT));
            let port = u16::try_from(port).map_err(|_| {
                RuntimeError::Configuration(format!("transport.port {} is out of range", port))
            })?;
            let mut rest = Rest::new()
                .name(&ctx.service.name)
                .with_port(port)
                .with_metrics(ctx.bool_or("transport.metrics", true))
                .with_logger(ctx.logger);
            let cert = ctx.string_or("transport.tls.cert", "");
            let key = ctx.string_or("transport.tls.key", "");
            match (cert.is_empty(), key.is_empty()) {
                (false, false) => rest = rest.with_tls(cert, key),
                (true, true) => {}
                _ => {
                    return Err(RuntimeError::Configuration(
                        "transport.tls.cert and transport.tls.key must be set together".into(),
                    ));
                }
            }
            Ok(Box::new(rest) as Box<dyn Transport>)
        }));
        self
    }

    pub fn broker(mut self, broker: impl Broker + 'static) -> Self {
        self.broker = Some(ready(Box::new(broker) as Box<dyn Broker>));
        self
    }

    /// In-process broker on the bus named by `broker.endpoint`.
    pub fn default_broker(mut self) -> Self {
        self.broker = Some(Box::new(|ctx: &BuildContext<'_>| -> Result<Box<dyn Broker>> {
            let endpoint = ctx.string_or("broker.endpoint", crate::broker::local::DEFAULT_ENDPOINT);
            let broker = LocalBroker::new()
                .with_endpoint(&endpoint)?
                .with_logger(ctx.logger);
            Ok(Box::new(broker) as Box<dyn Broker>)
        }));
        self
    }

    /// Any configuration source; it is opened during `build`.
    pub fn configuration(mut self, configuration: impl Configuration + 'static) -> Self {
        self.configuration = Some(ready(Box::new(configuration) as Box<dyn Configuration>));
        self
    }

    /// `<name>.json` from the standard search path.
    pub fn default_configuration(mut self) -> Self {
        self.configuration = Some(Box::new(|ctx: &BuildContext<'_>| -> Result<Box<dyn Configuration>> {
            let configuration = JsonConfiguration::new(&ctx.service.name)?;
            Ok(Box::new(configuration) as Box<dyn Configuration>)
        }));
        self
    }

    /// `<name>.json` from the working directory only.
    pub fn local_configuration(mut self) -> Self {
        self.configuration = Some(Box::new(|ctx: &BuildContext<'_>| -> Result<Box<dyn Configuration>> {
            let configuration = JsonConfiguration::new(&ctx.service.name)?.local_only();
            Ok(Box::new(configuration) as Box<dyn Configuration>)
        }));
        self
    }

    /// Extra directories searched when the configuration is opened.
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_paths.push(path.into());
        self
    }

    pub fn store(mut self, store: impl Store + 'static) -> Self {
        self.store = Some(ready(Box::new(store) as Box<dyn Store>));
        self
    }

    pub fn authn(mut self, authn: impl AuthN + 'static) -> Self {
        self.authn = Some(ready(Arc::new(authn) as Arc<dyn AuthN>));
        self
    }

    /// Local-file credential store in `folder`.
    pub fn default_authn(mut self, folder: impl Into<PathBuf>) -> Self {
        let folder = folder.into();
        if folder.as_os_str().is_empty() {
            return self.reject(RuntimeError::InvalidInput("folder cannot be empty".into()));
        }
        self.authn = Some(Box::new(move |ctx: &BuildContext<'_>| -> Result<Arc<dyn AuthN>> {
            let authn = LocalFileAuthN::new()
                .with_folder(folder)?
                .with_logger(ctx.logger);
            Ok(Arc::new(authn) as Arc<dyn AuthN>)
        }));
        self
    }

    pub fn processor(mut self, processor: impl Processor + 'static) -> Self {
        self.processor = Some(ready(Box::new(processor) as Box<dyn Processor>));
        self
    }

    /// Processor `name` from `table`.
    pub fn plugin(mut self, table: &ProcessorRegistry, name: &str) -> Self {
        if name.is_empty() {
            return self.reject(RuntimeError::InvalidInput("plugin name cannot be empty".into()));
        }
        if !table.contains(name) {
            return self.reject(RuntimeError::InvalidInput(format!("unknown plugin '{}'", name)));
        }
        let (table, name) = (table.clone(), name.to_string());
        self.processor = Some(Box::new(move |ctx: &BuildContext<'_>| table.create(&name, ctx.logger)));
        self
    }

    pub fn handler(mut self, method: Method, path: &str, handler: HandlerFn) -> Self {
        self.wiring.push(Wiring::Handler(method, path.to_string(), handler));
        self
    }

    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.wiring.push(Wiring::Middleware(middleware));
        self
    }

    pub fn static_files_folder(mut self, route_prefix: &str, folder: impl Into<PathBuf>) -> Self {
        self.wiring.push(Wiring::StaticFiles(route_prefix.to_string(), folder.into()));
        self
    }

    /// Configuration, registry, broker and transport with their default backends.
    pub fn with_defaults(self) -> Self {
        self.default_configuration()
            .default_registry()
            .default_broker()
            .default_transport()
    }

    pub fn build(self) -> std::result::Result<Runtime, BuildError> {
        if !self.errors.is_empty() {
            return Err(BuildError::new(self.errors));
        }
        self.assemble().map_err(|err| BuildError::new(vec![err]))
    }

    fn assemble(self) -> Result<Runtime> {
        let service = ServiceInfo::new(self.id, self.name);
        let mut logger = Logger::new(&service.id, &service.name);

        let configuration = match self.configuration {
            Some(factory) => {
                let ctx = BuildContext {
                    service: &service,
                    logger: &logger,
                    configuration: None,
                };
                let mut configuration = factory(&ctx)?;
                configuration.open(&self.config_paths)?;
                logger = logger.with_level_name(&configuration.get_string_or_default("log.level", "info"));
                Some(configuration)
            }
            None => None,
        };

        let ctx = BuildContext {
            service: &service,
            logger: &logger,
            configuration: configuration.as_deref(),
        };
        let mut registry = self.registry.map(|f| f(&ctx)).transpose()?;
        let mut transport = self.transport.map(|f| f(&ctx)).transpose()?;
        let broker = self.broker.map(|f| f(&ctx)).transpose()?;
        let store = self.store.map(|f| f(&ctx)).transpose()?;
        let authn = self.authn.map(|f| f(&ctx)).transpose()?;
        let mut processor = self.processor.map(|f| f(&ctx)).transpose()?;

        if let (Some(registry), Some(transport)) = (registry.as_mut(), transport.as_ref()) {
            let port = transport.port();
            if port != 0 {
                registry.set_port(port)?;
            }
        }
        if let Some(processor) = processor.as_mut() {
            processor.init(&service)?;
        }

        if !self.wiring.is_empty() {
            let transport = transport
                .as_mut()
                .ok_or(RuntimeError::MissingCapability("transport"))?;
            for wiring in self.wiring {
                match wiring {
                    Wiring::Handler(method, path, handler) => transport.handler(method, &path, handler)?,
                    Wiring::Middleware(middleware) => transport.middleware(middleware)?,
                    Wiring::StaticFiles(prefix, folder) => transport.static_files_folder(&prefix, folder)?,
                }
            }
        }

        logger.debug(format!("runtime '{}' assembled", service.name));
        Ok(Runtime {
            service,
            logger,
            state: super::RuntimeState::Assembling,
            configuration,
            registry,
            transport,
            broker,
            store,
            authn,
            processor,
            hooks: Vec::new(),
            shutdown: ShutdownHandle::new(),
        })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
