use super::metrics::{self, METRICS_ROUTE, RequestMetrics};
use super::port::PortNegotiator;
use super::tls::{self, TlsFiles};
use crate::core::{Logger, Result, RuntimeError};
use crate::interfaces::{HandlerFn, Middleware, Next, Request, Response, Transport};
use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{Path, Query};
use axum::middleware::from_fn_with_state;
use axum::response::IntoResponse;
use axum::routing::{MethodFilter, MethodRouter, get, on};
use http::{HeaderMap, Method, Uri};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
pub const HEALTHCHECK_ROUTE: &str = "/healthcheck";
const RESERVED_ROUTES: [&str; 2] = [HEALTHCHECK_ROUTE, METRICS_ROUTE];
// catch-all axum appends to every nested service
const NEST_TAIL_PARAM: &str = "__private__axum_nest_tail_param";

impl IntoResponse for Response {
    fn into_response(self) -> axum::response::Response {
        let mut response = axum::response::Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

struct Route {
    method: Method,
    filter: MethodFilter,
    endpoint: HandlerFn,
}

struct Running {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

/// HTTP transport on axum.
///
/// Routes, middleware and static folders are collected while assembling and
/// frozen into a router when [`Transport::run`] is called.
pub struct Rest {
    name: String,
    host: String,
    port: u16,
    shutdown_timeout: Duration,
    negotiator: PortNegotiator,
    routes: BTreeMap<String, Vec<Route>>,
    middleware: Vec<Arc<dyn Middleware>>,
    static_folders: BTreeMap<String, PathBuf>,
    tls: Option<TlsFiles>,
    metrics: Option<Arc<RequestMetrics>>,
    running: Option<Running>,
    logger: Logger,
}

impl Rest {
    pub fn new() -> Self {
        Self {
            name: "default".to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            negotiator: PortNegotiator::new(),
            routes: BTreeMap::new(),
            middleware: Vec::new(),
            static_folders: BTreeMap::new(),
            tls: None,
            metrics: Some(Arc::new(RequestMetrics::new())),
            running: None,
            logger: Logger::detached(),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    /// Port to start negotiating from; `0` lets the OS pick.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    pub fn negotiator(mut self, negotiator: PortNegotiator) -> Self {
        self.negotiator = negotiator;
        self
    }

    /// Serves HTTPS with the given PEM certificate chain and private key.
    pub fn with_tls(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.tls = Some(TlsFiles::new(cert, key));
        self
    }

    /// Request counters on `GET /metrics`; on by default.
    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics = enabled.then(|| Arc::new(RequestMetrics::new()));
        self
    }

    pub fn metrics(&self) -> Option<Arc<RequestMetrics>> {
        self.metrics.clone()
    }

    pub fn scheme(&self) -> &'static str {
        if self.tls.is_some() { "https" } else { "http" }
    }

    pub fn with_logger(mut self, logger: &Logger) -> Self {
        self.logger = logger.component("transport.rest");
        self.negotiator = self.negotiator.with_logger(&self.logger);
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    fn ensure_assembling(&self) -> Result<()> {
        if self.running.is_some() {
            return Err(RuntimeError::InvalidState(
                "routes are frozen once the server is running".into(),
            ));
        }
        Ok(())
    }

    /// Assembles the axum router from everything registered so far.
    pub fn router(&self) -> Router {
        let chain: Arc<[Arc<dyn Middleware>]> = self.middleware.clone().into();

        let health = format!("{} service is good", self.name);
        let mut router = Router::new().route(
            HEALTHCHECK_ROUTE,
            get(move || {
                let health = health.clone();
                async move { health }
            }),
        );

        for (path, routes) in &self.routes {
            let mut methods: Option<MethodRouter> = None;
            for route in routes {
                let next = Next::new(chain.clone(), route.endpoint.clone());
                let endpoint = endpoint_route(route.filter, has_params(path), next);
                methods = Some(match methods {
                    Some(existing) => existing.merge(endpoint),
                    None => endpoint,
                });
                self.logger.debug(format!("route {} {}", route.method, path));
            }
            if let Some(methods) = methods {
                router = router.route(path, methods);
            }
        }

        for (prefix, folder) in &self.static_folders {
            let service = ServeDir::new(folder);
            router = if prefix == "/" {
                router.fallback_service(service)
            } else {
                router.nest_service(prefix, service)
            };
        }

        if let Some(recorder) = &self.metrics {
            let exported = recorder.clone();
            router = router
                .route(
                    METRICS_ROUTE,
                    get(move || {
                        let exported = exported.clone();
                        async move { exported.render() }
                    }),
                )
                .layer(from_fn_with_state(recorder.clone(), metrics::track));
        }

        router.layer(TraceLayer::new_for_http())
    }

    fn check_route_conflicts(&self, path: &str, segments: &[Segment<'_>]) -> Result<()> {
        for existing in self.routes.keys().filter(|existing| existing.as_str() != path) {
            if routes_conflict(segments, &parse_route(existing)?) {
                return Err(RuntimeError::InvalidInput(format!(
                    "route '{}' conflicts with route '{}'",
                    path, existing
                )));
            }
        }
        for prefix in self.static_folders.keys().filter(|prefix| prefix.as_str() != "/") {
            if nested_conflict(prefix, path, segments)? {
                return Err(RuntimeError::InvalidInput(format!(
                    "route '{}' overlaps static folder '{}'",
                    path, prefix
                )));
            }
        }
        Ok(())
    }
}

impl Default for Rest {
    fn default() -> Self {
        Self::new()
    }
}

fn has_params(path: &str) -> bool {
    path.split('/').any(|segment| segment.starts_with(':') || segment.starts_with('*'))
}

fn method_filter(method: &Method) -> Result<MethodFilter> {
    match *method {
        Method::GET => Ok(MethodFilter::GET),
        Method::POST => Ok(MethodFilter::POST),
        Method::PUT => Ok(MethodFilter::PUT),
        Method::DELETE => Ok(MethodFilter::DELETE),
        _ => Err(RuntimeError::InvalidInput(format!(
            "unsupported method {}: possible methods are GET, POST, PUT, DELETE",
            method
        ))),
    }
}

fn validate_route(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(RuntimeError::InvalidInput(format!(
            "route '{}' must start with '/'",
            path
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Static(&'a str),
    Param(&'a str),
    CatchAll(&'a str),
}

fn parse_route(path: &str) -> Result<Vec<Segment<'_>>> {
    validate_route(path)?;
    let invalid = |reason: &str| {
        RuntimeError::InvalidInput(format!("route '{}' is invalid: {}", path, reason))
    };
    let raw: Vec<&str> = path[1..].split('/').collect();
    let last = raw.len() - 1;
    raw.into_iter()
        .enumerate()
        .map(|(index, segment)| {
            if let Some(name) = segment.strip_prefix(':') {
                if name.is_empty() || name.contains([':', '*']) {
                    return Err(invalid("parameters need a plain name"));
                }
                Ok(Segment::Param(name))
            } else if let Some(name) = segment.strip_prefix('*') {
                if name.is_empty() || name.contains([':', '*']) {
                    return Err(invalid("parameters need a plain name"));
                }
                if index != last {
                    return Err(invalid("a catch-all must be the last segment"));
                }
                Ok(Segment::CatchAll(name))
            } else if segment.contains([':', '*']) {
                Err(invalid("parameters must span a whole segment"))
            } else {
                Ok(Segment::Static(segment))
            }
        })
        .collect()
}

/// Whether axum's matcher refuses to hold both routes. Static segments may
/// overlap dynamic ones; two dynamic segments in one position must agree.
fn routes_conflict(a: &[Segment<'_>], b: &[Segment<'_>]) -> bool {
    for pair in a.iter().zip(b) {
        match pair {
            (Segment::Static(x), Segment::Static(y)) if x == y => {}
            (Segment::Param(x), Segment::Param(y)) if x == y => {}
            (Segment::CatchAll(x), Segment::CatchAll(y)) => return x != y,
            (Segment::Param(_), Segment::Param(_))
            | (Segment::Param(_), Segment::CatchAll(_))
            | (Segment::CatchAll(_), Segment::Param(_)) => return true,
            _ => return false,
        }
    }
    false
}

/// A static folder at `prefix` occupies `prefix`, `prefix/` and `prefix/*tail`.
fn nested_conflict(prefix: &str, path: &str, segments: &[Segment<'_>]) -> Result<bool> {
    if path == prefix || path.strip_prefix(prefix) == Some("/") {
        return Ok(true);
    }
    let mut nested = parse_route(prefix)?;
    nested.push(Segment::CatchAll(NEST_TAIL_PARAM));
    Ok(routes_conflict(segments, &nested))
}

fn normalize_prefix(prefix: &str) -> Result<String> {
    validate_route(prefix)?;
    if prefix.contains([':', '*']) {
        return Err(RuntimeError::InvalidInput(format!(
            "static prefix '{}' cannot contain parameters",
            prefix
        )));
    }
    let trimmed = prefix.trim_end_matches('/');
    Ok(if trimmed.is_empty() { "/".to_string() } else { trimmed.to_string() })
}

fn endpoint_route(filter: MethodFilter, with_params: bool, next: Next) -> MethodRouter {
    if with_params {
        on(
            filter,
            move |Path(params): Path<HashMap<String, String>>,
                  Query(query): Query<HashMap<String, String>>,
                  method: Method,
                  uri: Uri,
                  headers: HeaderMap,
                  body: Bytes| {
                let next = next.clone();
                async move {
                    let request = Request {
                        method,
                        path: uri.path().to_string(),
                        params,
                        query,
                        headers,
                        body,
                    };
                    next.run(request).await
                }
            },
        )
    } else {
        on(
            filter,
            move |Query(query): Query<HashMap<String, String>>,
                  method: Method,
                  uri: Uri,
                  headers: HeaderMap,
                  body: Bytes| {
                let next = next.clone();
                async move {
                    let request = Request {
                        method,
                        path: uri.path().to_string(),
                        params: HashMap::new(),
                        query,
                        headers,
                        body,
                    };
                    next.run(request).await
                }
            },
        )
    }
}

#[async_trait]
impl Transport for Rest {
    async fn run(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(RuntimeError::InvalidState("transport already running".into()));
        }

        let tls_config = match &self.tls {
            Some(files) => Some(files.server_config()?),
            None => None,
        };
        let router = self.router();
        let port = self.negotiator.negotiate(self.port).await?;
        let addr = format!("{}:{}", self.host, port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| RuntimeError::Transport(format!("Failed to bind {}: {}", addr, e)))?;
        self.port = listener.local_addr()?.port();

        let (shutdown, signal) = oneshot::channel::<()>();
        let logger = self.logger.clone();
        let task = match tls_config {
            Some(config) => tokio::spawn(async move {
                let result = tls::serve(listener, router, config, signal, logger.clone()).await;
                if let Err(err) = &result {
                    logger.error(format!("https server failed: {}", err));
                }
                result
            }),
            None => tokio::spawn(async move {
                let result = axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        let _ = signal.await;
                    })
                    .await;
                if let Err(err) = &result {
                    logger.error(format!("http server failed: {}", err));
                }
                result
            }),
        };

        self.running = Some(Running { shutdown, task });
        self.logger.info(format!(
            "{} server listening on {}:{}",
            self.scheme(),
            self.host,
            self.port
        ));
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let Running { shutdown, mut task } = self
            .running
            .take()
            .ok_or_else(|| RuntimeError::InvalidState("transport is not running".into()))?;

        let _ = shutdown.send(());
        match timeout(self.shutdown_timeout, &mut task).await {
            Ok(Ok(Ok(()))) => {
                self.logger.info("http server stopped");
                Ok(())
            }
            Ok(Ok(Err(err))) => Err(RuntimeError::Transport(err.to_string())),
            Ok(Err(err)) => Err(RuntimeError::Transport(format!("server task failed: {}", err))),
            Err(_) => {
                task.abort();
                self.logger.warn(format!(
                    "graceful shutdown exceeded {:?}, server aborted",
                    self.shutdown_timeout
                ));
                Ok(())
            }
        }
    }

    fn handler(&mut self, method: Method, path: &str, handler: HandlerFn) -> Result<()> {
        self.ensure_assembling()?;
        let filter = method_filter(&method)?;
        let segments = parse_route(path)?;
        if RESERVED_ROUTES.contains(&path) {
            return Err(RuntimeError::InvalidInput(format!("route '{}' is reserved", path)));
        }
        self.check_route_conflicts(path, &segments)?;

        let routes = self.routes.entry(path.to_string()).or_default();
        routes.retain(|route| route.method != method);
        routes.push(Route {
            method,
            filter,
            endpoint: handler,
        });
        Ok(())
    }

    fn middleware(&mut self, middleware: Arc<dyn Middleware>) -> Result<()> {
        self.ensure_assembling()?;
        self.middleware.push(middleware);
        Ok(())
    }

    fn static_files_folder(&mut self, route_prefix: &str, folder: PathBuf) -> Result<()> {
        self.ensure_assembling()?;
        let prefix = normalize_prefix(route_prefix)?;
        if folder.as_os_str().is_empty() {
            return Err(RuntimeError::InvalidInput("folder cannot be empty".into()));
        }
        if prefix != "/" {
            let taken = self.routes.keys().map(String::as_str).chain(RESERVED_ROUTES);
            for path in taken {
                if nested_conflict(&prefix, path, &parse_route(path)?)? {
                    return Err(RuntimeError::InvalidInput(format!(
                        "static folder '{}' overlaps route '{}'",
                        prefix, path
                    )));
                }
            }
        }
        self.static_folders.insert(prefix, folder);
        Ok(())
    }

    fn port(&self) -> u16 {
        self.port
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::handler;
    use http::StatusCode;
    use tower::ServiceExt;

    async fn call(router: Router, method: Method, uri: &str, body: &str) -> (StatusCode, String) {
        let request = http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    struct Tag(&'static str);

    #[async_trait]
    impl Middleware for Tag {
        async fn handle(&self, request: Request, next: Next) -> Response {
            let inner = next.run(request).await;
            Response::text(inner.status, format!("{}({})", self.0, inner.body_text()))
        }
    }

    #[tokio::test]
    async fn test_healthcheck_uses_service_name() {
        let rest = Rest::new().name("billing");
        let (status, body) = call(rest.router(), Method::GET, "/healthcheck", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "billing service is good");
    }

    #[tokio::test]
    async fn test_path_params_and_body_reach_handler() {
        let mut rest = Rest::new();
        rest.handler(
            Method::POST,
            "/echo/:name",
            handler(|req: Request| async move {
                let name = req.param("name").unwrap_or_default().to_string();
                Response::text(StatusCode::OK, format!("{}:{}", name, String::from_utf8_lossy(&req.body)))
            }),
        )
        .unwrap();

        let (status, body) = call(rest.router(), Method::POST, "/echo/alice", "hi").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "alice:hi");
    }

    #[tokio::test]
    async fn test_methods_share_a_path_and_last_writer_wins() {
        let mut rest = Rest::new();
        let reply = |text: &'static str| handler(move |_| async move { Response::text(StatusCode::OK, text) });
        rest.handler(Method::GET, "/items", reply("first")).unwrap();
        rest.handler(Method::GET, "/items", reply("second")).unwrap();
        rest.handler(Method::DELETE, "/items", reply("deleted")).unwrap();

        let router = rest.router();
        assert_eq!(call(router.clone(), Method::GET, "/items", "").await.1, "second");
        assert_eq!(call(router.clone(), Method::DELETE, "/items", "").await.1, "deleted");
        assert_eq!(
            call(router, Method::PUT, "/items", "").await.0,
            StatusCode::METHOD_NOT_ALLOWED
        );
    }

    #[tokio::test]
    async fn test_middleware_runs_in_registration_order() {
        let mut rest = Rest::new();
        rest.middleware(Arc::new(Tag("outer"))).unwrap();
        rest.middleware(Arc::new(Tag("inner"))).unwrap();
        rest.handler(
            Method::GET,
            "/ping",
            handler(|_| async { Response::text(StatusCode::OK, "pong") }),
        )
        .unwrap();

        let (_, body) = call(rest.router(), Method::GET, "/ping", "").await;
        assert_eq!(body, "outer(inner(pong))");
    }

    #[tokio::test]
    async fn test_static_folder_is_served() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("index.txt"), "static content").unwrap();

        let mut rest = Rest::new();
        rest.static_files_folder("/assets", dir.path().to_path_buf()).unwrap();
        let (status, body) = call(rest.router(), Method::GET, "/assets/index.txt", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "static content");
    }

    #[test]
    fn test_invalid_registrations_rejected() {
        let mut rest = Rest::new();
        let noop = handler(|_| async { Response::empty(StatusCode::OK) });
        assert!(rest.handler(Method::PATCH, "/x", noop.clone()).is_err());
        assert!(rest.handler(Method::GET, "x", noop.clone()).is_err());
        assert!(rest.handler(Method::GET, HEALTHCHECK_ROUTE, noop).is_err());
        assert!(rest.static_files_folder("assets", PathBuf::from("/tmp")).is_err());
        assert!(rest.static_files_folder("/assets", PathBuf::new()).is_err());
    }

    #[test]
    fn test_overlapping_routes_rejected() {
        let mut rest = Rest::new();
        let noop = handler(|_| async { Response::empty(StatusCode::OK) });
        rest.handler(Method::GET, "/users/:id", noop.clone()).unwrap();

        let err = rest
            .handler(Method::POST, "/users/:name", noop.clone())
            .unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidInput(ref m) if m.contains("/users/:id")));
        assert!(rest.handler(Method::GET, "/users/:name/posts", noop.clone()).is_err());
        assert!(rest.handler(Method::GET, "/users/*rest", noop.clone()).is_err());

        // same parameter name, static sibling and deeper routes are fine
        rest.handler(Method::DELETE, "/users/:id", noop.clone()).unwrap();
        rest.handler(Method::GET, "/users/me", noop.clone()).unwrap();
        rest.handler(Method::GET, "/users/:id/posts", noop.clone()).unwrap();

        assert!(rest.handler(Method::GET, "/files/*path/x", noop.clone()).is_err());
        assert!(rest.handler(Method::GET, "/files/:", noop.clone()).is_err());
        assert!(rest.handler(Method::GET, "/user_:name", noop).is_err());

        // the accepted set must assemble without panicking
        let _ = rest.router();
    }

    #[test]
    fn test_static_folder_conflicts_with_routes() {
        let dir = tempfile::TempDir::new().unwrap();
        let noop = handler(|_| async { Response::empty(StatusCode::OK) });

        let mut rest = Rest::new();
        rest.handler(Method::GET, "/assets/:name", noop.clone()).unwrap();
        assert!(rest.static_files_folder("/assets", dir.path().to_path_buf()).is_err());
        assert!(rest.static_files_folder("/healthcheck", dir.path().to_path_buf()).is_err());
        assert!(rest.static_files_folder("/files/:id", dir.path().to_path_buf()).is_err());

        let mut rest = Rest::new();
        rest.static_files_folder("/public/", dir.path().to_path_buf()).unwrap();
        assert!(rest.handler(Method::GET, "/public", noop.clone()).is_err());
        assert!(rest.handler(Method::GET, "/public/:file", noop.clone()).is_err());
        rest.handler(Method::GET, "/public/index", noop.clone()).unwrap();
        rest.handler(Method::GET, "/publications", noop).unwrap();
        let _ = rest.router();
    }

    #[tokio::test]
    async fn test_metrics_count_requests_per_route() {
        let mut rest = Rest::new();
        rest.handler(
            Method::GET,
            "/items/:id",
            handler(|_| async { Response::text(StatusCode::OK, "item") }),
        )
        .unwrap();
        let router = rest.router();
        call(router.clone(), Method::GET, "/items/1", "").await;
        call(router.clone(), Method::GET, "/items/2", "").await;
        call(router.clone(), Method::GET, "/nowhere", "").await;

        let metrics = rest.metrics().unwrap();
        assert_eq!(metrics.requests("GET", "/items/:id", 200), 2);

        let (status, body) = call(router, Method::GET, "/metrics", "").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("http_requests_total{code=\"200\",method=\"GET\",path=\"/items/:id\"} 2"));
        assert!(body.contains("path=\"unmatched\""));

        let noop = handler(|_| async { Response::empty(StatusCode::OK) });
        assert!(rest.handler(Method::GET, "/metrics", noop).is_err());
    }

    #[tokio::test]
    async fn test_metrics_can_be_disabled() {
        let rest = Rest::new().with_metrics(false);
        assert!(rest.metrics().is_none());
        let (status, _) = call(rest.router(), Method::GET, "/metrics", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stop_aborts_after_shutdown_timeout() {
        let entered = Arc::new(tokio::sync::Notify::new());
        let signal = entered.clone();
        let mut rest = Rest::new()
            .host("127.0.0.1")
            .with_port(0)
            .shutdown_timeout(Duration::from_millis(50));
        rest.handler(
            Method::GET,
            "/slow",
            handler(move |_| {
                let signal = signal.clone();
                async move {
                    signal.notify_one();
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Response::empty(StatusCode::OK)
                }
            }),
        )
        .unwrap();
        rest.run().await.unwrap();

        let url = format!("http://127.0.0.1:{}/slow", Transport::port(&rest));
        let pending = tokio::spawn(async move { reqwest::get(url).await });
        timeout(Duration::from_secs(5), entered.notified()).await.unwrap();

        let started = std::time::Instant::now();
        rest.stop().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!rest.is_running());
        pending.abort();
    }

    #[tokio::test]
    async fn test_unreadable_tls_files_fail_run() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut rest = Rest::new()
            .host("127.0.0.1")
            .with_port(0)
            .with_tls(dir.path().join("missing.pem"), dir.path().join("missing.key"));
        assert_eq!(rest.scheme(), "https");
        assert!(matches!(rest.run().await, Err(RuntimeError::Configuration(_))));
        assert!(!rest.is_running());
    }

    #[tokio::test]
    async fn test_run_stop_cycle() {
        let mut rest = Rest::new().host("127.0.0.1").with_port(0);
        assert!(matches!(rest.stop().await, Err(RuntimeError::InvalidState(_))));

        rest.run().await.unwrap();
        assert!(rest.is_running());
        assert_ne!(Transport::port(&rest), 0);

        let noop = handler(|_| async { Response::empty(StatusCode::OK) });
        assert!(matches!(
            rest.handler(Method::GET, "/late", noop),
            Err(RuntimeError::InvalidState(_))
        ));
        assert!(matches!(rest.run().await, Err(RuntimeError::InvalidState(_))));

        rest.stop().await.unwrap();
        assert!(!rest.is_running());
    }
}
