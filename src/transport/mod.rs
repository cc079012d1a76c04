pub mod metrics;
pub mod port;
pub mod rest;
pub mod tls;

pub use metrics::RequestMetrics;
pub use port::{Dialer, PortNegotiator};
pub use rest::Rest;
pub use tls::TlsFiles;
