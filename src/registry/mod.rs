pub mod consul;

pub use consul::ConsulRegistry;
