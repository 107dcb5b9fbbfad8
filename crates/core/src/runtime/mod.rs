mod service;
mod shutdown;

pub use service::{Dependencies, Service};
pub use shutdown::ShutdownGuard;
