//! collector-common - the ambient stack shared by every service binary:
//! logging setup, layered configuration loading, and graceful shutdown.

pub mod config_loader;
pub mod logging;
pub mod shutdown;
