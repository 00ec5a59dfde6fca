pub mod error;
pub mod image_name;
pub mod model;
pub mod retry;
pub mod tracing_init;

pub use error::{Error, ErrorKind, Result};

/// The container port every deployment's image is expected to expose.
/// Spec is silent on per-deployment port configuration; this workspace
/// resolves that open question by standardising on one exposed port per
/// VM, matching the `vms.port` column's single-port shape.
pub const DEFAULT_CONTAINER_PORT: i32 = 8080;
