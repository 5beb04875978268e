pub mod actor;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod session;

pub use registry::{ConnectionHandle, ConnectionRegistry};
pub use router::{MessageRouter, RouteOutcome};
pub use session::Session;

/// Username of a verified user. The only key used by the registry and router.
pub type Identity = String;
