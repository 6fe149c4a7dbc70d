//! Authenticated request dispatch with single-flight token renewal.

pub mod dispatcher;
pub mod events;
mod renewal;
pub mod request;
pub mod transport;

pub use dispatcher::Dispatcher;
pub use events::SessionEvent;
pub use renewal::RenewalPhase;
pub use request::{ApiRequest, ApiResponse};
pub use transport::{ReqwestTransport, Transport};

#[cfg(test)]
pub(crate) mod testing;
