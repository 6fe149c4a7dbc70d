pub mod auth_service;
pub mod cli;
pub mod config;
pub mod credential_store;
pub mod dispatch;
pub mod errors;
pub mod guards;
pub mod logger;
pub mod models;
pub mod token_storage;

pub use auth_service::AuthService;
pub use credential_store::{CredentialStore, MemoryCredentialStore, PersistentCredentialStore};
pub use dispatch::{
    ApiRequest, ApiResponse, Dispatcher, RenewalPhase, ReqwestTransport, SessionEvent, Transport,
};
pub use errors::{AppError, AuthError, DispatchError, RenewalError};
pub use guards::GuardDecision;
pub use models::{Session, User};
