//! Gateway server implementation

mod dispatch;
pub mod exchange;
pub mod identity;
mod router;
mod server;

pub use dispatch::{Dispatcher, InvocationStage};
pub use exchange::{
    ExchangeGateway, ExchangeRequest, ScopedCredential, TokenExchanger, WorkspaceTokenExchanger,
    extract_bearer, token_fingerprint,
};
pub use identity::{
    CallerContext, IdentityProvider, IdentityState, UserInfo, WorkspaceIdentityProvider,
    identity_middleware, resolve_caller,
};
pub use router::{AppState, SERVER_NAME, create_router};
pub use server::Gateway;
