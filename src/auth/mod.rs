//! Authentication: credentials, the identity endpoint exchange, and the
//! session lifecycle state machine.

mod provider;
mod session;
mod token;

pub use provider::{HttpIdentityProvider, IdentityProvider};
pub use session::{AuthSession, SessionEvent};
pub use token::Credential;
