pub mod account;
pub mod credentials;
pub mod email;
pub mod error;
pub mod lifecycle;
pub mod mailer;
pub mod models;
pub mod password;
pub mod refresh;
pub mod repository;
pub mod session;
pub mod token;

pub use account::{Account, RefreshToken, Role, TokenState};
pub use error::{AuthError, RepositoryError, RepositoryResult, TokenError};
pub use lifecycle::{AccountService, LifecyclePolicy, RegisterOutcome};
pub use mailer::{Mailer, MemoryMailer};
pub use refresh::RefreshTokenStore;
pub use repository::{AccountRepository, InMemoryAccountRepository};
pub use session::{Session, SessionManager};
pub use token::{AccessClaims, TokenCodec};
