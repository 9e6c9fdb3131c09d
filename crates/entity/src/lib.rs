pub mod account;
pub mod account_role;
pub mod refresh_token;

pub use account::Entity as Account;
pub use account_role::Entity as AccountRole;
pub use refresh_token::Entity as RefreshToken;
