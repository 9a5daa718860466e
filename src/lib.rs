pub mod browser;
pub mod clock;
pub mod config;
pub mod cookies;
pub mod detect;
pub mod duration;
pub mod error;
pub mod interact;
pub mod login;
pub mod totp;

pub use config::Config;
pub use cookies::{Cookie, CookieInput, CookiesFile};
pub use detect::{AuthEvaluation, AuthSignal, AuthState, Detector};
pub use error::{LoginError, Result};
pub use login::{AuthResult, Authenticator, LoginRequest};
