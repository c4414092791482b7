//! Identity provider access
//!
//! The [`IdentityProvider`] trait is the seam the session store talks to;
//! [`GoTrueClient`] is the HTTP implementation.

mod error;
mod gotrue;
mod pkce;
pub mod provider;
mod validation;

pub use error::AuthError;
pub use gotrue::{GoTrueClient, auth_base_url, build_authorize_url, parse_signup, reset_redirect_url};
pub use pkce::{PkcePair, challenge_for};
pub use provider::{
    AuthEvent, AuthStateChange, IdentityProvider, OAuthProvider, OtpType, SignUpOutcome, TokenGrant, UserAttributes,
};
pub use validation::{MIN_PASSWORD_CHARS, validate_email, validate_new_password};
