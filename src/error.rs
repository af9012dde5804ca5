use snafu::Snafu;

use crate::{
    codec::CodecError, config::ConfigError, identity::IdentityError, state::RefreshError,
    token_validation::JwtValidationError,
};

/// An enumeration representing various authentication-related errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum KeycloakLoginError {
    #[snafu(display("KeycloakLoginError: Invalid configuration"))]
    Config { source: ConfigError },

    #[snafu(display("KeycloakLoginError: Could not decode data"))]
    Codec { source: CodecError },

    #[snafu(display("KeycloakLoginError: Could not refresh the session"))]
    Refresh { source: RefreshError },

    #[snafu(display("KeycloakLoginError: Token is not valid"))]
    Validation { source: JwtValidationError },

    #[snafu(display("KeycloakLoginError: Could not derive the user identity"))]
    Identity { source: IdentityError },
}
