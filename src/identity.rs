use std::collections::HashMap;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use snafu::{OptionExt, Snafu};

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum IdentityError {
    #[snafu(display("IdentityError: Claims do not contain a 'sub' (subject) string"))]
    NoSubject,

    #[snafu(display(
        "IdentityError: Subject of the user info ({user_info_subject}) does not match the token subject ({token_subject})"
    ))]
    SubjectMismatch {
        token_subject: String,
        user_info_subject: String,
    },
}

/// The authenticated user, derived from the claims of a verified access token or from the
/// response of Keycloak's userinfo endpoint.
///
/// Well known claims are lifted into fields. Everything else Keycloak (or a brokered identity
/// provider) sends ends up in `additional_claims`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// (`sub`) Locally unique and never reassigned identifier of the user within the realm.
    pub subject: String,

    /// `preferred_username`, falling back to `idir_username`.
    pub username: Option<String>,

    /// `display_name`, falling back to `name`.
    pub display_name: Option<String>,

    pub given_name: Option<String>,

    pub family_name: Option<String>,

    pub email: Option<String>,

    /// Alias of the brokered identity provider the user logged in with, if any.
    pub identity_provider: Option<String>,

    /// Union of `client_roles`, realm roles and the roles of this client in `resource_access`.
    /// Roles only show up if the matching mappers are configured in Keycloak.
    pub roles: Vec<String>,

    pub additional_claims: HashMap<String, Value>,
}

/// Access details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Access {
    /// A list of role names.
    #[serde(default)]
    pub roles: Vec<String>,
}

impl UserIdentity {
    /// Lifts known claims out of `claims`. `client_id` selects the entry of `resource_access`
    /// whose roles are taken over.
    pub fn from_claims(
        mut claims: Map<String, Value>,
        client_id: &str,
    ) -> Result<Self, IdentityError> {
        let mut take = |name: &str| -> Option<Value> { claims.remove(name) };

        let subject = take("sub")
            .and_then(|it| match it {
                Value::String(sub) if !sub.is_empty() => Some(sub),
                _ => None,
            })
            .context(NoSubjectSnafu {})?;

        let preferred_username = take("preferred_username").and_then(string);
        let idir_username = take("idir_username").and_then(string);
        let display_name = take("display_name").and_then(string);
        let name = take("name").and_then(string);
        let given_name = take("given_name").and_then(string);
        let family_name = take("family_name").and_then(string);
        let email = take("email").and_then(string);
        let identity_provider = take("identity_provider").and_then(string);

        let client_roles = take("client_roles")
            .and_then(|it| serde_json::from_value::<Vec<String>>(it).ok())
            .unwrap_or_default();
        let realm_roles = take("realm_access")
            .and_then(|it| serde_json::from_value::<Access>(it).ok())
            .map(|access| access.roles)
            .unwrap_or_default();
        let resource_roles = take("resource_access")
            .and_then(|it| serde_json::from_value::<HashMap<String, Access>>(it).ok())
            .and_then(|mut resources| resources.remove(client_id))
            .map(|access| access.roles)
            .unwrap_or_default();

        // Put back so these stay available to the embedding application.
        if let Some(idir_username) = &idir_username {
            claims.insert(
                "idir_username".to_owned(),
                Value::String(idir_username.clone()),
            );
        }

        Ok(Self {
            subject,
            username: preferred_username.or(idir_username),
            display_name: display_name.or(name),
            given_name,
            family_name,
            email,
            identity_provider,
            roles: client_roles
                .into_iter()
                .chain(realm_roles)
                .chain(resource_roles)
                .unique()
                .collect(),
            additional_claims: claims.into_iter().collect(),
        })
    }

    /// Fails with [`IdentityError::SubjectMismatch`] unless both identities describe the same user.
    pub fn ensure_same_subject(&self, token_subject: &str) -> Result<(), IdentityError> {
        snafu::ensure!(
            self.subject == token_subject,
            SubjectMismatchSnafu {
                token_subject,
                user_info_subject: self.subject.clone(),
            }
        );
        Ok(())
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|it| it == role)
    }

    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.additional_claims.get(name)
    }
}

fn string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        _ => None,
    }
}
