//! Registry authentication
//!
//! Registries answer unauthenticated requests with `401` and a
//! `WWW-Authenticate` challenge. A `Basic` challenge is answered with the
//! configured credentials; a `Bearer` challenge is answered by fetching a
//! token from the advertised realm, scoped to the repository being accessed.

use reqwest::header::WWW_AUTHENTICATE;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::RegistryClient;
use crate::error::{ClientError, Result};

/// Registry username and password (or access token)
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Parsed `WWW-Authenticate` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    Basic {
        realm: Option<String>,
    },
    Bearer {
        realm: String,
        service: Option<String>,
        scope: Option<String>,
    },
}

impl Challenge {
    /// Parses a challenge header value
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, rest) = match header.split_once(char::is_whitespace) {
            Some((scheme, rest)) => (scheme, rest),
            None => (header, ""),
        };
        let params = parse_params(rest);
        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.clone())
        };

        if scheme.eq_ignore_ascii_case("basic") {
            Some(Challenge::Basic { realm: get("realm") })
        } else if scheme.eq_ignore_ascii_case("bearer") {
            Some(Challenge::Bearer {
                realm: get("realm")?,
                service: get("service"),
                scope: get("scope"),
            })
        } else {
            None
        }
    }
}

/// Splits `key="value", key2=value2` respecting quoted commas
fn parse_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| *c == ',' || c.is_whitespace()) {
            chars.next();
        }

        let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
        let key = key.trim().to_string();
        if key.is_empty() {
            break;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            let mut escaped = false;
            for c in chars.by_ref() {
                match c {
                    '\\' if !escaped => escaped = true,
                    '"' if !escaped => break,
                    _ => {
                        value.push(c);
                        escaped = false;
                    }
                }
            }
        } else {
            while let Some(c) = chars.peek() {
                if *c == ',' {
                    break;
                }
                value.push(*c);
                chars.next();
            }
            value = value.trim().to_string();
        }

        params.push((key, value));
    }

    params
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// How requests to one scope are authorised
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Anonymous,
    Basic,
    Bearer(String),
}

impl Authorization {
    fn apply(&self, request: RequestBuilder, credentials: Option<&Credentials>) -> RequestBuilder {
        match (self, credentials) {
            (Authorization::Bearer(token), _) => request.bearer_auth(token),
            (Authorization::Basic, Some(c)) => request.basic_auth(&c.username, Some(&c.password)),
            _ => request,
        }
    }
}

impl RegistryClient {
    /// Sends a request, answering an authentication challenge once if needed
    ///
    /// The negotiated authorisation is cached per scope for later requests.
    pub(crate) async fn send_authorized<F>(&self, build: F, scope: &str) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let cached = self.cached_authorization(scope);
        let response = cached
            .apply(build(&self.client), self.credentials.as_ref())
            .send()
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(Challenge::parse)
            .ok_or_else(|| {
                ClientError::Unauthorized("registry returned 401 without a usable challenge".into())
            })?;

        debug!("Answering registry challenge {:?} for scope '{}'", challenge, scope);
        let authorization = self.negotiate(&challenge, scope).await?;
        self.store_authorization(scope, authorization.clone());

        let response = authorization
            .apply(build(&self.client), self.credentials.as_ref())
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(ClientError::Unauthorized(format!(
                "registry rejected credentials for scope '{}'",
                scope
            )));
        }

        Ok(response)
    }

    async fn negotiate(&self, challenge: &Challenge, scope: &str) -> Result<Authorization> {
        match challenge {
            Challenge::Basic { .. } => {
                if self.credentials.is_none() {
                    return Err(ClientError::Unauthorized(
                        "registry requires credentials".into(),
                    ));
                }
                Ok(Authorization::Basic)
            }
            Challenge::Bearer {
                realm,
                service,
                scope: challenge_scope,
            } => {
                let mut query: Vec<(&str, &str)> = Vec::new();
                if let Some(service) = service {
                    query.push(("service", service.as_str()));
                }
                let scope = if scope.is_empty() {
                    challenge_scope.as_deref()
                } else {
                    Some(scope)
                };
                if let Some(scope) = scope {
                    query.push(("scope", scope));
                }

                let mut request = self.client.get(realm.as_str()).query(&query);
                if let Some(c) = &self.credentials {
                    request = request.basic_auth(&c.username, Some(&c.password));
                }

                let response = request.send().await?;
                let status = response.status();
                if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                    let body = response.text().await.unwrap_or_default();
                    return Err(ClientError::Unauthorized(format!(
                        "token request rejected (status {}): {}",
                        status.as_u16(),
                        body.trim()
                    )));
                }

                let token: TokenResponse = self.handle_response(response).await?;
                token
                    .token
                    .or(token.access_token)
                    .map(Authorization::Bearer)
                    .ok_or_else(|| ClientError::ParseError("token response carried no token".into()))
            }
        }
    }

    fn cached_authorization(&self, scope: &str) -> Authorization {
        let tokens = self.tokens.lock().unwrap();
        tokens
            .get(scope)
            .cloned()
            .unwrap_or(Authorization::Anonymous)
    }

    fn store_authorization(&self, scope: &str, authorization: Authorization) {
        let mut tokens = self.tokens.lock().unwrap();
        tokens.insert(scope.to_string(), authorization);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bearer_challenge() {
        let challenge = Challenge::parse(
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:acme/frontend:pull,push""#,
        )
        .unwrap();
        assert_eq!(
            challenge,
            Challenge::Bearer {
                realm: "https://auth.docker.io/token".to_string(),
                service: Some("registry.docker.io".to_string()),
                scope: Some("repository:acme/frontend:pull,push".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_basic_challenge() {
        assert_eq!(
            Challenge::parse(r#"Basic realm="Registry Realm""#),
            Some(Challenge::Basic {
                realm: Some("Registry Realm".to_string())
            })
        );
        assert_eq!(
            Challenge::parse("basic"),
            Some(Challenge::Basic { realm: None })
        );
    }

    #[test]
    fn test_bearer_without_realm_is_rejected() {
        assert!(Challenge::parse(r#"Bearer service="x""#).is_none());
        assert!(Challenge::parse("Negotiate abc").is_none());
    }

    #[test]
    fn test_unquoted_params() {
        let params = parse_params("realm=https://x/token, service=reg");
        assert_eq!(
            params,
            vec![
                ("realm".to_string(), "https://x/token".to_string()),
                ("service".to_string(), "reg".to_string())
            ]
        );
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("ci-bot", "s3cret");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("ci-bot"));
        assert!(!debug.contains("s3cret"));
    }
}
