use serde::{de::Visitor, Deserialize};

/// Body of a failed request to the accounts service token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct AuthenticationErrorResponse {
    pub error: AuthenticationErrorKind,
    pub error_description: Option<String>,
}

/// Body of a failed Web API request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct ApiErrorResponse {
    pub error: ApiError,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct ApiError {
    pub status: u16,
    pub message: ApiErrorMessage,
}

/// The OAuth error codes the accounts service responds with.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum AuthenticationErrorKind {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    UnauthorizedClient,
    UnsupportedGrantType,
    InvalidScope,

    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ApiErrorMessage {
    PermissionsMissing,
    TokenExpired,

    Other(String),
}

impl ApiErrorResponse {
    pub fn parse(body: &str) -> Option<Self> {
        serde_json::from_str(body).ok()
    }
}

impl AuthenticationErrorResponse {
    pub fn parse(body: &str) -> Option<Self> {
        serde_json::from_str(body).ok()
    }
}

impl std::fmt::Display for ApiErrorMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiErrorMessage::PermissionsMissing => f.write_str("Permissions missing"),
            ApiErrorMessage::TokenExpired => f.write_str("The access token expired"),
            ApiErrorMessage::Other(message) => f.write_str(message),
        }
    }
}

/// Formats an API response body for error messages: `<status>: <message>` when the body is a Web API error object,
/// otherwise the body as-is.
pub(crate) fn describe_api_error(body: &str) -> String {
    match ApiErrorResponse::parse(body) {
        Some(response) => format!("{}: {}", response.error.status, response.error.message),
        None => body.to_owned(),
    }
}

impl<'de> Deserialize<'de> for ApiErrorMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct ApiErrorMessageVisitor;

        impl<'de> Visitor<'de> for ApiErrorMessageVisitor {
            type Value = ApiErrorMessage;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a string")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                self.visit_string(v.to_owned())
            }

            fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match v.as_str() {
                    "Permissions missing" => Ok(ApiErrorMessage::PermissionsMissing),
                    "The access token expired" => Ok(ApiErrorMessage::TokenExpired),

                    _ => Ok(ApiErrorMessage::Other(v)),
                }
            }
        }

        deserializer.deserialize_str(ApiErrorMessageVisitor)
    }
}
