// src/error.rs
use serde_json::json;

/// Closed failure taxonomy shared by the gateway and both resolvers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authentication,
    RateLimit,
    Connectivity,
    UpstreamBusiness,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Authentication => "authentication",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Connectivity => "connectivity",
            ErrorKind::UpstreamBusiness => "upstream_business",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Invalid upstream response: {0}")]
    InvalidResponse(String),

    #[error(
        "Slack rejected the credential ({code}). Verify the token is valid, not revoked, and has the required scopes (search:read, channels:history, channels:read)."
    )]
    Authentication { code: String },

    #[error(
        "Slack rate limit exceeded after {attempts} attempts. Wait a moment before retrying or narrow the request."
    )]
    RateLimit { attempts: u32 },

    #[error("Could not reach Slack after {attempts} attempts: {message}")]
    Connectivity { attempts: u32, message: String },

    #[error("Slack API error: {code}")]
    UpstreamBusiness { code: String },

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Tool not found")]
    ToolNotFound,

    #[error("Method not found")]
    MethodNotFound,

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ConnectorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectorError::Validation(_)
            | ConnectorError::InvalidResponse(_)
            | ConnectorError::InvalidParams(_) => ErrorKind::Validation,
            ConnectorError::Authentication { .. } => ErrorKind::Authentication,
            ConnectorError::RateLimit { .. } => ErrorKind::RateLimit,
            ConnectorError::Connectivity { .. } => ErrorKind::Connectivity,
            ConnectorError::UpstreamBusiness { .. } => ErrorKind::UpstreamBusiness,
            ConnectorError::SerdeJson(_)
            | ConnectorError::ToolNotFound
            | ConnectorError::MethodNotFound
            | ConnectorError::InternalError(_) => ErrorKind::Internal,
        }
    }

    /// Upstream error code for business and authentication failures.
    pub fn upstream_code(&self) -> Option<&str> {
        match self {
            ConnectorError::Authentication { code } | ConnectorError::UpstreamBusiness { code } => {
                Some(code)
            }
            _ => None,
        }
    }

    pub fn code_str(&self) -> &'static str {
        match self {
            ConnectorError::Validation(_) => "invalid_input",
            ConnectorError::InvalidResponse(_) => "invalid_response",
            ConnectorError::InvalidParams(_) => "invalid_params",
            ConnectorError::Authentication { .. } => "auth_failed",
            ConnectorError::RateLimit { .. } => "rate_limited",
            ConnectorError::Connectivity { .. } => "unreachable",
            ConnectorError::UpstreamBusiness { .. } => "upstream_error",
            ConnectorError::ToolNotFound => "tool_not_found",
            ConnectorError::MethodNotFound => "method_not_found",
            ConnectorError::SerdeJson(_) => "parse_error",
            ConnectorError::InternalError(_) => "internal_error",
        }
    }

    pub fn to_jsonrpc_error(&self) -> serde_json::Value {
        let code = match self {
            ConnectorError::Validation(_)
            | ConnectorError::InvalidParams(_)
            | ConnectorError::ToolNotFound => -32602,
            ConnectorError::MethodNotFound => -32601,
            ConnectorError::SerdeJson(_) => -32700,
            _ => -32603,
        };

        json!({
            "code": code,
            "message": self.to_string(),
            "data": {
                "kind": self.kind().as_str(),
                "code": self.code_str(),
            },
        })
    }
}
