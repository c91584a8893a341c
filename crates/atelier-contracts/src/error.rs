use thiserror::Error;

/// Failure kinds surfaced by the model gateway and the upload path.
///
/// Panels and the chat controller render these as messages; none of them is
/// fatal to the rest of the application.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("no API key selected; pick a key and try again")]
    CredentialUnavailable,
    #[error("the selected API key is no longer valid; select a key and retry")]
    CredentialInvalidated,
    #[error("the model returned no image")]
    NoImageProduced,
    #[error("video generation finished without a video")]
    NoVideoProduced,
    #[error("request failed: {0}")]
    TransportFailure(String),
    #[error("unsupported upload: {0}")]
    MalformedUpload(String),
}

impl GatewayError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::TransportFailure(message.into())
    }

    pub fn malformed_upload(message: impl Into<String>) -> Self {
        Self::MalformedUpload(message.into())
    }

    /// Short machine-friendly tag used in event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CredentialUnavailable => "credential_unavailable",
            Self::CredentialInvalidated => "credential_invalidated",
            Self::NoImageProduced => "no_image_produced",
            Self::NoVideoProduced => "no_video_produced",
            Self::TransportFailure(_) => "transport_failure",
            Self::MalformedUpload(_) => "malformed_upload",
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::GatewayError;

    #[test]
    fn transport_failure_keeps_provider_message() {
        let err = GatewayError::transport("Gemini request failed (500): boom");
        assert_eq!(err.to_string(), "request failed: Gemini request failed (500): boom");
        assert_eq!(err.kind(), "transport_failure");
    }

    #[test]
    fn converts_into_anyhow() {
        let err: anyhow::Error = GatewayError::NoImageProduced.into();
        assert_eq!(err.to_string(), "the model returned no image");
    }
}
