use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        /// Parsed from the channel's `Retry-After` header.
        retry_after_seconds: Option<u64>,
    },

    #[error("Callback verification failed: {message}")]
    CallbackVerificationError { message: String },

    #[error("Channel error: channel={channel}, message={message}")]
    ChannelError {
        channel: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },

    #[error("No gateway configured for channel {channel}")]
    ChannelUnavailable { channel: String },
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::NetworkError { .. } => true,
            PaymentError::RateLimitError { .. } => true,
            PaymentError::CallbackVerificationError { .. } => false,
            PaymentError::ChannelError { retryable, .. } => *retryable,
            PaymentError::ChannelUnavailable { .. } => false,
        }
    }
}
