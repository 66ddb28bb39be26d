use alloy::transports::{RpcError, TransportErrorKind};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("network error: {msg}, recoverable: {recoverable}")]
    Network { msg: String, recoverable: bool },
    #[error("request rejected by the node: {0}")]
    Rejected(String),
    #[error("other error: {0}")]
    Other(String),
}

impl From<RpcError<TransportErrorKind>> for Error {
    fn from(err: RpcError<TransportErrorKind>) -> Self {
        match err {
            // server side failures such as a log query spanning too many results
            RpcError::ErrorResp(err) if err.code >= -32613 && err.code <= -32000 => {
                Self::Rejected(err.message.to_string())
            }
            RpcError::Transport(
                TransportErrorKind::BackendGone | TransportErrorKind::PubsubUnavailable,
            ) => Self::Network {
                msg: err.to_string(),
                recoverable: false,
            },
            RpcError::DeserError { .. } | RpcError::NullResp => Self::Other(err.to_string()),
            _ => Self::Network {
                msg: err.to_string(),
                recoverable: true,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for services::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Network { msg, .. } => Self::Network(msg),
            Error::Other(err) | Error::Rejected(err) => Self::Other(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy::rpc::json_rpc::ErrorPayload;

    use super::*;

    #[test]
    fn server_errors_are_rejections() {
        for code in 32_000..=32613 {
            let err = RpcError::ErrorResp(ErrorPayload {
                code: -code,
                message: "query returned more than 10000 results".into(),
                data: None,
            });

            let our_error = Error::from(err);
            let Error::Rejected(msg) = our_error else {
                panic!("Expected Rejected got: {}", our_error)
            };

            assert!(msg.contains("more than 10000 results"));
        }
    }

    #[test]
    fn rest_of_the_error_range_is_classified_as_network_caused() {
        for code in [31_999, 32614] {
            let err = RpcError::ErrorResp(ErrorPayload {
                code: -code,
                message: "some message".into(),
                data: None,
            });

            let our_error = Error::from(err);
            let Error::Network { msg, recoverable } = our_error else {
                panic!("Expected Network got: {}", our_error)
            };

            assert!(recoverable);
            assert!(msg.contains("some message"));
        }
    }

    #[test]
    fn backend_gone_is_irrecoverable() {
        let err = RpcError::Transport(TransportErrorKind::BackendGone);

        match Error::from(err) {
            Error::Network { recoverable, .. } => assert!(!recoverable),
            other => panic!("Expected Network error for BackendGone, got: {other:?}"),
        }
    }

    #[test]
    fn missing_pubsub_is_irrecoverable() {
        let err = RpcError::Transport(TransportErrorKind::PubsubUnavailable);

        match Error::from(err) {
            Error::Network { msg, recoverable } => {
                assert!(!recoverable);
                assert!(msg.contains("subscriptions are not available on this provider"));
            }
            other => panic!("Expected Network error for PubsubUnavailable, got: {other:?}"),
        }
    }

    #[test]
    fn null_response_is_not_a_network_problem() {
        let err: RpcError<TransportErrorKind> = RpcError::NullResp;

        assert!(matches!(Error::from(err), Error::Other(_)));
    }

    #[test]
    fn converts_into_service_errors() {
        let network = Error::Network {
            msg: "connection reset".to_string(),
            recoverable: true,
        };

        assert!(matches!(
            services::Error::from(network),
            services::Error::Network(msg) if msg == "connection reset"
        ));
        assert!(matches!(
            services::Error::from(Error::Rejected("too many".to_string())),
            services::Error::Other(_)
        ));
    }
}
