//! Error classifier: `Signal` -> `ErrorKind`.
//!
//! Pure and deterministic. Anything not explicitly permanent is transient:
//! a wrongly retried error costs an attempt, a wrongly dropped one loses work.

use crate::domain::{ErrorKind, Signal, SignalCode};

pub fn classify(signal: &Signal) -> ErrorKind {
    match signal.code {
        SignalCode::RateLimited
        | SignalCode::ServiceUnavailable
        | SignalCode::GatewayTimeout
        | SignalCode::Timeout
        | SignalCode::ConnectionReset
        | SignalCode::Dns
        | SignalCode::ServerError(_)
        | SignalCode::Unknown => ErrorKind::Transient,

        // request timeout
        SignalCode::ClientError(408) => ErrorKind::Transient,

        SignalCode::BadRequest
        | SignalCode::Unauthorized
        | SignalCode::Forbidden
        | SignalCode::ClientError(_)
        | SignalCode::Validation
        | SignalCode::Tls
        | SignalCode::Fatal => ErrorKind::Permanent,
    }
}

/// Shorthand for `classify(&Signal::from_message(message))`.
pub fn classify_message(message: &str) -> ErrorKind {
    classify(&Signal::from_message(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case("ETIMEDOUT")]
    #[case("read ECONNRESET")]
    #[case("HTTP 429: Too Many Requests")]
    #[case("HTTP 503: Service Unavailable")]
    #[case("Rate limit exceeded, retry later")]
    #[case("502 Bad Gateway")]
    #[case("something nobody has seen before")]
    fn transient_messages(#[case] message: &str) {
        assert_eq!(classify_message(message), ErrorKind::Transient);
    }

    #[rstest]
    #[case("HTTP 400: Bad Request")]
    #[case("HTTP 401: Unauthorized")]
    #[case("403 Forbidden")]
    #[case("Invalid API key")]
    #[case("validation failed: url")]
    #[case("certificate has expired")]
    fn permanent_messages(#[case] message: &str) {
        assert_eq!(classify_message(message), ErrorKind::Permanent);
    }

    #[test]
    fn mixed_message_resolves_to_transient() {
        // transient rules are consulted first
        assert_eq!(
            classify_message("invalid response: timeout"),
            ErrorKind::Transient
        );
    }

    #[rstest]
    #[case(404, ErrorKind::Permanent)]
    #[case(408, ErrorKind::Transient)]
    #[case(500, ErrorKind::Transient)]
    #[case(429, ErrorKind::Transient)]
    fn http_statuses(#[case] status: u16, #[case] expected: ErrorKind) {
        assert_eq!(classify(&Signal::http(status, "")), expected);
    }

    #[test]
    fn fatal_is_permanent() {
        assert_eq!(classify(&Signal::fatal("boom")), ErrorKind::Permanent);
    }

    proptest! {
        #[test]
        fn classification_is_deterministic(message in ".{0,120}") {
            let first = classify_message(&message);
            let second = classify_message(&message);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn case_does_not_matter(message in "[a-zA-Z0-9 :]{0,60}") {
            prop_assert_eq!(
                classify_message(&message.to_uppercase()),
                classify_message(&message.to_lowercase())
            );
        }
    }
}
