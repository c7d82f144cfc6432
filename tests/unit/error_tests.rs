//! Unit tests for `AppError` display and wire codes.

use grok_sidecar::errors::SERVICE_ERROR;
use grok_sidecar::AppError;

#[test]
fn display_prefixes_variant() {
    assert_eq!(AppError::Config("x".into()).to_string(), "config: x");
    assert_eq!(AppError::Protocol("x".into()).to_string(), "protocol: x");
    assert_eq!(AppError::Service("x".into()).to_string(), "service: x");
    assert_eq!(AppError::Backend("x".into()).to_string(), "backend: x");
    assert_eq!(AppError::Io("x".into()).to_string(), "io: x");
    assert_eq!(AppError::Cancelled("x".into()).to_string(), "cancelled: x");
}

#[test]
fn detail_strips_prefix() {
    assert_eq!(AppError::Backend("HTTP 500".into()).detail(), "HTTP 500");
}

#[test]
fn only_service_errors_carry_a_code() {
    assert_eq!(AppError::Service("x".into()).code(), Some(SERVICE_ERROR));
    assert_eq!(AppError::Protocol("x".into()).code(), None);
    assert_eq!(AppError::Backend("x".into()).code(), None);
    assert_eq!(AppError::Cancelled("x".into()).code(), None);
}

#[test]
fn io_errors_convert() {
    let err: AppError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed").into();

    assert!(matches!(err, AppError::Io(ref msg) if msg.contains("pipe closed")));
}
