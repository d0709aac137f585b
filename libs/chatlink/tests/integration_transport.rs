//! Integration tests for transport construction and the credential registry

mod common;

use chatlink::{ChatError, ChatTransport, TransportConfig};
use common::*;
use std::io::Write;

#[test]
fn test_invalid_config_is_rejected() {
    let config = TransportConfig {
        connect_timeout_ms: 0,
        ..test_config()
    };
    let requester = StaticRequester::new(200, host_list(&[], &[]));

    match ChatTransport::new(config, requester) {
        Err(ChatError::Configuration(reason)) => assert!(reason.contains("connect_timeout_ms")),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("transport started with a zero connect timeout"),
    }
}

#[test]
fn test_transport_from_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "api_server: chat.test\nselect_timeout_ms: 20\nconnect_timeout_ms: 750").unwrap();

    let requester = StaticRequester::new(200, host_list(&[], &[]));
    let transport = ChatTransport::from_config_file(file.path(), requester).unwrap();

    assert_eq!(transport.config().connect_timeout_ms, 750);
    assert!(transport.io().is_running());
}

#[test]
fn test_missing_config_file_is_a_configuration_error() {
    let requester = StaticRequester::new(200, host_list(&[], &[]));
    let result = ChatTransport::from_config_file("/nonexistent/chatlink.yaml", requester);
    assert!(matches!(result, Err(ChatError::Configuration(_))));
}

#[test]
fn test_credential_lookup() {
    let requester = StaticRequester::new(200, host_list(&[], &[]));
    let transport = ChatTransport::new(test_config(), requester).unwrap();
    transport.register_credentials("Alice", "oauth:a");

    assert_eq!(transport.credentials("ALICE").unwrap(), "oauth:a");
    match transport.credentials("Bob") {
        Err(ChatError::MissingCredential(user)) => assert_eq!(user, "bob"),
        other => panic!("unexpected lookup result: {:?}", other),
    }
}
