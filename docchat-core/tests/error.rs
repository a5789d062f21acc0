use std::{error::Error, str::FromStr, time::Duration};

use docchat_core::{Device, DocchatError, EmbeddingError, StoreError};

#[test]
fn error_display_for_max_retries() {
    let err = DocchatError::MaxRetriesExceeded { max: 2 };
    assert_eq!(format!("{err}"), "Max retries (2) exceeded");
}

#[test]
fn error_display_for_llm_provider() {
    let err = DocchatError::LlmProvider("connection refused".to_string());
    assert_eq!(format!("{err}"), "LLM provider failed: connection refused");
}

#[test]
fn error_display_for_timeout() {
    let err = DocchatError::Timeout(Duration::from_secs(5));
    assert_eq!(format!("{err}"), "Operation timed out after 5s");
}

#[test]
fn error_display_for_cancelled() {
    let err = DocchatError::Cancelled;
    assert_eq!(format!("{err}"), "Operation was cancelled");
}

#[test]
fn error_display_for_serde() {
    let parse_error = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
    let err = DocchatError::Serde(parse_error);
    assert!(format!("{err}").starts_with("Serialization/deserialization error: "));
}

#[test]
fn embedding_error_display_for_dimension_mismatch() {
    let err = EmbeddingError::DimensionMismatch {
        expected: 384,
        got: 768,
    };
    assert_eq!(
        format!("{err}"),
        "Embedding dimension mismatch: expected 384, got 768"
    );
}

#[test]
fn embedding_error_display_for_other() {
    let err = EmbeddingError::Other("network".to_string().into());
    assert_eq!(format!("{err}"), "Embedding error: network");
    assert!(err.source().is_some());
}

#[test]
fn embedding_and_store_errors_convert_into_docchat_error() {
    let from_embedding: DocchatError = EmbeddingError::Provider("offline".to_string()).into();
    let from_store: DocchatError = StoreError::DimensionMismatch {
        expected: 3,
        got: 2,
    }
    .into();

    assert_eq!(
        format!("{from_embedding}"),
        "Embedding provider error: offline"
    );
    assert_eq!(
        format!("{from_store}"),
        "dimension mismatch: expected 3, got 2"
    );
}

#[test]
fn device_parses_known_names() {
    assert_eq!(Device::from_str("cpu").unwrap(), Device::Cpu);
    assert_eq!(Device::from_str(" GPU ").unwrap(), Device::Gpu);
    assert_eq!(Device::Cpu.ollama_num_gpu(), Some(0));
    assert_eq!(Device::Gpu.ollama_num_gpu(), None);

    let err = Device::from_str("tpu").unwrap_err();
    assert!(matches!(err, DocchatError::InvalidConfig(_)));
}
