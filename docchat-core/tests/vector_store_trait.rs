use std::{error::Error, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use docchat_core::{Document, SearchResult, StoreError, VectorStore};

struct EmptyStore;

#[async_trait]
impl VectorStore for EmptyStore {
    async fn add(&self, _docs: Vec<Document>) -> Result<(), StoreError> {
        Ok(())
    }

    async fn search(
        &self,
        _query_embedding: &[f32],
        _top_k: usize,
    ) -> Result<Vec<SearchResult>, StoreError> {
        Ok(Vec::new())
    }

    async fn delete(&self, _ids: &[String]) -> Result<(), StoreError> {
        Ok(())
    }
}

#[test]
fn vector_store_trait_object_safe() {
    let _: Arc<dyn VectorStore> = Arc::new(EmptyStore);
}

#[test]
fn store_error_internal_preserves_source() {
    let source = std::io::Error::new(std::io::ErrorKind::Other, "disk");
    let err = StoreError::Internal(Box::new(source));

    assert_eq!(format!("{err}"), "Store error: disk");
    assert!(err.source().is_some());
}

#[test]
fn store_error_index_not_found_names_the_path() {
    let err = StoreError::IndexNotFound {
        path: PathBuf::from("vectorstores/db"),
    };

    assert_eq!(format!("{err}"), "no index found at vectorstores/db");
}
