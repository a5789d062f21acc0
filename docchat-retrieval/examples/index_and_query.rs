use std::{collections::HashMap, sync::Arc};

use docchat_core::Document;
use docchat_retrieval::{FlatIndex, HashEmbedder, Indexer, RecursiveCharacterTextSplitter, Retriever};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let embedder = Arc::new(HashEmbedder::new(64));
    let index = FlatIndex::new();
    let indexer = Indexer::new(embedder.clone(), index.clone());

    let splitter = RecursiveCharacterTextSplitter::builder()
        .chunk_size(40)
        .chunk_overlap(8)
        .build()?;
    let page = Document {
        id: "notes.txt#1".to_string(),
        content: "Rust is fast and memory efficient. The borrow checker rejects data races.".to_string(),
        metadata: HashMap::new(),
        embedding: None,
    };
    indexer.index(splitter.split_documents(&[page])).await?;

    let retriever = Retriever::new(embedder, index);
    let results = retriever.retrieve("memory efficient", 2).await?;
    println!("Retrieved {} chunks", results.len());
    for result in results {
        println!("score={:.3} content={}", result.score, result.document.content);
    }
    Ok(())
}
