use std::collections::HashMap;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use docchat_core::Document;
use docchat_retrieval::{FlatIndex, HashEmbedder, Indexer, Retriever};

fn bench_index_and_query(c: &mut Criterion) {
    let embedder = Arc::new(HashEmbedder::new(384));
    let docs: Vec<Document> = (0..1000)
        .map(|idx| Document {
            id: format!("doc-{idx}"),
            content: format!("page {idx} of a manual about rust and retrieval"),
            metadata: HashMap::new(),
            embedding: None,
        })
        .collect();

    let index_runtime = tokio::runtime::Runtime::new().unwrap();
    c.bench_function("index_1000", |b| {
        b.iter_batched(
            || {
                let indexer = Indexer::new(embedder.clone(), FlatIndex::new());
                (indexer, docs.clone())
            },
            |(indexer, batch)| index_runtime.block_on(indexer.index(batch)),
            BatchSize::SmallInput,
        )
    });

    let index = FlatIndex::new();
    let indexer = Indexer::new(embedder.clone(), index.clone());
    let _ = index_runtime.block_on(indexer.index(docs.clone()));

    let retriever = Retriever::new(embedder.clone(), index);
    let query_runtime = tokio::runtime::Runtime::new().unwrap();
    c.bench_function("query_top2", |b| {
        b.iter(|| query_runtime.block_on(retriever.retrieve("rust retrieval", 2)))
    });
}

criterion_group!(benches, bench_index_and_query);
criterion_main!(benches);
