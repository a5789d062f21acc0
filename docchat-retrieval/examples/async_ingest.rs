use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use docchat_retrieval::{
    FlatIndex, HashEmbedder, IngestSource, IngestionPipeline, RecursiveCharacterTextSplitter,
};

/// Usage: `cargo run --example async_ingest -- <file.txt|file.pdf> [index_dir]`
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let mut args = std::env::args().skip(1);
    let file = PathBuf::from(args.next().ok_or("missing file argument")?);
    let index_dir = args.next().map(PathBuf::from).unwrap_or_else(|| "vectorstores/db".into());

    let splitter = RecursiveCharacterTextSplitter::builder()
        .chunk_size(500)
        .chunk_overlap(50)
        .build()?;
    let index = FlatIndex::load(&index_dir).await.unwrap_or_default();
    let pipeline = IngestionPipeline::new(Arc::new(HashEmbedder::new(384)), index, splitter, index_dir);

    let report = pipeline.ingest(IngestSource::File(file)).await?;
    println!(
        "Indexed {} pages as {} chunks ({}); index now holds {} chunks",
        report.documents,
        report.chunks,
        report.mode,
        pipeline.index().len().await
    );
    Ok(())
}
