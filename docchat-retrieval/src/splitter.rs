use docchat_core::{Document, Value};
use thiserror::Error;

/// Paragraph, line, sentence, word, then an arbitrary character cut.
pub const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " ", ""];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SplitterConfigError {
    #[error("chunk_size must be greater than zero")]
    ChunkSizeMustBeGreaterThanZero,
    #[error("chunk_overlap ({overlap}) must be smaller than chunk_size ({size})")]
    OverlapMustBeSmallerThanChunkSize { size: usize, overlap: usize },
}

/// A bounded slice of a document. `start` is a character offset into the source text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub start: usize,
}

impl Chunk {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

#[derive(Clone, Debug)]
pub struct RecursiveCharacterTextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<Vec<char>>,
}

#[derive(Clone, Debug)]
pub struct RecursiveCharacterTextSplitterBuilder {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl Default for RecursiveCharacterTextSplitterBuilder {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl RecursiveCharacterTextSplitterBuilder {
    /// Maximum chunk length in characters.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn chunk_overlap(mut self, chunk_overlap: usize) -> Self {
        self.chunk_overlap = chunk_overlap;
        self
    }

    /// Separators in order of preference. An empty string stands for "any character".
    pub fn separators<I, S>(mut self, separators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.separators = separators.into_iter().map(Into::into).collect();
        self
    }

    pub fn build(self) -> Result<RecursiveCharacterTextSplitter, SplitterConfigError> {
        if self.chunk_size == 0 {
            return Err(SplitterConfigError::ChunkSizeMustBeGreaterThanZero);
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(SplitterConfigError::OverlapMustBeSmallerThanChunkSize {
                size: self.chunk_size,
                overlap: self.chunk_overlap,
            });
        }

        Ok(RecursiveCharacterTextSplitter {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            separators: self
                .separators
                .into_iter()
                .filter(|sep| !sep.is_empty())
                .map(|sep| sep.chars().collect())
                .collect(),
        })
    }
}

impl RecursiveCharacterTextSplitter {
    pub fn builder() -> RecursiveCharacterTextSplitterBuilder {
        RecursiveCharacterTextSplitterBuilder::default()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Lazily yields the chunks of `text`. Clone the iterator to walk it again.
    pub fn split_iter<'a>(&self, text: &'a str) -> Chunks<'a> {
        let chars: Vec<char> = text.chars().collect();
        let mut byte_offsets: Vec<usize> = text.char_indices().map(|(idx, _)| idx).collect();
        byte_offsets.push(text.len());

        let mut levels = vec![Vec::new(); self.separators.len() + 1];
        levels[0].push(chars.len());
        collect_boundaries(&chars, 0, self.chunk_size, &self.separators, 0, &mut levels);
        for level in &mut levels {
            level.sort_unstable();
            level.dedup();
        }
        let mut boundaries: Vec<usize> = levels.iter().flatten().copied().collect();
        boundaries.sort_unstable();
        boundaries.dedup();

        Chunks {
            text,
            byte_offsets,
            levels,
            boundaries,
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            next_start: if chars.is_empty() { None } else { Some(0) },
            previous_end: 0,
        }
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_iter(text).map(|chunk| chunk.text).collect()
    }

    /// Splits every document, carrying its metadata over and adding
    /// `chunk_index` and `start_index`. Chunk ids are `<document id>:<chunk_index>`.
    pub fn split_documents(&self, documents: &[Document]) -> Vec<Document> {
        let mut out = Vec::new();
        for document in documents {
            for (index, chunk) in self.split_iter(&document.content).enumerate() {
                let mut metadata = document.metadata.clone();
                metadata.insert("chunk_index".to_string(), Value::from(index));
                metadata.insert("start_index".to_string(), Value::from(chunk.start));
                out.push(Document {
                    id: format!("{}:{index}", document.id),
                    content: chunk.text,
                    metadata,
                    embedding: None,
                });
            }
        }
        out
    }
}

/// Iterator over the chunks of one text.
#[derive(Clone, Debug)]
pub struct Chunks<'a> {
    text: &'a str,
    byte_offsets: Vec<usize>,
    /// Sorted character offsets where a chunk may end, one list per separator
    /// level from coarsest to the per-character fallback. Level 0 always
    /// contains the text length.
    levels: Vec<Vec<usize>>,
    /// Every level merged, used to place overlap starts.
    boundaries: Vec<usize>,
    chunk_size: usize,
    chunk_overlap: usize,
    next_start: Option<usize>,
    previous_end: usize,
}

impl Chunks<'_> {
    fn char_len(&self) -> usize {
        self.byte_offsets.len() - 1
    }

    /// The furthest boundary of the coarsest level that lies in `(lower, limit]`,
    /// or `limit` itself when no level has one.
    fn pick_end(&self, lower: usize, limit: usize) -> usize {
        self.levels
            .iter()
            .find_map(|level| last_in(level, lower, limit))
            .unwrap_or(limit)
    }
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let start = self.next_start?;
        let len = self.char_len();
        if start >= len {
            self.next_start = None;
            return None;
        }

        let limit = (start + self.chunk_size).min(len);
        // Must leave room for the overlap and reach past the previous chunk.
        let lower = (start + self.chunk_overlap).max(self.previous_end);
        let end = if lower >= limit {
            limit
        } else {
            self.pick_end(lower, limit)
        };

        self.previous_end = end;
        self.next_start = if end >= len {
            None
        } else {
            let target = end - self.chunk_overlap;
            Some(last_in(&self.boundaries, start, target).unwrap_or(target))
        };

        Some(Chunk {
            text: self.text[self.byte_offsets[start]..self.byte_offsets[end]].to_string(),
            start,
        })
    }
}

/// Largest value of the sorted `boundaries` in `(lower, upper]`.
fn last_in(boundaries: &[usize], lower: usize, upper: usize) -> Option<usize> {
    let idx = boundaries.partition_point(|&b| b <= upper);
    idx.checked_sub(1)
        .map(|i| boundaries[i])
        .filter(|&b| b > lower)
}

/// Records the cut points of a segment larger than `chunk_size`. Boundaries
/// found with `separators[i]` land in `out[level + i]`; the last list of `out`
/// holds per-character cuts.
fn collect_boundaries(
    chars: &[char],
    offset: usize,
    chunk_size: usize,
    separators: &[Vec<char>],
    level: usize,
    out: &mut [Vec<usize>],
) {
    if chars.len() <= chunk_size {
        return;
    }

    let found = separators.iter().enumerate().find_map(|(idx, sep)| {
        let positions = find_all(chars, sep);
        (!positions.is_empty()).then_some((idx, sep.len(), positions))
    });

    let Some((idx, sep_len, positions)) = found else {
        // No natural boundary left: every character is a cut point.
        if let Some(per_char) = out.last_mut() {
            per_char.extend((1..=chars.len()).map(|end| offset + end));
        }
        return;
    };

    let finer = &separators[idx + 1..];
    let finer_level = level + idx + 1;
    let mut piece_start = 0;
    for position in positions {
        let piece_end = position + sep_len;
        out[level + idx].push(offset + piece_end);
        collect_boundaries(
            &chars[piece_start..piece_end],
            offset + piece_start,
            chunk_size,
            finer,
            finer_level,
            out,
        );
        piece_start = piece_end;
    }
    if piece_start < chars.len() {
        collect_boundaries(
            &chars[piece_start..],
            offset + piece_start,
            chunk_size,
            finer,
            finer_level,
            out,
        );
    }
}

/// Non-overlapping match positions of `needle` in `haystack`.
fn find_all(haystack: &[char], needle: &[char]) -> Vec<usize> {
    let mut positions = Vec::new();
    if needle.is_empty() || needle.len() > haystack.len() {
        return positions;
    }
    let mut idx = 0;
    while idx + needle.len() <= haystack.len() {
        if haystack[idx..idx + needle.len()] == *needle {
            positions.push(idx);
            idx += needle.len();
        } else {
            idx += 1;
        }
    }
    positions
}
