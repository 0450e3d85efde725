//! Offline ingestion of shareholder letters into the knowledge index
//!
//! Reads every `.txt` file in the data directory, splits each on the
//! literal section delimiter, and upserts the fragments. Must not run
//! concurrently with itself against one store: each chunk is added in its
//! own (non-atomic) call.

use crate::knowledge::KnowledgeIndex;
use crate::models::{ChunkMetadata, KnowledgeChunk};
use crate::Result;
use std::path::Path;
use tracing::{info, warn};

pub const SECTION_DELIMITER: &str = "[SECTION:";

/// Split one source file into chunks.
///
/// Ids are `<filename>_<ordinal>` over the raw split positions, so
/// re-ingesting a file produces the same ids and overwrites rather than
/// duplicates. Blank fragments are skipped but still consume an ordinal.
pub fn split_sections(filename: &str, content: &str) -> Vec<KnowledgeChunk> {
    content
        .split(SECTION_DELIMITER)
        .enumerate()
        .filter(|(_, fragment)| !fragment.trim().is_empty())
        .map(|(i, fragment)| KnowledgeChunk {
            id: format!("{}_{}", filename, i),
            text: fragment.trim().to_string(),
            metadata: ChunkMetadata {
                source: filename.to_string(),
            },
        })
        .collect()
}

/// Ingest every `.txt` file under `data_dir`. Returns the chunk count.
pub async fn ingest_dir(index: &dyn KnowledgeIndex, data_dir: &Path) -> Result<usize> {
    let mut entries = tokio::fs::read_dir(data_dir).await?;
    let mut total = 0;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("txt") {
            continue;
        }

        let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
            warn!(path = %path.display(), "Skipping file with non-UTF-8 name");
            continue;
        };

        let content = tokio::fs::read_to_string(&path).await?;
        let chunks = split_sections(filename, &content);

        index.upsert(&chunks).await?;
        info!(file = %filename, chunks = chunks.len(), "Ingested");
        total += chunks.len();
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory stand-in with real upsert semantics (same id overwrites).
    struct MapIndex {
        chunks: Mutex<HashMap<String, KnowledgeChunk>>,
    }

    impl MapIndex {
        fn new() -> Self {
            Self {
                chunks: Mutex::new(HashMap::new()),
            }
        }

        fn len(&self) -> usize {
            self.chunks.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl KnowledgeIndex for MapIndex {
        async fn upsert(&self, chunks: &[KnowledgeChunk]) -> Result<()> {
            let mut stored = self.chunks.lock().unwrap();
            for chunk in chunks {
                stored.insert(chunk.id.clone(), chunk.clone());
            }
            Ok(())
        }

        async fn search(&self, _query: &str, _top_n: usize) -> Result<Vec<KnowledgeChunk>> {
            Ok(Vec::new())
        }
    }

    const SAMPLE: &str =
        "[SECTION: 1988] On owner earnings and moats.\n[SECTION: 1989] On Mr. Market.";

    #[test]
    fn test_split_sections() {
        let chunks = split_sections("1988.txt", SAMPLE);

        // Fragment 0 (before the first delimiter) is empty and skipped,
        // but its ordinal is consumed.
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].id, "1988.txt_1");
        assert_eq!(chunks[0].text, "1988] On owner earnings and moats.");
        assert_eq!(chunks[1].id, "1988.txt_2");
        assert_eq!(chunks[0].metadata.source, "1988.txt");
    }

    #[test]
    fn test_split_sections_no_delimiter() {
        let chunks = split_sections("plain.txt", "no sections at all");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, "plain.txt_0");
    }

    #[test]
    fn test_split_sections_blank_input() {
        assert!(split_sections("empty.txt", "   \n ").is_empty());
    }

    #[tokio::test]
    async fn test_reingestion_is_idempotent() {
        let index = MapIndex::new();

        let chunks = split_sections("letter.txt", SAMPLE);
        index.upsert(&chunks).await.unwrap();
        assert_eq!(index.len(), 2);

        // Same file again: same ids, same count.
        let chunks = split_sections("letter.txt", SAMPLE);
        index.upsert(&chunks).await.unwrap();
        assert_eq!(index.len(), 2);
    }
}
