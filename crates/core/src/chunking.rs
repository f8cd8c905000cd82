use crate::error::ConfigError;
use crate::models::Chunk;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CHUNK_SIZE: usize = 512;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

// Highest priority first. When none fits the window the cut falls on a plain
// character boundary.
const SEPARATORS: [&str; 6] = ["\n\n", "\n", ". ", "! ", "? ", " "];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidChunking(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::InvalidChunking(format!(
                "chunk_overlap {} must be smaller than chunk_size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Splits text into overlapping chunks of at most `chunk_size` characters,
/// preferring paragraph, line, sentence and word boundaries in that order.
#[derive(Debug, Clone, Copy)]
pub struct RecursiveChunker {
    config: ChunkingConfig,
}

impl RecursiveChunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn chunks<'a>(&self, text: &'a str) -> ChunkIter<'a> {
        ChunkIter {
            text,
            config: self.config,
            position: 0,
            index: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChunkIter<'a> {
    text: &'a str,
    config: ChunkingConfig,
    position: usize,
    index: usize,
}

impl Iterator for ChunkIter<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let text = self.text;
        if self.position >= text.len() {
            return None;
        }

        let start = self.position;
        let window_end = advance_chars(text, start, self.config.chunk_size);
        let end = if window_end == text.len() {
            window_end
        } else {
            // The cut must leave more than `chunk_overlap` characters behind it,
            // otherwise the next chunk could not start after this one.
            let min_cut = advance_chars(text, start, self.config.chunk_overlap + 1);
            find_cut(text, start, min_cut, window_end)
        };

        let chunk = Chunk {
            index: self.index,
            offset: start,
            text: text[start..end].to_string(),
        };

        self.index += 1;
        self.position = if end == text.len() {
            end
        } else {
            next_start(text, end, self.config.chunk_overlap)
        };

        Some(chunk)
    }
}

impl std::iter::FusedIterator for ChunkIter<'_> {}

fn advance_chars(text: &str, from: usize, count: usize) -> usize {
    text[from..]
        .char_indices()
        .nth(count)
        .map(|(offset, _)| from + offset)
        .unwrap_or(text.len())
}

fn retreat_chars(text: &str, from: usize, count: usize) -> usize {
    if count == 0 {
        return from;
    }
    text[..from]
        .char_indices()
        .rev()
        .nth(count - 1)
        .map(|(offset, _)| offset)
        .unwrap_or(0)
}

fn find_cut(text: &str, start: usize, min_cut: usize, window_end: usize) -> usize {
    let window = &text[start..window_end];
    for separator in SEPARATORS {
        if let Some(position) = window.rfind(separator) {
            let cut = start + position + separator.len();
            if cut >= min_cut {
                return cut;
            }
        }
    }
    window_end
}

fn next_start(text: &str, end: usize, overlap: usize) -> usize {
    let floor = retreat_chars(text, end, overlap);
    if floor == end {
        return end;
    }

    let at_word_start = text[..floor]
        .chars()
        .next_back()
        .map_or(true, char::is_whitespace);
    if at_word_start {
        return floor;
    }

    text[floor..end]
        .char_indices()
        .find(|(_, ch)| ch.is_whitespace())
        .map(|(offset, ch)| floor + offset + ch.len_utf8())
        .filter(|boundary| *boundary < end)
        .unwrap_or(floor)
}

/// Rebuilds the source text from an ordered run of chunks by dropping the
/// prefix each chunk shares with its predecessor.
pub fn reassemble(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    let mut covered = 0usize;
    for chunk in chunks {
        let shared = covered.saturating_sub(chunk.offset);
        out.push_str(&chunk.text[shared..]);
        covered = chunk.end();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn chunker(size: usize, overlap: usize) -> RecursiveChunker {
        RecursiveChunker::new(ChunkingConfig {
            chunk_size: size,
            chunk_overlap: overlap,
        })
        .expect("valid chunking config")
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert_eq!(chunker(512, 200).chunks("").count(), 0);
    }

    #[test]
    fn short_text_yields_single_chunk() {
        let chunks: Vec<_> = chunker(512, 200).chunks("just a few words").collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "just a few words");
        assert_eq!(chunks[0].offset, 0);
    }

    #[test]
    fn overlap_must_be_smaller_than_size() {
        let invalid = ChunkingConfig {
            chunk_size: 100,
            chunk_overlap: 100,
        };
        assert!(matches!(
            RecursiveChunker::new(invalid),
            Err(ConfigError::InvalidChunking(_))
        ));
        let zero = ChunkingConfig {
            chunk_size: 0,
            chunk_overlap: 0,
        };
        assert!(RecursiveChunker::new(zero).is_err());
    }

    #[test]
    fn thousand_characters_make_three_chunks() {
        let text = "abcdefghi ".repeat(100);
        let chunks: Vec<_> = chunker(512, 200).chunks(&text).collect();

        assert_eq!(chunks.len(), 3);
        let lengths: Vec<_> = chunks.iter().map(Chunk::char_len).collect();
        assert_eq!(lengths, vec![510, 510, 380]);
        assert_eq!(reassemble(&chunks), text);
    }

    #[test]
    fn unbroken_text_is_cut_on_character_boundaries() {
        let text = "a".repeat(1000);
        let chunks: Vec<_> = chunker(512, 200).chunks(&text).collect();

        let spans: Vec<_> = chunks.iter().map(|c| (c.offset, c.end())).collect();
        assert_eq!(spans, vec![(0, 512), (312, 824), (624, 1000)]);
    }

    #[test]
    fn paragraph_break_wins_over_later_spaces() {
        let text = "alpha beta\n\ngamma delta epsilon";
        let chunks: Vec<_> = chunker(20, 5).chunks(text).collect();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "alpha beta\n\n");
        assert_eq!(chunks[1].text, "\ngamma delta epsilon");
        assert_eq!(reassemble(&chunks), text);
    }

    #[test]
    fn multibyte_text_respects_character_budget() {
        let text = "größe über straße ".repeat(20);
        let chunks: Vec<_> = chunker(16, 4).chunks(&text).collect();

        assert!(chunks.iter().all(|chunk| chunk.char_len() <= 16));
        assert_eq!(reassemble(&chunks), text);
    }

    #[test]
    fn iterator_is_restartable() {
        let text = "one two three four five six seven eight nine ten ".repeat(8);
        let splitter = chunker(40, 10);
        let iter = splitter.chunks(&text);
        let first: Vec<_> = iter.clone().collect();
        let second: Vec<_> = iter.collect();
        let third: Vec<_> = splitter.chunks(&text).collect();
        assert_eq!(first, second);
        assert_eq!(first, third);
    }

    fn sizes() -> impl Strategy<Value = (usize, usize)> {
        (1usize..80).prop_flat_map(|size| (Just(size), 0..size))
    }

    proptest! {
        #[test]
        fn chunks_reconstruct_source((size, overlap) in sizes(), text in "[a-zé漢 .!?\n]{0,400}") {
            let chunks: Vec<_> = chunker(size, overlap).chunks(&text).collect();

            prop_assert_eq!(reassemble(&chunks), text.clone());
            if text.is_empty() {
                prop_assert!(chunks.is_empty());
            }

            let mut previous: Option<&Chunk> = None;
            for (position, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.index, position);
                prop_assert!(!chunk.text.is_empty());
                prop_assert!(chunk.char_len() <= size);
                if let Some(prev) = previous {
                    prop_assert!(chunk.offset > prev.offset);
                    prop_assert!(chunk.offset <= prev.end());
                    prop_assert!(chunk.end() > prev.end());
                    let shared = text[chunk.offset..prev.end()].chars().count();
                    prop_assert!(shared <= overlap);
                }
                previous = Some(chunk);
            }
        }

        #[test]
        fn chunking_is_deterministic((size, overlap) in sizes(), text in "[a-z \n.]{0,300}") {
            let splitter = chunker(size, overlap);
            let first: Vec<_> = splitter.chunks(&text).collect();
            let second: Vec<_> = splitter.chunks(&text).collect();
            prop_assert_eq!(first, second);
        }
    }
}
