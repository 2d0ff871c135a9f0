//! Overlapping text chunking with sentence-boundary snapping.

/// Splits page text into overlapping chunks sized for the embedding model.
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap,
        }
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        if total == 0 {
            return Vec::new();
        }

        let step = self.chunk_size.saturating_sub(self.chunk_overlap).max(1);
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < total {
            let end = (start + self.chunk_size).min(total);
            let window: String = chars[start..end].iter().collect();

            // Snap to a sentence boundary unless this is the final chunk.
            let chunk = if end < total {
                snap_to_sentence_boundary(&window)
            } else {
                window
            };

            let trimmed = chunk.trim();
            if !trimmed.is_empty() {
                chunks.push(trimmed.to_string());
            }

            start += step;
        }

        chunks
    }
}

/// Cuts the chunk at the last sentence ending found in its final fifth, so
/// overlapping windows tend to start at sentence starts.
fn snap_to_sentence_boundary(text: &str) -> String {
    let sentence_endings = [". ", "! ", "? ", ".\n", "!\n", "?\n"];

    let search_start = (text.len() * 80) / 100;
    let search_start = floor_char_boundary(text, search_start);
    let tail = &text[search_start..];

    for ending in sentence_endings.iter() {
        if let Some(pos) = tail.rfind(ending) {
            let cut = search_start + pos + ending.len();
            return text[..cut].to_string();
        }
    }

    text.to_string()
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_yields_no_chunks() {
        let chunker = Chunker::new(100, 20);
        assert!(chunker.split("").is_empty());
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunker = Chunker::new(100, 20);
        let chunks = chunker.split("A single short sentence.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "A single short sentence.");
    }

    #[test]
    fn long_text_produces_overlapping_chunks() {
        let chunker = Chunker::new(100, 20);
        let text = "This is a test sentence. ".repeat(30);
        let chunks = chunker.split(&text);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 100);
        }
    }

    #[test]
    fn chunks_snap_to_sentence_boundaries() {
        let chunker = Chunker::new(100, 10);
        let text = "One sentence here. Another sentence follows. ".repeat(10);
        let chunks = chunker.split(&text);

        // All but the last chunk should end at a sentence boundary.
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(
                chunk.ends_with('.') || chunk.ends_with('!') || chunk.ends_with('?'),
                "chunk did not end at a sentence boundary: {:?}",
                chunk
            );
        }
    }

    #[test]
    fn multibyte_text_does_not_panic() {
        let chunker = Chunker::new(50, 10);
        let text = "ロボット工学は面白い分野です。センサーと制御が鍵です。".repeat(20);
        let chunks = chunker.split(&text);
        assert!(!chunks.is_empty());
    }
}
