//! Presentation-side buffering and best-effort chunk merging.

use crate::types::StreamChunk;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Default coalescing window.
pub const DEFAULT_COALESCE_WINDOW: Duration = Duration::from_millis(50);

type Sink = Arc<dyn Fn(String) + Send + Sync>;

/// Batches many small content deltas into fewer, larger deliveries.
///
/// The window opens with the first pending [`add`](Self::add); everything
/// added before it closes is delivered as one string. This sits on top of
/// a chunk stream and never replaces it. Must be used inside a Tokio runtime.
pub struct CoalescingBuffer {
    window: Duration,
    sink: Sink,
    state: Arc<Mutex<CoalesceState>>,
}

#[derive(Default)]
struct CoalesceState {
    pending: String,
    timer: Option<JoinHandle<()>>,
    generation: u64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CoalescingBuffer {
    pub fn new(window: Duration, sink: impl Fn(String) + Send + Sync + 'static) -> Self {
        Self {
            window,
            sink: Arc::new(sink),
            state: Arc::new(Mutex::new(CoalesceState::default())),
        }
    }

    /// Queue content for the next delivery.
    pub fn add(&self, content: &str) {
        if content.is_empty() {
            return;
        }
        let mut state = lock(&self.state);
        state.pending.push_str(content);
        if state.timer.is_some() {
            return;
        }

        let generation = state.generation;
        let shared = Arc::clone(&self.state);
        let sink = Arc::clone(&self.sink);
        let window = self.window;
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let batch = {
                let mut state = lock(&shared);
                if state.generation != generation {
                    return;
                }
                state.generation += 1;
                state.timer = None;
                std::mem::take(&mut state.pending)
            };
            if !batch.is_empty() {
                sink(batch);
            }
        }));
    }

    /// Deliver pending content immediately.
    pub fn flush(&self) {
        let batch = {
            let mut state = lock(&self.state);
            Self::cancel_timer(&mut state);
            std::mem::take(&mut state.pending)
        };
        if !batch.is_empty() {
            (self.sink)(batch);
        }
    }

    /// Discard pending content without delivering it.
    pub fn clear(&self) {
        let mut state = lock(&self.state);
        Self::cancel_timer(&mut state);
        state.pending.clear();
    }

    /// Bytes waiting for delivery.
    pub fn pending_len(&self) -> usize {
        lock(&self.state).pending.len()
    }

    fn cancel_timer(state: &mut CoalesceState) {
        state.generation += 1;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for CoalescingBuffer {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        Self::cancel_timer(&mut state);
    }
}

/// Merge chunks that form one logical unit.
///
/// Contents are concatenated, dropping the longest suffix/prefix overlap
/// between adjacent chunks. `done` and `metadata` come from the last chunk.
/// This is a heuristic for transports that redeliver boundary bytes: a
/// legitimate repetition across a boundary is elided too.
pub fn merge_stream_chunks(chunks: &[StreamChunk]) -> Option<StreamChunk> {
    let last = chunks.last()?;
    let mut content = String::new();
    let mut previous: Option<&str> = None;

    for chunk in chunks {
        let overlap = previous.map_or(0, |prev| overlap_len(prev, &chunk.content));
        content.push_str(&chunk.content[overlap..]);
        previous = Some(chunk.content.as_str());
    }

    Some(StreamChunk {
        content,
        done: last.done,
        metadata: last.metadata.clone(),
    })
}

/// Longest `n` such that the last `n` bytes of `prev` equal the first `n`
/// bytes of `next`, considering char boundaries only.
fn overlap_len(prev: &str, next: &str) -> usize {
    let max = prev.len().min(next.len());
    (1..=max)
        .rev()
        .find(|&len| {
            let start = prev.len() - len;
            prev.is_char_boundary(start)
                && next.is_char_boundary(len)
                && prev[start..] == next[..len]
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChunkMetadata, TokenUsage};

    #[test]
    fn test_merge_elides_overlap() {
        let merged = merge_stream_chunks(&[StreamChunk::delta("abcde"), StreamChunk::delta("cdefg")])
            .unwrap();
        assert_eq!(merged.content, "abcdefg");
    }

    #[test]
    fn test_merge_longest_overlap_wins() {
        let merged =
            merge_stream_chunks(&[StreamChunk::delta("hello wor"), StreamChunk::delta("world")])
                .unwrap();
        assert_eq!(merged.content, "hello world");
        assert_eq!(merged.content.len(), 11);
    }

    #[test]
    fn test_merge_without_overlap_concatenates() {
        let merged =
            merge_stream_chunks(&[StreamChunk::delta("foo"), StreamChunk::delta("bar")]).unwrap();
        assert_eq!(merged.content, "foobar");
    }

    #[test]
    fn test_merge_takes_done_and_metadata_from_last() {
        let metadata = ChunkMetadata {
            usage: Some(TokenUsage::new(1, 2)),
            ..Default::default()
        };
        let merged = merge_stream_chunks(&[
            StreamChunk::delta("a"),
            StreamChunk::finished("b", metadata.clone()),
        ])
        .unwrap();
        assert!(merged.done);
        assert_eq!(merged.metadata, Some(metadata));
    }

    #[test]
    fn test_merge_respects_char_boundaries() {
        let merged =
            merge_stream_chunks(&[StreamChunk::delta("caf\u{e9}"), StreamChunk::delta("\u{e9}t\u{e9}")])
                .unwrap();
        assert_eq!(merged.content, "caf\u{e9}t\u{e9}");
    }

    #[test]
    fn test_merge_empty_input() {
        assert!(merge_stream_chunks(&[]).is_none());
    }

    fn collecting_buffer(window: Duration) -> (CoalescingBuffer, Arc<Mutex<Vec<String>>>) {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&delivered);
        let buffer = CoalescingBuffer::new(window, move |batch| sink.lock().unwrap().push(batch));
        (buffer, delivered)
    }

    #[tokio::test(start_paused = true)]
    async fn test_coalesces_within_window() {
        let (buffer, delivered) = collecting_buffer(Duration::from_millis(50));
        buffer.add("He");
        buffer.add("llo");
        assert!(delivered.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(*delivered.lock().unwrap(), vec!["Hello".to_string()]);

        buffer.add("!");
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(delivered.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_delivers_immediately() {
        let (buffer, delivered) = collecting_buffer(Duration::from_secs(10));
        buffer.add("now");
        buffer.flush();
        assert_eq!(*delivered.lock().unwrap(), vec!["now".to_string()]);
        assert_eq!(buffer.pending_len(), 0);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_discards() {
        let (buffer, delivered) = collecting_buffer(Duration::from_millis(20));
        buffer.add("gone");
        buffer.clear();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(delivered.lock().unwrap().is_empty());
    }
}
