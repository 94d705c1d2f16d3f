//! Deterministic payload bodies
//!
//! Request bodies are slices of a fixed text corpus, so a reply can be
//! checked by eye in a capture and two runs with the same lengths put the
//! same bytes on the wire.

use bytes::{BufMut, Bytes, BytesMut};

/// Three paragraphs, 176 words, 1230 bytes of Lorem Ipsum
pub const LOREM_IPSUM: &[u8] = concat!(
    "Lorem ipsum dolor sit amet, consectetur adipiscing elit. ",
    "Vestibulum id cursus felis, sit amet suscipit velit. Integer ",
    "facilisis malesuada porta. Nunc at accumsan mauris. Etiam vehicula, ",
    "arcu consequat feugiat venenatis, tellus velit gravida ligula, quis ",
    "posuere sem leo eget urna. Curabitur condimentum leo nec orci ",
    "mattis, nec faucibus dui rutrum. Ut mollis orci in iaculis ",
    "consequat. Nulla volutpat nibh eu velit sagittis, a iaculis dui ",
    "aliquam.",
    "\n",
    "Quisque interdum consequat eros a eleifend. Fusce dapibus nisl ",
    "sit amet velit posuere imperdiet. Quisque accumsan tempor massa ",
    "sit amet tincidunt. Integer sollicitudin vehicula tristique. Nulla ",
    "sagittis massa turpis, ac ultricies neque posuere eu. Nulla et ",
    "imperdiet ex. Etiam venenatis sed lacus tincidunt hendrerit. In ",
    "libero nisl, congue id tellus vitae, tincidunt tristique mauris. ",
    "Nullam sed porta massa. Sed condimentum sem eu convallis euismod. ",
    "Suspendisse lobortis purus faucibus, gravida turpis id, mattis ",
    "velit. Maecenas eleifend sapien eu tincidunt lobortis. Sed elementum ",
    "sapien id enim laoreet consequat.",
    "\n",
    "Aenean et neque aliquam, lobortis lectus in, consequat leo. Sed ",
    "quis egestas nulla. Quisque ac risus quis elit mollis finibus. ",
    "Phasellus efficitur imperdiet metus.",
    "\n",
)
.as_bytes();

/// Corpus-backed payload generator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadSource {
    corpus: &'static [u8],
    offset: usize,
}

impl PayloadSource {
    /// Create a source reading `corpus` from `offset` (taken modulo the
    /// corpus length)
    pub fn new(corpus: &'static [u8], offset: usize) -> Self {
        let offset = if corpus.is_empty() {
            0
        } else {
            offset % corpus.len()
        };
        PayloadSource { corpus, offset }
    }

    /// Size of the underlying corpus
    #[inline]
    pub fn corpus_len(&self) -> usize {
        self.corpus.len()
    }

    /// Start offset into the corpus
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Produce `len` bytes of corpus starting at the configured offset
    ///
    /// Wraps to the start of the corpus when the slice runs past its end.
    /// Requests longer than the corpus are clamped to the corpus length.
    /// Slices that do not wrap borrow the static corpus without copying.
    pub fn generate(&self, len: usize) -> Bytes {
        let len = len.min(self.corpus.len());
        let head = &self.corpus[self.offset..];

        if len <= head.len() {
            return Bytes::from_static(&head[..len]);
        }

        let mut buf = BytesMut::with_capacity(len);
        buf.put_slice(head);
        buf.put_slice(&self.corpus[..len - head.len()]);
        buf.freeze()
    }
}

impl Default for PayloadSource {
    fn default() -> Self {
        PayloadSource::new(LOREM_IPSUM, 0)
    }
}
