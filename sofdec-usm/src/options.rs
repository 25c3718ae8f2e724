use encoding_rs::{Encoding, UTF_8};

/// Largest stream page written by default. Frames up to this size occupy a
/// single chunk, which is what every Sofdec player expects.
pub const DEFAULT_MAX_PAGE_SIZE: usize = 0x10_0000;

/// Settings shared by the read and write paths.
///
/// # Example
///
/// ```
/// use sofdec_usm::Options;
///
/// let options = Options::new()
///     .encoding_label("shift_jis")
///     .unwrap()
///     .max_page_size(0x8000);
/// assert_eq!(options.encoding().name(), "Shift_JIS");
/// ```
#[derive(Clone, Copy, Debug)]
pub struct Options {
    encoding: &'static Encoding,
    max_page_size: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            encoding: UTF_8,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text encoding of `@UTF` string values.
    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    /// Largest payload of a single stream page.
    pub fn get_max_page_size(&self) -> usize {
        self.max_page_size
    }

    pub fn with_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Set the text encoding from a WHATWG label such as `utf-8` or `shift_jis`.
    /// Returns `None` for unknown labels.
    pub fn encoding_label(self, label: &str) -> Option<Self> {
        Encoding::for_label(label.as_bytes()).map(|encoding| self.with_encoding(encoding))
    }

    /// Values of zero are clamped to one byte.
    pub fn max_page_size(mut self, size: usize) -> Self {
        self.max_page_size = size.max(1);
        self
    }
}
