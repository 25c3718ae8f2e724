//! Splitting frames into stream pages and joining them back.
//!
//! Each page travels in its own stream chunk. Every page of a frame except
//! the last carries the continuation flag.

use crate::{Error, Result, codec::Framing};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Page {
    pub data: Vec<u8>,
    pub continuation: bool,
}

impl Page {
    pub fn new(data: Vec<u8>, continuation: bool) -> Self {
        Self { data, continuation }
    }
}

/// Split one frame into pages of at most `max_page_size` bytes.
///
/// Concatenating the pages gives back `frame`. An empty frame yields one
/// empty page.
pub fn mux_frame(frame: &[u8], framing: Framing, max_page_size: usize) -> Vec<Page> {
    let max_page_size = max_page_size.max(1);

    let pieces: Vec<&[u8]> = if frame.len() <= max_page_size {
        vec![frame]
    } else {
        match framing {
            Framing::WholeFrame => frame.chunks(max_page_size).collect(),
            Framing::NalUnits => pack_nal_units(frame, max_page_size),
        }
    };

    let last = pieces.len() - 1;
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, x)| Page::new(x.to_vec(), i != last))
        .collect()
}

/// Offsets where Annex-B NAL units start, 4-byte start codes included. The
/// first entry is always 0 so that leading bytes form their own unit.
pub(crate) fn nal_boundaries(data: &[u8]) -> Vec<usize> {
    let mut boundaries = vec![0];
    let mut i = 0;

    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            let start = if i > 0 && data[i - 1] == 0 { i - 1 } else { i };

            if start > *boundaries.last().unwrap_or(&0) {
                boundaries.push(start);
            }

            i += 3;
        } else {
            i += 1;
        }
    }

    boundaries
}

fn pack_nal_units(frame: &[u8], max_page_size: usize) -> Vec<&[u8]> {
    let boundaries = nal_boundaries(frame);
    let mut pages = vec![];
    // Start of the page being filled.
    let mut page_start = 0;

    for (i, &unit_start) in boundaries.iter().enumerate() {
        let unit_end = boundaries.get(i + 1).copied().unwrap_or(frame.len());

        if unit_end - unit_start > max_page_size {
            if unit_start > page_start {
                pages.push(&frame[page_start..unit_start]);
            }

            pages.extend(frame[unit_start..unit_end].chunks(max_page_size));
            page_start = unit_end;
        } else if unit_end - page_start > max_page_size {
            pages.push(&frame[page_start..unit_start]);
            page_start = unit_start;
        }
    }

    if page_start < frame.len() {
        pages.push(&frame[page_start..]);
    }

    pages
}

/// Joins pages back into frames.
///
/// # Example
///
/// ```
/// use sofdec_usm::{Demuxer, Page};
///
/// let mut demuxer = Demuxer::new();
/// assert_eq!(demuxer.push(Page::new(vec![1, 2], true)), None);
/// assert_eq!(demuxer.push(Page::new(vec![3], false)), Some(vec![1, 2, 3]));
/// ```
#[derive(Debug, Default)]
pub struct Demuxer {
    buffer: Vec<u8>,
    pages: usize,
}

impl Demuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the next page of the stream. Returns the frame it completes, if any.
    pub fn push(&mut self, page: Page) -> Option<Vec<u8>> {
        if page.continuation {
            self.buffer.extend_from_slice(&page.data);
            self.pages += 1;
            return None;
        }

        self.pages = 0;

        if self.buffer.is_empty() {
            Some(page.data)
        } else {
            let mut frame = std::mem::take(&mut self.buffer);
            frame.extend_from_slice(&page.data);
            Some(frame)
        }
    }

    /// True when no fragmented frame is pending.
    pub fn is_idle(&self) -> bool {
        self.pages == 0
    }

    /// Check that the stream did not end inside a frame.
    pub fn finish(&self, stream: &str) -> Result<()> {
        if self.is_idle() {
            Ok(())
        } else {
            Err(Error::IncompleteFrame {
                stream: stream.to_owned(),
                pages: self.pages,
            })
        }
    }
}

/// Lazy frames over an iterator of pages.
pub struct Frames<I> {
    pages: I,
    demuxer: Demuxer,
    stream: String,
    done: bool,
}

impl<I> Frames<I>
where
    I: Iterator<Item = Result<Page>>,
{
    /// `stream` names the stream in [`Error::IncompleteFrame`].
    pub fn new(pages: I, stream: impl Into<String>) -> Self {
        Self {
            pages,
            demuxer: Demuxer::new(),
            stream: stream.into(),
            done: false,
        }
    }
}

impl<I> Iterator for Frames<I>
where
    I: Iterator<Item = Result<Page>>,
{
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            match self.pages.next() {
                Some(Ok(page)) => {
                    if let Some(frame) = self.demuxer.push(page) {
                        return Some(Ok(frame));
                    }
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    return self.demuxer.finish(&self.stream).err().map(Err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demux(pages: Vec<Page>) -> Result<Vec<Vec<u8>>> {
        Frames::new(pages.into_iter().map(Ok), "@SFV 0").collect()
    }

    #[test]
    fn test_whole_frame_fits() {
        let pages = mux_frame(&[1, 2, 3], Framing::WholeFrame, 3);
        assert_eq!(pages, vec![Page::new(vec![1, 2, 3], false)]);
    }

    #[test]
    fn test_whole_frame_split() {
        let frame: Vec<u8> = (0..10).collect();
        let pages = mux_frame(&frame, Framing::WholeFrame, 4);
        assert_eq!(pages.len(), 3);
        assert!(pages[0].continuation && pages[1].continuation && !pages[2].continuation);
        assert_eq!(pages[2].data, vec![8, 9]);
        assert_eq!(demux(pages).unwrap(), vec![frame]);
    }

    #[test]
    fn test_empty_frame() {
        let pages = mux_frame(&[], Framing::NalUnits, 16);
        assert_eq!(pages, vec![Page::new(vec![], false)]);
        assert_eq!(demux(pages).unwrap(), vec![Vec::<u8>::new()]);
    }

    #[test]
    fn test_nal_boundaries() {
        let data = [0, 0, 0, 1, 0x67, 0xAA, 0, 0, 1, 0x68, 0xBB, 0, 0, 0, 1, 0x65];
        assert_eq!(nal_boundaries(&data), vec![0, 6, 11]);
    }

    #[test]
    fn test_nal_units_packed_greedily() {
        let mut frame = vec![];
        frame.extend([0, 0, 0, 1, 0x67, 1, 2, 3]); // 8 bytes
        frame.extend([0, 0, 0, 1, 0x68, 4]); // 6 bytes
        frame.extend([0, 0, 1, 0x65, 5, 6, 7, 8, 9]); // 9 bytes

        let pages = mux_frame(&frame, Framing::NalUnits, 14);
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].data.len(), 14);
        assert_eq!(pages[1].data, vec![0, 0, 1, 0x65, 5, 6, 7, 8, 9]);
        assert_eq!(demux(pages).unwrap(), vec![frame]);
    }

    #[test]
    fn test_oversize_nal_unit() {
        let mut frame = vec![0, 0, 0, 1, 0x67, 1];
        frame.extend([0, 0, 0, 1, 0x65]);
        frame.extend(std::iter::repeat_n(0xEE, 30));

        let pages = mux_frame(&frame, Framing::NalUnits, 8);
        assert_eq!(pages[0].data, vec![0, 0, 0, 1, 0x67, 1]);
        assert!(pages.iter().all(|x| x.data.len() <= 8));
        assert_eq!(demux(pages.clone()).unwrap(), vec![frame]);
        let joined: Vec<u8> = pages.iter().flat_map(|x| x.data.clone()).collect();
        assert_eq!(mux_frame(&joined, Framing::NalUnits, 8), pages);
    }

    #[test]
    fn test_incomplete_frame() {
        let result = demux(vec![Page::new(vec![1], false), Page::new(vec![2], true)]);
        assert!(matches!(
            result,
            Err(Error::IncompleteFrame { pages: 1, .. })
        ));
    }
}
