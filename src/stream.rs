use std::io::{self, BufRead};
use std::str::Chars;

/// Default number of already-consumed characters that stay addressable.
pub const DEFAULT_LOOK_BEHIND: usize = 4;

const INITIAL_CAPACITY: usize = 256;

/// Somewhere characters come from.
pub trait CharSource {
    /// Returns the next character, `Ok(None)` at end of input.
    fn next_char(&mut self) -> io::Result<Option<char>>;
}

/// Characters of an in-memory string.
pub struct StrSource<'a> {
    chars: Chars<'a>,
}

impl<'a> StrSource<'a> {
    pub fn new(text: &'a str) -> Self {
        Self { chars: text.chars() }
    }
}

impl CharSource for StrSource<'_> {
    fn next_char(&mut self) -> io::Result<Option<char>> {
        Ok(self.chars.next())
    }
}

/// Characters decoded incrementally from UTF-8 bytes.
pub struct ReaderSource<R> {
    reader: R,
}

impl<R: BufRead> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let buf = self.reader.fill_buf()?;
        let Some(&byte) = buf.first() else {
            return Ok(None);
        };
        self.reader.consume(1);
        Ok(Some(byte))
    }
}

impl<R: BufRead> CharSource for ReaderSource<R> {
    fn next_char(&mut self) -> io::Result<Option<char>> {
        let Some(lead) = self.read_byte()? else {
            return Ok(None);
        };
        let width = match lead {
            0x00..=0x7F => return Ok(Some(lead as char)),
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => return Err(invalid_utf8()),
        };
        let mut bytes = [lead, 0, 0, 0];
        for slot in bytes.iter_mut().take(width).skip(1) {
            *slot = self.read_byte()?.ok_or_else(invalid_utf8)?;
        }
        std::str::from_utf8(&bytes[..width])
            .ok()
            .and_then(|s| s.chars().next())
            .map(Some)
            .ok_or_else(invalid_utf8)
    }
}

fn invalid_utf8() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, "stream did not contain valid UTF-8")
}

pub struct CharStream<S> {
    source: S,
    buffer: Vec<char>,
    /// Absolute index of `buffer[0]`.
    base: usize,
    /// Absolute index of the next unconsumed character.
    position: usize,
    look_behind: usize,
    mark: Option<usize>,
    exhausted: bool,
    error: Option<io::Error>,
}

impl<'a> CharStream<StrSource<'a>> {
    pub fn from_text(text: &'a str, look_behind: usize) -> Self {
        Self::new(StrSource::new(text), look_behind)
    }
}

impl<R: BufRead> CharStream<ReaderSource<R>> {
    pub fn from_reader(reader: R, look_behind: usize) -> Self {
        Self::new(ReaderSource::new(reader), look_behind)
    }
}

impl<S: CharSource> CharStream<S> {
    pub fn new(source: S, look_behind: usize) -> Self {
        Self::with_capacity(source, look_behind, INITIAL_CAPACITY)
    }

    pub fn with_capacity(source: S, look_behind: usize, capacity: usize) -> Self {
        Self {
            source,
            buffer: Vec::with_capacity(capacity.max(1)),
            base: 0,
            position: 0,
            look_behind,
            mark: None,
            exhausted: false,
            error: None,
        }
    }

    /// Absolute index of the next unconsumed character.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Returns the character at `position + offset - 1`.
    ///
    /// `look_ahead(1)` is the next pending character and `look_ahead(0)` the
    /// one consumed last. Offsets below `-look_behind` violate the stream
    /// contract and panic.
    pub fn look_ahead(&mut self, offset: isize) -> Option<char> {
        if offset <= 0 {
            assert!(
                offset.unsigned_abs() <= self.look_behind,
                "look-behind of {} exceeds the bound of {}",
                offset.unsigned_abs() + 1,
                self.look_behind + 1
            );
        }
        let index = self.position as isize + offset - 1;
        if index < 0 {
            return None;
        }
        let index = index as usize;
        assert!(index >= self.base, "character {index} was already discarded");
        self.fill(index + 1);
        self.buffer.get(index - self.base).copied()
    }

    /// Advances past `n` characters and returns the next pending one.
    pub fn consume(&mut self, n: usize) -> Option<char> {
        self.fill(self.position + n);
        let end = self.base + self.buffer.len();
        self.position = (self.position + n).min(end);
        self.look_ahead(1)
    }

    /// Pins the current position so it survives compaction until
    /// [`release`](Self::release).
    pub fn mark(&mut self) -> usize {
        self.mark = Some(self.position);
        self.position
    }

    pub fn release(&mut self) {
        self.mark = None;
    }

    /// Collects the characters in `[start, end)`.
    ///
    /// The range must lie inside the retained window (a marked region or the
    /// look-behind), otherwise this panics.
    pub fn substring(&self, start: usize, end: usize) -> String {
        assert!(
            start <= end && start >= self.base && end <= self.base + self.buffer.len(),
            "substring {start}..{end} is outside the retained window {}..{}",
            self.base,
            self.base + self.buffer.len()
        );
        self.buffer[start - self.base..end - self.base].iter().collect()
    }

    /// Takes the read failure that ended the input early, if any.
    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }

    fn retained_start(&self) -> usize {
        let behind = self.position.saturating_sub(self.look_behind + 1);
        self.mark.map_or(behind, |mark| mark.min(behind))
    }

    /// Makes sure characters up to absolute index `end` (exclusive) are
    /// buffered, unless the input ends first.
    fn fill(&mut self, end: usize) {
        while !self.exhausted && self.base + self.buffer.len() < end {
            if self.buffer.len() == self.buffer.capacity() {
                self.make_room();
            }
            match self.source.next_char() {
                Ok(Some(c)) => self.buffer.push(c),
                Ok(None) => self.exhausted = true,
                Err(err) => {
                    self.exhausted = true;
                    self.error = Some(err);
                }
            }
        }
    }

    fn make_room(&mut self) {
        let discard = self.retained_start().saturating_sub(self.base);
        if discard > 0 {
            self.buffer.drain(..discard);
            self.base += discard;
        } else {
            let capacity = self.buffer.capacity();
            self.buffer.reserve_exact(capacity);
        }
    }
}
