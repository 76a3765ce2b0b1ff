use core::fmt;

/// Bounded text output of the VM.
///
/// The host drains it (usually after each line) with [`OutputBuf::as_str`]
/// and [`OutputBuf::clear`].
pub struct OutputBuf {
    buf: String,
    capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputError {
    OutputFull,
    FormattingErr,
}

impl OutputBuf {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: String::with_capacity(capacity),
            capacity,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push_str(&mut self, stir: &str) -> Result<(), OutputError> {
        if self.buf.len() + stir.len() > self.capacity {
            Err(OutputError::OutputFull)
        } else {
            self.buf.push_str(stir);
            Ok(())
        }
    }

    pub fn push_bstr(&mut self, bstr: &[u8]) -> Result<(), OutputError> {
        let stir = core::str::from_utf8(bstr).map_err(|_| OutputError::FormattingErr)?;
        self.push_str(stir)
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }
}

impl fmt::Write for OutputBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.push_str(s).map_err(|_| fmt::Error)
    }
}

impl fmt::Display for OutputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputError::OutputFull => "output buffer full",
            OutputError::FormattingErr => "output formatting failed",
        })
    }
}

#[cfg(test)]
pub mod test {
    use core::fmt::Write;

    use super::{OutputBuf, OutputError};

    #[test]
    fn bounded() {
        let mut out = OutputBuf::new(8);
        out.push_str("hello").unwrap();
        assert_eq!(out.push_str("world"), Err(OutputError::OutputFull));
        assert_eq!(out.as_str(), "hello");
        write!(&mut out, "{}", 42).unwrap();
        assert_eq!(out.as_str(), "hello42");
        out.clear();
        assert_eq!(out.as_str(), "");
    }
}
