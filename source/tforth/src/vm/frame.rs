use std::rc::Rc;

use crate::{word::Word, Error};

/// One level of the nest stack: the running body and the index of the
/// next element to execute.
pub(crate) struct Frame<T: 'static> {
    pub(crate) word: Rc<Word<T>>,
    pub(crate) ip: usize,
}

impl<T: 'static> Frame<T> {
    pub(crate) fn new(word: Rc<Word<T>>, ip: usize) -> Self {
        Self { word, ip }
    }
}

/// The nest stack. Grows as needed; it mirrors call depth rather than any
/// native stack.
pub(crate) struct Frames<T: 'static> {
    frames: Vec<Frame<T>>,
}

impl<T: 'static> Frames<T> {
    pub(crate) fn new() -> Self {
        Self {
            frames: Vec::with_capacity(64),
        }
    }

    #[inline]
    pub(crate) fn depth(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub(crate) fn push(&mut self, frame: Frame<T>) {
        self.frames.push(frame);
    }

    #[inline]
    pub(crate) fn pop(&mut self) -> Option<Frame<T>> {
        self.frames.pop()
    }

    pub(crate) fn truncate(&mut self, depth: usize) {
        self.frames.truncate(depth);
    }

    pub(crate) fn clear(&mut self) {
        self.frames.clear();
    }

    /// The frame currently executing.
    pub(crate) fn current(&self) -> Result<&Frame<T>, Error> {
        self.frames.last().ok_or(Error::CallStackCorrupted)
    }

    pub(crate) fn current_mut(&mut self) -> Result<&mut Frame<T>, Error> {
        self.frames.last_mut().ok_or(Error::CallStackCorrupted)
    }

    /// The frame that called the current one. Primitives with inline
    /// operands, and jumps, act on this frame.
    pub(crate) fn parent(&self) -> Result<&Frame<T>, Error> {
        let idx = self.frames.len().checked_sub(2).ok_or(Error::CallStackCorrupted)?;
        Ok(&self.frames[idx])
    }

    pub(crate) fn parent_mut(&mut self) -> Result<&mut Frame<T>, Error> {
        let idx = self.frames.len().checked_sub(2).ok_or(Error::CallStackCorrupted)?;
        Ok(&mut self.frames[idx])
    }
}
