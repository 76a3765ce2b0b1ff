use core::fmt;

/// Which of the VM's stacks an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackKind {
    Data,
    Return,
    Temp,
    Self_,
}

pub struct Stack<T> {
    items: Vec<T>,
    capacity: usize,
    kind: StackKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackError {
    StackEmpty(StackKind),
    StackFull(StackKind),
    OverwriteInvalid(StackKind),
}

impl<T> Stack<T> {
    pub fn new(kind: StackKind, capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
            kind,
        }
    }

    #[inline]
    pub fn kind(&self) -> StackKind {
        self.kind
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn push(&mut self, item: T) -> Result<(), StackError> {
        if self.items.len() >= self.capacity {
            return Err(StackError::StackFull(self.kind));
        }
        self.items.push(item);
        Ok(())
    }

    /// Fails unless `n` more items fit, so words pushing several items
    /// can check up front and leave the stack untouched on overflow.
    #[inline]
    pub fn ensure_room(&self, n: usize) -> Result<(), StackError> {
        if self.capacity - self.items.len() < n {
            return Err(StackError::StackFull(self.kind));
        }
        Ok(())
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn try_pop(&mut self) -> Result<T, StackError> {
        self.items.pop().ok_or(StackError::StackEmpty(self.kind))
    }

    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop()
    }

    #[inline]
    pub fn try_peek(&self) -> Result<&T, StackError> {
        self.items.last().ok_or(StackError::StackEmpty(self.kind))
    }

    #[inline]
    pub fn peek(&self) -> Option<&T> {
        self.items.last()
    }

    /// Peek `n` items below the top; `n == 0` is the top of the stack.
    #[inline]
    pub fn peek_back_n(&self, n: usize) -> Option<&T> {
        let idx = self.items.len().checked_sub(n + 1)?;
        self.items.get(idx)
    }

    #[inline]
    pub fn try_peek_back_n(&self, n: usize) -> Result<&T, StackError> {
        self.peek_back_n(n).ok_or(StackError::StackEmpty(self.kind))
    }

    #[inline]
    pub fn peek_back_n_mut(&mut self, n: usize) -> Option<&mut T> {
        let idx = self.items.len().checked_sub(n + 1)?;
        self.items.get_mut(idx)
    }

    #[inline]
    pub fn overwrite_back_n(&mut self, n: usize, item: T) -> Result<(), StackError> {
        let kind = self.kind;
        let slot = self
            .peek_back_n_mut(n)
            .ok_or(StackError::OverwriteInvalid(kind))?;
        *slot = item;
        Ok(())
    }

    /// Drops every held item, releasing any references they carry.
    #[inline]
    pub fn clear(&mut self) {
        self.items.clear();
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate from the bottom of the stack to the top.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        self.items.iter()
    }
}

impl fmt::Display for StackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StackKind::Data => "data",
            StackKind::Return => "return",
            StackKind::Temp => "temp",
            StackKind::Self_ => "self",
        })
    }
}

impl fmt::Display for StackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackError::StackEmpty(k) => write!(f, "{k} stack underflow"),
            StackError::StackFull(k) => write!(f, "{k} stack overflow"),
            StackError::OverwriteInvalid(k) => write!(f, "invalid {k} stack overwrite"),
        }
    }
}

#[cfg(test)]
pub mod test {
    use std::rc::Rc;

    use super::{Stack, StackError, StackKind};

    #[test]
    fn stack() {
        const ITEMS: usize = 16;
        let mut stack = Stack::<i64>::new(StackKind::Data, ITEMS);

        for _ in 0..3 {
            for i in 0..(ITEMS as i64) {
                assert!(stack.push(i).is_ok());
            }
            assert_eq!(stack.push(100), Err(StackError::StackFull(StackKind::Data)));
            assert_eq!(stack.depth(), ITEMS);
            for i in (0..(ITEMS as i64)).rev() {
                assert_eq!(stack.pop().unwrap(), i);
            }
            assert!(stack.pop().is_none());
            assert_eq!(stack.try_pop(), Err(StackError::StackEmpty(StackKind::Data)));
            assert_eq!(stack.depth(), 0);
        }
    }

    #[test]
    fn peek_back() {
        let mut stack = Stack::<i64>::new(StackKind::Return, 4);
        stack.push(1).unwrap();
        stack.push(2).unwrap();
        stack.push(3).unwrap();
        assert_eq!(stack.peek_back_n(0), Some(&3));
        assert_eq!(stack.peek_back_n(2), Some(&1));
        assert_eq!(stack.peek_back_n(3), None);
        assert_eq!(stack.ensure_room(1), Ok(()));
        assert_eq!(
            stack.ensure_room(2),
            Err(StackError::StackFull(StackKind::Return))
        );
        stack.overwrite_back_n(1, 20).unwrap();
        assert_eq!(stack.try_peek_back_n(1), Ok(&20));
        assert_eq!(
            stack.overwrite_back_n(5, 0),
            Err(StackError::OverwriteInvalid(StackKind::Return))
        );
        assert_eq!(stack.iter().copied().collect::<Vec<_>>(), vec![1, 20, 3]);
    }

    #[test]
    fn clear_releases_once() {
        let shared = Rc::new(());
        for depth in [0usize, 1, 7] {
            let mut stack = Stack::new(StackKind::Temp, 8);
            for _ in 0..depth {
                stack.push(shared.clone()).unwrap();
            }
            assert_eq!(Rc::strong_count(&shared), depth + 1);
            stack.clear();
            stack.clear();
            assert_eq!(stack.depth(), 0);
            assert_eq!(Rc::strong_count(&shared), 1);
        }
    }
}
