//! Fixed-capacity pools for call frames and loop cursors
//!
//! Entries are reused in place: `push` hands out the next slot reset to its
//! default, `pop` steps back. Entries are allocated lazily the first time a
//! depth is reached.

use super::error::{Result, VmError};

/// Which pool overflowed; selects the error variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Frame,
    Loop,
}

impl PoolKind {
    fn name(self) -> &'static str {
        match self {
            PoolKind::Frame => "frame",
            PoolKind::Loop => "loop",
        }
    }
}

#[derive(Debug)]
pub struct StackPool<T> {
    kind: PoolKind,
    capacity: usize,
    values: Vec<T>,
    len: usize,
}

impl<T: Default> StackPool<T> {
    pub fn new(kind: PoolKind, capacity: usize) -> Self {
        Self {
            kind,
            capacity,
            values: Vec::new(),
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Forget every entry.
    pub fn reset(&mut self) {
        self.len = 0;
    }

    /// Take the next entry, reset to its default. Returns its index.
    pub fn push(&mut self) -> Result<usize> {
        if self.len >= self.capacity {
            return Err(match self.kind {
                PoolKind::Frame => VmError::FramePoolOverflow { capacity: self.capacity },
                PoolKind::Loop => VmError::LoopPoolOverflow { capacity: self.capacity },
            });
        }
        if self.len == self.values.len() {
            self.values.push(T::default());
        } else {
            self.values[self.len] = T::default();
        }
        self.len += 1;
        Ok(self.len - 1)
    }

    pub fn pop(&mut self) -> Result<()> {
        if self.len == 0 {
            return Err(VmError::PoolUnderflow { pool: self.kind.name() });
        }
        self.len -= 1;
        Ok(())
    }

    pub fn at(&self, index: usize) -> Option<&T> {
        self.values[..self.len].get(index)
    }

    pub fn at_mut(&mut self, index: usize) -> Option<&mut T> {
        self.values[..self.len].get_mut(index)
    }

    /// The most recently pushed entry.
    pub fn current(&self) -> Result<&T> {
        self.len
            .checked_sub(1)
            .map(|i| &self.values[i])
            .ok_or(VmError::PoolUnderflow { pool: self.kind.name() })
    }

    pub fn current_mut(&mut self) -> Result<&mut T> {
        match self.len.checked_sub(1) {
            Some(i) => Ok(&mut self.values[i]),
            None => Err(VmError::PoolUnderflow { pool: self.kind.name() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_resets_reused_entry() {
        let mut pool: StackPool<u32> = StackPool::new(PoolKind::Frame, 4);
        let i = pool.push().unwrap();
        *pool.at_mut(i).unwrap() = 7;
        pool.pop().unwrap();
        let j = pool.push().unwrap();
        assert_eq!(i, j);
        assert_eq!(*pool.current().unwrap(), 0);
    }

    #[test]
    fn test_overflow_is_fatal() {
        let mut pool: StackPool<u32> = StackPool::new(PoolKind::Loop, 2);
        pool.push().unwrap();
        pool.push().unwrap();
        assert_eq!(pool.push(), Err(VmError::LoopPoolOverflow { capacity: 2 }));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_underflow_is_fatal() {
        let mut pool: StackPool<u32> = StackPool::new(PoolKind::Frame, 2);
        assert_eq!(pool.pop(), Err(VmError::PoolUnderflow { pool: "frame" }));
        assert!(pool.current().is_err());
    }

    #[test]
    fn test_reset_and_at() {
        let mut pool: StackPool<u32> = StackPool::new(PoolKind::Frame, 8);
        for value in 1..=3 {
            let i = pool.push().unwrap();
            *pool.at_mut(i).unwrap() = value;
        }
        assert_eq!(pool.at(1), Some(&2));
        assert_eq!(pool.at(3), None);
        pool.reset();
        assert!(pool.is_empty());
        assert_eq!(pool.at(0), None);
    }
}
