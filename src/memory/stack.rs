use std::fmt::Write as _;

use crate::{VmError, VmResult, Word, STACK_CAPACITY};

/// Fixed-capacity LIFO of words. The stack pointer is `len - 1`, so `-1` when empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperandStack {
    values: Vec<Word>,
    capacity: usize,
}

impl Default for OperandStack {
    fn default() -> Self {
        Self::with_capacity(STACK_CAPACITY)
    }
}

impl OperandStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity.min(STACK_CAPACITY)),
            capacity,
        }
    }

    pub fn push(&mut self, value: Word) -> VmResult<()> {
        if self.values.len() >= self.capacity {
            return Err(VmError::StackOverflow {
                capacity: self.capacity,
            });
        }
        self.values.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> VmResult<Word> {
        self.values.pop().ok_or(VmError::StackUnderflow)
    }

    /// Value `depth` slots below the top; `peek(0)` is the top.
    pub fn peek(&self, depth: usize) -> VmResult<Word> {
        self.values
            .len()
            .checked_sub(depth + 1)
            .map(|index| self.values[index])
            .ok_or(VmError::StackUnderflow)
    }

    /// Drops the top `count` values.
    pub fn discard(&mut self, count: usize) -> VmResult<()> {
        let Some(len) = self.values.len().checked_sub(count) else {
            return Err(VmError::StackUnderflow);
        };
        self.values.truncate(len);
        Ok(())
    }

    pub fn pointer(&self) -> Word {
        self.values.len() as Word - 1
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Word] {
        &self.values
    }

    /// Bottom-to-top rendering, each value preceded by one space.
    pub fn snapshot(&self) -> String {
        let mut out = String::new();
        for value in &self.values {
            let _ = write!(out, " {value}");
        }
        out
    }
}
