use crate::{VmError, VmResult, Word, CALLSTACK_CAPACITY, LOCALS_CAPACITY};

/// Activation record of one CALL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    return_ip: usize,
    locals: [Word; LOCALS_CAPACITY],
    len: usize,
}

impl Frame {
    /// A zeroed frame with `len` addressable locals.
    pub fn new(return_ip: usize, len: usize) -> VmResult<Self> {
        if len > LOCALS_CAPACITY {
            return Err(VmError::TooManyLocals {
                requested: len,
                capacity: LOCALS_CAPACITY,
            });
        }
        Ok(Self {
            return_ip,
            locals: [0; LOCALS_CAPACITY],
            len,
        })
    }

    pub fn return_ip(&self) -> usize {
        self.return_ip
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn slot(&self, index: Word) -> VmResult<usize> {
        usize::try_from(index)
            .ok()
            .filter(|&slot| slot < self.len)
            .ok_or(VmError::InvalidLocalIndex {
                index,
                len: self.len,
            })
    }

    pub fn local(&self, index: Word) -> VmResult<Word> {
        Ok(self.locals[self.slot(index)?])
    }

    pub fn set_local(&mut self, index: Word, value: Word) -> VmResult<()> {
        let slot = self.slot(index)?;
        self.locals[slot] = value;
        Ok(())
    }

    pub fn locals(&self) -> &[Word] {
        &self.locals[..self.len]
    }
}

/// Fixed-capacity LIFO of frames; the pointer is `-1` when no call is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallStack {
    frames: Vec<Frame>,
    capacity: usize,
}

impl Default for CallStack {
    fn default() -> Self {
        Self::with_capacity(CALLSTACK_CAPACITY)
    }
}

impl CallStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            frames: Vec::new(),
            capacity,
        }
    }

    pub fn push(&mut self, frame: Frame) -> VmResult<()> {
        if self.frames.len() >= self.capacity {
            return Err(VmError::CallStackOverflow {
                capacity: self.capacity,
            });
        }
        self.frames.push(frame);
        Ok(())
    }

    pub fn pop(&mut self) -> VmResult<Frame> {
        self.frames.pop().ok_or(VmError::CallStackUnderflow)
    }

    pub fn current(&self) -> VmResult<&Frame> {
        self.frames.last().ok_or(VmError::CallStackUnderflow)
    }

    pub fn current_mut(&mut self) -> VmResult<&mut Frame> {
        self.frames.last_mut().ok_or(VmError::CallStackUnderflow)
    }

    pub fn pointer(&self) -> Word {
        self.frames.len() as Word - 1
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}
