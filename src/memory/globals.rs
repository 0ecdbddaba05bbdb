use std::fmt::Write as _;

use crate::{VmError, VmResult, Word};

/// Zero-initialised global memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Globals {
    cells: Vec<Word>,
}

impl Globals {
    pub fn new(count: usize) -> Self {
        Self {
            cells: vec![0; count],
        }
    }

    fn slot(&self, index: Word) -> VmResult<usize> {
        usize::try_from(index)
            .ok()
            .filter(|&slot| slot < self.cells.len())
            .ok_or(VmError::InvalidGlobalIndex {
                index,
                len: self.cells.len(),
            })
    }

    pub fn load(&self, index: Word) -> VmResult<Word> {
        Ok(self.cells[self.slot(index)?])
    }

    pub fn store(&mut self, index: Word, value: Word) -> VmResult<()> {
        let slot = self.slot(index)?;
        self.cells[slot] = value;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn values(&self) -> &[Word] {
        &self.cells
    }

    /// One `AAAA: value` line per cell.
    pub fn snapshot(&self) -> String {
        let mut out = String::new();
        for (address, value) in self.cells.iter().enumerate() {
            let _ = writeln!(out, "{address:04}: {value}");
        }
        out
    }
}
