//! Instruction set and the program word format.
//!
//! A program is a flat sequence of words with opcodes and operands interleaved
//! positionally. There is no header; the operand count following an opcode is taken
//! from [`ISA`]. On the wire every word is a little-endian signed 32-bit integer.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::Word;

/// Opcodes understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum Opcode {
    /// No effect.
    Noop = 0,
    /// Pop b, pop a, push a + b.
    Iadd = 1,
    /// Pop b, pop a, push a - b.
    Isub = 2,
    /// Pop b, pop a, push a * b.
    Imul = 3,
    /// Pop b, pop a, push 1 if a < b else 0.
    Ilt = 4,
    /// Pop b, pop a, push 1 if a == b else 0.
    Ieq = 5,
    /// BR addr ; unconditional jump.
    Br = 6,
    /// BRT addr ; pop condition, jump if it is 1.
    Brt = 7,
    /// BRF addr ; pop condition, jump if it is 0.
    Brf = 8,
    /// ICONST value ; push immediate.
    Iconst = 9,
    /// LOAD index ; push local of the current frame.
    Load = 10,
    /// GLOAD index ; push global.
    Gload = 11,
    /// STORE index ; pop into local of the current frame.
    Store = 12,
    /// GSTORE index ; pop into global.
    Gstore = 13,
    /// Pop and emit as text output.
    Print = 14,
    /// Discard the top of stack.
    Pop = 15,
    /// CALL addr, nargs, nlocals ; push frame and jump.
    Call = 16,
    /// Pop frame and resume at its return address.
    Ret = 17,
    /// Stop the run.
    Halt = 18,
}

/// Mnemonic and operand arity of one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionInfo {
    pub opcode: Opcode,
    pub mnemonic: &'static str,
    pub arity: usize,
}

const fn info(opcode: Opcode, mnemonic: &'static str, arity: usize) -> InstructionInfo {
    InstructionInfo {
        opcode,
        mnemonic,
        arity,
    }
}

/// Descriptor table indexed by opcode value.
pub static ISA: [InstructionInfo; 19] = [
    info(Opcode::Noop, "noop", 0),
    info(Opcode::Iadd, "iadd", 0),
    info(Opcode::Isub, "isub", 0),
    info(Opcode::Imul, "imul", 0),
    info(Opcode::Ilt, "ilt", 0),
    info(Opcode::Ieq, "ieq", 0),
    info(Opcode::Br, "br", 1),
    info(Opcode::Brt, "brt", 1),
    info(Opcode::Brf, "brf", 1),
    info(Opcode::Iconst, "iconst", 1),
    info(Opcode::Load, "load", 1),
    info(Opcode::Gload, "gload", 1),
    info(Opcode::Store, "store", 1),
    info(Opcode::Gstore, "gstore", 1),
    info(Opcode::Print, "print", 0),
    info(Opcode::Pop, "pop", 0),
    info(Opcode::Call, "call", 3),
    info(Opcode::Ret, "ret", 0),
    info(Opcode::Halt, "halt", 0),
];

/// Largest operand count of any instruction.
pub const MAX_ARITY: usize = 3;

impl Opcode {
    pub fn info(self) -> &'static InstructionInfo {
        &ISA[self as usize]
    }

    pub fn mnemonic(self) -> &'static str {
        self.info().mnemonic
    }

    pub fn arity(self) -> usize {
        self.info().arity
    }

    /// Case-insensitive lookup used by the text loader.
    pub fn from_mnemonic(name: &str) -> Option<Self> {
        ISA.iter()
            .find(|entry| entry.mnemonic.eq_ignore_ascii_case(name))
            .map(|entry| entry.opcode)
    }
}

impl TryFrom<Word> for Opcode {
    /// The unrecognised word.
    type Error = Word;

    fn try_from(value: Word) -> Result<Self, Self::Error> {
        usize::try_from(value)
            .ok()
            .and_then(|index| ISA.get(index))
            .map(|entry| entry.opcode)
            .ok_or(value)
    }
}

impl From<Opcode> for Word {
    fn from(opcode: Opcode) -> Self {
        opcode as Word
    }
}

/// Immutable program shared between the caller and the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    words: Arc<[Word]>,
}

impl Program {
    pub fn new(words: Vec<Word>) -> Self {
        Self {
            words: words.into(),
        }
    }

    pub fn from_i32_words(words: &[i32]) -> Self {
        Self::new(words.iter().map(|&word| Word::from(word)).collect())
    }

    /// Decodes the wire format: little-endian signed 32-bit words, no header.
    pub fn from_le_bytes(bytes: &[u8]) -> Result<Self, ProgramError> {
        if bytes.len() % 4 != 0 {
            return Err(ProgramError::TruncatedWord { len: bytes.len() });
        }
        let words = bytes
            .chunks_exact(4)
            .map(|chunk| Word::from(i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])))
            .collect();
        Ok(Self::new(words))
    }

    /// Encodes the program in the wire format.
    pub fn to_le_bytes(&self) -> Result<Vec<u8>, ProgramError> {
        let mut bytes = Vec::with_capacity(self.words.len() * 4);
        for (index, &value) in self.words.iter().enumerate() {
            let word =
                i32::try_from(value).map_err(|_| ProgramError::WordOutOfRange { index, value })?;
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        Ok(bytes)
    }

    /// Reads a wire-format program from disk.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, ProgramError> {
        let path = path.as_ref();
        let bytes = fs::read(path)
            .map_err(|err| ProgramError::Io(format!("{}: {err}", path.display())))?;
        Self::from_le_bytes(&bytes)
    }

    /// Parses a text listing of integers and mnemonics separated by whitespace or
    /// commas. `#` starts a comment running to the end of the line.
    pub fn parse_text(text: &str) -> Result<Self, ProgramError> {
        let mut words = Vec::new();
        for (number, line) in text.lines().enumerate() {
            let code = line.split('#').next().unwrap_or_default();
            for token in code
                .split(|c: char| c.is_whitespace() || c == ',')
                .filter(|token| !token.is_empty())
            {
                let word = match token.parse::<Word>() {
                    Ok(value) => value,
                    Err(_) => Opcode::from_mnemonic(token).map(Word::from).ok_or_else(|| {
                        ProgramError::InvalidToken {
                            line: number + 1,
                            token: token.to_string(),
                        }
                    })?,
                };
                words.push(word);
            }
        }
        Ok(Self::new(words))
    }

    pub fn words(&self) -> &[Word] {
        &self.words
    }

    pub fn get(&self, address: usize) -> Option<Word> {
        self.words.get(address).copied()
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl From<Vec<Word>> for Program {
    fn from(words: Vec<Word>) -> Self {
        Self::new(words)
    }
}

impl From<&[Word]> for Program {
    fn from(words: &[Word]) -> Self {
        Self::new(words.to_vec())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
pub enum ProgramError {
    #[error("program of {len} bytes is not a whole number of 32-bit words")]
    TruncatedWord { len: usize },
    #[error("line {line}: invalid token {token:?}")]
    InvalidToken { line: usize, token: String },
    #[error("word {value} at index {index} does not fit in 32 bits")]
    WordOutOfRange { index: usize, value: Word },
    #[error("io error: {0}")]
    Io(String),
}
