pub mod disasm;
pub mod samples;
pub mod spec;
pub mod vm;

pub use disasm::{disassemble, render_instruction, ListingLine};
pub use spec::{InstructionInfo, Opcode, Program, ProgramError, ISA};
