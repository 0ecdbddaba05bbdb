//! Human-readable rendering of program words.

use crate::Word;

use super::spec::{Opcode, Program};

/// One line of a program listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingLine {
    pub address: usize,
    pub text: String,
}

/// Renders the instruction starting at `address` as `AAAA:  mnemonic  a,b,c`.
///
/// Operands missing at the end of the program are left out rather than invented.
pub fn render_instruction(words: &[Word], address: usize) -> String {
    let Some(&value) = words.get(address) else {
        return format!("{address:04}:  <end of program>");
    };
    let Ok(opcode) = Opcode::try_from(value) else {
        return format!("{address:04}:  INVALID_OPCODE_{value}");
    };
    let operands = words
        .iter()
        .skip(address + 1)
        .take(opcode.arity())
        .map(|word| word.to_string())
        .collect::<Vec<_>>();
    let line = format!(
        "{address:04}:  {:<10}{}",
        opcode.mnemonic(),
        operands.join(",")
    );
    line.trim_end().to_string()
}

/// Full listing with operand words folded into their instruction.
pub fn disassemble(program: &Program) -> Vec<ListingLine> {
    let words = program.words();
    let mut lines = Vec::new();
    let mut address = 0;
    while address < words.len() {
        lines.push(ListingLine {
            address,
            text: render_instruction(words, address),
        });
        let width = Opcode::try_from(words[address])
            .map(|opcode| 1 + opcode.arity())
            .unwrap_or(1);
        address += width;
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::samples;

    #[test]
    fn renders_each_arity() {
        let words = [9, 15, 16, 0, 1, 0, 14];
        assert_eq!(render_instruction(&words, 0), "0000:  iconst    15");
        assert_eq!(render_instruction(&words, 2), "0002:  call      0,1,0");
        assert_eq!(render_instruction(&words, 6), "0006:  print");
    }

    #[test]
    fn renders_invalid_and_truncated_instructions() {
        let words = [42, 16, 5];
        assert_eq!(render_instruction(&words, 0), "0000:  INVALID_OPCODE_42");
        assert_eq!(render_instruction(&words, 1), "0001:  call      5");
        assert_eq!(render_instruction(&words, 3), "0003:  <end of program>");
    }

    #[test]
    fn listing_skips_operand_words() {
        let sample = samples::factorial();
        let listing = disassemble(&sample.program);
        let addresses: Vec<_> = listing.iter().map(|line| line.address).collect();
        assert_eq!(
            addresses,
            vec![0, 2, 4, 5, 7, 9, 10, 12, 14, 16, 17, 21, 22, 23, 25, 29, 30]
        );
        assert_eq!(listing[13].text, "0023:  iconst    15");
        assert_eq!(listing[16].text, "0030:  halt");
    }
}
