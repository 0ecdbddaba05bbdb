//! Hand-assembled demonstration programs.

use crate::Word;

use super::spec::{Opcode::*, Program};

/// A program together with the layout it needs to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub name: &'static str,
    pub program: Program,
    pub nglobals: usize,
    pub entry: Word,
}

pub const NAMES: [&str; 3] = ["hello", "loop", "factorial"];

fn words(items: &[Word]) -> Program {
    Program::new(items.to_vec())
}

/// Prints 1234 then 5678.
pub fn hello() -> Sample {
    Sample {
        name: "hello",
        program: words(&[
            Iconst as Word, 1234,
            Print as Word,
            Iconst as Word, 5678,
            Print as Word,
            Halt as Word,
        ]),
        nglobals: 0,
        entry: 0,
    }
}

/// `N = 10; I = 0; while I < N { print I; I += 1 }` over globals `[N, I]`.
pub fn counting_loop() -> Sample {
    Sample {
        name: "loop",
        program: words(&[
            Iconst as Word, 10,  // 0
            Gstore as Word, 0,   // 2
            Iconst as Word, 0,   // 4
            Gstore as Word, 1,   // 6
            Gload as Word, 1,    // 8
            Gload as Word, 0,    // 10
            Ilt as Word,         // 12
            Brf as Word, 27,     // 13
            Gload as Word, 1,    // 15
            Print as Word,       // 17
            Gload as Word, 1,    // 18
            Iconst as Word, 1,   // 20
            Iadd as Word,        // 22
            Gstore as Word, 1,   // 23
            Br as Word, 8,       // 25
            Halt as Word,        // 27
        ]),
        nglobals: 2,
        entry: 0,
    }
}

/// Address of the recursive `factorial(n)` routine.
pub const FACTORIAL_ADDRESS: Word = 0;

/// Recursive factorial; `main` at address 23 prints `factorial(15)`.
pub fn factorial() -> Sample {
    Sample {
        name: "factorial",
        program: words(&[
            // factorial: args=1 locals=0
            Load as Word, 0,                          // 0
            Iconst as Word, 2,                        // 2
            Ilt as Word,                              // 4
            Brf as Word, 10,                          // 5
            Iconst as Word, 1,                        // 7
            Ret as Word,                              // 9
            Load as Word, 0,                          // 10
            Load as Word, 0,                          // 12
            Iconst as Word, 1,                        // 14
            Isub as Word,                             // 16
            Call as Word, FACTORIAL_ADDRESS, 1, 0,    // 17
            Imul as Word,                             // 21
            Ret as Word,                              // 22
            // main
            Iconst as Word, 15,                       // 23
            Call as Word, FACTORIAL_ADDRESS, 1, 0,    // 25
            Print as Word,                            // 29
            Halt as Word,                             // 30
        ]),
        nglobals: 0,
        entry: 23,
    }
}

pub fn by_name(name: &str) -> Option<Sample> {
    match name {
        "hello" => Some(hello()),
        "loop" => Some(counting_loop()),
        "factorial" => Some(factorial()),
        _ => None,
    }
}
