use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::concurrency::ControlChannel;
use crate::integration::{EventBus, VmEvent};
use crate::memory::{CallStack, Frame, Globals, OperandStack};
use crate::{VmConfig, VmError, VmResult, Word};

use super::disasm::render_instruction;
use super::spec::{Opcode, Program, MAX_ARITY};

/// Everything one run mutates. Owned by exactly one engine at a time.
#[derive(Debug, Clone)]
pub struct ExecutionState {
    program: Program,
    globals: Globals,
    stack: OperandStack,
    frames: CallStack,
    ip: usize,
}

impl ExecutionState {
    pub fn new(program: Program, nglobals: usize) -> Self {
        Self {
            program,
            globals: Globals::new(nglobals),
            stack: OperandStack::new(),
            frames: CallStack::new(),
            ip: 0,
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    pub fn stack(&self) -> &OperandStack {
        &self.stack
    }

    pub fn frames(&self) -> &CallStack {
        &self.frames
    }

    pub fn ip(&self) -> usize {
        self.ip
    }

    fn registers(&self) -> Registers {
        Registers {
            ip: self.ip as Word,
            sp: self.stack.pointer(),
            callsp: self.frames.pointer(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Registers {
    ip: Word,
    sp: Word,
    callsp: Word,
}

/// Side effects of one instruction that are published before register changes.
#[derive(Debug, Default)]
struct Effects {
    stdout: Option<String>,
    globals_changed: bool,
}

/// How a successful run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The program executed HALT.
    Halted,
    /// A controller called `request_halt`.
    HaltRequested,
}

/// Final state handed back to the caller once the engine stops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    pub termination: Termination,
    pub steps: u64,
    pub globals: Vec<Word>,
    pub stack: Vec<Word>,
}

const HALT_BANNER: &str = "HALT: Program execution terminated";

/// Fetch-decode-execute engine.
pub struct Vm {
    config: VmConfig,
    state: ExecutionState,
    start_ip: Word,
    control: ControlChannel,
    bus: EventBus,
    steps: u64,
    last_opcode: Option<Word>,
}

impl Vm {
    pub fn new(
        config: VmConfig,
        state: ExecutionState,
        start_ip: Word,
        control: ControlChannel,
        bus: EventBus,
    ) -> Self {
        Self {
            config,
            state,
            start_ip,
            control,
            bus,
            steps: 0,
            last_opcode: None,
        }
    }

    /// Runs to termination. Always publishes [`VmEvent::Finished`] last, preceded by
    /// [`VmEvent::Faulted`] when the run fails. Once a halt request is observed nothing
    /// else is published.
    pub fn execute(mut self) -> VmResult<RunOutcome> {
        info!(
            entry = self.start_ip,
            words = self.state.program.len(),
            globals = self.state.globals.len(),
            trace = self.config.trace,
            "engine started"
        );
        let result = self.run();
        match &result {
            Ok(outcome) => {
                if self.config.trace && outcome.termination == Termination::Halted {
                    self.publish(VmEvent::MemorySnapshot(self.state.globals.snapshot()));
                }
                info!(steps = outcome.steps, termination = ?outcome.termination, "engine finished");
            }
            Err(err) => {
                warn!(%err, steps = self.steps, ip = self.state.ip, "engine faulted");
                self.publish(VmEvent::Faulted(err.clone()));
            }
        }
        self.publish(VmEvent::Finished);
        result
    }

    fn run(&mut self) -> VmResult<RunOutcome> {
        let entry = usize::try_from(self.start_ip)
            .ok()
            .filter(|&ip| ip < self.state.program.len())
            .ok_or(VmError::InvalidEntryPoint {
                ip: self.start_ip,
                len: self.state.program.len(),
            })?;
        self.state.ip = entry;
        self.publish_initial_registers();

        loop {
            if self.control.is_halt_requested() {
                return Ok(self.outcome(Termination::HaltRequested));
            }
            if self.control.is_paused() {
                self.park();
                continue;
            }
            let opcode = self.step()?;
            self.steps += 1;
            if opcode == Opcode::Halt {
                return Ok(self.outcome(Termination::Halted));
            }
            self.control.pace(self.config.step_delay);
            if let Some(limit) = self.config.step_limit {
                if self.steps >= limit {
                    return Err(VmError::StepLimitExceeded { limit });
                }
            }
        }
    }

    fn publish_initial_registers(&mut self) {
        let registers = self.state.registers();
        self.publish(VmEvent::InstructionPointerChanged(registers.ip));
        self.publish(VmEvent::StackPointerChanged(registers.sp));
        self.publish(VmEvent::CallStackPointerChanged(registers.callsp));
        if let Some(opcode) = self.state.program.get(self.state.ip) {
            self.last_opcode = Some(opcode);
            self.publish(VmEvent::OpcodeChanged(opcode));
        }
        if self.config.trace {
            self.publish(VmEvent::MemorySnapshot(self.state.globals.snapshot()));
        }
    }

    fn park(&mut self) {
        debug!(ip = self.state.ip, "engine paused");
        self.publish(VmEvent::PausedStateChanged(true));
        if self.control.wait_while_paused() {
            debug!(ip = self.state.ip, "engine resumed");
            self.publish(VmEvent::PausedStateChanged(false));
        }
    }

    /// Executes the instruction at `ip` and publishes what it changed.
    fn step(&mut self) -> VmResult<Opcode> {
        let address = self.state.ip;
        let value = self
            .state
            .program
            .get(address)
            .ok_or(VmError::InvalidInstructionPointer {
                ip: address as Word,
            })?;
        let opcode =
            Opcode::try_from(value).map_err(|value| VmError::InvalidOpcode { address, value })?;
        if self.config.trace {
            let line = render_instruction(self.state.program.words(), address);
            self.publish(VmEvent::DisassembledInstruction(line));
        }
        let operands = self.decode(address, opcode)?;
        let before = self.state.registers();
        // HALT leaves ip on itself so it never points past the program.
        if opcode != Opcode::Halt {
            self.state.ip = address + 1 + opcode.arity();
        }

        let effects = self.dispatch(address, opcode, operands)?;
        trace!(address, mnemonic = opcode.mnemonic(), ?operands, "executed");

        if let Some(text) = effects.stdout {
            self.publish(VmEvent::StdoutProduced(text));
        }
        if effects.globals_changed && self.config.trace {
            self.publish(VmEvent::MemorySnapshot(self.state.globals.snapshot()));
        }
        self.publish_changes(before);
        if opcode == Opcode::Halt && self.config.trace {
            self.publish(VmEvent::DisassembledInstruction(HALT_BANNER.to_string()));
        }
        Ok(opcode)
    }

    fn decode(&self, address: usize, opcode: Opcode) -> VmResult<[Word; MAX_ARITY]> {
        let mut operands = [0; MAX_ARITY];
        for (offset, operand) in operands.iter_mut().take(opcode.arity()).enumerate() {
            let position = address + 1 + offset;
            *operand =
                self.state
                    .program
                    .get(position)
                    .ok_or(VmError::InvalidInstructionPointer {
                        ip: position as Word,
                    })?;
        }
        Ok(operands)
    }

    fn dispatch(
        &mut self,
        address: usize,
        opcode: Opcode,
        operands: [Word; MAX_ARITY],
    ) -> VmResult<Effects> {
        let mut effects = Effects::default();
        let [operand, args, locals] = operands;
        match opcode {
            Opcode::Noop | Opcode::Halt => {}
            Opcode::Iadd => self.apply_binary(Word::wrapping_add)?,
            Opcode::Isub => self.apply_binary(Word::wrapping_sub)?,
            Opcode::Imul => self.apply_binary(Word::wrapping_mul)?,
            Opcode::Ilt => self.apply_binary(|a, b| Word::from(a < b))?,
            Opcode::Ieq => self.apply_binary(|a, b| Word::from(a == b))?,
            Opcode::Br => self.jump(operand)?,
            Opcode::Brt | Opcode::Brf => {
                let condition = self.state.stack.pop()?;
                let taken = match condition {
                    0 => opcode == Opcode::Brf,
                    1 => opcode == Opcode::Brt,
                    value => return Err(VmError::InvalidCondition { address, value }),
                };
                if taken {
                    self.jump(operand)?;
                }
            }
            Opcode::Iconst => self.state.stack.push(operand)?,
            Opcode::Load => {
                let value = self.state.frames.current()?.local(operand)?;
                self.state.stack.push(value)?;
            }
            Opcode::Gload => {
                let value = self.state.globals.load(operand)?;
                self.state.stack.push(value)?;
            }
            Opcode::Store => {
                let frame = self.state.frames.current_mut()?;
                let value = self.state.stack.pop()?;
                frame.set_local(operand, value)?;
            }
            Opcode::Gstore => {
                let value = self.state.stack.pop()?;
                self.state.globals.store(operand, value)?;
                effects.globals_changed = true;
            }
            Opcode::Print => {
                let value = self.state.stack.pop()?;
                effects.stdout = Some(value.to_string());
            }
            Opcode::Pop => {
                self.state.stack.pop()?;
            }
            Opcode::Call => self.call(operand, args, locals)?,
            Opcode::Ret => {
                let frame = self.state.frames.pop()?;
                self.state.ip = frame.return_ip();
            }
        }
        Ok(effects)
    }

    fn apply_binary(&mut self, op: impl FnOnce(Word, Word) -> Word) -> VmResult<()> {
        let b = self.state.stack.pop()?;
        let a = self.state.stack.pop()?;
        self.state.stack.push(op(a, b))
    }

    fn jump(&mut self, target: Word) -> VmResult<()> {
        self.state.ip =
            usize::try_from(target).map_err(|_| VmError::InvalidInstructionPointer { ip: target })?;
        Ok(())
    }

    /// Pushes a frame whose local `i` is the value `i` slots below the top of stack,
    /// then drops the arguments and jumps. The return address is already in `ip`.
    fn call(&mut self, target: Word, args: Word, locals: Word) -> VmResult<()> {
        let layout = VmError::InvalidCallLayout { args, locals };
        let (Ok(nargs), Ok(nlocals)) = (usize::try_from(args), usize::try_from(locals)) else {
            return Err(layout);
        };
        let len = nargs.checked_add(nlocals).ok_or(layout)?;
        let mut frame = Frame::new(self.state.ip, len)?;
        if nargs > self.state.stack.len() {
            return Err(VmError::StackUnderflow);
        }
        for slot in 0..nargs {
            frame.set_local(slot as Word, self.state.stack.peek(slot)?)?;
        }
        self.state.frames.push(frame)?;
        self.state.stack.discard(nargs)?;
        self.jump(target)
    }

    fn publish_changes(&mut self, before: Registers) {
        let after = self.state.registers();
        if after.ip != before.ip && self.state.ip < self.state.program.len() {
            self.publish(VmEvent::InstructionPointerChanged(after.ip));
        }
        if after.sp != before.sp {
            self.publish(VmEvent::StackPointerChanged(after.sp));
        }
        if after.callsp != before.callsp {
            self.publish(VmEvent::CallStackPointerChanged(after.callsp));
        }
        if let Some(opcode) = self.state.program.get(self.state.ip) {
            if self.last_opcode != Some(opcode) {
                self.last_opcode = Some(opcode);
                self.publish(VmEvent::OpcodeChanged(opcode));
            }
        }
        if self.config.trace {
            self.publish(VmEvent::StackSnapshot(self.state.stack.snapshot()));
        }
    }

    fn publish(&self, event: VmEvent) {
        self.bus.publish(event);
    }

    fn outcome(&self, termination: Termination) -> RunOutcome {
        RunOutcome {
            termination,
            steps: self.steps,
            globals: self.state.globals.values().to_vec(),
            stack: self.state.stack.values().to_vec(),
        }
    }
}
