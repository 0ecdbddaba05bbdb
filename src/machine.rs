use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, instrument};

use crate::bytecode::spec::Program;
use crate::bytecode::vm::{ExecutionState, RunOutcome, Vm};
use crate::concurrency::ControlChannel;
use crate::integration::{EventBus, Subscription};
use crate::{VmConfig, VmError, VmResult, Word};

const WORKER_NAME: &str = "tvm-engine";

/// A program ready to run, plus the control channel and bus its engine will use.
///
/// Subscribe before calling [`VirtualMachine::start`] or [`VirtualMachine::run`] to
/// observe the run from its first event.
pub struct VirtualMachine {
    program: Program,
    nglobals: usize,
    start_ip: Word,
    config: VmConfig,
    control: ControlChannel,
    bus: EventBus,
}

impl VirtualMachine {
    pub fn new(program: impl Into<Program>, nglobals: usize, start_ip: Word) -> Self {
        Self {
            program: program.into(),
            nglobals,
            start_ip,
            config: VmConfig::default(),
            control: ControlChannel::new(),
            bus: EventBus::new(),
        }
    }

    pub fn with_config(mut self, config: VmConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    pub fn control(&self) -> ControlChannel {
        self.control.clone()
    }

    /// Runs the engine on the calling thread.
    #[instrument(skip_all)]
    pub fn run(self) -> VmResult<RunOutcome> {
        let (engine, bus) = self.into_engine();
        let _closer = CloseOnDrop { bus, finished: None };
        engine.execute()
    }

    /// Moves the engine onto a dedicated worker thread.
    pub fn start(self) -> VmResult<VmHandle> {
        let control = self.control.clone();
        let bus = self.bus.clone();
        let finished = Arc::new(AtomicBool::new(false));
        let (engine, worker_bus) = self.into_engine();
        let worker_finished = Arc::clone(&finished);
        let worker = thread::Builder::new()
            .name(WORKER_NAME.to_string())
            .spawn(move || {
                let _closer = CloseOnDrop {
                    bus: worker_bus,
                    finished: Some(worker_finished),
                };
                engine.execute()
            })
            .map_err(|err| VmError::WorkerSpawn(err.to_string()))?;
        debug!(worker = WORKER_NAME, "engine worker spawned");
        Ok(VmHandle {
            control,
            bus,
            finished,
            worker,
        })
    }

    fn into_engine(self) -> (Vm, EventBus) {
        let state = ExecutionState::new(self.program, self.nglobals);
        let engine = Vm::new(
            self.config,
            state,
            self.start_ip,
            self.control,
            self.bus.clone(),
        );
        (engine, self.bus)
    }
}

impl fmt::Debug for VirtualMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualMachine")
            .field("words", &self.program.len())
            .field("nglobals", &self.nglobals)
            .field("start_ip", &self.start_ip)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Closes the bus when the engine returns or unwinds.
struct CloseOnDrop {
    bus: EventBus,
    finished: Option<Arc<AtomicBool>>,
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        if let Some(finished) = &self.finished {
            finished.store(true, Ordering::SeqCst);
        }
        self.bus.close();
    }
}

/// Controller for an engine running on its worker thread.
pub struct VmHandle {
    control: ControlChannel,
    bus: EventBus,
    finished: Arc<AtomicBool>,
    worker: JoinHandle<VmResult<RunOutcome>>,
}

impl VmHandle {
    pub fn request_pause(&self) {
        self.control.request_pause();
    }

    pub fn request_resume(&self) {
        self.control.request_resume();
    }

    pub fn request_halt(&self) {
        self.control.request_halt();
    }

    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Late subscribers only see events published after this call.
    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    pub fn control(&self) -> ControlChannel {
        self.control.clone()
    }

    /// Waits for the worker and returns how the run ended.
    pub fn join(self) -> VmResult<RunOutcome> {
        self.worker.join().map_err(|_| VmError::WorkerPanicked)?
    }
}

impl fmt::Debug for VmHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmHandle")
            .field("control", &self.control)
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::samples;
    use crate::integration::VmEvent;
    use crate::Opcode;

    #[test]
    fn run_closes_the_bus() {
        let sample = samples::hello();
        let vm = VirtualMachine::new(sample.program, 0, 0).with_config(VmConfig::unpaced());
        let subscription = vm.subscribe();
        vm.run().unwrap();
        let events: Vec<_> = subscription.collect();
        assert_eq!(events.last(), Some(&VmEvent::Finished));
    }

    #[test]
    fn start_and_join_on_worker() {
        let sample = samples::counting_loop();
        let vm = VirtualMachine::new(sample.program, sample.nglobals, sample.entry)
            .with_config(VmConfig::unpaced());
        let handle = vm.start().unwrap();
        let outcome = handle.join().unwrap();
        assert_eq!(outcome.globals, vec![10, 10]);
    }

    #[test]
    fn invalid_entry_is_reported_by_join() {
        let program = Program::new(vec![Opcode::Halt as Word]);
        let vm = VirtualMachine::new(program, 0, 5).with_config(VmConfig::unpaced());
        let handle = vm.start().unwrap();
        assert_eq!(
            handle.join(),
            Err(VmError::InvalidEntryPoint { ip: 5, len: 1 })
        );
    }
}
