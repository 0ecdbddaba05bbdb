use std::time::Duration;

use tvm_core::bytecode::samples;
use tvm_core::{VirtualMachine, VmConfig, VmError, VmEvent, Word};

fn traced_factorial() -> VirtualMachine {
    let sample = samples::factorial();
    VirtualMachine::new(sample.program, sample.nglobals, sample.entry)
        .with_config(VmConfig::unpaced())
}

#[test]
fn subscribers_receive_identical_streams() {
    let vm = traced_factorial();
    let first = vm.subscribe();
    let second = vm.subscribe();
    vm.start().expect("start").join().expect("join");
    let first: Vec<_> = first.collect();
    let second: Vec<_> = second.collect();
    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[test]
fn dropped_and_idle_subscribers_do_not_stall_the_engine() {
    let vm = traced_factorial();
    let dropped = vm.subscribe();
    let _idle = vm.subscribe();
    let active = vm.subscribe();
    drop(dropped);
    let outcome = vm.start().expect("start").join().expect("join");
    assert!(outcome.steps > 0);
    assert!(active.collect::<Vec<_>>().contains(&VmEvent::Finished));
}

#[test]
fn no_subscribers_is_fine() {
    let outcome = traced_factorial().run().expect("run");
    assert!(outcome.stack.is_empty());
}

#[test]
fn register_events_follow_effect_events() {
    let vm = traced_factorial();
    let events = vm.subscribe();
    vm.run().expect("run");
    let events: Vec<_> = events.collect();
    let printed = events
        .iter()
        .position(|event| matches!(event, VmEvent::StdoutProduced(_)))
        .expect("stdout");
    assert_eq!(
        &events[printed..printed + 4],
        &[
            VmEvent::StdoutProduced("1307674368000".into()),
            VmEvent::InstructionPointerChanged(30),
            VmEvent::StackPointerChanged(-1),
            VmEvent::OpcodeChanged(18),
        ]
    );
}

#[test]
fn trace_publishes_disassembly_before_each_instruction() {
    let vm = traced_factorial();
    let events = vm.subscribe();
    vm.run().expect("run");
    let lines: Vec<String> = events
        .filter_map(|event| match event {
            VmEvent::DisassembledInstruction(line) => Some(line),
            _ => None,
        })
        .collect();
    assert_eq!(lines.first().map(String::as_str), Some("0023:  iconst    15"));
    assert_eq!(lines.get(1).map(String::as_str), Some("0025:  call      0,1,0"));
    assert_eq!(
        lines.last().map(String::as_str),
        Some("HALT: Program execution terminated")
    );
}

#[test]
fn snapshots_are_copies_taken_at_publication() {
    let vm = traced_factorial();
    let events = vm.subscribe();
    vm.run().expect("run");
    let stacks: Vec<String> = events
        .filter_map(|event| match event {
            VmEvent::StackSnapshot(stack) => Some(stack),
            _ => None,
        })
        .collect();
    assert_eq!(stacks.first().map(String::as_str), Some(" 15"));
    assert!(stacks.iter().any(|stack| stack == " 15 14"));
    assert_eq!(stacks.last().map(String::as_str), Some(""));
}

#[test]
fn recv_timeout_returns_none_for_unstarted_vm() {
    let vm = traced_factorial();
    let events = vm.subscribe();
    assert_eq!(events.recv_timeout(Duration::from_millis(10)), None);
    assert!(!events.is_closed());
}

#[test]
fn faulted_events_serialize_the_error() {
    let vm = VirtualMachine::new(vec![99 as Word], 0, 0).with_config(VmConfig::unpaced());
    let events = vm.subscribe();
    assert_eq!(
        vm.run(),
        Err(VmError::InvalidOpcode {
            address: 0,
            value: 99
        })
    );
    let fault = events
        .into_iter()
        .find(|event| matches!(event, VmEvent::Faulted(_)))
        .expect("fault event");
    let json = serde_json::to_value(&fault).expect("serialize");
    assert_eq!(json["kind"], "faulted");
    assert_eq!(json["value"]["InvalidOpcode"]["value"], 99);
}
