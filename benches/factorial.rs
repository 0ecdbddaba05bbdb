use criterion::{criterion_group, criterion_main, Criterion};
use tvm_core::bytecode::samples;
use tvm_core::{VirtualMachine, VmConfig};

fn bench_factorial(c: &mut Criterion) {
    let sample = samples::factorial();
    let config = VmConfig::unpaced().with_trace(false);
    c.bench_function("factorial_15_unpaced", |b| {
        b.iter(|| {
            let vm = VirtualMachine::new(sample.program.clone(), sample.nglobals, sample.entry)
                .with_config(config.clone());
            vm.run().unwrap()
        })
    });
}

fn bench_traced_loop(c: &mut Criterion) {
    let sample = samples::counting_loop();
    let config = VmConfig::unpaced();
    c.bench_function("loop_traced_with_subscriber", |b| {
        b.iter(|| {
            let vm = VirtualMachine::new(sample.program.clone(), sample.nglobals, sample.entry)
                .with_config(config.clone());
            let events = vm.subscribe();
            vm.run().unwrap();
            events.drain().len()
        })
    });
}

criterion_group!(benches, bench_factorial, bench_traced_loop);
criterion_main!(benches);
