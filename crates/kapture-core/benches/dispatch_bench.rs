//! Criterion benchmarks for handler-chain dispatch.
//!
//! Dispatch runs on the hook pump thread inside the platform's hook timeout,
//! so its per-event cost has to stay far below a millisecond even with
//! several handlers bound to the device.
//!
//! Run with:
//! ```bash
//! cargo bench --package kapture-core --bench dispatch_bench
//! ```

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kapture_core::{
    CapturedEvent, Decision, DeviceClass, DeviceHandle, DeviceSource, Dispatcher,
    EnumerationError, KeyboardEvent, KeyboardHandler, RawDeviceDescriptor,
};

// ── Fixtures ──────────────────────────────────────────────────────────────────

struct StaticDevices(Vec<RawDeviceDescriptor>);

impl DeviceSource for StaticDevices {
    fn enumerate_devices(&self) -> Result<Vec<RawDeviceDescriptor>, EnumerationError> {
        Ok(self.0.clone())
    }
}

/// Permits everything except space, like the demo handler.
struct SpaceEater;

impl KeyboardHandler for SpaceEater {
    fn handle_key_event(&self, event: &mut KeyboardEvent) {
        if event.vkey() == 0x20 {
            event.set_decision(Decision::Consume);
        } else {
            event.set_decision(Decision::Permit);
        }
    }
}

fn dispatcher_with_chain(len: usize) -> Dispatcher {
    let dispatcher = Dispatcher::new();
    dispatcher
        .refresh(&StaticDevices(vec![RawDeviceDescriptor::new(
            DeviceHandle(1),
            DeviceClass::Keyboard,
            r"\\?\HID#VID_046D&PID_C31C",
        )]))
        .expect("static enumeration cannot fail");
    for _ in 0..len {
        dispatcher
            .register_keyboard_handler(".*VID_046D.*", Arc::new(SpaceEater))
            .expect("pattern is valid");
    }
    dispatcher
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

fn bench_dispatch_keyboard(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_keyboard");

    for len in [1usize, 4, 16] {
        let dispatcher = dispatcher_with_chain(len);

        // Non-space keys walk the whole chain.
        group.bench_with_input(BenchmarkId::new("full_chain", len), &len, |b, _| {
            b.iter(|| {
                let mut event = KeyboardEvent::new(DeviceHandle(1), 0x41, 0x1e, 0x100, false);
                black_box(dispatcher.dispatch_keyboard(&mut event))
            })
        });

        // Space is consumed by the first handler.
        group.bench_with_input(BenchmarkId::new("short_circuit", len), &len, |b, _| {
            b.iter(|| {
                let mut event = KeyboardEvent::new(DeviceHandle(1), 0x20, 0x39, 0x100, false);
                black_box(dispatcher.dispatch_keyboard(&mut event))
            })
        });
    }

    group.finish();
}

fn bench_dispatch_unknown_device(c: &mut Criterion) {
    let dispatcher = dispatcher_with_chain(4);
    c.bench_function("dispatch_keyboard_unknown_device", |b| {
        b.iter(|| {
            let mut event = KeyboardEvent::new(DeviceHandle(99), 0x41, 0x1e, 0x100, false);
            black_box(dispatcher.dispatch_keyboard(&mut event))
        })
    });
}

criterion_group!(benches, bench_dispatch_keyboard, bench_dispatch_unknown_device);
criterion_main!(benches);
