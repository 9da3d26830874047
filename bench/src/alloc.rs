// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! A global allocator which counts allocations, exposed to `criterion`
//! as measurements so that the per-packet allocation cost of the
//! pipeline can be tracked alongside its latency.

use super::MeasurementInfo;
use criterion::Criterion;
use criterion::Throughput;
use criterion::measurement::Measurement;
use criterion::measurement::ValueFormatter;
use std::alloc::GlobalAlloc;
use std::alloc::Layout;
use std::alloc::System;
use std::marker::PhantomData;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

#[global_allocator]
static COUNTING: CountingAlloc = CountingAlloc {
    allocs: AtomicU64::new(0),
    bytes: AtomicU64::new(0),
};

// Criterion runs one benchmark at a time, so the counters are global
// rather than per thread.
struct CountingAlloc {
    allocs: AtomicU64,
    bytes: AtomicU64,
}

unsafe impl GlobalAlloc for CountingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.allocs.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(layout.size() as u64, Ordering::Relaxed);
        unsafe { System.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) }
    }
}

/// A monotonic counter kept by the allocator.
pub trait Counter {
    const LABEL: &'static str;

    fn read() -> u64;
    fn formatter() -> &'static dyn ValueFormatter;
}

/// Number of allocations.
pub struct Allocs;

/// Number of bytes allocated.
pub struct AllocBytes;

impl Counter for Allocs {
    const LABEL: &'static str = "alloc_ct";

    fn read() -> u64 {
        COUNTING.allocs.load(Ordering::Relaxed)
    }

    fn formatter() -> &'static dyn ValueFormatter {
        &COUNT
    }
}

impl Counter for AllocBytes {
    const LABEL: &'static str = "alloc_sz";

    fn read() -> u64 {
        COUNTING.bytes.load(Ordering::Relaxed)
    }

    fn formatter() -> &'static dyn ValueFormatter {
        &BYTES
    }
}

/// Raw values are reported unscaled; per-packet numbers are small.
struct Unscaled(&'static str);

static COUNT: Unscaled = Unscaled("");
static BYTES: Unscaled = Unscaled("B");

impl ValueFormatter for Unscaled {
    fn scale_values(&self, _typical: f64, _values: &mut [f64]) -> &'static str {
        self.0
    }

    fn scale_throughputs(
        &self,
        _typical: f64,
        _throughput: &Throughput,
        _values: &mut [f64],
    ) -> &'static str {
        self.0
    }

    fn scale_for_machines(&self, _values: &mut [f64]) -> &'static str {
        self.0
    }
}

/// The growth of counter `C` over a benchmark iteration.
pub struct Counted<C>(PhantomData<C>);

impl<C: Counter> Measurement for Counted<C> {
    type Intermediate = u64;
    type Value = u64;

    fn start(&self) -> u64 {
        C::read()
    }

    fn end(&self, start: u64) -> u64 {
        C::read() - start
    }

    fn add(&self, a: &u64, b: &u64) -> u64 {
        a + b
    }

    fn zero(&self) -> u64 {
        0
    }

    fn to_f64(&self, v: &u64) -> f64 {
        *v as f64
    }

    fn formatter(&self) -> &dyn ValueFormatter {
        C::formatter()
    }
}

impl<C: Counter + 'static> MeasurementInfo for Counted<C> {
    fn label() -> &'static str {
        C::LABEL
    }
}

/// A `criterion` configured to measure counter `C`. Counters are exact,
/// so a short measurement window is enough.
pub fn counting<C: Counter>() -> Criterion<Counted<C>> {
    Criterion::default()
        .with_measurement(Counted(PhantomData))
        .warm_up_time(Duration::from_millis(100))
        .measurement_time(Duration::from_secs(1))
}
