// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! What a blocking call does between two attempts.

/// Waits between two attempts of a blocking read or write.
///
/// Must return promptly: the caller re-checks the ring and the liveness
/// monitor after every call.
pub trait SpinStrategy {
    fn idle(&mut self);
}

/// Burns the core with a CPU pause hint. Lowest latency.
#[derive(Debug, Default, Clone, Copy)]
pub struct BusySpin;

impl SpinStrategy for BusySpin {
    #[inline(always)]
    fn idle(&mut self) {
        std::hint::spin_loop();
    }
}

/// Gives the rest of the time slice back to the scheduler.
///
/// Useful when both ends share fewer cores than they have threads.
#[derive(Debug, Default, Clone, Copy)]
pub struct YieldSpin;

impl SpinStrategy for YieldSpin {
    fn idle(&mut self) {
        std::thread::yield_now();
    }
}
