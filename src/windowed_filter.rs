// Copyright (c) 2016 The Chromium Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

// Copyright (C) 2024, Cloudflare, Inc.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
//     * Redistributions of source code must retain the above copyright notice,
//       this list of conditions and the following disclaimer.
//
//     * Redistributions in binary form must reproduce the above copyright
//       notice, this list of conditions and the following disclaimer in the
//       documentation and/or other materials provided with the distribution.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS
// IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO,
// THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR
// PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR
// CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL,
// EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO,
// PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
// PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF
// LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING
// NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE OF THIS
// SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! Kathleen Nichols' windowed max estimator.
//!
//! Tracks the best, second best and third best maximum of a stream of samples
//! over a sliding window of "time", where time is any monotonically
//! increasing key (this crate uses round-trip counts). The measurement time
//! of the n'th best estimate is never older than that of the (n-1)'th, so
//! when the best expires the runners-up are already positioned to take over,
//! bounding the worst-case error while the true maximum decays.

use std::ops::Div;
use std::ops::Sub;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Estimate<T, I> {
    sample: T,
    time: I,
}

/// A windowed filter keeping the three largest samples seen over the last
/// `window_length` units of time.
///
/// `T` is the sample type, `I` the time key, and `D` the difference of two
/// time keys. Two instances cover this crate's needs: a maximum `DataRate`
/// and a maximum `DataSize`, both keyed by round-trip count.
#[derive(Debug)]
pub struct WindowedFilter<T, I, D> {
    window_length: D,
    estimates: [Option<Estimate<T, I>>; 3],
}

impl<T, I, D> WindowedFilter<T, I, D>
where
    T: Ord + Copy,
    I: Sub<I, Output = D> + PartialEq + Copy,
    D: Ord + Div<i64, Output = D> + Copy,
{
    pub fn new(window_length: D) -> Self {
        WindowedFilter {
            window_length,
            estimates: [None, None, None],
        }
    }

    /// The current windowed maximum, if any sample was recorded.
    pub fn get_best(&self) -> Option<T> {
        self.estimates[0].map(|e| e.sample)
    }

    pub fn get_second_best(&self) -> Option<T> {
        self.estimates[1].map(|e| e.sample)
    }

    pub fn get_third_best(&self) -> Option<T> {
        self.estimates[2].map(|e| e.sample)
    }

    /// Forgets all estimates and restarts the window from `new_sample`.
    pub fn reset(&mut self, new_sample: T, new_time: I) {
        let estimate = Some(Estimate {
            sample: new_sample,
            time: new_time,
        });

        self.estimates = [estimate, estimate, estimate];
    }

    pub fn update(&mut self, new_sample: T, new_time: I) {
        // Restart the window if nothing was recorded yet, if the new sample
        // beats the current best, or if the newest estimate is already older
        // than the window.
        let needs_reset = match (&self.estimates[0], &self.estimates[2]) {
            (None, _) | (_, None) => true,
            (Some(best), Some(newest)) =>
                new_sample > best.sample ||
                    new_time - newest.time > self.window_length,
        };

        if needs_reset {
            return self.reset(new_sample, new_time);
        }

        let new_estimate = Estimate {
            sample: new_sample,
            time: new_time,
        };

        if new_sample > self.estimates[1].unwrap().sample {
            self.estimates[1] = Some(new_estimate);
            self.estimates[2] = self.estimates[1];
        } else if new_sample > self.estimates[2].unwrap().sample {
            self.estimates[2] = Some(new_estimate);
        }

        if new_time - self.estimates[0].unwrap().time > self.window_length {
            // The best estimate expired without being displaced, so the
            // runners-up move forward and the newest sample takes the third
            // slot. The promoted best may itself be outside the window; one
            // extra shift covers that, and an older second-best would have
            // triggered the reset above.
            self.estimates[0] = self.estimates[1];
            self.estimates[1] = self.estimates[2];
            self.estimates[2] = Some(new_estimate);

            if new_time - self.estimates[0].unwrap().time > self.window_length {
                self.estimates[0] = self.estimates[1];
                self.estimates[1] = self.estimates[2];
            }
            return;
        }

        if self.estimates[1] == self.estimates[0] &&
            new_time - self.estimates[1].unwrap().time > self.window_length / 4
        {
            // A quarter of the window passed without a better sample; record
            // a second-best estimate from the second quarter.
            self.estimates[1] = Some(new_estimate);
            self.estimates[2] = self.estimates[1];
            return;
        }

        if self.estimates[2] == self.estimates[1] &&
            new_time - self.estimates[2].unwrap().time > self.window_length / 2
        {
            // Half of the window passed; record a third-best estimate from
            // the second half.
            self.estimates[2] = Some(new_estimate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> WindowedFilter<u64, i64, i64> {
        WindowedFilter::new(8)
    }

    fn assert_estimate_invariants(f: &WindowedFilter<u64, i64, i64>) {
        let best = f.estimates[0].unwrap();
        let second = f.estimates[1].unwrap();
        let third = f.estimates[2].unwrap();

        assert!(best.sample >= second.sample);
        assert!(second.sample >= third.sample);
        assert!(best.time <= second.time);
        assert!(second.time <= third.time);
    }

    #[test]
    fn uninitialized_filter_has_no_estimates() {
        let f = filter();
        assert_eq!(f.get_best(), None);
        assert_eq!(f.get_second_best(), None);
        assert_eq!(f.get_third_best(), None);
    }

    #[test]
    fn first_sample_fills_all_estimates() {
        let mut f = filter();
        f.update(1_000, 0);

        assert_eq!(f.get_best(), Some(1_000));
        assert_eq!(f.get_second_best(), Some(1_000));
        assert_eq!(f.get_third_best(), Some(1_000));
    }

    #[test]
    fn new_best_replaces_everything() {
        let mut f = filter();
        f.update(500, 0);
        f.update(300, 1);
        f.update(900, 2);

        assert_eq!(f.get_best(), Some(900));
        assert_eq!(f.get_second_best(), Some(900));
        assert_eq!(f.get_third_best(), Some(900));
    }

    #[test]
    fn runner_up_ordering() {
        let mut f = filter();
        f.update(900, 0);
        // Beats the third estimate only (after a quarter window it splits
        // out of the initial triple).
        f.update(700, 3);
        f.update(600, 5);

        assert_eq!(f.get_best(), Some(900));
        assert_eq!(f.get_second_best(), Some(700));
        assert_eq!(f.get_third_best(), Some(700));
        assert_estimate_invariants(&f);
    }

    #[test]
    fn best_expires_and_promotes_second() {
        let mut f = filter();
        f.update(900, 0);
        f.update(700, 3);
        f.update(600, 5);

        // Window is 8; at time 9 the sample from time 0 has expired.
        f.update(100, 9);

        assert_eq!(f.get_best(), Some(700));
        assert_estimate_invariants(&f);
    }

    #[test]
    fn stale_window_resets_to_new_sample() {
        let mut f = filter();
        f.update(900, 0);

        // Nothing recorded for longer than the whole window.
        f.update(100, 20);

        assert_eq!(f.get_best(), Some(100));
        assert_eq!(f.get_second_best(), Some(100));
        assert_eq!(f.get_third_best(), Some(100));
    }

    #[test]
    fn estimates_stay_ordered_under_random_updates() {
        // Property: best >= second_best >= third_best, with measurement
        // times in non-decreasing order, after any update sequence.
        let mut f = filter();
        let mut state = 0x2545_f491_4f6c_dd1du64;

        for time in 0..200i64 {
            // xorshift; the values themselves are irrelevant.
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;

            f.update(state % 10_000, time);
            assert_estimate_invariants(&f);
        }
    }

    #[test]
    fn reset_overwrites_history() {
        let mut f = filter();
        f.update(900, 0);
        f.update(800, 2);

        f.reset(50, 3);

        assert_eq!(f.get_best(), Some(50));
        assert_eq!(f.get_second_best(), Some(50));
        assert_eq!(f.get_third_best(), Some(50));
    }
}
