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

//! Strongly typed time, size and rate units.
//!
//! All congestion control arithmetic goes through these newtypes rather than
//! raw integers, so that a rate is never accidentally added to a byte count
//! and all conversions (`DataSize / TimeDelta -> DataRate`,
//! `DataRate * TimeDelta -> DataSize`) live in one place. Arithmetic
//! saturates instead of wrapping; the controller must keep producing sane
//! outputs no matter what timestamps the network hands it.

use std::ops::Add;
use std::ops::AddAssign;
use std::ops::Div;
use std::ops::Mul;
use std::ops::Sub;
use std::ops::SubAssign;

const MICROS_PER_MILLI: i64 = 1_000;
const MICROS_PER_SECOND: i64 = 1_000_000;

/// A signed duration with microsecond resolution.
///
/// `TimeDelta::plus_infinity()` is used where a measurement has not happened
/// yet (e.g. folding a minimum over RTT samples).
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeDelta(i64);

impl TimeDelta {
    pub const ZERO: TimeDelta = TimeDelta(0);

    pub const fn from_micros(micros: i64) -> Self {
        TimeDelta(micros)
    }

    pub const fn from_millis(millis: i64) -> Self {
        TimeDelta(millis.saturating_mul(MICROS_PER_MILLI))
    }

    pub const fn from_seconds(seconds: i64) -> Self {
        TimeDelta(seconds.saturating_mul(MICROS_PER_SECOND))
    }

    pub const fn plus_infinity() -> Self {
        TimeDelta(i64::MAX)
    }

    pub const fn as_micros(self) -> i64 {
        self.0
    }

    pub const fn as_millis(self) -> i64 {
        self.0 / MICROS_PER_MILLI
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn is_infinite(self) -> bool {
        self.0 == i64::MAX
    }

    pub const fn abs(self) -> Self {
        TimeDelta(self.0.saturating_abs())
    }
}

impl Add for TimeDelta {
    type Output = TimeDelta;

    fn add(self, rhs: TimeDelta) -> TimeDelta {
        TimeDelta(self.0.saturating_add(rhs.0))
    }
}

impl Sub for TimeDelta {
    type Output = TimeDelta;

    fn sub(self, rhs: TimeDelta) -> TimeDelta {
        TimeDelta(self.0.saturating_sub(rhs.0))
    }
}

impl Mul<f64> for TimeDelta {
    type Output = TimeDelta;

    fn mul(self, rhs: f64) -> TimeDelta {
        if self.is_infinite() {
            return self;
        }

        TimeDelta((self.0 as f64 * rhs).round() as i64)
    }
}

impl Mul<i64> for TimeDelta {
    type Output = TimeDelta;

    fn mul(self, rhs: i64) -> TimeDelta {
        TimeDelta(self.0.saturating_mul(rhs))
    }
}

impl Div<i64> for TimeDelta {
    type Output = TimeDelta;

    fn div(self, rhs: i64) -> TimeDelta {
        TimeDelta(self.0 / rhs)
    }
}

impl Mul<DataRate> for TimeDelta {
    type Output = DataSize;

    fn mul(self, rhs: DataRate) -> DataSize {
        rhs * self
    }
}

impl std::fmt::Debug for TimeDelta {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.is_infinite() {
            return write!(f, "+inf");
        }

        match self.0 {
            x if x.abs() < MICROS_PER_MILLI => write!(f, "{x} us"),
            x if x.abs() < MICROS_PER_SECOND =>
                write!(f, "{:.2} ms", x as f64 / MICROS_PER_MILLI as f64),
            x => write!(f, "{:.2} s", x as f64 / MICROS_PER_SECOND as f64),
        }
    }
}

/// A point in time, measured in microseconds since an arbitrary epoch chosen
/// by the host transport.
///
/// Only differences between timestamps are meaningful. Fields that may not
/// have been set yet are modelled as `Option<Timestamp>`, never as sentinel
/// values.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const fn from_micros(micros: i64) -> Self {
        Timestamp(micros)
    }

    pub const fn from_millis(millis: i64) -> Self {
        Timestamp(millis.saturating_mul(MICROS_PER_MILLI))
    }

    pub const fn from_seconds(seconds: i64) -> Self {
        Timestamp(seconds.saturating_mul(MICROS_PER_SECOND))
    }

    pub const fn as_micros(self) -> i64 {
        self.0
    }

    pub const fn as_millis(self) -> i64 {
        self.0 / MICROS_PER_MILLI
    }
}

impl Sub for Timestamp {
    type Output = TimeDelta;

    fn sub(self, rhs: Timestamp) -> TimeDelta {
        TimeDelta(self.0.saturating_sub(rhs.0))
    }
}

impl Add<TimeDelta> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: TimeDelta) -> Timestamp {
        Timestamp(self.0.saturating_add(rhs.as_micros()))
    }
}

impl Sub<TimeDelta> for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: TimeDelta) -> Timestamp {
        Timestamp(self.0.saturating_sub(rhs.as_micros()))
    }
}

impl std::fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "@{:.3} s", self.0 as f64 / MICROS_PER_SECOND as f64)
    }
}

/// An amount of data, in bytes.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataSize(u64);

impl DataSize {
    pub const ZERO: DataSize = DataSize(0);

    pub const fn from_bytes(bytes: u64) -> Self {
        DataSize(bytes)
    }

    pub const fn bytes(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl Add for DataSize {
    type Output = DataSize;

    fn add(self, rhs: DataSize) -> DataSize {
        DataSize(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for DataSize {
    fn add_assign(&mut self, rhs: DataSize) {
        *self = *self + rhs;
    }
}

impl Sub for DataSize {
    type Output = DataSize;

    fn sub(self, rhs: DataSize) -> DataSize {
        DataSize(self.0.saturating_sub(rhs.0))
    }
}

impl SubAssign for DataSize {
    fn sub_assign(&mut self, rhs: DataSize) {
        *self = *self - rhs;
    }
}

impl Mul<f64> for DataSize {
    type Output = DataSize;

    fn mul(self, rhs: f64) -> DataSize {
        DataSize((self.0 as f64 * rhs).round() as u64)
    }
}

impl Div<u64> for DataSize {
    type Output = DataSize;

    fn div(self, rhs: u64) -> DataSize {
        DataSize(self.0 / rhs)
    }
}

impl Div<TimeDelta> for DataSize {
    type Output = DataRate;

    fn div(self, rhs: TimeDelta) -> DataRate {
        DataRate::from_bytes_and_time_delta(self, rhs)
    }
}

impl std::fmt::Debug for DataSize {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} bytes", self.0)
    }
}

/// A data rate, internally represented in bits per second.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataRate {
    bits_per_second: u64,
}

impl DataRate {
    pub const fn zero() -> Self {
        DataRate { bits_per_second: 0 }
    }

    pub const fn infinite() -> Self {
        DataRate {
            bits_per_second: u64::MAX,
        }
    }

    pub const fn from_bits_per_second(bits_per_second: u64) -> Self {
        DataRate { bits_per_second }
    }

    pub const fn from_kilobits_per_second(kilobits_per_second: u64) -> Self {
        DataRate {
            bits_per_second: kilobits_per_second.saturating_mul(1_000),
        }
    }

    pub const fn to_bits_per_second(self) -> u64 {
        self.bits_per_second
    }

    pub const fn is_zero(self) -> bool {
        self.bits_per_second == 0
    }

    pub const fn is_infinite(self) -> bool {
        self.bits_per_second == u64::MAX
    }

    /// The average rate at which `size` bytes pass in `time_delta`.
    ///
    /// A non-positive `time_delta` yields an infinite rate, a non-zero size
    /// always yields a non-zero rate, so that "no data" and "data over a very
    /// long period" remain distinguishable.
    pub fn from_bytes_and_time_delta(
        size: DataSize, time_delta: TimeDelta,
    ) -> Self {
        if size.is_zero() {
            return DataRate::zero();
        }

        if time_delta <= TimeDelta::ZERO {
            return DataRate::infinite();
        }

        let micro_bits = 8 * size.bytes() as u128 * MICROS_PER_SECOND as u128;
        let bits_per_second =
            (micro_bits / time_delta.as_micros() as u128).max(1);

        DataRate {
            bits_per_second: bits_per_second.min(u64::MAX as u128) as u64,
        }
    }

    /// How long transferring `size` bytes takes at this rate.
    pub fn transfer_time(self, size: DataSize) -> TimeDelta {
        if self.is_zero() {
            return TimeDelta::ZERO;
        }

        let micros = 8 * size.bytes() as u128 * MICROS_PER_SECOND as u128 /
            self.bits_per_second as u128;

        TimeDelta::from_micros(micros.min(i64::MAX as u128) as i64)
    }
}

impl Add for DataRate {
    type Output = DataRate;

    fn add(self, rhs: DataRate) -> DataRate {
        DataRate {
            bits_per_second: self.bits_per_second.saturating_add(rhs.bits_per_second),
        }
    }
}

impl Mul<f64> for DataRate {
    type Output = DataRate;

    fn mul(self, rhs: f64) -> DataRate {
        DataRate {
            bits_per_second: (self.bits_per_second as f64 * rhs).round() as u64,
        }
    }
}

impl Mul<TimeDelta> for DataRate {
    type Output = DataSize;

    fn mul(self, rhs: TimeDelta) -> DataSize {
        if rhs <= TimeDelta::ZERO {
            return DataSize::ZERO;
        }

        let bytes = self.bits_per_second as u128 * rhs.as_micros() as u128 /
            8 /
            MICROS_PER_SECOND as u128;

        DataSize::from_bytes(bytes.min(u64::MAX as u128) as u64)
    }
}

impl std::fmt::Debug for DataRate {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.bits_per_second {
            x if x < 1_000_000 => write!(f, "{:.2} kbps", x as f64 / 1_000.),
            x if x < 1_000_000_000 => {
                write!(f, "{:.2} Mbps", x as f64 / 1_000_000.)
            },
            x => write!(f, "{:.2} Gbps", x as f64 / 1_000_000_000.),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_delta_constructors() {
        assert_eq!(TimeDelta::from_millis(5).as_micros(), 5_000);
        assert_eq!(TimeDelta::from_seconds(2).as_millis(), 2_000);
        assert!(TimeDelta::ZERO.is_zero());
        assert!(TimeDelta::plus_infinity().is_infinite());
        assert!(!TimeDelta::from_millis(1).is_infinite());
    }

    #[test]
    fn time_delta_arithmetic() {
        let ms = TimeDelta::from_millis;

        assert_eq!(ms(10) + ms(5), ms(15));
        assert_eq!(ms(10) - ms(25), ms(-15));
        assert_eq!((ms(10) - ms(25)).abs(), ms(15));
        assert_eq!(ms(100) * 0.25, ms(25));
        assert_eq!(ms(100) * 8i64, ms(800));
        assert_eq!(ms(100) / 2, ms(50));

        // Saturation at the extremes instead of overflow.
        assert!((TimeDelta::plus_infinity() + ms(1)).is_infinite());
        assert!((TimeDelta::plus_infinity() * 2.0).is_infinite());
    }

    #[test]
    fn timestamp_arithmetic() {
        let t0 = Timestamp::from_millis(1_000);
        let t1 = Timestamp::from_millis(1_250);

        assert_eq!(t1 - t0, TimeDelta::from_millis(250));
        assert_eq!(t0 - t1, TimeDelta::from_millis(-250));
        assert_eq!(t0 + TimeDelta::from_millis(250), t1);
        assert_eq!(t1 - TimeDelta::from_millis(250), t0);
        assert!(t1 > t0);
    }

    #[test]
    fn data_size_arithmetic() {
        let b = DataSize::from_bytes;

        assert_eq!(b(1_000) + b(500), b(1_500));
        assert_eq!(b(1_000) - b(400), b(600));

        // Subtraction never wraps below zero.
        assert_eq!(b(400) - b(1_000), DataSize::ZERO);

        assert_eq!(b(1_000) * 1.5, b(1_500));
        assert_eq!(b(1_000) / 4, b(250));
    }

    #[test]
    fn data_rate_constructors() {
        assert_eq!(
            DataRate::from_kilobits_per_second(100).to_bits_per_second(),
            100_000
        );
        assert!(DataRate::zero().is_zero());
        assert!(DataRate::infinite().is_infinite());
    }

    #[test]
    fn data_rate_from_bytes_and_time_delta() {
        // 1250 bytes over 10 ms is 1 Mbps.
        assert_eq!(
            DataRate::from_bytes_and_time_delta(
                DataSize::from_bytes(1_250),
                TimeDelta::from_millis(10)
            ),
            DataRate::from_kilobits_per_second(1_000)
        );

        // Division is also expressed by the `/` operator.
        assert_eq!(
            DataSize::from_bytes(1_250) / TimeDelta::from_millis(10),
            DataRate::from_kilobits_per_second(1_000)
        );

        // No data means no rate.
        assert!(DataRate::from_bytes_and_time_delta(
            DataSize::ZERO,
            TimeDelta::from_millis(10)
        )
        .is_zero());

        // An instantaneous transfer has an infinite rate.
        assert!(DataRate::from_bytes_and_time_delta(
            DataSize::from_bytes(1),
            TimeDelta::ZERO
        )
        .is_infinite());

        // A very slow transfer still registers as non-zero.
        assert_eq!(
            DataRate::from_bytes_and_time_delta(
                DataSize::from_bytes(1),
                TimeDelta::from_seconds(100_000)
            )
            .to_bits_per_second(),
            1
        );
    }

    #[test]
    fn data_rate_times_time_delta() {
        let rate = DataRate::from_kilobits_per_second(1_000);

        // 1 Mbps over 100 ms is 12500 bytes, commutatively.
        assert_eq!(
            rate * TimeDelta::from_millis(100),
            DataSize::from_bytes(12_500)
        );
        assert_eq!(
            TimeDelta::from_millis(100) * rate,
            DataSize::from_bytes(12_500)
        );

        assert_eq!(rate * TimeDelta::from_millis(-5), DataSize::ZERO);
    }

    #[test]
    fn data_rate_scaling_and_transfer_time() {
        let rate = DataRate::from_kilobits_per_second(800);

        assert_eq!(rate * 1.25, DataRate::from_kilobits_per_second(1_000));
        assert_eq!(rate * 0.0, DataRate::zero());

        // 100 bytes at 1 kbps takes 800 ms.
        assert_eq!(
            DataRate::from_kilobits_per_second(1)
                .transfer_time(DataSize::from_bytes(100)),
            TimeDelta::from_millis(800)
        );
        assert_eq!(
            DataRate::zero().transfer_time(DataSize::from_bytes(100)),
            TimeDelta::ZERO
        );
    }

    #[test]
    fn debug_formatting() {
        assert_eq!(
            format!("{:?}", DataRate::from_bits_per_second(12_345)),
            "12.35 kbps"
        );
        assert_eq!(
            format!("{:?}", DataRate::from_bits_per_second(1_234_567)),
            "1.23 Mbps"
        );
        assert_eq!(
            format!("{:?}", DataRate::from_bits_per_second(1_234_567_890)),
            "1.23 Gbps"
        );
        assert_eq!(format!("{:?}", TimeDelta::from_millis(2)), "2.00 ms");
        assert_eq!(format!("{:?}", TimeDelta::plus_infinity()), "+inf");
    }
}
