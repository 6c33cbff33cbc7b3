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

use std::str::FromStr;

use crate::units::DataRate;
use crate::units::DataSize;
use crate::units::TimeDelta;

use super::RecoveryState;

const DEFAULT_TCP_MSS_BYTES: u64 = 1_460;
const INITIAL_CONGESTION_WINDOW_PACKETS: u64 = 32;
// Guarantees that delayed acks don't reduce the bandwidth measurement; does
// not increase the send rate.
const DEFAULT_MIN_CONGESTION_WINDOW_PACKETS: u64 = 20;
const DEFAULT_MAX_CONGESTION_WINDOW_PACKETS: u64 = 2_000;

/// Tuning knobs for the BBR controller, overridable through a flat
/// `key1:value1,key2:value2/` field-trial string.
///
/// Unrecognized keys and malformed values are logged and skipped, keeping
/// the default.
#[derive(Debug, Clone)]
pub struct BbrConfig {
    pub probe_bw_pacing_gain_offset: f64,
    pub encoder_rate_gain: f64,
    pub encoder_rate_gain_in_probe_rtt: f64,
    /// RTT increase over the minimum that forces STARTUP to end.
    pub exit_startup_rtt_threshold: TimeDelta,

    pub initial_congestion_window: DataSize,
    pub min_congestion_window: DataSize,
    pub max_congestion_window: DataSize,

    pub probe_rtt_congestion_window_gain: f64,
    pub pacing_rate_as_target: bool,

    pub exit_startup_on_loss: bool,
    /// Rounds without bandwidth growth tolerated in STARTUP; zero skips
    /// STARTUP entirely.
    pub num_startup_rtts: usize,
    /// When true, recovery limits the pacing rate rather than the window.
    pub rate_based_recovery: bool,
    pub max_aggregation_bytes_multiplier: f64,
    /// When true, pace at 1.5x the estimate in STARTUP once a loss was seen.
    pub slower_startup: bool,
    /// When true, disables the recovery window while in STARTUP.
    pub rate_based_startup: bool,
    /// Recovery mode first entered when a loss occurs during STARTUP.
    pub initial_conservation_in_startup: RecoveryState,
    /// When true, stay in the low-gain phase until in-flight data drops
    /// below the estimated BDP.
    pub fully_drain_queue: bool,

    /// When true, PROBE_RTT targets 0.75x BDP instead of the minimum
    /// window.
    pub probe_rtt_based_on_bdp: bool,
    /// When true, skip PROBE_RTT when the recently measured RTTs stayed
    /// within 12.5% of the current minimum. Even if the minimum is
    /// underestimated by that much, the 25% gain cycle and the 2x window
    /// gain absorb it.
    pub probe_rtt_skipped_if_similar_rtt: bool,
    /// When true, skip PROBE_RTT entirely while the sender has recently
    /// been application limited.
    pub probe_rtt_disabled_if_app_limited: bool,

    /// Rate paced before the first bandwidth estimate exists.
    pub initial_pacing_rate: DataRate,
}

impl Default for BbrConfig {
    fn default() -> Self {
        BbrConfig {
            probe_bw_pacing_gain_offset: 0.25,
            encoder_rate_gain: 1.0,
            encoder_rate_gain_in_probe_rtt: 1.0,
            exit_startup_rtt_threshold: TimeDelta::plus_infinity(),
            initial_congestion_window: DataSize::from_bytes(
                INITIAL_CONGESTION_WINDOW_PACKETS * DEFAULT_TCP_MSS_BYTES,
            ),
            min_congestion_window: DataSize::from_bytes(
                DEFAULT_MIN_CONGESTION_WINDOW_PACKETS * DEFAULT_TCP_MSS_BYTES,
            ),
            max_congestion_window: DataSize::from_bytes(
                DEFAULT_MAX_CONGESTION_WINDOW_PACKETS * DEFAULT_TCP_MSS_BYTES,
            ),
            probe_rtt_congestion_window_gain: 0.75,
            pacing_rate_as_target: false,
            exit_startup_on_loss: true,
            num_startup_rtts: 3,
            rate_based_recovery: false,
            max_aggregation_bytes_multiplier: 0.0,
            slower_startup: false,
            rate_based_startup: false,
            initial_conservation_in_startup: RecoveryState::Conservation,
            fully_drain_queue: false,
            probe_rtt_based_on_bdp: false,
            probe_rtt_skipped_if_similar_rtt: false,
            probe_rtt_disabled_if_app_limited: false,
            initial_pacing_rate: DataRate::from_kilobits_per_second(100),
        }
    }
}

impl BbrConfig {
    /// Parses a field-trial blob of the form `key1:value1,key2:value2/`.
    /// Groups are separated by `/`, entries by `,`, key and value by `:`.
    pub fn from_field_trial_string(trial: &str) -> Self {
        let mut config = BbrConfig::default();

        for entry in trial.split(['/', ',']) {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }

            match entry.split_once(':') {
                Some((key, value)) => config.apply(key.trim(), value.trim()),
                None => warn!("malformed field trial entry \"{entry}\""),
            }
        }

        config
    }

    fn apply(&mut self, key: &str, value: &str) {
        let applied = match key {
            "probe_bw_pacing_gain_offset" =>
                parse_f64(value, &mut self.probe_bw_pacing_gain_offset),
            "encoder_rate_gain" => parse_f64(value, &mut self.encoder_rate_gain),
            "encoder_rate_gain_in_probe_rtt" =>
                parse_f64(value, &mut self.encoder_rate_gain_in_probe_rtt),
            "exit_startup_rtt_threshold" =>
                parse_millis(value, &mut self.exit_startup_rtt_threshold),
            "initial_cwin" =>
                parse_bytes(value, &mut self.initial_congestion_window),
            "min_cwin" => parse_bytes(value, &mut self.min_congestion_window),
            "max_cwin" => parse_bytes(value, &mut self.max_congestion_window),
            "probe_rtt_cwin_gain" =>
                parse_f64(value, &mut self.probe_rtt_congestion_window_gain),
            "pacing_rate_as_target" =>
                parse_bool(value, &mut self.pacing_rate_as_target),
            "exit_startup_on_loss" =>
                parse_bool(value, &mut self.exit_startup_on_loss),
            "num_startup_rtts" => parse_usize(value, &mut self.num_startup_rtts),
            "rate_based_recovery" =>
                parse_bool(value, &mut self.rate_based_recovery),
            "max_aggregation_bytes_multiplier" =>
                parse_f64(value, &mut self.max_aggregation_bytes_multiplier),
            "slower_startup" => parse_bool(value, &mut self.slower_startup),
            "rate_based_startup" =>
                parse_bool(value, &mut self.rate_based_startup),
            "initial_conservation" => match RecoveryState::from_str(value) {
                Ok(state) => {
                    self.initial_conservation_in_startup = state;
                    true
                },
                Err(_) => false,
            },
            "fully_drain_queue" => parse_bool(value, &mut self.fully_drain_queue),
            "probe_rtt_based_on_bdp" =>
                parse_bool(value, &mut self.probe_rtt_based_on_bdp),
            "probe_rtt_skipped_if_similar_rtt" =>
                parse_bool(value, &mut self.probe_rtt_skipped_if_similar_rtt),
            "probe_rtt_disabled_if_app_limited" =>
                parse_bool(value, &mut self.probe_rtt_disabled_if_app_limited),
            "initial_pacing_rate" =>
                parse_bits_per_second(value, &mut self.initial_pacing_rate),

            _ => {
                warn!("unrecognized field trial key \"{key}\"");
                return;
            },
        };

        if !applied {
            warn!("invalid value \"{value}\" for field trial key \"{key}\"");
        }
    }
}

impl FromStr for RecoveryState {
    type Err = crate::Error;

    /// Converts a string to a [`RecoveryState`].
    ///
    /// If `name` is not valid, [`Error::CongestionControl`] is returned.
    ///
    /// [`Error::CongestionControl`]: crate::Error::CongestionControl
    fn from_str(name: &str) -> std::result::Result<Self, Self::Err> {
        match name {
            "NOT_IN_RECOVERY" => Ok(RecoveryState::NotInRecovery),
            "CONSERVATION" => Ok(RecoveryState::Conservation),
            "MEDIUM_GROWTH" => Ok(RecoveryState::MediumGrowth),
            "GROWTH" => Ok(RecoveryState::Growth),

            _ => Err(crate::Error::CongestionControl),
        }
    }
}

fn parse_f64(value: &str, out: &mut f64) -> bool {
    match value.parse() {
        Ok(v) => {
            *out = v;
            true
        },
        Err(_) => false,
    }
}

fn parse_usize(value: &str, out: &mut usize) -> bool {
    match value.parse() {
        Ok(v) => {
            *out = v;
            true
        },
        Err(_) => false,
    }
}

fn parse_bool(value: &str, out: &mut bool) -> bool {
    match value {
        "true" | "1" => {
            *out = true;
            true
        },
        "false" | "0" => {
            *out = false;
            true
        },
        _ => false,
    }
}

fn parse_bytes(value: &str, out: &mut DataSize) -> bool {
    match value.parse() {
        Ok(v) => {
            *out = DataSize::from_bytes(v);
            true
        },
        Err(_) => false,
    }
}

fn parse_millis(value: &str, out: &mut TimeDelta) -> bool {
    match value.parse() {
        Ok(v) => {
            *out = TimeDelta::from_millis(v);
            true
        },
        Err(_) => false,
    }
}

fn parse_bits_per_second(value: &str, out: &mut DataRate) -> bool {
    match value.parse() {
        Ok(v) => {
            *out = DataRate::from_bits_per_second(v);
            true
        },
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_tcp_derived_windows() {
        let config = BbrConfig::default();

        assert_eq!(
            config.initial_congestion_window,
            DataSize::from_bytes(32 * 1_460)
        );
        assert_eq!(
            config.min_congestion_window,
            DataSize::from_bytes(20 * 1_460)
        );
        assert_eq!(
            config.max_congestion_window,
            DataSize::from_bytes(2_000 * 1_460)
        );
        assert_eq!(config.num_startup_rtts, 3);
        assert!(config.exit_startup_on_loss);
        assert!(config.exit_startup_rtt_threshold.is_infinite());
        assert_eq!(
            config.initial_conservation_in_startup,
            RecoveryState::Conservation
        );
    }

    #[test]
    fn field_trial_overrides() {
        let config = BbrConfig::from_field_trial_string(
            "initial_cwin:14600,num_startup_rtts:5,slower_startup:true,\
             probe_bw_pacing_gain_offset:0.3,initial_conservation:GROWTH/",
        );

        assert_eq!(
            config.initial_congestion_window,
            DataSize::from_bytes(14_600)
        );
        assert_eq!(config.num_startup_rtts, 5);
        assert!(config.slower_startup);
        assert_eq!(config.probe_bw_pacing_gain_offset, 0.3);
        assert_eq!(
            config.initial_conservation_in_startup,
            RecoveryState::Growth
        );
    }

    #[test]
    fn unknown_keys_and_bad_values_keep_defaults() {
        let config = BbrConfig::from_field_trial_string(
            "no_such_knob:1,num_startup_rtts:many,min_cwin",
        );

        assert_eq!(config.num_startup_rtts, 3);
        assert_eq!(
            config.min_congestion_window,
            DataSize::from_bytes(20 * 1_460)
        );
    }

    #[test]
    fn empty_trial_string_is_all_defaults() {
        let config = BbrConfig::from_field_trial_string("");
        assert_eq!(config.num_startup_rtts, 3);
        assert_eq!(config.encoder_rate_gain, 1.0);
    }

    #[test]
    fn recovery_state_from_str() {
        assert_eq!(
            "NOT_IN_RECOVERY".parse(),
            Ok(RecoveryState::NotInRecovery)
        );
        assert_eq!("CONSERVATION".parse(), Ok(RecoveryState::Conservation));
        assert_eq!("MEDIUM_GROWTH".parse(), Ok(RecoveryState::MediumGrowth));
        assert_eq!("GROWTH".parse(), Ok(RecoveryState::Growth));
        assert_eq!(
            "growth".parse::<RecoveryState>(),
            Err(crate::Error::CongestionControl)
        );
    }
}
