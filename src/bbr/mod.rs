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

//! BBR (Bottleneck Bandwidth and RTT) congestion control.
//!
//! BBR estimates the bottleneck bandwidth and the minimum round-trip time of
//! the path, and regulates the pacing rate and the congestion window from
//! those two signals. It relies on pacing to function; do not use it with
//! pacing disabled.

mod config;
pub mod packet_queue;
pub mod sampler;

use ring::rand::SecureRandom;
use ring::rand::SystemRandom;

use crate::loss_rate::LossRateFilter;
use crate::network::NetworkAvailability;
use crate::network::NetworkControlUpdate;
use crate::network::NetworkControllerConfig;
use crate::network::NetworkEstimate;
use crate::network::NetworkRouteChange;
use crate::network::PacerConfig;
use crate::network::PacketResult;
use crate::network::ProcessInterval;
use crate::network::SentPacket;
use crate::network::TargetRateConstraints;
use crate::network::TargetTransferRate;
use crate::network::TransportPacketsFeedback;
use crate::rtt::RttStats;
use crate::units::DataRate;
use crate::units::DataSize;
use crate::units::TimeDelta;
use crate::units::Timestamp;
use crate::windowed_filter::WindowedFilter;

pub use config::BbrConfig;
pub use sampler::BandwidthSampler;

/// The maximum packet size of any packet over IPv6, based on ethernet's max
/// size, minus the IP and UDP headers. IPv6 has a 40 byte header, UDP adds
/// an additional 8 bytes. This is a total overhead of 48 bytes. Ethernet's
/// max packet size is 1500 bytes, 1500 - 48 = 1452.
const MAX_PACKET_SIZE: DataSize = DataSize::from_bytes(1_452);

/// Default maximum packet size used in the Linux TCP implementation.
const MAX_SEGMENT_SIZE: DataSize = DataSize::from_bytes(1_460);

/// The gain used in STARTUP, equal to 2/ln(2).
const HIGH_GAIN: f64 = 2.885;
/// The pacing gain applied in STARTUP after a loss has been detected. 1.5 is
/// enough to allow for 25% exogenous loss and still observe a 25% growth in
/// measured bandwidth.
const STARTUP_AFTER_LOSS_GAIN: f64 = 1.5;
/// The gain used to drain the queue built up in STARTUP.
const DRAIN_GAIN: f64 = 1.0 / HIGH_GAIN;

/// The length of the gain cycle in PROBE_BW.
const GAIN_CYCLE_LENGTH: usize = 8;
/// The size of the bandwidth filter window, in round-trips.
const BANDWIDTH_WINDOW_SIZE: i64 = GAIN_CYCLE_LENGTH as i64 + 2;

/// The time after which the current min_rtt value expires, triggering
/// PROBE_RTT.
const MIN_RTT_EXPIRY: TimeDelta = TimeDelta::from_seconds(10);
/// The minimum time the connection spends in PROBE_RTT mode.
const PROBE_RTT_TIME: TimeDelta = TimeDelta::from_millis(200);

/// The bandwidth must grow by this factor within `num_startup_rtts` rounds,
/// or STARTUP ends.
const STARTUP_GROWTH_TARGET: f64 = 1.25;
/// How close a new RTT must stay to the current min_rtt for PROBE_RTT to be
/// skippable.
const SIMILAR_MIN_RTT_THRESHOLD: f64 = 1.125;

/// The congestion window gain in PROBE_BW.
const PROBE_BW_CONGESTION_WINDOW_GAIN: f64 = 2.0;

/// The floor applied to the min RTT when deriving windows from the BDP;
/// media paths can report RTTs too small to keep a useful pipeline.
const TARGET_MIN_RTT: TimeDelta = TimeDelta::from_millis(50);

/// The bandwidth assumed before any estimate exists.
const INITIAL_BANDWIDTH: DataRate = DataRate::from_kilobits_per_second(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Startup phase of the connection.
    Startup,
    /// After achieving the highest possible bandwidth during startup, lower
    /// the pacing rate in order to drain the queue.
    Drain,
    /// Cruising mode.
    ProbeBw,
    /// Temporarily slow down sending in order to empty the buffer and
    /// measure the real minimum RTT.
    ProbeRtt,
}

/// How strongly the in-flight data is limited while recovering from losses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    /// Do not limit.
    NotInRecovery,
    /// Allow an extra outstanding byte for each byte acknowledged.
    Conservation,
    /// Allow 1.5 extra outstanding bytes for each byte acknowledged.
    MediumGrowth,
    /// Allow two extra outstanding bytes for each byte acknowledged (slow
    /// start).
    Growth,
}

pub struct BbrNetworkController {
    config: BbrConfig,

    rtt_stats: RttStats,
    rng: SystemRandom,
    loss_rate: LossRateFilter,

    constraints: Option<TargetRateConstraints>,

    mode: Mode,

    /// The bandwidth sampler provides BBR with the bandwidth measurements at
    /// individual points.
    sampler: BandwidthSampler,

    /// The number of the round trips that have occurred during the
    /// connection.
    round_trip_count: i64,

    /// The packet number of the most recently sent packet.
    last_sent_packet: u64,
    /// Acknowledgement of any packet after this one causes the round trip
    /// counter to advance.
    current_round_trip_end: Option<u64>,

    /// Tracks the maximum bandwidth over multiple recent round trips.
    max_bandwidth: WindowedFilter<DataRate, i64, i64>,

    /// The rate reported before any bandwidth samples exist.
    default_bandwidth: DataRate,

    /// Tracks the maximum number of bytes acked faster than the sending
    /// rate.
    max_ack_height: WindowedFilter<DataSize, i64, i64>,

    /// The time when the current aggregation epoch started, and the bytes
    /// acked during it.
    aggregation_epoch_start_time: Option<Timestamp>,
    aggregation_epoch_bytes: DataSize,

    /// Bytes acked since in-flight data last dropped below the target
    /// window.
    bytes_acked_since_queue_drained: DataSize,

    /// Minimum RTT estimate. Automatically expires within 10 seconds (and
    /// triggers PROBE_RTT mode) if no new value is sampled during that
    /// period.
    min_rtt: TimeDelta,
    /// The most recent per-feedback minimum RTT sample.
    last_rtt: TimeDelta,
    /// The time at which the current value of `min_rtt` was assigned.
    min_rtt_timestamp: Option<Timestamp>,

    /// The maximum allowed number of bytes in flight.
    congestion_window: DataSize,
    initial_congestion_window: DataSize,
    min_congestion_window: DataSize,
    max_congestion_window: DataSize,

    /// The current pacing rate of the connection.
    pacing_rate: DataRate,

    /// The gain currently applied to the pacing rate.
    pacing_gain: f64,
    /// The gain currently applied to the congestion window.
    congestion_window_gain: f64,

    /// The gain used for the congestion window during PROBE_BW.
    congestion_window_gain_constant: f64,

    /// Number of round trips in PROBE_BW mode, used for determining the
    /// current pacing gain cycle.
    cycle_current_offset: usize,
    /// The time at which the last pacing gain cycle was started.
    last_cycle_start: Option<Timestamp>,

    /// Whether the connection has reached the full bandwidth mode.
    is_at_full_bandwidth: bool,
    /// Number of rounds during which there was no significant bandwidth
    /// increase.
    rounds_without_bandwidth_gain: usize,
    /// The bandwidth compared to which the increase is measured.
    bandwidth_at_last_round: DataRate,

    /// Set to true after sending resumes from a fully drained pipe.
    exiting_quiescence: bool,

    /// Time at which PROBE_RTT has to be exited. Unset while the in-flight
    /// data has not yet reached the required small value.
    exit_probe_rtt_at: Option<Timestamp>,
    /// Whether a round trip has passed since PROBE_RTT became active.
    probe_rtt_round_passed: bool,

    /// Whether the most recent bandwidth sample was marked as app-limited.
    last_sample_is_app_limited: bool,

    recovery_state: RecoveryState,
    /// Receiving an acknowledgement of a packet after this one causes BBR to
    /// exit recovery. Once set it must never be cleared back to unset.
    end_recovery_at: Option<u64>,
    /// The window limiting in-flight data during loss recovery.
    recovery_window: DataSize,

    app_limited_since_last_probe_rtt: bool,
    min_rtt_since_last_probe_rtt: TimeDelta,

    /// In-flight byte count as of the most recent send or feedback event.
    last_data_in_flight: DataSize,
}

impl BbrNetworkController {
    pub fn new(config: NetworkControllerConfig) -> Self {
        let bbr_config = config.bbr;

        let mut controller = BbrNetworkController {
            rtt_stats: RttStats::default(),
            rng: SystemRandom::new(),
            loss_rate: LossRateFilter::default(),
            constraints: Some(config.constraints),
            mode: Mode::Startup,
            sampler: BandwidthSampler::default(),
            round_trip_count: 0,
            last_sent_packet: 0,
            current_round_trip_end: None,
            max_bandwidth: WindowedFilter::new(BANDWIDTH_WINDOW_SIZE),
            default_bandwidth: config
                .constraints
                .starting_rate
                .unwrap_or(INITIAL_BANDWIDTH),
            max_ack_height: WindowedFilter::new(BANDWIDTH_WINDOW_SIZE),
            aggregation_epoch_start_time: None,
            aggregation_epoch_bytes: DataSize::ZERO,
            bytes_acked_since_queue_drained: DataSize::ZERO,
            min_rtt: TimeDelta::ZERO,
            last_rtt: TimeDelta::ZERO,
            min_rtt_timestamp: None,
            congestion_window: bbr_config.initial_congestion_window,
            initial_congestion_window: bbr_config.initial_congestion_window,
            min_congestion_window: bbr_config.min_congestion_window,
            max_congestion_window: bbr_config.max_congestion_window,
            pacing_rate: DataRate::zero(),
            pacing_gain: 1.0,
            congestion_window_gain: 1.0,
            congestion_window_gain_constant: PROBE_BW_CONGESTION_WINDOW_GAIN,
            cycle_current_offset: 0,
            last_cycle_start: None,
            is_at_full_bandwidth: false,
            rounds_without_bandwidth_gain: 0,
            bandwidth_at_last_round: DataRate::zero(),
            exiting_quiescence: false,
            exit_probe_rtt_at: None,
            probe_rtt_round_passed: false,
            last_sample_is_app_limited: false,
            recovery_state: RecoveryState::NotInRecovery,
            end_recovery_at: None,
            recovery_window: bbr_config.max_congestion_window,
            app_limited_since_last_probe_rtt: false,
            min_rtt_since_last_probe_rtt: TimeDelta::plus_infinity(),
            last_data_in_flight: DataSize::ZERO,
            config: bbr_config,
        };

        controller.reset();
        controller
    }

    fn reset(&mut self) {
        self.round_trip_count = 0;
        self.rounds_without_bandwidth_gain = 0;
        self.last_data_in_flight = DataSize::ZERO;

        if self.config.num_startup_rtts > 0 {
            self.is_at_full_bandwidth = false;
            self.enter_startup_mode();
        } else {
            let at_time = self
                .constraints
                .map(|c| c.at_time)
                .unwrap_or(Timestamp::from_micros(0));
            self.is_at_full_bandwidth = true;
            self.enter_probe_bandwidth_mode(at_time);
        }
    }

    pub fn on_network_availability(
        &mut self, msg: NetworkAvailability,
    ) -> NetworkControlUpdate {
        self.reset();
        self.rtt_stats.on_connection_migration();
        self.create_rate_update(msg.at_time)
    }

    pub fn on_network_route_change(
        &mut self, msg: NetworkRouteChange,
    ) -> NetworkControlUpdate {
        self.constraints = Some(msg.constraints);
        self.reset();

        if let Some(starting_rate) = msg.constraints.starting_rate {
            self.default_bandwidth = starting_rate;
        }

        self.rtt_stats.on_connection_migration();
        self.create_rate_update(msg.at_time)
    }

    pub fn on_process_interval(
        &mut self, msg: ProcessInterval,
    ) -> NetworkControlUpdate {
        self.create_rate_update(msg.at_time)
    }

    pub fn on_target_rate_constraints(
        &mut self, msg: TargetRateConstraints,
    ) -> NetworkControlUpdate {
        self.constraints = Some(msg);
        self.create_rate_update(msg.at_time)
    }

    pub fn on_sent_packet(&mut self, msg: SentPacket) -> NetworkControlUpdate {
        self.last_sent_packet = msg.sequence_number;
        self.last_data_in_flight = msg.data_in_flight + msg.size;

        if msg.data_in_flight.is_zero() && self.sampler.is_app_limited() {
            self.exiting_quiescence = true;
        }

        if self.aggregation_epoch_start_time.is_none() {
            self.aggregation_epoch_start_time = Some(msg.send_time);
        }

        self.sampler.on_packet_sent(
            msg.send_time,
            msg.sequence_number,
            msg.size,
            msg.data_in_flight,
        );

        NetworkControlUpdate::default()
    }

    pub fn on_transport_packets_feedback(
        &mut self, msg: TransportPacketsFeedback,
    ) -> NetworkControlUpdate {
        if msg.packet_feedbacks.is_empty() {
            return NetworkControlUpdate::default();
        }

        self.last_data_in_flight = msg.data_in_flight;

        let feedback_recv_time = msg.feedback_time;
        if let Some(last_packet) = msg.packets_with_feedback().last() {
            let send_delta =
                feedback_recv_time - last_packet.sent_packet.send_time;
            self.rtt_stats.update_rtt(
                send_delta,
                TimeDelta::ZERO,
                feedback_recv_time,
            );
        }

        let total_data_acked_before = self.sampler.total_data_acked();

        let mut is_round_start = false;
        let mut min_rtt_expired = false;

        let lost_packets = msg.lost_with_send_info();
        self.discard_lost_packets(&lost_packets);

        let acked_packets = msg.received_with_send_info();

        self.loss_rate.update_with_loss_status(
            lost_packets.len() + acked_packets.len(),
            lost_packets.len(),
        );

        // Input the new data into the BBR model of the connection.
        if let Some(last_acked) = acked_packets.last() {
            let last_acked_packet = last_acked.sent_packet.sequence_number;

            is_round_start = self.update_round_trip_counter(last_acked_packet);
            min_rtt_expired = self
                .update_bandwidth_and_min_rtt(msg.feedback_time, &acked_packets);
            self.update_recovery_state(
                last_acked_packet,
                !lost_packets.is_empty(),
                is_round_start,
            );

            let data_acked =
                self.sampler.total_data_acked() - total_data_acked_before;

            self.update_ack_aggregation_bytes(msg.feedback_time, data_acked);

            if self.config.max_aggregation_bytes_multiplier > 0.0 {
                if msg.data_in_flight <=
                    self.get_target_congestion_window(self.pacing_gain) * 1.25
                {
                    self.bytes_acked_since_queue_drained = DataSize::ZERO;
                } else {
                    self.bytes_acked_since_queue_drained += data_acked;
                }
            }
        }

        // Handle logic specific to PROBE_BW mode.
        if self.mode == Mode::ProbeBw {
            self.update_gain_cycle_phase(
                msg.feedback_time,
                msg.prior_in_flight,
                !lost_packets.is_empty(),
            );
        }

        // Handle logic specific to STARTUP and DRAIN modes.
        if is_round_start && !self.is_at_full_bandwidth {
            self.check_if_full_bandwidth_reached();
        }
        self.maybe_exit_startup_or_drain(&msg);

        // Handle logic specific to PROBE_RTT.
        self.maybe_enter_or_exit_probe_rtt(&msg, is_round_start, min_rtt_expired);

        // Calculate number of bytes acked and lost.
        let data_acked =
            self.sampler.total_data_acked() - total_data_acked_before;
        let data_lost = lost_packets
            .iter()
            .fold(DataSize::ZERO, |total, p| total + p.sent_packet.size);

        // After the model is updated, recalculate the pacing rate and
        // congestion window.
        self.calculate_pacing_rate();
        self.calculate_congestion_window(data_acked);
        self.calculate_recovery_window(
            data_acked,
            data_lost,
            msg.data_in_flight,
        );

        // Cleanup internal state.
        if let Some(last_acked) = acked_packets.last() {
            self.sampler
                .remove_obsolete_packets(last_acked.sent_packet.sequence_number);
        }

        trace!("{self:?}");

        self.create_rate_update(msg.feedback_time)
    }

    /// Feeds an externally measured RTT (e.g. derived from RTCP receiver
    /// reports) into the RTT statistics.
    pub fn update_rtt(&mut self, rtt: TimeDelta, now: Timestamp) {
        self.rtt_stats.update_rtt(rtt, TimeDelta::ZERO, now);
    }

    /// Tells the controller the sender ran out of data to send. Samples
    /// taken while app-limited underestimate the link and are marked as
    /// such.
    pub fn on_application_limited(&mut self, bytes_in_flight: DataSize) {
        if bytes_in_flight >= self.get_congestion_window() {
            return;
        }

        self.app_limited_since_last_probe_rtt = true;
        self.sampler.on_app_limited();

        info!(
            "becoming application limited, last sent packet: {}, cwnd: {:?}",
            self.last_sent_packet,
            self.get_congestion_window()
        );
    }

    pub fn create_rate_update(&self, at_time: Timestamp) -> NetworkControlUpdate {
        let mut bandwidth = self.bandwidth_estimate();
        if bandwidth.is_zero() {
            bandwidth = self.default_bandwidth;
        }

        let rtt = self.get_min_rtt();
        let mut pacing_rate = self.pacing_rate();

        let mut target_rate = if self.config.pacing_rate_as_target {
            pacing_rate
        } else {
            bandwidth
        };

        target_rate = if self.mode == Mode::ProbeRtt {
            target_rate * self.config.encoder_rate_gain_in_probe_rtt
        } else {
            target_rate * self.config.encoder_rate_gain
        };
        target_rate = target_rate.min(pacing_rate);

        if let Some(constraints) = &self.constraints {
            if let Some(max_rate) = constraints.max_data_rate {
                target_rate = target_rate.min(max_rate);
                pacing_rate = pacing_rate.min(max_rate);
            }
            if let Some(min_rate) = constraints.min_data_rate {
                target_rate = target_rate.max(min_rate);
                pacing_rate = pacing_rate.max(min_rate);
            }
        }

        let target_rate_msg = TargetTransferRate {
            at_time,
            target_rate,
            network_estimate: NetworkEstimate {
                at_time,
                round_trip_time: rtt,
                loss_rate_ratio: self.loss_rate.loss_rate(),
                // In PROBE_BW the target bandwidth varies over one gain
                // cycle; other modes have no period of their own, so report
                // the same value for consistency.
                bwe_period: rtt * GAIN_CYCLE_LENGTH as i64,
            },
        };

        // A small time window ensures an even pacing rate.
        let time_window = rtt * 0.25;
        let data_window = pacing_rate * time_window;

        let (pad_window, pad_rate) = if self.is_probing_for_more_bandwidth() {
            (data_window, pacing_rate)
        } else {
            (DataSize::ZERO, DataRate::zero())
        };

        let pacer_config = PacerConfig {
            at_time,
            time_window,
            data_window,
            pad_window,
            pad_rate,
        };

        NetworkControlUpdate {
            target_rate: Some(target_rate_msg),
            pacer_config: Some(pacer_config),
            congestion_window: Some(self.get_congestion_window()),
        }
    }

    /// The rate at which the pacer may currently release packets.
    pub fn pacing_rate(&self) -> DataRate {
        if self.pacing_rate.is_zero() {
            return (self.initial_congestion_window * HIGH_GAIN) /
                self.get_min_rtt();
        }

        self.pacing_rate
    }

    /// The current windowed maximum bandwidth estimate; zero before any
    /// sample was taken.
    pub fn bandwidth_estimate(&self) -> DataRate {
        self.max_bandwidth.get_best().unwrap_or(DataRate::zero())
    }

    /// The bound on in-flight data the transport must respect.
    pub fn get_congestion_window(&self) -> DataSize {
        if self.mode == Mode::ProbeRtt {
            return self.probe_rtt_congestion_window();
        }

        if self.in_recovery() &&
            !self.config.rate_based_recovery &&
            !(self.config.rate_based_startup && self.mode == Mode::Startup)
        {
            return self.congestion_window.min(self.recovery_window);
        }

        self.congestion_window
    }

    pub fn in_recovery(&self) -> bool {
        self.recovery_state != RecoveryState::NotInRecovery
    }

    /// Bytes in flight as of the most recent send or feedback event.
    pub fn bytes_in_flight(&self) -> DataSize {
        self.last_data_in_flight
    }

    fn is_probing_for_more_bandwidth(&self) -> bool {
        (self.mode == Mode::ProbeBw && self.pacing_gain > 1.0) ||
            self.mode == Mode::Startup
    }

    /// The RTT estimate for window computations: the minimum RTT, or the
    /// pre-configured initial RTT while no sample exists.
    fn get_min_rtt(&self) -> TimeDelta {
        if !self.min_rtt.is_zero() {
            self.min_rtt
        } else {
            self.rtt_stats.initial_rtt()
        }
    }

    fn get_target_congestion_window(&self, gain: f64) -> DataSize {
        let min_rtt = self.get_min_rtt().max(TARGET_MIN_RTT);
        let bdp = min_rtt * self.bandwidth_estimate();
        let mut congestion_window = bdp * gain;

        // The BDP estimate is zero while no bandwidth samples are available.
        if congestion_window.is_zero() {
            congestion_window = self.initial_congestion_window * gain;
        }

        congestion_window.max(self.min_congestion_window)
    }

    fn probe_rtt_congestion_window(&self) -> DataSize {
        if self.config.probe_rtt_based_on_bdp {
            return self.get_target_congestion_window(
                self.config.probe_rtt_congestion_window_gain,
            );
        }

        self.min_congestion_window
    }

    fn get_pacing_gain(&self, round_offset: usize) -> f64 {
        if round_offset == 0 {
            1.0 + self.config.probe_bw_pacing_gain_offset
        } else if round_offset == 1 {
            1.0 - self.config.probe_bw_pacing_gain_offset
        } else {
            1.0
        }
    }

    fn enter_startup_mode(&mut self) {
        self.mode = Mode::Startup;
        self.pacing_gain = HIGH_GAIN;
        self.congestion_window_gain = HIGH_GAIN;
    }

    fn enter_probe_bandwidth_mode(&mut self, now: Timestamp) {
        self.mode = Mode::ProbeBw;
        self.congestion_window_gain = self.congestion_window_gain_constant;

        // Pick a random offset for the gain cycle out of {0, 2..7}. 1 is
        // excluded because in that case increased and decreased gain would
        // not follow each other.
        self.cycle_current_offset = self.random_offset() % (GAIN_CYCLE_LENGTH - 1);
        if self.cycle_current_offset >= 1 {
            self.cycle_current_offset += 1;
        }

        self.last_cycle_start = Some(now);
        self.pacing_gain = self.get_pacing_gain(self.cycle_current_offset);
    }

    fn random_offset(&self) -> usize {
        let mut byte = [0u8; 1];
        // The system RNG only fails under catastrophic conditions; a fixed
        // offset is an acceptable outcome then.
        if self.rng.fill(&mut byte).is_err() {
            return 0;
        }

        byte[0] as usize
    }

    fn discard_lost_packets(&mut self, lost_packets: &[PacketResult]) {
        for packet in lost_packets {
            self.sampler
                .on_packet_lost(packet.sent_packet.sequence_number);
        }
    }

    fn update_round_trip_counter(&mut self, last_acked_packet: u64) -> bool {
        if let Some(round_trip_end) = self.current_round_trip_end {
            if last_acked_packet <= round_trip_end {
                return false;
            }
        }

        self.round_trip_count += 1;
        self.current_round_trip_end = Some(self.last_sent_packet);
        true
    }

    /// Feeds every acked packet through the sampler and updates the
    /// bandwidth and min-RTT estimates. Returns whether the min-RTT expired.
    fn update_bandwidth_and_min_rtt(
        &mut self, now: Timestamp, acked_packets: &[PacketResult],
    ) -> bool {
        let mut sample_min_rtt = TimeDelta::plus_infinity();

        for packet in acked_packets {
            let bandwidth_sample = self
                .sampler
                .on_packet_acknowledged(now, packet.sent_packet.sequence_number);

            self.last_sample_is_app_limited = bandwidth_sample.is_app_limited;

            if !bandwidth_sample.rtt.is_zero() {
                sample_min_rtt = sample_min_rtt.min(bandwidth_sample.rtt);
            }

            // App-limited samples only raise the estimate; they cannot be
            // trusted to lower it.
            if !bandwidth_sample.is_app_limited ||
                bandwidth_sample.bandwidth > self.bandwidth_estimate()
            {
                self.max_bandwidth
                    .update(bandwidth_sample.bandwidth, self.round_trip_count);
            }
        }

        // No valid RTT sample in the whole batch.
        if sample_min_rtt.is_infinite() {
            return false;
        }

        self.last_rtt = sample_min_rtt;
        self.min_rtt_since_last_probe_rtt =
            self.min_rtt_since_last_probe_rtt.min(sample_min_rtt);

        let mut min_rtt_expired = !self.min_rtt.is_zero() &&
            self.min_rtt_timestamp
                .map(|at| now > at + MIN_RTT_EXPIRY)
                .unwrap_or(false);

        if min_rtt_expired ||
            sample_min_rtt < self.min_rtt ||
            self.min_rtt.is_zero()
        {
            if self.should_extend_min_rtt_expiry() {
                min_rtt_expired = false;
            } else {
                self.min_rtt = sample_min_rtt;
            }

            self.min_rtt_timestamp = Some(now);
            self.min_rtt_since_last_probe_rtt = TimeDelta::plus_infinity();
            self.app_limited_since_last_probe_rtt = false;
        }

        min_rtt_expired
    }

    fn should_extend_min_rtt_expiry(&self) -> bool {
        // Keep the current min_rtt if the sender was recently app-limited:
        // the estimate cannot have been made stale by the application not
        // filling the pipe.
        if self.config.probe_rtt_disabled_if_app_limited &&
            self.app_limited_since_last_probe_rtt
        {
            return true;
        }

        let min_rtt_increased_since_last_probe =
            self.min_rtt_since_last_probe_rtt >
                self.min_rtt * SIMILAR_MIN_RTT_THRESHOLD;

        if self.config.probe_rtt_skipped_if_similar_rtt &&
            self.app_limited_since_last_probe_rtt &&
            !min_rtt_increased_since_last_probe
        {
            return true;
        }

        false
    }

    fn update_gain_cycle_phase(
        &mut self, now: Timestamp, prior_in_flight: DataSize, has_losses: bool,
    ) {
        // In most cases the cycle is advanced after an RTT passes.
        let mut should_advance_gain_cycling = self
            .last_cycle_start
            .map(|start| now - start > self.get_min_rtt())
            .unwrap_or(true);

        // With a pacing gain above 1.0 the connection is probing bandwidth
        // by pushing in-flight data up to pacing_gain * BDP. Hold the phase
        // until that target is actually reached, unless losses indicate the
        // buffers cannot hold it.
        if self.pacing_gain > 1.0 &&
            !has_losses &&
            prior_in_flight <
                self.get_target_congestion_window(self.pacing_gain)
        {
            should_advance_gain_cycling = false;
        }

        // With a pacing gain below 1.0 the connection is draining the queue
        // incurred by the previous probe. If the in-flight data reaches the
        // BDP early, the queue is drained and the phase can end early.
        if self.pacing_gain < 1.0 &&
            prior_in_flight <= self.get_target_congestion_window(1.0)
        {
            should_advance_gain_cycling = true;
        }

        if should_advance_gain_cycling {
            self.cycle_current_offset =
                (self.cycle_current_offset + 1) % GAIN_CYCLE_LENGTH;
            self.last_cycle_start = Some(now);

            // Stay in low gain until the target BDP is hit; low gain mode
            // ends immediately once it is.
            if self.config.fully_drain_queue &&
                self.pacing_gain < 1.0 &&
                self.get_pacing_gain(self.cycle_current_offset) == 1.0 &&
                prior_in_flight > self.get_target_congestion_window(1.0)
            {
                return;
            }

            self.pacing_gain = self.get_pacing_gain(self.cycle_current_offset);
        }
    }

    fn check_if_full_bandwidth_reached(&mut self) {
        if self.last_sample_is_app_limited {
            return;
        }

        let target = self.bandwidth_at_last_round * STARTUP_GROWTH_TARGET;
        if self.bandwidth_estimate() >= target {
            self.bandwidth_at_last_round = self.bandwidth_estimate();
            self.rounds_without_bandwidth_gain = 0;
            return;
        }

        self.rounds_without_bandwidth_gain += 1;
        if self.rounds_without_bandwidth_gain >= self.config.num_startup_rtts ||
            (self.config.exit_startup_on_loss && self.in_recovery())
        {
            self.is_at_full_bandwidth = true;
        }
    }

    fn maybe_exit_startup_or_drain(&mut self, msg: &TransportPacketsFeedback) {
        let rtt_delta = self.last_rtt - self.min_rtt;
        if self.mode == Mode::Startup &&
            (self.is_at_full_bandwidth ||
                rtt_delta > self.config.exit_startup_rtt_threshold)
        {
            if rtt_delta > self.config.exit_startup_rtt_threshold {
                info!(
                    "exiting startup due to rtt increase from {:?} to {:?}",
                    self.min_rtt, self.last_rtt
                );
            }

            self.mode = Mode::Drain;
            self.pacing_gain = DRAIN_GAIN;
            self.congestion_window_gain = HIGH_GAIN;
        }

        if self.mode == Mode::Drain &&
            msg.data_in_flight <= self.get_target_congestion_window(1.0)
        {
            self.enter_probe_bandwidth_mode(msg.feedback_time);
        }
    }

    fn maybe_enter_or_exit_probe_rtt(
        &mut self, msg: &TransportPacketsFeedback, is_round_start: bool,
        min_rtt_expired: bool,
    ) {
        if min_rtt_expired &&
            !self.exiting_quiescence &&
            self.mode != Mode::ProbeRtt
        {
            self.mode = Mode::ProbeRtt;
            self.pacing_gain = 1.0;
            // The time to exit PROBE_RTT is not decided until in-flight data
            // reaches the target small value.
            self.exit_probe_rtt_at = None;
        }

        if self.mode == Mode::ProbeRtt {
            self.sampler.on_app_limited();

            match self.exit_probe_rtt_at {
                None => {
                    // Schedule the exit once the window has deflated; one
                    // extra packet is allowed because the window is checked
                    // before each send.
                    if msg.data_in_flight <
                        self.probe_rtt_congestion_window() + MAX_PACKET_SIZE
                    {
                        self.exit_probe_rtt_at =
                            Some(msg.feedback_time + PROBE_RTT_TIME);
                        self.probe_rtt_round_passed = false;
                    }
                },

                Some(exit_at) => {
                    if is_round_start {
                        self.probe_rtt_round_passed = true;
                    }

                    if msg.feedback_time >= exit_at && self.probe_rtt_round_passed
                    {
                        self.min_rtt_timestamp = Some(msg.feedback_time);

                        if !self.is_at_full_bandwidth {
                            self.enter_startup_mode();
                        } else {
                            self.enter_probe_bandwidth_mode(msg.feedback_time);
                        }
                    }
                },
            }
        }

        self.exiting_quiescence = false;
    }

    fn update_recovery_state(
        &mut self, last_acked_packet: u64, has_losses: bool, is_round_start: bool,
    ) {
        // Recovery ends after a full round without losses.
        if has_losses {
            self.end_recovery_at = Some(self.last_sent_packet);
        }

        match self.recovery_state {
            RecoveryState::NotInRecovery => {
                if has_losses {
                    self.recovery_state = if self.mode == Mode::Startup {
                        self.config.initial_conservation_in_startup
                    } else {
                        RecoveryState::Conservation
                    };

                    // Zero marks the recovery window as needing
                    // initialization in `calculate_recovery_window`.
                    self.recovery_window = DataSize::ZERO;
                    // The conservation phase is meant to last a whole round;
                    // extend the current round as if it started right now.
                    self.current_round_trip_end = Some(self.last_sent_packet);
                }
            },

            _ => {
                if matches!(
                    self.recovery_state,
                    RecoveryState::Conservation | RecoveryState::MediumGrowth
                ) && is_round_start
                {
                    self.recovery_state = RecoveryState::Growth;
                }

                if !has_losses &&
                    self.end_recovery_at
                        .map(|end| last_acked_packet > end)
                        .unwrap_or(true)
                {
                    self.recovery_state = RecoveryState::NotInRecovery;
                }
            },
        }
    }

    fn update_ack_aggregation_bytes(
        &mut self, ack_time: Timestamp, newly_acked_bytes: DataSize,
    ) {
        let Some(epoch_start) = self.aggregation_epoch_start_time else {
            error!("received feedback before information about sent packets");
            return;
        };

        // The bytes we would expect to be acked if the peer consumed exactly
        // the estimated bandwidth.
        let expected_bytes_acked =
            self.max_bandwidth.get_best().unwrap_or(DataRate::zero()) *
                (ack_time - epoch_start);

        // The epoch resets whenever acks fall back to (or below) the
        // estimated bandwidth.
        if self.aggregation_epoch_bytes <= expected_bytes_acked {
            self.aggregation_epoch_bytes = newly_acked_bytes;
            self.aggregation_epoch_start_time = Some(ack_time);
            return;
        }

        // Record the excess delivered over the estimated bandwidth,
        // including the most recent bytes to account for stretched acks.
        self.aggregation_epoch_bytes += newly_acked_bytes;
        self.max_ack_height.update(
            self.aggregation_epoch_bytes - expected_bytes_acked,
            self.round_trip_count,
        );
    }

    fn calculate_pacing_rate(&mut self) {
        if self.bandwidth_estimate().is_zero() {
            return;
        }

        let target_rate = self.bandwidth_estimate() * self.pacing_gain;

        if self.config.rate_based_recovery && self.in_recovery() {
            self.pacing_rate =
                self.max_bandwidth.get_third_best().unwrap_or(DataRate::zero()) *
                    self.pacing_gain;
        }

        if self.is_at_full_bandwidth {
            self.pacing_rate = target_rate;
            return;
        }

        // Bootstrap the pacing rate as soon as RTT measurements exist.
        if self.pacing_rate.is_zero() && !self.rtt_stats.min_rtt().is_zero() {
            self.pacing_rate = self.config.initial_pacing_rate;
            return;
        }

        // Slow the pacing rate in STARTUP once a loss has been detected.
        let has_ever_detected_loss = self.end_recovery_at.is_some();
        if self.config.slower_startup && has_ever_detected_loss {
            self.pacing_rate =
                self.bandwidth_estimate() * STARTUP_AFTER_LOSS_GAIN;
            return;
        }

        // Do not decrease the pacing rate during startup.
        self.pacing_rate = self.pacing_rate.max(target_rate);
    }

    fn calculate_congestion_window(&mut self, bytes_acked: DataSize) {
        if self.mode == Mode::ProbeRtt {
            return;
        }

        let mut target_window =
            self.get_target_congestion_window(self.congestion_window_gain);

        let max_ack_height =
            self.max_ack_height.get_best().unwrap_or(DataSize::ZERO);

        if self.config.max_aggregation_bytes_multiplier > 0.0 &&
            self.is_at_full_bandwidth
        {
            // Subtracting only half of bytes_acked_since_queue_drained
            // ensures sending does not completely stall for a long time if
            // the queue has not been drained recently.
            let aggregation_bonus =
                max_ack_height * self.config.max_aggregation_bytes_multiplier;
            if aggregation_bonus > self.bytes_acked_since_queue_drained / 2 {
                target_window += aggregation_bonus -
                    self.bytes_acked_since_queue_drained / 2;
            }
        } else if self.is_at_full_bandwidth {
            // Compensate for ack aggregation on top of the BDP.
            target_window += max_ack_height;
        }

        // Instead of jumping straight to the target, grow the window towards
        // it by at most `bytes_acked` per feedback.
        if self.is_at_full_bandwidth {
            self.congestion_window =
                target_window.min(self.congestion_window + bytes_acked);
        } else if self.congestion_window < target_window ||
            self.sampler.total_data_acked() < self.initial_congestion_window
        {
            // The window never shrinks while the connection is still in
            // startup.
            self.congestion_window = self.congestion_window + bytes_acked;
        }

        self.congestion_window = self
            .congestion_window
            .max(self.min_congestion_window)
            .min(self.max_congestion_window);
    }

    fn calculate_recovery_window(
        &mut self, bytes_acked: DataSize, bytes_lost: DataSize,
        bytes_in_flight: DataSize,
    ) {
        if self.config.rate_based_recovery ||
            (self.config.rate_based_startup && self.mode == Mode::Startup)
        {
            return;
        }

        if self.recovery_state == RecoveryState::NotInRecovery {
            return;
        }

        // Set up the initial recovery window.
        if self.recovery_window.is_zero() {
            self.recovery_window =
                (bytes_in_flight + bytes_acked).max(self.min_congestion_window);
            return;
        }

        // Remove losses from the recovery window, accounting for potential
        // underflow.
        self.recovery_window = if self.recovery_window >= bytes_lost {
            self.recovery_window - bytes_lost
        } else {
            MAX_SEGMENT_SIZE
        };

        // In CONSERVATION, subtracting the losses is all there is to do. In
        // GROWTH, release an additional `bytes_acked` for slow-start-like
        // behavior; MEDIUM_GROWTH releases half of that.
        match self.recovery_state {
            RecoveryState::Growth => self.recovery_window += bytes_acked,
            RecoveryState::MediumGrowth =>
                self.recovery_window += bytes_acked / 2,
            _ => (),
        }

        // Always allow sending at least `bytes_acked` in response.
        self.recovery_window = self
            .recovery_window
            .max(bytes_in_flight + bytes_acked)
            .max(self.min_congestion_window);
    }
}

impl std::fmt::Debug for BbrNetworkController {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "bbr mode={:?} bw={:?} min_rtt={:?} pacing_rate={:?} \
             pacing_gain={} cwnd={:?} full_bw={} recovery={:?} rounds={}",
            self.mode,
            self.bandwidth_estimate(),
            self.min_rtt,
            self.pacing_rate,
            self.pacing_gain,
            self.get_congestion_window(),
            self.is_at_full_bandwidth,
            self.recovery_state,
            self.round_trip_count,
        )
    }
}
