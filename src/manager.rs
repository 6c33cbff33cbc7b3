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

//! The send-algorithm manager.
//!
//! The transport talks to one [`SendAlgorithmManager`]; the manager forwards
//! every event to the algorithm selected at construction time and answers
//! the scalar queries the pacer and the encoder poll. There is no runtime
//! switching: the selection is for the lifetime of the manager.

use std::str::FromStr;

use enum_dispatch::enum_dispatch;

use crate::bbr::BbrNetworkController;
use crate::network::NetworkAvailability;
use crate::network::NetworkControlUpdate;
use crate::network::NetworkControllerConfig;
use crate::network::NetworkRouteChange;
use crate::network::ProcessInterval;
use crate::network::ReceiverReport;
use crate::network::SentPacket;
use crate::network::TargetRateConstraints;
use crate::network::TransportPacketsFeedback;
use crate::units::DataRate;
use crate::units::DataSize;
use crate::units::TimeDelta;
use crate::units::Timestamp;

/// The capability set every send algorithm exposes to the manager.
///
/// Event entrypoints never fail; invalid input is logged and degrades to a
/// no-op, and every entrypoint returns the latest [`NetworkControlUpdate`].
#[enum_dispatch]
pub trait SendAlgorithm {
    fn on_network_availability(
        &mut self, msg: NetworkAvailability,
    ) -> NetworkControlUpdate;

    fn on_network_route_change(
        &mut self, msg: NetworkRouteChange,
    ) -> NetworkControlUpdate;

    fn on_process_interval(&mut self, msg: ProcessInterval)
        -> NetworkControlUpdate;

    fn on_target_rate_constraints(
        &mut self, msg: TargetRateConstraints,
    ) -> NetworkControlUpdate;

    fn on_sent_packet(&mut self, packet: SentPacket) -> NetworkControlUpdate;

    fn on_transport_packets_feedback(
        &mut self, msg: TransportPacketsFeedback,
    ) -> NetworkControlUpdate;

    /// An RTCP receiver report arrived. Algorithms that estimate from
    /// receiver statistics consume it; rate-sample based ones ignore it.
    fn on_receiver_report(
        &mut self, report: ReceiverReport, rtt: TimeDelta, now: Timestamp,
    );

    /// Feeds an externally measured RTT (e.g. from RTCP) into the
    /// algorithm's statistics.
    fn update_rtt(&mut self, rtt: TimeDelta, now: Timestamp);

    fn pacing_rate(&self) -> DataRate;

    fn congestion_window(&self) -> DataSize;

    /// Bytes in flight as of the most recent send or feedback event.
    fn bytes_in_flight(&self) -> DataSize;

    /// How long the pacer needs to release `size` bytes at the current
    /// pacing rate.
    fn pacing_transfer_time(&self, size: DataSize) -> TimeDelta;

    /// Estimated delay-gradient trends, for algorithms that compute them.
    fn trends(&self) -> Vec<f64>;

    /// The bitrate the encoder should currently target.
    fn available_bitrate(&self) -> DataRate;
}

impl SendAlgorithm for BbrNetworkController {
    fn on_network_availability(
        &mut self, msg: NetworkAvailability,
    ) -> NetworkControlUpdate {
        self.on_network_availability(msg)
    }

    fn on_network_route_change(
        &mut self, msg: NetworkRouteChange,
    ) -> NetworkControlUpdate {
        self.on_network_route_change(msg)
    }

    fn on_process_interval(
        &mut self, msg: ProcessInterval,
    ) -> NetworkControlUpdate {
        self.on_process_interval(msg)
    }

    fn on_target_rate_constraints(
        &mut self, msg: TargetRateConstraints,
    ) -> NetworkControlUpdate {
        self.on_target_rate_constraints(msg)
    }

    fn on_sent_packet(&mut self, packet: SentPacket) -> NetworkControlUpdate {
        self.on_sent_packet(packet)
    }

    fn on_transport_packets_feedback(
        &mut self, msg: TransportPacketsFeedback,
    ) -> NetworkControlUpdate {
        self.on_transport_packets_feedback(msg)
    }

    fn on_receiver_report(
        &mut self, _report: ReceiverReport, _rtt: TimeDelta, _now: Timestamp,
    ) {
        // BBR estimates everything from transport feedback.
    }

    fn update_rtt(&mut self, rtt: TimeDelta, now: Timestamp) {
        self.update_rtt(rtt, now);
    }

    fn pacing_rate(&self) -> DataRate {
        self.pacing_rate()
    }

    fn congestion_window(&self) -> DataSize {
        self.get_congestion_window()
    }

    fn bytes_in_flight(&self) -> DataSize {
        self.bytes_in_flight()
    }

    fn pacing_transfer_time(&self, size: DataSize) -> TimeDelta {
        self.pacing_rate().transfer_time(size)
    }

    fn trends(&self) -> Vec<f64> {
        Vec::new()
    }

    fn available_bitrate(&self) -> DataRate {
        self.create_rate_update(Timestamp::from_micros(0))
            .target_rate
            .map(|t| t.target_rate)
            .unwrap_or(DataRate::zero())
    }
}

/// Which congestion control algorithm a manager drives. `bbr` in a string
/// form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendAlgorithmKind {
    Bbr,
}

impl FromStr for SendAlgorithmKind {
    type Err = crate::Error;

    /// Converts a string to a [`SendAlgorithmKind`].
    ///
    /// If `name` is not valid, [`Error::CongestionControl`] is returned.
    ///
    /// [`Error::CongestionControl`]: crate::Error::CongestionControl
    fn from_str(name: &str) -> std::result::Result<Self, Self::Err> {
        match name {
            "bbr" => Ok(SendAlgorithmKind::Bbr),

            _ => Err(crate::Error::CongestionControl),
        }
    }
}

#[enum_dispatch(SendAlgorithm)]
#[allow(clippy::large_enum_variant)]
#[derive(Debug)]
enum Algorithm {
    Bbr(BbrNetworkController),
}

/// Owns the algorithm selected at construction, so the transport has a
/// single object to feed and poll.
#[derive(Debug)]
pub struct SendAlgorithmManager {
    algorithm: Algorithm,
}

impl SendAlgorithmManager {
    pub fn new(kind: SendAlgorithmKind, config: NetworkControllerConfig) -> Self {
        let algorithm = match kind {
            SendAlgorithmKind::Bbr =>
                Algorithm::Bbr(BbrNetworkController::new(config)),
        };

        SendAlgorithmManager { algorithm }
    }

    pub fn on_network_availability(
        &mut self, msg: NetworkAvailability,
    ) -> NetworkControlUpdate {
        self.algorithm.on_network_availability(msg)
    }

    pub fn on_network_route_change(
        &mut self, msg: NetworkRouteChange,
    ) -> NetworkControlUpdate {
        self.algorithm.on_network_route_change(msg)
    }

    pub fn on_process_interval(
        &mut self, msg: ProcessInterval,
    ) -> NetworkControlUpdate {
        self.algorithm.on_process_interval(msg)
    }

    pub fn on_target_rate_constraints(
        &mut self, msg: TargetRateConstraints,
    ) -> NetworkControlUpdate {
        self.algorithm.on_target_rate_constraints(msg)
    }

    pub fn on_sent_packet(&mut self, packet: SentPacket) -> NetworkControlUpdate {
        self.algorithm.on_sent_packet(packet)
    }

    /// Feeds a feedback batch to the algorithm. Returns whether the batch
    /// carried any usable packet feedback.
    pub fn on_transport_packets_feedback(
        &mut self, msg: TransportPacketsFeedback,
    ) -> bool {
        if msg.packet_feedbacks.is_empty() {
            warn!("discarding transport feedback without packet results");
            return false;
        }

        self.algorithm.on_transport_packets_feedback(msg);
        true
    }

    pub fn on_receiver_report(
        &mut self, report: ReceiverReport, rtt: TimeDelta, now: Timestamp,
    ) {
        self.algorithm.on_receiver_report(report, rtt, now);
    }

    pub fn update_rtt(&mut self, rtt: TimeDelta, now: Timestamp) {
        self.algorithm.update_rtt(rtt, now);
    }

    pub fn pacing_rate(&self) -> DataRate {
        self.algorithm.pacing_rate()
    }

    pub fn congestion_window(&self) -> DataSize {
        self.algorithm.congestion_window()
    }

    pub fn bytes_in_flight(&self) -> DataSize {
        self.algorithm.bytes_in_flight()
    }

    /// How long the pacer needs to release `size` bytes at the current
    /// pacing rate.
    pub fn pacing_transfer_time(&self, size: DataSize) -> TimeDelta {
        self.algorithm.pacing_transfer_time(size)
    }

    pub fn trends(&self) -> Vec<f64> {
        self.algorithm.trends()
    }

    pub fn available_bitrate(&self) -> DataRate {
        self.algorithm.available_bitrate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SendAlgorithmManager {
        SendAlgorithmManager::new(
            SendAlgorithmKind::Bbr,
            NetworkControllerConfig::default(),
        )
    }

    #[test]
    fn algorithm_kind_from_str() {
        assert_eq!("bbr".parse(), Ok(SendAlgorithmKind::Bbr));
        assert_eq!(
            "cubic".parse::<SendAlgorithmKind>(),
            Err(crate::Error::CongestionControl)
        );
    }

    #[test]
    fn tracks_bytes_in_flight_from_events() {
        let mut manager = manager();
        assert!(manager.bytes_in_flight().is_zero());

        manager.on_sent_packet(SentPacket {
            send_time: Timestamp::from_millis(0),
            sequence_number: 0,
            size: DataSize::from_bytes(1_200),
            data_in_flight: DataSize::ZERO,
        });
        assert_eq!(manager.bytes_in_flight(), DataSize::from_bytes(1_200));

        let handled =
            manager.on_transport_packets_feedback(TransportPacketsFeedback {
                feedback_time: Timestamp::from_millis(50),
                prior_in_flight: DataSize::from_bytes(1_200),
                data_in_flight: DataSize::ZERO,
                packet_feedbacks: vec![crate::network::PacketResult {
                    sent_packet: SentPacket {
                        send_time: Timestamp::from_millis(0),
                        sequence_number: 0,
                        size: DataSize::from_bytes(1_200),
                        data_in_flight: DataSize::ZERO,
                    },
                    receive_time: Some(Timestamp::from_millis(50)),
                }],
            });

        assert!(handled);
        assert!(manager.bytes_in_flight().is_zero());
    }

    #[test]
    fn empty_feedback_is_rejected() {
        let mut manager = manager();

        let handled =
            manager.on_transport_packets_feedback(TransportPacketsFeedback {
                feedback_time: Timestamp::from_millis(10),
                ..Default::default()
            });

        assert!(!handled);
    }

    #[test]
    fn outputs_are_available_before_any_traffic() {
        let manager = manager();

        // BBR's defaults: initial window, bootstrap pacing rate.
        assert_eq!(
            manager.congestion_window(),
            DataSize::from_bytes(32 * 1_460)
        );
        assert!(!manager.pacing_rate().is_zero());
        assert!(!manager.available_bitrate().is_zero());
        assert!(manager.trends().is_empty());
    }

    #[test]
    fn pacing_transfer_time_matches_the_pacing_rate() {
        let manager = manager();

        let rate = manager.pacing_rate();
        let size = DataSize::from_bytes(10_000);

        assert_eq!(manager.pacing_transfer_time(size), rate.transfer_time(size));
    }

    #[test]
    fn receiver_report_and_rtt_updates_are_accepted() {
        let mut manager = manager();

        // BBR ignores receiver reports; the call must still be safe.
        manager.on_receiver_report(
            ReceiverReport::default(),
            TimeDelta::from_millis(30),
            Timestamp::from_millis(100),
        );
        manager.update_rtt(TimeDelta::from_millis(30), Timestamp::from_millis(100));

        assert!(!manager.pacing_rate().is_zero());
    }
}
