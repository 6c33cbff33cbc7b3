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

//! Messages exchanged between the transport and the congestion controller.
//!
//! Inputs describe network events (packets sent, transport feedback, route
//! changes); the [`NetworkControlUpdate`] output carries everything the
//! pacer and the encoder need to act on the controller's latest view.

use smallvec::SmallVec;

use crate::bbr::BbrConfig;
use crate::units::DataRate;
use crate::units::DataSize;
use crate::units::TimeDelta;
use crate::units::Timestamp;

/// A congestion-controlled packet handed to the network.
#[derive(Debug, Clone, Copy)]
pub struct SentPacket {
    pub send_time: Timestamp,
    /// Monotonically increasing transport-wide sequence number.
    pub sequence_number: u64,
    pub size: DataSize,
    /// Bytes in flight when this packet was sent, not counting the packet
    /// itself. Zero marks the start of a new packet train.
    pub data_in_flight: DataSize,
}

/// Feedback for one previously sent packet. A missing `receive_time` means
/// the packet was reported lost.
#[derive(Debug, Clone, Copy)]
pub struct PacketResult {
    pub sent_packet: SentPacket,
    pub receive_time: Option<Timestamp>,
}

impl PacketResult {
    pub fn is_received(&self) -> bool {
        self.receive_time.is_some()
    }
}

/// A batch of transport-wide feedback, covering one or more sent packets.
///
/// `packet_feedbacks` must be ordered by ascending sequence number, and
/// batches must be delivered in non-decreasing `feedback_time`.
#[derive(Debug, Clone, Default)]
pub struct TransportPacketsFeedback {
    pub feedback_time: Timestamp,
    /// Bytes in flight before this feedback was processed.
    pub prior_in_flight: DataSize,
    /// Bytes in flight after the acked and lost packets were removed.
    pub data_in_flight: DataSize,
    pub packet_feedbacks: Vec<PacketResult>,
}

impl TransportPacketsFeedback {
    pub fn received_with_send_info(&self) -> SmallVec<[PacketResult; 8]> {
        self.packet_feedbacks
            .iter()
            .filter(|p| p.is_received())
            .copied()
            .collect()
    }

    pub fn lost_with_send_info(&self) -> SmallVec<[PacketResult; 8]> {
        self.packet_feedbacks
            .iter()
            .filter(|p| !p.is_received())
            .copied()
            .collect()
    }

    pub fn packets_with_feedback(&self) -> &[PacketResult] {
        &self.packet_feedbacks
    }
}

/// Rate limits imposed by the application or the transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct TargetRateConstraints {
    pub at_time: Timestamp,
    pub starting_rate: Option<DataRate>,
    pub min_data_rate: Option<DataRate>,
    pub max_data_rate: Option<DataRate>,
}

/// Signals that the network became available or unavailable.
#[derive(Debug, Clone, Copy)]
pub struct NetworkAvailability {
    pub at_time: Timestamp,
    pub network_available: bool,
}

/// Signals that packets now take a different route (interface change,
/// roaming). Estimates built on the old route no longer apply.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkRouteChange {
    pub at_time: Timestamp,
    pub constraints: TargetRateConstraints,
}

/// Periodic tick from the host's timer, used to refresh outputs when no
/// network event arrives.
#[derive(Debug, Clone, Copy)]
pub struct ProcessInterval {
    pub at_time: Timestamp,
}

/// An RTCP receiver report block. Opaque to rate-sample based algorithms;
/// carried for algorithms that estimate from receiver statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReceiverReport {
    pub fraction_lost: f64,
    pub packets_lost: u32,
    pub jitter: u32,
    pub round_trip_time: TimeDelta,
}

/// The controller's current model of the network, attached to each target
/// rate update.
#[derive(Debug, Clone, Copy)]
pub struct NetworkEstimate {
    pub at_time: Timestamp,
    pub round_trip_time: TimeDelta,
    /// Fraction of packets lost over the recent feedback window.
    pub loss_rate_ratio: f64,
    /// How long the target rate can be assumed stable; in PROBE_BW the
    /// bandwidth deliberately varies over one full gain cycle.
    pub bwe_period: TimeDelta,
}

/// The bitrate the encoder should produce, with the estimate it derives
/// from.
#[derive(Debug, Clone, Copy)]
pub struct TargetTransferRate {
    pub at_time: Timestamp,
    pub target_rate: DataRate,
    pub network_estimate: NetworkEstimate,
}

/// Pacer settings: release up to `data_window` bytes per `time_window`, and
/// when probing, pad up to `pad_window` bytes at `pad_rate` if the media
/// does not fill the window.
#[derive(Debug, Clone, Copy)]
pub struct PacerConfig {
    pub at_time: Timestamp,
    pub time_window: TimeDelta,
    pub data_window: DataSize,
    pub pad_window: DataSize,
    pub pad_rate: DataRate,
}

impl PacerConfig {
    pub fn data_rate(&self) -> DataRate {
        self.data_window / self.time_window
    }
}

/// Everything the surrounding transport may need to adjust after an event.
/// Fields are `None` when the event did not produce a new value.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkControlUpdate {
    pub target_rate: Option<TargetTransferRate>,
    pub pacer_config: Option<PacerConfig>,
    pub congestion_window: Option<DataSize>,
}

/// Construction-time configuration for a network controller.
#[derive(Debug, Clone, Default)]
pub struct NetworkControllerConfig {
    pub constraints: TargetRateConstraints,
    /// Algorithm tuning knobs. Deployments driven by field-trial strings
    /// build this with [`BbrConfig::from_field_trial_string`].
    ///
    /// [`BbrConfig::from_field_trial_string`]: crate::bbr::BbrConfig::from_field_trial_string
    pub bbr: BbrConfig,
}
