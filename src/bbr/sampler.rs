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

use crate::units::DataRate;
use crate::units::DataSize;
use crate::units::TimeDelta;
use crate::units::Timestamp;

use super::packet_queue::PacketNumberIndexedQueue;

/// Warn once insertions outrun the front of the tracked range by this many
/// packets; the queue keeps growing regardless, but something upstream has
/// stopped acknowledging.
const MAX_TRACKED_PACKETS: u64 = 10_000;

/// The delivery rate measured from a single acknowledged packet.
#[derive(Debug, Default, Clone, Copy)]
pub struct BandwidthSample {
    /// Delivery rate at this packet. Zero when no valid sample could be
    /// taken.
    pub bandwidth: DataRate,
    /// RTT measured at this packet, not corrected for delayed
    /// acknowledgements. Zero when no RTT sample is available.
    pub rtt: TimeDelta,
    /// Whether the sample might be artificially low because the sender did
    /// not have enough data to saturate the link.
    pub is_app_limited: bool,
}

/// Sampler state captured at the moment a packet was sent, keyed by the
/// packet number until the packet is acked, lost or discarded.
#[derive(Debug, Clone, Copy)]
struct ConnectionStateOnSentPacket {
    sent_time: Timestamp,
    size: DataSize,
    /// Total data sent when this packet left, including the packet itself.
    total_data_sent: DataSize,
    /// `total_data_sent` as of the most recently acked packet at send time.
    total_data_sent_at_last_acked_packet: DataSize,
    /// Send time of the most recently acked packet at send time.
    last_acked_packet_sent_time: Option<Timestamp>,
    /// Ack time of the most recently acked packet at send time.
    last_acked_packet_ack_time: Option<Timestamp>,
    /// Total data acked as of the most recently acked packet at send time.
    total_data_acked_at_the_last_acked_packet: DataSize,
    is_app_limited: bool,
}

impl ConnectionStateOnSentPacket {
    fn new(
        sent_time: Timestamp, size: DataSize, sampler: &BandwidthSampler,
    ) -> Self {
        ConnectionStateOnSentPacket {
            sent_time,
            size,
            total_data_sent: sampler.total_data_sent,
            total_data_sent_at_last_acked_packet: sampler
                .total_data_sent_at_last_acked_packet,
            last_acked_packet_sent_time: sampler.last_acked_packet_sent_time,
            last_acked_packet_ack_time: sampler.last_acked_packet_ack_time,
            total_data_acked_at_the_last_acked_packet: sampler.total_data_acked,
            is_app_limited: sampler.is_app_limited,
        }
    }
}

/// Tracks sent and acknowledged packets and produces one delivery rate
/// sample per acknowledged packet.
///
/// Samples are taken per packet and not filtered; the consumer is expected
/// to apply a max filter of at least one RTT, since individual samples can
/// significantly underestimate the available bandwidth.
#[derive(Debug, Default)]
pub struct BandwidthSampler {
    /// Total congestion-controlled data sent over the connection.
    total_data_sent: DataSize,
    /// Total congestion-controlled data acked over the connection.
    total_data_acked: DataSize,
    total_data_sent_at_last_acked_packet: DataSize,
    last_acked_packet_sent_time: Option<Timestamp>,
    last_acked_packet_ack_time: Option<Timestamp>,
    last_sent_packet: u64,
    /// Whether the sampler is currently in an app-limited phase.
    is_app_limited: bool,
    /// Ack of the first packet past this number ends the app-limited phase.
    end_of_app_limited_phase: u64,
    connection_state_map: PacketNumberIndexedQueue<ConnectionStateOnSentPacket>,
}

impl BandwidthSampler {
    /// Records a sent packet. Packets must be reported in order of strictly
    /// increasing sequence number; the snapshot is retained until the packet
    /// is acked, lost or removed as obsolete.
    pub fn on_packet_sent(
        &mut self, sent_time: Timestamp, packet_number: u64, size: DataSize,
        data_in_flight: DataSize,
    ) {
        self.last_sent_packet = packet_number;
        self.total_data_sent += size;

        // Nothing in flight: this send starts a new train, and doubles as
        // the reference point earlier samples would have provided.
        if data_in_flight.is_zero() {
            self.last_acked_packet_ack_time = Some(sent_time);
            self.last_acked_packet_sent_time = Some(sent_time);
            self.total_data_sent_at_last_acked_packet = self.total_data_sent;
        }

        if !self.connection_state_map.is_empty() &&
            packet_number >
                self.connection_state_map.last_packet() + MAX_TRACKED_PACKETS
        {
            warn!(
                "in-flight packet map has exceeded the maximum number of tracked packets"
            );
        }

        let state = ConnectionStateOnSentPacket::new(sent_time, size, self);
        if self.connection_state_map.emplace(packet_number, state).is_err() {
            warn!(
                "failed to insert packet {packet_number} into the sampler map, \
                 most likely because it's already in it"
            );
        }
    }

    /// Takes a delivery rate sample for the acknowledged `packet_number` and
    /// stops tracking it. Returns a zero sample for unknown packets.
    pub fn on_packet_acknowledged(
        &mut self, ack_time: Timestamp, packet_number: u64,
    ) -> BandwidthSample {
        let Some(sent_packet) = self.connection_state_map.remove(packet_number)
        else {
            return BandwidthSample::default();
        };

        self.on_packet_acknowledged_inner(ack_time, packet_number, &sent_packet)
    }

    fn on_packet_acknowledged_inner(
        &mut self, ack_time: Timestamp, packet_number: u64,
        sent_packet: &ConnectionStateOnSentPacket,
    ) -> BandwidthSample {
        self.total_data_acked += sent_packet.size;
        self.total_data_sent_at_last_acked_packet = sent_packet.total_data_sent;
        self.last_acked_packet_sent_time = Some(sent_packet.sent_time);
        self.last_acked_packet_ack_time = Some(ack_time);

        if self.is_app_limited && packet_number > self.end_of_app_limited_phase {
            self.is_app_limited = false;
        }

        // Until another packet has been acked, there is no reference point
        // to measure against.
        let (Some(last_acked_sent_time), Some(last_acked_ack_time)) = (
            sent_packet.last_acked_packet_sent_time,
            sent_packet.last_acked_packet_ack_time,
        ) else {
            return BandwidthSample::default();
        };

        let mut send_rate = DataRate::infinite();
        if sent_packet.sent_time > last_acked_sent_time {
            let sent_delta = sent_packet.total_data_sent -
                sent_packet.total_data_sent_at_last_acked_packet;
            send_rate = sent_delta / (sent_packet.sent_time - last_acked_sent_time);
        }

        if ack_time <= last_acked_ack_time {
            warn!(
                "ack time of the previously acked packet is larger than the \
                 ack time of the current packet"
            );
            return BandwidthSample::default();
        }

        let ack_delta = self.total_data_acked -
            sent_packet.total_data_acked_at_the_last_acked_packet;
        let ack_rate = ack_delta / (ack_time - last_acked_ack_time);

        BandwidthSample {
            bandwidth: send_rate.min(ack_rate),
            rtt: ack_time - sent_packet.sent_time,
            is_app_limited: sent_packet.is_app_limited,
        }
    }

    /// Stops tracking a packet that was declared lost.
    pub fn on_packet_lost(&mut self, packet_number: u64) {
        self.connection_state_map.remove(packet_number);
    }

    /// Enters an app-limited phase: samples taken from packets currently in
    /// flight will carry the `is_app_limited` mark. The phase ends by itself
    /// once a packet sent after this call is acknowledged.
    pub fn on_app_limited(&mut self) {
        self.is_app_limited = true;
        self.end_of_app_limited_phase = self.last_sent_packet;
    }

    /// Drops state for every packet below `least_unacked`; they can no
    /// longer produce samples.
    pub fn remove_obsolete_packets(&mut self, least_unacked: u64) {
        while !self.connection_state_map.is_empty() &&
            self.connection_state_map.first_packet() < least_unacked
        {
            self.connection_state_map
                .remove(self.connection_state_map.first_packet());
        }
    }

    /// Total data the receiver has acknowledged so far.
    pub fn total_data_acked(&self) -> DataSize {
        self.total_data_acked
    }

    pub fn is_app_limited(&self) -> bool {
        self.is_app_limited
    }

    pub fn end_of_app_limited_phase(&self) -> u64 {
        self.end_of_app_limited_phase
    }
}
