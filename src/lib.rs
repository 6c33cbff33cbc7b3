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

//! Send-side congestion control for real-time media transports.
//!
//! rtcc is the congestion control core of an RTP-style media sender. Fed
//! with packet-send events and transport-wide feedback, it continuously
//! produces three outputs for the surrounding transport:
//!
//! - a **pacing rate** at which the pacer may release queued packets,
//! - a **congestion window** bounding the data in flight,
//! - an **available bitrate** the encoder should target.
//!
//! The crate does not parse RTCP, packetize RTP, or run timers; the host
//! transport feeds events in and polls outputs out. Everything runs on one
//! event loop without locks, and no call blocks: deadlines (min-RTT expiry,
//! PROBE_RTT exit) are evaluated against the timestamps carried by the
//! events themselves.
//!
//! ## Usage
//!
//! The transport owns a [`SendAlgorithmManager`], selects an algorithm once
//! at construction, and forwards network events to it:
//!
//! ```no_run
//! use rtcc::DataSize;
//! use rtcc::NetworkControllerConfig;
//! use rtcc::SendAlgorithmKind;
//! use rtcc::SendAlgorithmManager;
//! use rtcc::SentPacket;
//! use rtcc::Timestamp;
//!
//! let config = NetworkControllerConfig::default();
//! let mut manager =
//!     SendAlgorithmManager::new(SendAlgorithmKind::Bbr, config);
//!
//! // Report every congestion controlled packet as it is sent...
//! manager.on_sent_packet(SentPacket {
//!     send_time: Timestamp::from_millis(0),
//!     sequence_number: 0,
//!     size: DataSize::from_bytes(1_200),
//!     data_in_flight: DataSize::ZERO,
//! });
//!
//! // ...feed transport feedback through
//! // `manager.on_transport_packets_feedback(...)` as it arrives, and let
//! // the pacer and encoder poll the outputs:
//! let pacing_rate = manager.pacing_rate();
//! let congestion_window = manager.congestion_window();
//! let encoder_target = manager.available_bitrate();
//! ```
//!
//! ## Configuration
//!
//! Tuning knobs are read once at construction from the typed [`BbrConfig`]
//! carried by [`NetworkControllerConfig`]. Deployments driven by WebRTC
//! style field-trial strings build it with
//! [`BbrConfig::from_field_trial_string`], for example
//! `"num_startup_rtts:4,slower_startup:true"`; `Default` gives the
//! untrialed values.
//!
//! ## Ordering requirements
//!
//! Send events must arrive in strictly increasing sequence number, feedback
//! batches in non-decreasing feedback time, and acks within a batch sorted
//! by ascending sequence number. Violations are logged and the offending
//! sample is dropped; the controller never fails on input data.

#![warn(unused_qualifications)]

#[macro_use]
extern crate log;

pub mod bbr;
mod error;
pub mod loss_rate;
pub mod manager;
pub mod network;
pub mod rtt;
pub mod units;
pub mod windowed_filter;

pub use crate::error::Error;
pub use crate::error::Result;

pub use crate::bbr::BbrConfig;
pub use crate::bbr::BbrNetworkController;

pub use crate::manager::SendAlgorithm;
pub use crate::manager::SendAlgorithmKind;
pub use crate::manager::SendAlgorithmManager;

pub use crate::network::NetworkAvailability;
pub use crate::network::NetworkControlUpdate;
pub use crate::network::NetworkControllerConfig;
pub use crate::network::NetworkEstimate;
pub use crate::network::NetworkRouteChange;
pub use crate::network::PacerConfig;
pub use crate::network::PacketResult;
pub use crate::network::ProcessInterval;
pub use crate::network::ReceiverReport;
pub use crate::network::SentPacket;
pub use crate::network::TargetRateConstraints;
pub use crate::network::TargetTransferRate;
pub use crate::network::TransportPacketsFeedback;

pub use crate::units::DataRate;
pub use crate::units::DataSize;
pub use crate::units::TimeDelta;
pub use crate::units::Timestamp;
