//! Recent upstream audio packets kept for retransmission

use crate::protocol::rtp::{RaopAudioPacket, RetransmitRequest, RetransmitResponse};
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};

/// Bounded store of audio datagrams by sequence number
#[derive(Debug)]
pub struct PacketHistory {
    capacity: usize,
    order: VecDeque<u16>,
    packets: HashMap<u16, Bytes>,
}

impl PacketHistory {
    /// Create a history holding at most `capacity` packets
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            packets: HashMap::with_capacity(capacity),
        }
    }

    /// Keep an audio datagram, evicting the oldest one when full
    ///
    /// Datagrams too short to carry an RTP header are ignored.
    pub fn record(&mut self, datagram: Bytes) {
        if self.capacity == 0 {
            return;
        }
        let Some(sequence) = RaopAudioPacket::peek_sequence(&datagram) else {
            return;
        };

        if self.packets.insert(sequence, datagram).is_none() {
            self.order.push_back(sequence);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.packets.remove(&oldest);
            }
        }
    }

    /// Packet stored under `sequence`
    #[must_use]
    pub fn get(&self, sequence: u16) -> Option<&Bytes> {
        self.packets.get(&sequence)
    }

    /// Retransmit responses for every packet `request` names
    ///
    /// Returns `None` unless all of them are still held.
    #[must_use]
    pub fn retransmissions(&self, request: &RetransmitRequest) -> Option<Vec<Bytes>> {
        request
            .sequences()
            .map(|sequence| {
                self.get(sequence)
                    .map(|packet| RetransmitResponse::encode(sequence, packet))
            })
            .collect()
    }

    /// Stored packets
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Drop every packet
    pub fn clear(&mut self) {
        self.order.clear();
        self.packets.clear();
    }
}
