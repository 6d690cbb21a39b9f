//! RTP sequence number tracking and packet loss detection

/// Largest forward jump treated as loss rather than a stream restart
pub const MAX_GAP: u16 = 1000;

/// Tracks RTP sequence numbers to detect gaps
#[derive(Debug, Default)]
pub struct SequenceTracker {
    /// Expected next sequence number
    expected_seq: Option<u16>,
    /// Total packets received
    packets_received: u64,
    /// Total gaps detected
    total_gaps: u64,
    /// Total packets lost
    total_lost: u64,
    /// Packets older than the expected sequence
    late_packets: u64,
}

/// A run of missing sequence numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapInfo {
    /// First missing sequence
    pub start: u16,
    /// Count of missing packets
    pub count: u16,
}

impl SequenceTracker {
    /// Create a new sequence tracker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a received packet, returning any detected gap
    ///
    /// Sequence numbers wrap at 16 bits. A forward jump of [`MAX_GAP`] or
    /// more resynchronises without reporting loss, and packets from
    /// behind the expected sequence do not move it backwards.
    pub fn record(&mut self, seq: u16) -> Option<GapInfo> {
        self.packets_received += 1;

        let Some(expected) = self.expected_seq else {
            self.expected_seq = Some(seq.wrapping_add(1));
            return None;
        };

        let gap = seq.wrapping_sub(expected);
        if gap >= 0x8000 {
            self.late_packets += 1;
            return None;
        }

        self.expected_seq = Some(seq.wrapping_add(1));

        if gap > 0 && gap < MAX_GAP {
            self.total_gaps += 1;
            self.total_lost += u64::from(gap);
            return Some(GapInfo {
                start: expected,
                count: gap,
            });
        }

        None
    }

    /// Get packet loss ratio (0.0 to 1.0)
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        reason = "Precision loss acceptable for ratio calculation"
    )]
    /// Share of expected packets that never arrived
    pub fn loss_ratio(&self) -> f64 {
        if self.packets_received == 0 {
            return 0.0;
        }
        let total = self.packets_received + self.total_lost;
        self.total_lost as f64 / total as f64
    }

    /// Get statistics
    #[must_use]
    pub fn stats(&self) -> SequenceStats {
        SequenceStats {
            packets_received: self.packets_received,
            total_gaps: self.total_gaps,
            total_lost: self.total_lost,
            late_packets: self.late_packets,
            loss_ratio: self.loss_ratio(),
        }
    }

    /// Forget the expected sequence and counters
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Statistics for sequence tracking
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceStats {
    /// Total packets received
    pub packets_received: u64,
    /// Total gaps detected
    pub total_gaps: u64,
    /// Total packets lost
    pub total_lost: u64,
    /// Packets that arrived behind the expected sequence
    pub late_packets: u64,
    /// Loss ratio (0.0 to 1.0)
    pub loss_ratio: f64,
}
