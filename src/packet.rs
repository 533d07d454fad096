//! Packets and their FIFO framing.
//!
//! A frame as it sits in the transceiver FIFO is
//! `[len, dest, src, flags, payload...]` where `len` counts everything after
//! itself. On the bus the write is prefixed with the FIFO write opcode; a read
//! is split into a three byte probe (opcode slot, `len`, `dest`) followed by
//! a body read (opcode slot, `src`, `flags`, payload).
//!
//! The payload is held in a [`heapless::Vec`] bounded by
//! [`MAX_DATA_LEN`], so an oversized packet cannot be represented at all.

use bitflags::bitflags;
use heapless::Vec;

use crate::consts::{HEADER_LEN, MAX_DATA_LEN, MAX_FRAME_LEN};
use crate::registers::REG_FIFO;

/// Bounded packet payload.
pub type Payload = Vec<u8, MAX_DATA_LEN>;

bitflags! {
    /// Control byte carried in every frame header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PacketFlags: u8 {
        /// This frame is an acknowledgement reply.
        const ACK_REPLY = 0x80;
        /// The sender asks for an acknowledgement.
        const ACK_REQUESTED = 0x40;
    }
}

/// One addressed packet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct Packet {
    /// Destination node.
    pub to: u8,
    /// Source node. Filled in on receive; the controller stamps its own id
    /// on transmit.
    pub from: u8,
    /// Application payload.
    pub data: Payload,
    /// The sender asks for an acknowledgement.
    pub request_ack: bool,
    /// This packet is an acknowledgement.
    pub send_ack: bool,
    /// Signal strength the packet was received with, in dBm.
    pub rssi: i16,
}

impl Packet {
    /// Creates a packet for `to`, silently truncating `payload` to
    /// [`MAX_DATA_LEN`] bytes.
    pub fn new(to: u8, payload: &[u8]) -> Self {
        Self {
            to,
            data: truncate(payload),
            ..Self::default()
        }
    }

    /// Derives the zero-payload acknowledgement for this packet: addresses
    /// swapped, ack-reply set, ack-request cleared.
    pub fn to_ack(&self) -> Self {
        Self {
            to: self.from,
            from: self.to,
            data: Payload::new(),
            request_ack: false,
            send_ack: true,
            rssi: 0,
        }
    }

    /// Header control byte for this packet.
    pub fn flags(&self) -> PacketFlags {
        let mut flags = PacketFlags::empty();
        flags.set(PacketFlags::ACK_REPLY, self.send_ack);
        flags.set(PacketFlags::ACK_REQUESTED, self.request_ack);
        flags
    }
}

/// Copies at most [`MAX_DATA_LEN`] bytes of `bytes` into a payload.
pub fn truncate(bytes: &[u8]) -> Payload {
    let len = bytes.len().min(MAX_DATA_LEN);
    let mut data = Payload::new();
    // Cannot fail: len is bounded by the capacity.
    let _ = data.extend_from_slice(&bytes[..len]);
    data
}

/// Builds the FIFO write transaction for `packet`, sent from `from`.
///
/// Layout: `[FIFO | 0x80, len + 3, to, from, flags, payload...]`.
pub fn encode_frame(packet: &Packet, from: u8) -> Vec<u8, MAX_FRAME_LEN> {
    let len = packet.data.len().min(MAX_DATA_LEN);
    let mut frame = Vec::new();
    let _ = frame.extend_from_slice(&[
        REG_FIFO | 0x80,
        (len + HEADER_LEN) as u8,
        packet.to,
        from,
        packet.flags().bits(),
    ]);
    let _ = frame.extend_from_slice(&packet.data[..len]);
    frame
}

/// What the three byte FIFO probe reveals about a waiting frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length, clamped to [`MAX_DATA_LEN`].
    pub payload_len: usize,
    /// Destination address.
    pub to: u8,
}

impl FrameHeader {
    /// Parses the response of a `[FIFO, 0, 0]` probe.
    pub fn parse(probe: &[u8; 3]) -> Self {
        let payload_len = (probe[1] as usize)
            .saturating_sub(HEADER_LEN)
            .min(MAX_DATA_LEN);
        Self {
            payload_len,
            to: probe[2],
        }
    }

    /// Length of the body read transaction: opcode slot, source, flags and
    /// payload.
    pub fn body_len(&self) -> usize {
        self.payload_len + HEADER_LEN
    }

    /// Assembles the packet from the body read response.
    pub fn decode_body(&self, body: &[u8], rssi: i16) -> Packet {
        let flags = PacketFlags::from_bits_truncate(body.get(2).copied().unwrap_or(0));
        let end = body.len().min(self.body_len());
        let payload = body.get(HEADER_LEN..end).unwrap_or(&[]);
        Packet {
            to: self.to,
            from: body.get(1).copied().unwrap_or(0),
            data: truncate(payload),
            request_ack: flags.contains(PacketFlags::ACK_REQUESTED),
            send_ack: flags.contains(PacketFlags::ACK_REPLY),
            rssi,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(frame: &[u8]) -> Packet {
        // The FIFO holds everything after the opcode.
        let fifo = &frame[1..];
        let header = FrameHeader::parse(&[0, fifo[0], fifo[1]]);
        let mut body = std::vec![0u8];
        body.extend_from_slice(&fifo[2..]);
        header.decode_body(&body, -40)
    }

    #[test]
    fn test_to_ack_swaps_and_clears() {
        let mut packet = Packet::new(1, b"ping");
        packet.from = 9;
        packet.request_ack = true;

        let ack = packet.to_ack();
        assert_eq!(ack.to, 9);
        assert_eq!(ack.from, 1);
        assert!(ack.send_ack);
        assert!(!ack.request_ack);
        assert!(ack.data.is_empty());
        assert_eq!(ack.flags(), PacketFlags::ACK_REPLY);
    }

    #[test]
    fn test_encode_frame_layout() {
        let mut packet = Packet::new(2, b"AB");
        packet.request_ack = true;
        let frame = encode_frame(&packet, 1);
        assert_eq!(frame.as_slice(), &[0x80, 5, 2, 1, 0x40, b'A', b'B']);
    }

    #[test]
    fn test_framing_round_trips_every_length() {
        let bytes: std::vec::Vec<u8> = (0..=MAX_DATA_LEN as u8).collect();
        for len in 0..=MAX_DATA_LEN {
            let mut packet = Packet::new(3, &bytes[..len]);
            packet.send_ack = len % 2 == 0;
            packet.request_ack = len % 3 == 0;
            let decoded = decode(&encode_frame(&packet, 7));
            assert_eq!(decoded.to, 3);
            assert_eq!(decoded.from, 7);
            assert_eq!(decoded.data.as_slice(), &bytes[..len]);
            assert_eq!(decoded.send_ack, packet.send_ack);
            assert_eq!(decoded.request_ack, packet.request_ack);
            assert_eq!(decoded.rssi, -40);
        }
    }

    #[test]
    fn test_oversized_payload_is_truncated() {
        let packet = Packet::new(4, &[0x5A; 100]);
        assert_eq!(packet.data.len(), MAX_DATA_LEN);
        let frame = encode_frame(&packet, 1);
        assert_eq!(frame.len(), MAX_FRAME_LEN);
        assert_eq!(frame[1] as usize, MAX_DATA_LEN + HEADER_LEN);
    }

    #[test]
    fn test_probe_length_is_clamped() {
        let header = FrameHeader::parse(&[0, 200, 1]);
        assert_eq!(header.payload_len, MAX_DATA_LEN);
        assert_eq!(header.body_len(), MAX_DATA_LEN + HEADER_LEN);

        let short = FrameHeader::parse(&[0, 1, 1]);
        assert_eq!(short.payload_len, 0);
    }
}
