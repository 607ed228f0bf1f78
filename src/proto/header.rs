use crate::Error;

/// Fixed header prepended to every datagram of the protocol.
pub const HEADER_LEN: usize = 12;
/// Largest payload that fits a data packet.
pub const MAX_PAYLOAD: usize = 1460;
/// Largest datagram the protocol ever puts on the wire.
pub const MAX_PACKET: usize = HEADER_LEN + MAX_PAYLOAD;

pub const SYN: u16 = 1 << 3;
pub const ACK: u16 = 1 << 2;
pub const FIN: u16 = 1 << 1;

/*
All scalar fields travel big-endian. The last four header bytes are
reserved and must be zero.

     0               1               2               3
     0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
    +-------------------------------+-------------------------------+
    |           seq                 |           ack                 |
    +-------------------------------+-------------------------------+
    |           flags               |           window              |
    +-------------------------------+-------------------------------+
    |                           reserved                            |
    +---------------------------------------------------------------+

flags only defines the low four bits: SYN (bit 3), ACK (bit 2),
FIN (bit 1); bit 0 is reserved.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub seq: u16,
    pub ack: u16,
    pub flags: u16,
    pub window: u16,
}

impl Header {
    /// Reads the header off the front of a received datagram.
    pub fn parse(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < HEADER_LEN {
            return Err(Error::Malformed(buf.len()));
        }

        Ok(Header {
            seq: u16::from_be_bytes([buf[0], buf[1]]),
            ack: u16::from_be_bytes([buf[2], buf[3]]),
            flags: u16::from_be_bytes([buf[4], buf[5]]),
            window: u16::from_be_bytes([buf[6], buf[7]]),
        })
    }

    pub fn syn(&self) -> bool {
        self.flags & SYN != 0
    }

    pub fn fin(&self) -> bool {
        self.flags & FIN != 0
    }
}

pub fn flag_bits(flags: u16) -> (bool, bool, bool) {
    (flags & SYN != 0, flags & ACK != 0, flags & FIN != 0)
}

pub fn create_packet(seq: u16, ack: u16, flags: u16, window: u16, payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= MAX_PAYLOAD);

    let mut packet = Vec::with_capacity(HEADER_LEN + payload.len());
    packet.extend_from_slice(&seq.to_be_bytes());
    packet.extend_from_slice(&ack.to_be_bytes());
    packet.extend_from_slice(&flags.to_be_bytes());
    packet.extend_from_slice(&window.to_be_bytes());
    packet.extend_from_slice(&[0u8; 4]);
    packet.extend_from_slice(payload);

    packet
}

pub fn syn_packet() -> Vec<u8> {
    create_packet(0, 0, SYN, 0, &[])
}

pub fn syn_ack_packet() -> Vec<u8> {
    create_packet(0, 0, SYN | ACK, 0, &[])
}

pub fn ack_packet(seq: u16, ack: u16) -> Vec<u8> {
    create_packet(seq, ack, ACK, 0, &[])
}

pub fn fin_packet() -> Vec<u8> {
    create_packet(0, 0, FIN, 0, &[])
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;

    #[test]
    fn round_trip_is_bit_exact() {
        let mut rng = rand::thread_rng();

        for _ in 0..100 {
            let seq: u16 = rng.gen();
            let ack: u16 = rng.gen();
            let flags: u16 = rng.gen();
            let window: u16 = rng.gen();
            let len = rng.gen_range(0..=MAX_PAYLOAD);
            let payload: Vec<u8> = (0..len).map(|_| rng.gen()).collect();

            let packet = create_packet(seq, ack, flags, window, &payload);
            assert_eq!(packet.len(), HEADER_LEN + len);

            let hdr = Header::parse(&packet).unwrap();
            assert_eq!((hdr.seq, hdr.ack, hdr.flags, hdr.window), (seq, ack, flags, window));
            assert_eq!(&packet[HEADER_LEN..], &payload[..]);
        }
    }

    #[test]
    fn reserved_bytes_are_zero() {
        let packet = create_packet(7, 8, FIN, 0, b"tail");
        assert_eq!(&packet[8..HEADER_LEN], &[0, 0, 0, 0]);
    }

    #[test]
    fn short_buffer_is_malformed() {
        assert!(matches!(Header::parse(&[0u8; 11]), Err(Error::Malformed(11))));
        assert!(Header::parse(&[]).is_err());
        assert!(Header::parse(&[0u8; 12]).is_ok());
    }

    #[test]
    fn flag_extraction() {
        assert_eq!(flag_bits(SYN), (true, false, false));
        assert_eq!(flag_bits(ACK), (false, true, false));
        assert_eq!(flag_bits(FIN), (false, false, true));
        assert_eq!(flag_bits(SYN | ACK), (true, true, false));
        assert_eq!(flag_bits(0), (false, false, false));
    }

    #[test]
    fn control_packet_flags() {
        assert_eq!(Header::parse(&syn_packet()).unwrap().flags, 0b1000);
        assert_eq!(Header::parse(&syn_ack_packet()).unwrap().flags, 0b1100);
        assert_eq!(Header::parse(&ack_packet(3, 4)).unwrap().flags, 0b0100);
        assert_eq!(Header::parse(&fin_packet()).unwrap().flags, 0b0010);

        let hdr = Header::parse(&ack_packet(3, 4)).unwrap();
        assert_eq!((hdr.seq, hdr.ack), (3, 4));
    }
}
