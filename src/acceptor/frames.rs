//! Acceptor frames and denomination decoding.
//!
//! Outbound frames are sent byte-for-byte as listed, checksum included. The
//! checksum of inbound responses is not verified; a response is accepted on
//! length and command-type byte alone.

// ---------------------------------------------------------------------------
// Command frames
// ---------------------------------------------------------------------------

pub const SYNC: u8 = 0x02;

pub const RESET: [u8; 6] = [0x02, 0x03, 0x06, 0x30, 0x41, 0xB3];
pub const ACK: [u8; 6] = [0x02, 0x03, 0x06, 0x00, 0xC2, 0x82];
pub const POLL: [u8; 6] = [0x02, 0x03, 0x06, 0x33, 0xDA, 0x81];
/// Enable every bill type, no escrow.
pub const ENABLE_ALL: [u8; 12] = [
    0x02, 0x03, 0x0C, 0x34, 0x00, 0x30, 0xFC, 0x00, 0x00, 0x00, 0xD9, 0x38,
];

/// Command-type byte of a "bill accepted" poll response.
pub const BILL_ACCEPTED: u8 = 0x81;

/// Poll responses are read in fixed 6-byte chunks.
pub const RESPONSE_LEN: usize = 6;

// ---------------------------------------------------------------------------
// Denominations
// ---------------------------------------------------------------------------

/// Bill code -> face value in local currency units.
pub const DENOMINATIONS: [(u8, u32); 8] = [
    (0x07, 5000),
    (0x0D, 2000),
    (0x06, 1000),
    (0x05, 500),
    (0x0C, 200),
    (0x04, 100),
    (0x03, 50),
    (0x02, 10),
];

pub fn denomination(code: u8) -> Option<u32> {
    DENOMINATIONS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, value)| *value)
}

// ---------------------------------------------------------------------------
// Response decoding
// ---------------------------------------------------------------------------

/// Where the command-type and bill code sit inside a poll response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseLayout {
    pub status_offset: usize,
    pub denomination_offset: usize,
}

impl Default for ResponseLayout {
    /// `02 03 06 00 81 07`: command-type at 4, bill code at 5.
    fn default() -> Self {
        Self {
            status_offset: 4,
            denomination_offset: 5,
        }
    }
}

impl ResponseLayout {
    /// Value of the note reported by `response`, if it reports an accepted
    /// note of a known denomination.
    pub fn accepted_bill(&self, response: &[u8]) -> Option<u32> {
        if response.len() < RESPONSE_LEN {
            return None;
        }
        if *response.get(self.status_offset)? != BILL_ACCEPTED {
            return None;
        }
        denomination(*response.get(self.denomination_offset)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(code: u8) -> [u8; 6] {
        [0x02, 0x03, 0x06, 0x00, BILL_ACCEPTED, code]
    }

    #[test]
    fn test_documented_frame_decodes_to_5000() {
        let layout = ResponseLayout::default();
        assert_eq!(layout.accepted_bill(&[0x02, 0x03, 0x06, 0x00, 0x81, 0x07]), Some(5000));
    }

    #[test]
    fn test_every_denomination_decodes() {
        let layout = ResponseLayout::default();
        for (code, value) in DENOMINATIONS {
            assert_eq!(layout.accepted_bill(&frame(code)), Some(value), "code {code:#04X}");
        }
    }

    #[test]
    fn test_unknown_code_is_ignored() {
        let layout = ResponseLayout::default();
        for code in [0x00u8, 0x01, 0x08, 0x0A, 0x0E, 0xFF] {
            assert_eq!(layout.accepted_bill(&frame(code)), None);
        }
    }

    #[test]
    fn test_other_status_is_ignored() {
        let layout = ResponseLayout::default();
        // 0x14 idling, 0x80 escrow: no note stacked yet
        assert_eq!(layout.accepted_bill(&[0x02, 0x03, 0x06, 0x00, 0x14, 0x07]), None);
        assert_eq!(layout.accepted_bill(&[0x02, 0x03, 0x06, 0x00, 0x80, 0x07]), None);
    }

    #[test]
    fn test_short_response_is_ignored() {
        let layout = ResponseLayout::default();
        assert_eq!(layout.accepted_bill(&[0x02, 0x03, 0x06, 0x00, 0x81]), None);
        assert_eq!(layout.accepted_bill(&[]), None);
    }

    #[test]
    fn test_leading_byte_is_not_checked() {
        // Only length and command-type decide acceptance.
        let layout = ResponseLayout::default();
        assert_eq!(layout.accepted_bill(&[0x00, 0x03, 0x06, 0x00, 0x81, 0x07]), Some(5000));
        assert_eq!(layout.accepted_bill(&[0xFF, 0x03, 0x06, 0x00, 0x81, 0x0D]), Some(2000));
    }

    #[test]
    fn test_checksum_bytes_are_not_checked() {
        // Same status bytes, nonsense trailing checksum.
        let layout = ResponseLayout::default();
        assert_eq!(
            layout.accepted_bill(&[0x02, 0x03, 0x06, 0x00, 0x81, 0x03, 0xDE, 0xAD]),
            Some(50)
        );
    }

    #[test]
    fn test_alternate_layout() {
        let layout = ResponseLayout {
            status_offset: 3,
            denomination_offset: 4,
        };
        assert_eq!(layout.accepted_bill(&[0x02, 0x03, 0x07, 0x81, 0x0D, 0x55]), Some(2000));
        let out_of_range = ResponseLayout {
            status_offset: 4,
            denomination_offset: 9,
        };
        assert_eq!(out_of_range.accepted_bill(&frame(0x07)), None);
    }

    #[test]
    fn test_frame_lengths_match_length_byte() {
        for f in [&RESET[..], &ACK[..], &POLL[..], &ENABLE_ALL[..]] {
            assert_eq!(f[0], SYNC);
            assert_eq!(f[2] as usize, f.len());
        }
    }
}
