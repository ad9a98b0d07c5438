//! CRC-16/X.25 calculation for the SML transport layer
//!
//! Same polynomial and bit order as the HDLC frame check sequence. The
//! checksum is transmitted low byte first.

/// CRC calculation constants
const INITIAL_CRC: u16 = 0xFFFF;
const KEY: u16 = 0x8408; // Bit-reversed 1021

/// Precomputed CRC table
static CRC_TABLE: once_cell::sync::Lazy<[u16; 256]> = once_cell::sync::Lazy::new(|| {
    let mut table = [0u16; 256];
    for b in 0..=0xFF {
        let mut v = b as u16;
        for _ in 0..8 {
            if (v & 1) == 1 {
                v = (v >> 1) ^ KEY;
            } else {
                v >>= 1;
            }
        }
        table[b as usize] = v;
    }
    table
});

/// Incremental CRC-16/X.25 calculator
#[derive(Debug, Clone)]
pub struct Crc16 {
    value: u16,
}

impl Crc16 {
    /// Create a new calculator
    pub fn new() -> Self {
        Self { value: INITIAL_CRC }
    }

    /// Reset to the initial state
    pub fn reset(&mut self) {
        self.value = INITIAL_CRC;
    }

    /// Update with a single byte
    pub fn update(&mut self, data: u8) {
        self.value = (self.value >> 8) ^ CRC_TABLE[((self.value ^ data as u16) & 0xFF) as usize];
    }

    /// Update with multiple bytes
    pub fn update_bytes(&mut self, data: &[u8]) {
        for &byte in data {
            self.update(byte);
        }
    }

    /// Final checksum value
    pub fn value(&self) -> u16 {
        self.value ^ 0xFFFF
    }

    /// Final checksum in transmission order (low byte first)
    pub fn value_bytes(&self) -> [u8; 2] {
        self.value().to_le_bytes()
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

/// Checksum of a complete buffer
pub fn checksum(data: &[u8]) -> u16 {
    let mut crc = Crc16::new();
    crc.update_bytes(data);
    crc.value()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        assert_eq!(checksum(b"123456789"), 0x906E);
    }

    #[test]
    fn test_value_bytes_order() {
        let mut crc = Crc16::new();
        crc.update_bytes(b"123456789");
        assert_eq!(crc.value_bytes(), [0x6E, 0x90]);
    }

    #[test]
    fn test_reset() {
        let mut crc = Crc16::new();
        crc.update(0x01);
        crc.reset();
        assert_eq!(crc.value(), 0x0000);
    }
}
