/// CCITT polynomial x^16 + x^12 + x^5 + 1.
const POLYNOMIAL: u16 = 0x1021;

/// CRC-16/XMODEM: CCITT polynomial, zero initial value, no reflection and no
/// final xor. This is the checksum SD cards append to data blocks.
pub fn crc16_xmodem(data: &[u8]) -> u16 {
    data.iter().fold(0, |crc, &byte| update(crc, byte))
}

/// Feed a single byte into a running CRC.
#[inline]
pub fn update(crc: u16, byte: u8) -> u16 {
    let mut crc = crc ^ ((byte as u16) << 8);
    for _ in 0..8 {
        crc = if crc & 0x8000 != 0 {
            (crc << 1) ^ POLYNOMIAL
        } else {
            crc << 1
        };
    }
    crc
}
