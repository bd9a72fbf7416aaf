pub mod crc16;
pub mod hexprint;
