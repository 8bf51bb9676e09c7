//! ALDL Frame Construction and Checksums
//!
//! Every ALDL frame is laid out as
//! `[address][length][mode][message?][checksum]`, where the length byte is
//! the total frame length plus [`MSG_LENGTH_MAGIC`] and the checksum makes
//! the whole frame sum to zero modulo 256.

/// Added to a frame's total length to form its length byte
pub const MSG_LENGTH_MAGIC: u8 = 0x52;

/// Length of a mode frame: address, length, mode, checksum
pub const MODE_FRAME_LEN: usize = 4;

/// Length of a request frame: address, length, mode, message, checksum
pub const REQUEST_FRAME_LEN: usize = 5;

/// Generate the checksum byte for `bytes`: `256 - (sum mod 256)`
pub fn checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    0u8.wrapping_sub(sum)
}

/// Check that a complete frame, checksum included, sums to zero mod 256
pub fn verify(frame: &[u8]) -> bool {
    frame_sum(frame) == 0
}

/// Sum of all bytes modulo 256
pub fn frame_sum(frame: &[u8]) -> u8 {
    frame.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Length byte for a frame of `frame_len` total bytes
pub fn msg_length(frame_len: usize) -> u8 {
    (frame_len as u8).wrapping_add(MSG_LENGTH_MAGIC)
}

/// Build a 4-byte mode frame, e.g. the shutup or return-to-normal command
pub fn mode_frame(address: u8, mode: u8) -> Vec<u8> {
    let mut frame = vec![address, msg_length(MODE_FRAME_LEN), mode];
    frame.push(checksum(&frame));
    frame
}

/// Build a 5-byte mode+message frame, e.g. a data packet request
pub fn request_frame(address: u8, mode: u8, message: u8) -> Vec<u8> {
    let mut frame = vec![address, msg_length(REQUEST_FRAME_LEN), mode, message];
    frame.push(checksum(&frame));
    frame
}

/// Returns true if `needle` occurs as a contiguous run inside `haystack`
pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() || needle.len() > haystack.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Format bytes as space-separated hex for log output
pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
