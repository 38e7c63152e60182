use roaring::RoaringBitmap;

/// Encode a u32 as a variable-length integer
pub fn encode_varint(mut value: u32, buf: &mut Vec<u8>) {
    loop {
        if value < 0x80 {
            buf.push(value as u8);
            break;
        }
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
}

/// Decode a variable-length integer from a slice
/// Returns (value, bytes_consumed)
pub fn decode_varint(buf: &[u8]) -> Option<(u32, usize)> {
    let mut result: u32 = 0;
    let mut shift = 0;

    for (i, &byte) in buf.iter().enumerate() {
        if shift >= 32 {
            return None; // Overflow
        }

        result |= ((byte & 0x7F) as u32) << shift;

        if byte & 0x80 == 0 {
            return Some((result, i + 1));
        }

        shift += 7;
    }

    None // Incomplete
}

/// Delta-encode an ascending posting list
pub fn encode_postings(postings: &RoaringBitmap) -> Vec<u8> {
    let mut buf = Vec::with_capacity(postings.len() as usize);
    let mut prev = 0u32;
    for value in postings {
        encode_varint(value - prev, &mut buf);
        prev = value;
    }
    buf
}

/// Decode a delta-encoded posting list; `None` when the bytes are corrupt
pub fn decode_postings(buf: &[u8]) -> Option<RoaringBitmap> {
    let mut postings = RoaringBitmap::new();
    let mut prev = 0u32;
    let mut pos = 0;

    while pos < buf.len() {
        let (delta, consumed) = decode_varint(&buf[pos..])?;
        prev = prev.checked_add(delta)?;
        postings.insert(prev);
        pos += consumed;
    }

    Some(postings)
}
