//! Payload Codec
//!
//! Wire frames exchanged with the peripherals. The outbound control frame is
//! plain ASCII: rounded integer targets joined by `,`, the group terminated
//! by `;` (`"10,20,30,40,50;"`). The delimiter scheme is a compatibility
//! contract with the hand firmware's parser and must not change.
//!
//! Inbound telemetry is passed through as opaque text; structured parsing is
//! left to the consumers of the telemetry map. Both directions are total:
//! encoding never fails, and malformed inbound bytes decode to
//! [`UNPARSEABLE`] instead of raising.

/// Marker stored in the telemetry map for frames that are not valid UTF-8.
pub const UNPARSEABLE: &str = "<unparseable>";

/// Encode the control vector as a firmware control frame.
pub fn encode_controls(controls: &[f32]) -> Vec<u8> {
    let mut frame = String::with_capacity(controls.len() * 4 + 1);
    for (i, value) in controls.iter().enumerate() {
        if i > 0 {
            frame.push(',');
        }
        frame.push_str(&format!("{}", value.round() as i64));
    }
    frame.push(';');
    frame.into_bytes()
}

/// Decode an inbound telemetry frame to text.
pub fn decode_telemetry(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.trim_end_matches(['\r', '\n']).to_string(),
        Err(_) => UNPARSEABLE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Reference decode for the firmware frame format, used to check the
    // round-trip property.
    fn reference_decode(frame: &[u8]) -> Vec<i64> {
        let text = std::str::from_utf8(frame).unwrap();
        let group = text.strip_suffix(';').unwrap();
        group.split(',').map(|v| v.parse().unwrap()).collect()
    }

    #[test]
    fn test_encode_basic_frame() {
        let frame = encode_controls(&[10.0, 20.0, 30.0, 40.0, 50.0]);
        assert_eq!(frame, b"10,20,30,40,50;");
    }

    #[test]
    fn test_encode_rounds_to_integers() {
        let frame = encode_controls(&[10.4, 10.5, 179.9]);
        assert_eq!(frame, b"10,11,180;");
    }

    #[test]
    fn test_encode_empty_controls() {
        assert_eq!(encode_controls(&[]), b";");
    }

    #[test]
    fn test_round_trip() {
        let controls = [0.0, 45.2, 90.5, 135.0, 180.0];
        let decoded = reference_decode(&encode_controls(&controls));
        let expected: Vec<i64> = controls.iter().map(|v| v.round() as i64).collect();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn test_decode_text_passthrough() {
        assert_eq!(decode_telemetry(b"642"), "642");
        assert_eq!(decode_telemetry(b"642\r\n"), "642");
        assert_eq!(decode_telemetry(b""), "");
    }

    #[test]
    fn test_decode_invalid_utf8_is_marked() {
        assert_eq!(decode_telemetry(&[0xFF, 0xFE, 0x00]), UNPARSEABLE);
    }
}
