use uuid::Uuid;

use crate::error::DecodeError;

pub const HEART_RATE_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000180d00001000800000805f9b34fb);
pub const HEART_RATE_MEASUREMENT_UUID: Uuid = Uuid::from_u128(0x00002a3700001000800000805f9b34fb);
pub const CLIENT_CHARACTERISTIC_CONFIG_UUID: Uuid = Uuid::from_u128(0x0000290200001000800000805f9b34fb);

/// Written to the client characteristic configuration descriptor to turn notifications on.
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

const FLAG_HR_FORMAT_U16: u8 = 0x01;

/// Decode a Heart Rate Measurement (0x2A37) notification.
///
/// Byte 0 is the flags field, byte 1 the 8-bit heart rate. The 16-bit
/// encoding is rejected rather than misread.
pub fn decode_heart_rate(payload: &[u8]) -> Result<u8, DecodeError> {
    let [flags, heart_rate, ..] = *payload else {
        return Err(DecodeError::TooShort { len: payload.len() });
    };

    if flags & FLAG_HR_FORMAT_U16 != 0 {
        return Err(DecodeError::UnsupportedFormat { flags });
    }

    Ok(heart_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_eight_bit_value() {
        assert_eq!(decode_heart_rate(&[0x00, 72]), Ok(72));
        // Polar H10 sets the RR-interval and contact bits, followed by RR data.
        assert_eq!(decode_heart_rate(&[0x16, 64, 0x1f, 0x04]), Ok(64));
    }

    #[test]
    fn short_payloads_fail_distinguishably() {
        assert_eq!(decode_heart_rate(&[]), Err(DecodeError::TooShort { len: 0 }));
        assert_eq!(decode_heart_rate(&[0x00]), Err(DecodeError::TooShort { len: 1 }));
    }

    #[test]
    fn sixteen_bit_format_is_rejected() {
        assert_eq!(
            decode_heart_rate(&[0x01, 0x2c, 0x01]),
            Err(DecodeError::UnsupportedFormat { flags: 0x01 })
        );
    }

    #[test]
    fn uuids_match_the_gatt_assigned_numbers() {
        assert_eq!(
            HEART_RATE_SERVICE_UUID.to_string(),
            "0000180d-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            HEART_RATE_MEASUREMENT_UUID.to_string(),
            "00002a37-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            CLIENT_CHARACTERISTIC_CONFIG_UUID.to_string(),
            "00002902-0000-1000-8000-00805f9b34fb"
        );
    }
}
