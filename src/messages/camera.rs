//! Camera control messages: capture requests and manual exposure.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::messages::WireMessage;

/// Photo capture request with auto-exposure settings.
///
/// Field ranges match the peripheral camera driver; construction validates
/// them so an out-of-range request never reaches the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxCaptureSettings {
    /// Vertical resolution in pixels, even, 256..=720.
    pub resolution: u16,
    /// JPEG quality preset, 0 (highest compression) ..= 4.
    pub quality_index: u8,
    /// Vertical pan offset, -140..=140.
    pub pan: i16,
    /// Skip JPEG framing and send raw sensor data.
    pub raw: bool,
}

impl TxCaptureSettings {
    pub fn new(resolution: u16, quality_index: u8) -> Result<Self, CodecError> {
        Self::with_pan(resolution, quality_index, 0, false)
    }

    pub fn with_pan(
        resolution: u16,
        quality_index: u8,
        pan: i16,
        raw: bool,
    ) -> Result<Self, CodecError> {
        if !(256..=720).contains(&resolution) || resolution % 2 != 0 {
            return Err(CodecError::out_of_range("resolution", resolution as i64, 256, 720));
        }
        if quality_index > 4 {
            return Err(CodecError::out_of_range("quality_index", quality_index as i64, 0, 4));
        }
        if !(-140..=140).contains(&pan) {
            return Err(CodecError::out_of_range("pan", pan as i64, -140, 140));
        }
        Ok(Self { resolution, quality_index, pan, raw })
    }
}

impl WireMessage for TxCaptureSettings {
    fn pack(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(5);
        buf.put_u8(self.quality_index);
        buf.put_u16(self.resolution);
        // Offset so the wire byte is unsigned.
        buf.put_u8((self.pan as i16 + 128) as u8);
        buf.put_u8(self.raw as u8);
        buf.freeze()
    }

    fn unpack(bytes: &[u8]) -> Result<Self, CodecError> {
        super::expect_len("TxCaptureSettings", bytes, 5)?;
        let resolution = u16::from_be_bytes([bytes[1], bytes[2]]);
        let pan = bytes[3] as i16 - 128;
        Self::with_pan(resolution, bytes[0], pan, bytes[4] != 0)
    }
}

/// Manual exposure and gain settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxManualExpSettings {
    /// Shutter value, 4..=16383.
    pub shutter: u16,
    /// Analog gain, 1..=248.
    pub analog_gain: u8,
    /// Red channel gain, 0..=1023.
    pub red_gain: u16,
    /// Green channel gain, 0..=1023.
    pub green_gain: u16,
    /// Blue channel gain, 0..=1023.
    pub blue_gain: u16,
}

impl TxManualExpSettings {
    pub fn new(
        shutter: u16,
        analog_gain: u8,
        red_gain: u16,
        green_gain: u16,
        blue_gain: u16,
    ) -> Result<Self, CodecError> {
        if !(4..=16383).contains(&shutter) {
            return Err(CodecError::out_of_range("shutter", shutter as i64, 4, 16383));
        }
        if analog_gain == 0 || analog_gain > 248 {
            return Err(CodecError::out_of_range("analog_gain", analog_gain as i64, 1, 248));
        }
        for (field, gain) in
            [("red_gain", red_gain), ("green_gain", green_gain), ("blue_gain", blue_gain)]
        {
            if gain > 1023 {
                return Err(CodecError::out_of_range(field, gain as i64, 0, 1023));
            }
        }
        Ok(Self { shutter, analog_gain, red_gain, green_gain, blue_gain })
    }
}

impl WireMessage for TxManualExpSettings {
    fn pack(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(9);
        buf.put_u16(self.shutter);
        buf.put_u8(self.analog_gain);
        buf.put_u16(self.red_gain);
        buf.put_u16(self.green_gain);
        buf.put_u16(self.blue_gain);
        buf.freeze()
    }

    fn unpack(bytes: &[u8]) -> Result<Self, CodecError> {
        super::expect_len("TxManualExpSettings", bytes, 9)?;
        Self::new(
            u16::from_be_bytes([bytes[0], bytes[1]]),
            bytes[2],
            u16::from_be_bytes([bytes[3], bytes[4]]),
            u16::from_be_bytes([bytes[5], bytes[6]]),
            u16::from_be_bytes([bytes[7], bytes[8]]),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_settings_round_trip() {
        let msg = TxCaptureSettings::with_pan(720, 2, -40, false).unwrap();
        let packed = msg.pack();
        assert_eq!(packed.len(), 5);
        assert_eq!(TxCaptureSettings::unpack(&packed).unwrap(), msg);
    }

    #[test]
    fn capture_settings_validates_ranges() {
        assert!(TxCaptureSettings::new(720, 0).is_ok());
        assert!(TxCaptureSettings::new(254, 0).is_err()); // below minimum
        assert!(TxCaptureSettings::new(722, 0).is_err()); // above maximum
        assert!(TxCaptureSettings::new(511, 0).is_err()); // odd
        assert!(TxCaptureSettings::new(512, 5).is_err()); // bad quality
        assert!(TxCaptureSettings::with_pan(512, 0, -141, false).is_err());
    }

    #[test]
    fn manual_exposure_round_trip() {
        let msg = TxManualExpSettings::new(800, 16, 512, 256, 1023).unwrap();
        let packed = msg.pack();
        assert_eq!(packed.len(), 9);
        assert_eq!(TxManualExpSettings::unpack(&packed).unwrap(), msg);
    }

    #[test]
    fn manual_exposure_validates_ranges() {
        assert!(TxManualExpSettings::new(3, 16, 0, 0, 0).is_err());
        assert!(TxManualExpSettings::new(16384, 16, 0, 0, 0).is_err());
        assert!(TxManualExpSettings::new(800, 0, 0, 0, 0).is_err());
        assert!(TxManualExpSettings::new(800, 249, 0, 0, 0).is_err());
        assert!(TxManualExpSettings::new(800, 16, 1024, 0, 0).is_err());
    }

    #[test]
    fn unpack_rejects_out_of_range_wire_values() {
        // shutter = 0 is invalid even if well-framed.
        let bytes = [0, 0, 16, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            TxManualExpSettings::unpack(&bytes),
            Err(CodecError::OutOfRange { field: "shutter", .. })
        ));
    }

    #[test]
    fn unpack_rejects_wrong_length() {
        assert!(TxCaptureSettings::unpack(&[0; 4]).is_err());
        assert!(TxCaptureSettings::unpack(&[0; 6]).is_err());
        assert!(TxManualExpSettings::unpack(&[0; 8]).is_err());
    }
}
