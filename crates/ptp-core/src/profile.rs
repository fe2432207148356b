//! Named camera properties.
//!
//! A [`VendorProfile`] maps friendly names ("fNumber", "iso") to device
//! property codes plus the conversion between wire values and text. Vendor
//! layers ship their own profiles; [`VendorProfile::standard`] covers the
//! properties PIMA 15740 defines.

use crate::error::{PtpError, Result};
use crate::protocol::{DataType, DeviceInfo, PropValue, device_prop};

/// Wire value to display text. `None` falls back to the raw value.
pub type Decoder = fn(&PropValue) -> Option<String>;
/// Display text to wire value. `None` rejects the text.
pub type Encoder = fn(&str) -> Option<PropValue>;

#[derive(Debug, Clone, Copy)]
pub struct PropertySpec {
    pub name: &'static str,
    pub prop_code: u16,
    pub data_type: DataType,
    pub decode: Decoder,
    pub encode: Encoder,
}

impl PropertySpec {
    pub fn render(&self, value: &PropValue) -> String {
        (self.decode)(value).unwrap_or_else(|| value.to_string())
    }

    pub fn parse(&self, text: &str) -> Result<PropValue> {
        (self.encode)(text.trim())
            .filter(|v| v.matches(self.data_type))
            .ok_or_else(|| PtpError::InvalidPropertyValue {
                property: self.name,
                value: text.to_string(),
            })
    }
}

/// Property table for a family of devices.
#[derive(Debug)]
pub struct VendorProfile {
    pub name: &'static str,
    /// DeviceInfo vendor extension this profile applies to; `None` for any.
    pub vendor_extension_id: Option<u32>,
    matches_model: fn(&DeviceInfo) -> bool,
    properties: &'static [PropertySpec],
}

impl VendorProfile {
    pub const fn new(
        name: &'static str,
        vendor_extension_id: Option<u32>,
        matches_model: fn(&DeviceInfo) -> bool,
        properties: &'static [PropertySpec],
    ) -> Self {
        Self {
            name,
            vendor_extension_id,
            matches_model,
            properties,
        }
    }

    pub fn standard() -> &'static VendorProfile {
        &STANDARD
    }

    pub fn matches(&self, info: &DeviceInfo) -> bool {
        self.vendor_extension_id
            .is_none_or(|id| id == info.vendor_extension_id)
            && (self.matches_model)(info)
    }

    /// Case-insensitive lookup by property name.
    pub fn lookup(&self, name: &str) -> Result<&PropertySpec> {
        self.properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| PtpError::UnknownProperty(name.to_string()))
    }

    pub fn by_code(&self, prop_code: u16) -> Option<&PropertySpec> {
        self.properties.iter().find(|p| p.prop_code == prop_code)
    }

    pub fn properties(&self) -> &[PropertySpec] {
        self.properties
    }
}

/// First candidate matching `info`, else the standard profile.
pub fn select_profile(
    candidates: &[&'static VendorProfile],
    info: &DeviceInfo,
) -> &'static VendorProfile {
    candidates
        .iter()
        .copied()
        .find(|p| p.matches(info))
        .unwrap_or(&STANDARD)
}

const WHITE_BALANCE_MODES: &[(u16, &str)] = &[
    (0x0001, "manual"),
    (0x0002, "auto"),
    (0x0003, "one-push"),
    (0x0004, "daylight"),
    (0x0005, "fluorescent"),
    (0x0006, "tungsten"),
    (0x0007, "flash"),
];

const ISO_AUTO: u16 = 0xFFFF;

fn any_model(_: &DeviceInfo) -> bool {
    true
}

fn decode_percent(v: &PropValue) -> Option<String> {
    Some(format!("{}%", v.as_i64()?))
}

fn encode_u8(s: &str) -> Option<PropValue> {
    s.trim_end_matches('%').parse().ok().map(PropValue::U8)
}

fn decode_string(v: &PropValue) -> Option<String> {
    match v {
        PropValue::Str(s) => Some(s.clone()),
        _ => None,
    }
}

fn encode_string(s: &str) -> Option<PropValue> {
    Some(PropValue::Str(s.to_string()))
}

fn decode_white_balance(v: &PropValue) -> Option<String> {
    let raw = u16::try_from(v.as_i64()?).ok()?;
    WHITE_BALANCE_MODES
        .iter()
        .find(|(code, _)| *code == raw)
        .map(|(_, name)| name.to_string())
}

fn encode_white_balance(s: &str) -> Option<PropValue> {
    WHITE_BALANCE_MODES
        .iter()
        .find(|(_, name)| name.eq_ignore_ascii_case(s))
        .map(|(code, _)| PropValue::U16(*code))
}

/// F-number in hundredths: 280 is f/2.8.
fn decode_f_number(v: &PropValue) -> Option<String> {
    Some(format!("f/{:.1}", v.as_i64()? as f64 / 100.0))
}

fn encode_f_number(s: &str) -> Option<PropValue> {
    let f: f64 = s.trim_start_matches("f/").parse().ok()?;
    (f > 0.0).then(|| PropValue::U16((f * 100.0).round() as u16))
}

/// Exposure time in units of 0.1 ms.
fn decode_exposure_time(v: &PropValue) -> Option<String> {
    let units = v.as_i64()?;
    if units <= 0 {
        return None;
    }
    if units >= 10_000 {
        let secs = units as f64 / 10_000.0;
        return Some(if units % 10_000 == 0 {
            format!("{}s", units / 10_000)
        } else {
            format!("{:.1}s", secs)
        });
    }
    Some(format!("1/{}", (10_000.0 / units as f64).round() as i64))
}

fn encode_exposure_time(s: &str) -> Option<PropValue> {
    let units = if let Some(denom) = s.strip_prefix("1/") {
        let denom: f64 = denom.parse().ok()?;
        (10_000.0 / denom).round()
    } else {
        let secs: f64 = s.trim_end_matches('s').parse().ok()?;
        (secs * 10_000.0).round()
    };
    (units >= 1.0).then(|| PropValue::U32(units as u32))
}

fn decode_iso(v: &PropValue) -> Option<String> {
    match v.as_i64()? {
        raw if raw == ISO_AUTO as i64 => Some("auto".to_string()),
        raw => Some(raw.to_string()),
    }
}

fn encode_iso(s: &str) -> Option<PropValue> {
    if s.eq_ignore_ascii_case("auto") {
        return Some(PropValue::U16(ISO_AUTO));
    }
    s.parse().ok().map(PropValue::U16)
}

/// Exposure bias in thousandths of a stop.
fn decode_exposure_bias(v: &PropValue) -> Option<String> {
    let milli = v.as_i64()?;
    if milli == 0 {
        return Some("0".to_string());
    }
    Some(format!("{:+.1}", milli as f64 / 1000.0))
}

fn encode_exposure_bias(s: &str) -> Option<PropValue> {
    let stops: f64 = s.parse().ok()?;
    let milli = (stops * 1000.0).round();
    (milli >= i16::MIN as f64 && milli <= i16::MAX as f64).then(|| PropValue::I16(milli as i16))
}

fn decode_millis(v: &PropValue) -> Option<String> {
    Some(format!("{}ms", v.as_i64()?))
}

fn encode_millis(s: &str) -> Option<PropValue> {
    s.trim_end_matches("ms").parse().ok().map(PropValue::U32)
}

static STANDARD_PROPERTIES: [PropertySpec; 8] = [
    PropertySpec {
        name: "batteryLevel",
        prop_code: device_prop::BATTERY_LEVEL,
        data_type: DataType::UInt8,
        decode: decode_percent,
        encode: encode_u8,
    },
    PropertySpec {
        name: "imageSize",
        prop_code: device_prop::IMAGE_SIZE,
        data_type: DataType::Str,
        decode: decode_string,
        encode: encode_string,
    },
    PropertySpec {
        name: "whiteBalance",
        prop_code: device_prop::WHITE_BALANCE,
        data_type: DataType::UInt16,
        decode: decode_white_balance,
        encode: encode_white_balance,
    },
    PropertySpec {
        name: "fNumber",
        prop_code: device_prop::F_NUMBER,
        data_type: DataType::UInt16,
        decode: decode_f_number,
        encode: encode_f_number,
    },
    PropertySpec {
        name: "exposureTime",
        prop_code: device_prop::EXPOSURE_TIME,
        data_type: DataType::UInt32,
        decode: decode_exposure_time,
        encode: encode_exposure_time,
    },
    PropertySpec {
        name: "iso",
        prop_code: device_prop::EXPOSURE_INDEX,
        data_type: DataType::UInt16,
        decode: decode_iso,
        encode: encode_iso,
    },
    PropertySpec {
        name: "exposureBias",
        prop_code: device_prop::EXPOSURE_BIAS_COMPENSATION,
        data_type: DataType::Int16,
        decode: decode_exposure_bias,
        encode: encode_exposure_bias,
    },
    PropertySpec {
        name: "captureDelay",
        prop_code: device_prop::CAPTURE_DELAY,
        data_type: DataType::UInt32,
        decode: decode_millis,
        encode: encode_millis,
    },
];

static STANDARD: VendorProfile = VendorProfile::new("standard", None, any_model, &STANDARD_PROPERTIES);

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> &'static PropertySpec {
        VendorProfile::standard().lookup(name).unwrap()
    }

    #[test]
    fn test_lookup() {
        let profile = VendorProfile::standard();
        assert_eq!(profile.lookup("FNUMBER").unwrap().prop_code, 0x5007);
        assert_eq!(profile.by_code(0x500F).unwrap().name, "iso");
        assert!(matches!(
            profile.lookup("focusMode"),
            Err(PtpError::UnknownProperty(_))
        ));
        assert_eq!(profile.properties().len(), 8);
    }

    #[test]
    fn test_f_number() {
        let f = spec("fNumber");
        assert_eq!(f.render(&PropValue::U16(280)), "f/2.8");
        assert_eq!(f.parse("f/5.6").unwrap(), PropValue::U16(560));
        assert_eq!(f.parse("11").unwrap(), PropValue::U16(1100));
        assert!(f.parse("wide").is_err());
    }

    #[test]
    fn test_exposure_time() {
        let t = spec("exposureTime");
        assert_eq!(t.render(&PropValue::U32(40)), "1/250");
        assert_eq!(t.render(&PropValue::U32(20_000)), "2s");
        assert_eq!(t.render(&PropValue::U32(25_000)), "2.5s");
        assert_eq!(t.parse("1/250").unwrap(), PropValue::U32(40));
        assert_eq!(t.parse("2s").unwrap(), PropValue::U32(20_000));
        // Non-positive values fall back to the raw number.
        assert_eq!(t.render(&PropValue::U32(0)), "0");
    }

    #[test]
    fn test_white_balance_and_iso() {
        let wb = spec("whiteBalance");
        assert_eq!(wb.render(&PropValue::U16(4)), "daylight");
        assert_eq!(wb.parse("Tungsten").unwrap(), PropValue::U16(6));
        assert_eq!(wb.render(&PropValue::U16(0x8001)), "32769");

        let iso = spec("iso");
        assert_eq!(iso.render(&PropValue::U16(0xFFFF)), "auto");
        assert_eq!(iso.parse("auto").unwrap(), PropValue::U16(0xFFFF));
        assert_eq!(iso.parse("800").unwrap(), PropValue::U16(800));
    }

    #[test]
    fn test_exposure_bias() {
        let b = spec("exposureBias");
        assert_eq!(b.render(&PropValue::I16(-1300)), "-1.3");
        assert_eq!(b.render(&PropValue::I16(700)), "+0.7");
        assert_eq!(b.render(&PropValue::I16(0)), "0");
        assert_eq!(b.parse("-0.3").unwrap(), PropValue::I16(-300));
        assert!(matches!(
            b.parse("99"),
            Err(PtpError::InvalidPropertyValue {
                property: "exposureBias",
                ..
            })
        ));
    }

    #[test]
    fn test_select_profile() {
        static VENDOR_PROPS: [PropertySpec; 0] = [];
        fn is_gh(info: &DeviceInfo) -> bool {
            info.model.starts_with("DC-GH")
        }
        static PANASONIC: VendorProfile = VendorProfile::new("panasonic", Some(0x1C), is_gh, &VENDOR_PROPS);

        let mut info = DeviceInfo {
            vendor_extension_id: 0x1C,
            model: "DC-GH5".into(),
            ..Default::default()
        };
        assert_eq!(select_profile(&[&PANASONIC], &info).name, "panasonic");

        info.model = "DC-S5".into();
        assert_eq!(select_profile(&[&PANASONIC], &info).name, "standard");

        info.model = "DC-GH6".into();
        info.vendor_extension_id = 0x06;
        assert_eq!(select_profile(&[&PANASONIC], &info).name, "standard");
    }
}
