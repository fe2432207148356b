//! PTP datasets carried in Data containers.

use std::fmt;

use crate::cursor::PtpCursor;
use crate::error::{PtpError, Result};
use crate::protocol::codes;

/// Datatype codes used by property descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    /// Array of the element type (codes 0x4001..=0x4008).
    Array(ScalarType),
    Str,
}

/// Element type of an array datatype.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
}

impl ScalarType {
    fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            0x0001 => Self::Int8,
            0x0002 => Self::UInt8,
            0x0003 => Self::Int16,
            0x0004 => Self::UInt16,
            0x0005 => Self::Int32,
            0x0006 => Self::UInt32,
            0x0007 => Self::Int64,
            0x0008 => Self::UInt64,
            _ => return None,
        })
    }

    fn code(self) -> u16 {
        match self {
            Self::Int8 => 0x0001,
            Self::UInt8 => 0x0002,
            Self::Int16 => 0x0003,
            Self::UInt16 => 0x0004,
            Self::Int32 => 0x0005,
            Self::UInt32 => 0x0006,
            Self::Int64 => 0x0007,
            Self::UInt64 => 0x0008,
        }
    }

    fn data_type(self) -> DataType {
        match self {
            Self::Int8 => DataType::Int8,
            Self::UInt8 => DataType::UInt8,
            Self::Int16 => DataType::Int16,
            Self::UInt16 => DataType::UInt16,
            Self::Int32 => DataType::Int32,
            Self::UInt32 => DataType::UInt32,
            Self::Int64 => DataType::Int64,
            Self::UInt64 => DataType::UInt64,
        }
    }
}

impl DataType {
    pub fn from_code(code: u16) -> Result<Self> {
        if code == 0xFFFF {
            return Ok(Self::Str);
        }
        if code & 0x4000 != 0 {
            return ScalarType::from_code(code & 0x0FFF)
                .map(Self::Array)
                .ok_or(PtpError::UnsupportedDataType(code));
        }
        ScalarType::from_code(code)
            .map(ScalarType::data_type)
            .ok_or(PtpError::UnsupportedDataType(code))
    }

    pub fn code(self) -> u16 {
        match self {
            Self::Int8 => 0x0001,
            Self::UInt8 => 0x0002,
            Self::Int16 => 0x0003,
            Self::UInt16 => 0x0004,
            Self::Int32 => 0x0005,
            Self::UInt32 => 0x0006,
            Self::Int64 => 0x0007,
            Self::UInt64 => 0x0008,
            Self::Array(elem) => 0x4000 | elem.code(),
            Self::Str => 0xFFFF,
        }
    }
}

/// A decoded property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropValue {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    Array(Vec<PropValue>),
    Str(String),
}

impl PropValue {
    pub fn read(c: &mut PtpCursor, data_type: DataType) -> Result<Self> {
        Ok(match data_type {
            DataType::Int8 => Self::I8(c.read_i8()?),
            DataType::UInt8 => Self::U8(c.read_u8()?),
            DataType::Int16 => Self::I16(c.read_i16()?),
            DataType::UInt16 => Self::U16(c.read_u16()?),
            DataType::Int32 => Self::I32(c.read_i32()?),
            DataType::UInt32 => Self::U32(c.read_u32()?),
            DataType::Int64 => Self::I64(c.read_i64()?),
            DataType::UInt64 => Self::U64(c.read_u64()?),
            DataType::Array(elem) => {
                Self::Array(c.read_array_of(|c| Self::read(c, elem.data_type()))?)
            }
            DataType::Str => Self::Str(c.read_ptp_string()?),
        })
    }

    pub fn write(&self, c: &mut PtpCursor) {
        match self {
            Self::I8(v) => c.write_i8(*v),
            Self::U8(v) => c.write_u8(*v),
            Self::I16(v) => c.write_i16(*v),
            Self::U16(v) => c.write_u16(*v),
            Self::I32(v) => c.write_i32(*v),
            Self::U32(v) => c.write_u32(*v),
            Self::I64(v) => c.write_i64(*v),
            Self::U64(v) => c.write_u64(*v),
            Self::Array(items) => c.write_array_of(items, |c, item| item.write(c)),
            Self::Str(s) => c.write_ptp_string(s),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut c = PtpCursor::new();
        self.write(&mut c);
        c.finalize()
    }

    /// Integer view of scalar values.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::I8(v) => Some(v as i64),
            Self::U8(v) => Some(v as i64),
            Self::I16(v) => Some(v as i64),
            Self::U16(v) => Some(v as i64),
            Self::I32(v) => Some(v as i64),
            Self::U32(v) => Some(v as i64),
            Self::I64(v) => Some(v),
            Self::U64(v) => i64::try_from(v).ok(),
            Self::Array(_) | Self::Str(_) => None,
        }
    }

    /// Whether this value can be written as `data_type`.
    pub fn matches(&self, data_type: DataType) -> bool {
        match (self, data_type) {
            (Self::Array(items), DataType::Array(elem)) => {
                items.iter().all(|i| i.matches(elem.data_type()))
            }
            (Self::I8(_), DataType::Int8)
            | (Self::U8(_), DataType::UInt8)
            | (Self::I16(_), DataType::Int16)
            | (Self::U16(_), DataType::UInt16)
            | (Self::I32(_), DataType::Int32)
            | (Self::U32(_), DataType::UInt32)
            | (Self::I64(_), DataType::Int64)
            | (Self::U64(_), DataType::UInt64)
            | (Self::Str(_), DataType::Str) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{:?}", s),
            Self::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            other => match other.as_i64() {
                Some(v) => write!(f, "{}", v),
                None => write!(f, "{:?}", other),
            },
        }
    }
}

/// Allowed values of a property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropForm {
    None,
    Range {
        min: PropValue,
        max: PropValue,
        step: PropValue,
    },
    Enumeration(Vec<PropValue>),
}

/// GetDevicePropDesc dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePropDesc {
    pub prop_code: u16,
    pub data_type: DataType,
    pub writable: bool,
    pub factory_default: PropValue,
    pub current: PropValue,
    pub form: PropForm,
}

impl DevicePropDesc {
    const FORM_NONE: u8 = 0x00;
    const FORM_RANGE: u8 = 0x01;
    const FORM_ENUM: u8 = 0x02;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut c = PtpCursor::from_bytes(data);
        let prop_code = c.read_u16()?;
        let data_type = DataType::from_code(c.read_u16()?)?;
        let writable = c.read_u8()? == 0x01;
        let factory_default = PropValue::read(&mut c, data_type)?;
        let current = PropValue::read(&mut c, data_type)?;

        // Some firmware omits the form flag entirely.
        let form_flag = if c.remaining() > 0 { c.read_u8()? } else { Self::FORM_NONE };
        let form = match form_flag {
            Self::FORM_RANGE => PropForm::Range {
                min: PropValue::read(&mut c, data_type)?,
                max: PropValue::read(&mut c, data_type)?,
                step: PropValue::read(&mut c, data_type)?,
            },
            Self::FORM_ENUM => {
                let count = c.read_u16()?;
                let values = (0..count)
                    .map(|_| PropValue::read(&mut c, data_type))
                    .collect::<Result<Vec<_>>>()?;
                PropForm::Enumeration(values)
            }
            _ => PropForm::None,
        };

        Ok(Self {
            prop_code,
            data_type,
            writable,
            factory_default,
            current,
            form,
        })
    }

    pub fn name(&self) -> String {
        codes::describe(self.prop_code)
    }
}

/// GetDeviceInfo dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub standard_version: u16,
    pub vendor_extension_id: u32,
    pub vendor_extension_version: u16,
    pub vendor_extension_desc: String,
    pub functional_mode: u16,
    pub operations_supported: Vec<u16>,
    pub events_supported: Vec<u16>,
    pub device_properties_supported: Vec<u16>,
    pub capture_formats: Vec<u16>,
    pub image_formats: Vec<u16>,
    pub manufacturer: String,
    pub model: String,
    pub device_version: String,
    pub serial_number: String,
}

impl DeviceInfo {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut c = PtpCursor::from_bytes(data);
        Ok(Self {
            standard_version: c.read_u16()?,
            vendor_extension_id: c.read_u32()?,
            vendor_extension_version: c.read_u16()?,
            vendor_extension_desc: c.read_ptp_string()?,
            functional_mode: c.read_u16()?,
            operations_supported: c.read_array_of(|c| c.read_u16())?,
            events_supported: c.read_array_of(|c| c.read_u16())?,
            device_properties_supported: c.read_array_of(|c| c.read_u16())?,
            capture_formats: c.read_array_of(|c| c.read_u16())?,
            image_formats: c.read_array_of(|c| c.read_u16())?,
            manufacturer: c.read_ptp_string()?,
            model: c.read_ptp_string()?,
            device_version: c.read_ptp_string()?,
            serial_number: c.read_ptp_string()?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut c = PtpCursor::new();
        c.write_u16(self.standard_version);
        c.write_u32(self.vendor_extension_id);
        c.write_u16(self.vendor_extension_version);
        c.write_ptp_string(&self.vendor_extension_desc);
        c.write_u16(self.functional_mode);
        for list in [
            &self.operations_supported,
            &self.events_supported,
            &self.device_properties_supported,
            &self.capture_formats,
            &self.image_formats,
        ] {
            c.write_array_of(list, |c, v| c.write_u16(*v));
        }
        c.write_ptp_string(&self.manufacturer);
        c.write_ptp_string(&self.model);
        c.write_ptp_string(&self.device_version);
        c.write_ptp_string(&self.serial_number);
        c.finalize()
    }

    pub fn supports_operation(&self, code: u16) -> bool {
        self.operations_supported.contains(&code)
    }

    pub fn supports_property(&self, code: u16) -> bool {
        self.device_properties_supported.contains(&code)
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Manufacturer: {}", self.manufacturer)?;
        writeln!(f, "Model:        {}", self.model)?;
        writeln!(f, "Version:      {}", self.device_version)?;
        writeln!(f, "Serial:       {}", self.serial_number)?;
        writeln!(
            f,
            "Extension:    0x{:08X} v{} {}",
            self.vendor_extension_id, self.vendor_extension_version, self.vendor_extension_desc
        )?;
        write!(
            f,
            "Supports:     {} operations, {} events, {} properties",
            self.operations_supported.len(),
            self.events_supported.len(),
            self.device_properties_supported.len()
        )
    }
}
