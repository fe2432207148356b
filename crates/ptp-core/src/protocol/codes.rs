//! PTP datacode tables.
//!
//! Each table is a module holding one `u16` constant per code plus a
//! `TABLE` of `(code, name)` pairs, with [`name`](operation::name) and
//! [`code`](operation::code) lookups in both directions. Names follow the
//! PIMA 15740 spelling.

/// Declares a datacode table module.
macro_rules! datacode_table {
    (
        $(#[$meta:meta])*
        $table:ident {
            $( $(#[$cmeta:meta])* $konst:ident = $value:literal => $label:literal, )*
        }
    ) => {
        $(#[$meta])*
        pub mod $table {
            $( $(#[$cmeta])* pub const $konst: u16 = $value; )*

            /// All known codes with their names.
            pub const TABLE: &[(u16, &str)] = &[ $( ($value, $label), )* ];

            /// Name for a code, if known.
            pub fn name(code: u16) -> Option<&'static str> {
                TABLE.iter().find(|(c, _)| *c == code).map(|(_, n)| *n)
            }

            /// Code for a name, if known.
            pub fn code(name: &str) -> Option<u16> {
                TABLE.iter().find(|(_, n)| *n == name).map(|(c, _)| *c)
            }
        }
    };
}

datacode_table! {
    /// Operation codes (0x1000 range).
    operation {
        GET_DEVICE_INFO = 0x1001 => "GetDeviceInfo",
        OPEN_SESSION = 0x1002 => "OpenSession",
        CLOSE_SESSION = 0x1003 => "CloseSession",
        GET_STORAGE_IDS = 0x1004 => "GetStorageIDs",
        GET_STORAGE_INFO = 0x1005 => "GetStorageInfo",
        GET_NUM_OBJECTS = 0x1006 => "GetNumObjects",
        GET_OBJECT_HANDLES = 0x1007 => "GetObjectHandles",
        GET_OBJECT_INFO = 0x1008 => "GetObjectInfo",
        GET_OBJECT = 0x1009 => "GetObject",
        GET_THUMB = 0x100A => "GetThumb",
        DELETE_OBJECT = 0x100B => "DeleteObject",
        SEND_OBJECT_INFO = 0x100C => "SendObjectInfo",
        SEND_OBJECT = 0x100D => "SendObject",
        INITIATE_CAPTURE = 0x100E => "InitiateCapture",
        FORMAT_STORE = 0x100F => "FormatStore",
        RESET_DEVICE = 0x1010 => "ResetDevice",
        SELF_TEST = 0x1011 => "SelfTest",
        SET_OBJECT_PROTECTION = 0x1012 => "SetObjectProtection",
        POWER_DOWN = 0x1013 => "PowerDown",
        GET_DEVICE_PROP_DESC = 0x1014 => "GetDevicePropDesc",
        GET_DEVICE_PROP_VALUE = 0x1015 => "GetDevicePropValue",
        SET_DEVICE_PROP_VALUE = 0x1016 => "SetDevicePropValue",
        RESET_DEVICE_PROP_VALUE = 0x1017 => "ResetDevicePropValue",
        TERMINATE_OPEN_CAPTURE = 0x1018 => "TerminateOpenCapture",
        MOVE_OBJECT = 0x1019 => "MoveObject",
        COPY_OBJECT = 0x101A => "CopyObject",
        GET_PARTIAL_OBJECT = 0x101B => "GetPartialObject",
        INITIATE_OPEN_CAPTURE = 0x101C => "InitiateOpenCapture",
    }
}

datacode_table! {
    /// Response codes (0x2000 range).
    response {
        UNDEFINED = 0x2000 => "Undefined",
        OK = 0x2001 => "OK",
        GENERAL_ERROR = 0x2002 => "GeneralError",
        SESSION_NOT_OPEN = 0x2003 => "SessionNotOpen",
        INVALID_TRANSACTION_ID = 0x2004 => "InvalidTransactionID",
        OPERATION_NOT_SUPPORTED = 0x2005 => "OperationNotSupported",
        PARAMETER_NOT_SUPPORTED = 0x2006 => "ParameterNotSupported",
        INCOMPLETE_TRANSFER = 0x2007 => "IncompleteTransfer",
        INVALID_STORAGE_ID = 0x2008 => "InvalidStorageID",
        INVALID_OBJECT_HANDLE = 0x2009 => "InvalidObjectHandle",
        DEVICE_PROP_NOT_SUPPORTED = 0x200A => "DevicePropNotSupported",
        INVALID_OBJECT_FORMAT_CODE = 0x200B => "InvalidObjectFormatCode",
        STORE_FULL = 0x200C => "StoreFull",
        OBJECT_WRITE_PROTECTED = 0x200D => "ObjectWriteProtected",
        STORE_READ_ONLY = 0x200E => "StoreReadOnly",
        ACCESS_DENIED = 0x200F => "AccessDenied",
        NO_THUMBNAIL_PRESENT = 0x2010 => "NoThumbnailPresent",
        SELF_TEST_FAILED = 0x2011 => "SelfTestFailed",
        PARTIAL_DELETION = 0x2012 => "PartialDeletion",
        STORE_NOT_AVAILABLE = 0x2013 => "StoreNotAvailable",
        SPECIFICATION_BY_FORMAT_UNSUPPORTED = 0x2014 => "SpecificationByFormatUnsupported",
        NO_VALID_OBJECT_INFO = 0x2015 => "NoValidObjectInfo",
        INVALID_CODE_FORMAT = 0x2016 => "InvalidCodeFormat",
        UNKNOWN_VENDOR_CODE = 0x2017 => "UnknownVendorCode",
        CAPTURE_ALREADY_TERMINATED = 0x2018 => "CaptureAlreadyTerminated",
        DEVICE_BUSY = 0x2019 => "DeviceBusy",
        INVALID_PARENT_OBJECT = 0x201A => "InvalidParentObject",
        INVALID_DEVICE_PROP_FORMAT = 0x201B => "InvalidDevicePropFormat",
        INVALID_DEVICE_PROP_VALUE = 0x201C => "InvalidDevicePropValue",
        INVALID_PARAMETER = 0x201D => "InvalidParameter",
        SESSION_ALREADY_OPEN = 0x201E => "SessionAlreadyOpen",
        TRANSACTION_CANCELLED = 0x201F => "TransactionCancelled",
        SPECIFICATION_OF_DESTINATION_UNSUPPORTED = 0x2020 => "SpecificationOfDestinationUnsupported",
    }
}

datacode_table! {
    /// Event codes (0x4000 range).
    event {
        UNDEFINED = 0x4000 => "Undefined",
        CANCEL_TRANSACTION = 0x4001 => "CancelTransaction",
        OBJECT_ADDED = 0x4002 => "ObjectAdded",
        OBJECT_REMOVED = 0x4003 => "ObjectRemoved",
        STORE_ADDED = 0x4004 => "StoreAdded",
        STORE_REMOVED = 0x4005 => "StoreRemoved",
        DEVICE_PROP_CHANGED = 0x4006 => "DevicePropChanged",
        OBJECT_INFO_CHANGED = 0x4007 => "ObjectInfoChanged",
        DEVICE_INFO_CHANGED = 0x4008 => "DeviceInfoChanged",
        REQUEST_OBJECT_TRANSFER = 0x4009 => "RequestObjectTransfer",
        STORE_FULL = 0x400A => "StoreFull",
        DEVICE_RESET = 0x400B => "DeviceReset",
        STORAGE_INFO_CHANGED = 0x400C => "StorageInfoChanged",
        CAPTURE_COMPLETE = 0x400D => "CaptureComplete",
        UNREPORTED_STATUS = 0x400E => "UnreportedStatus",
    }
}

datacode_table! {
    /// Object format codes (0x3000 ancillary, 0x3800 image).
    object_format {
        UNDEFINED = 0x3000 => "Undefined",
        ASSOCIATION = 0x3001 => "Association",
        SCRIPT = 0x3002 => "Script",
        EXECUTABLE = 0x3003 => "Executable",
        TEXT = 0x3004 => "Text",
        HTML = 0x3005 => "HTML",
        DPOF = 0x3006 => "DPOF",
        AIFF = 0x3007 => "AIFF",
        WAV = 0x3008 => "WAV",
        MP3 = 0x3009 => "MP3",
        AVI = 0x300A => "AVI",
        MPEG = 0x300B => "MPEG",
        ASF = 0x300C => "ASF",
        MOV = 0x300D => "MOV",
        UNKNOWN_IMAGE = 0x3800 => "UnknownImage",
        EXIF_JPEG = 0x3801 => "EXIF/JPEG",
        TIFF_EP = 0x3802 => "TIFF/EP",
        FLASHPIX = 0x3803 => "FlashPix",
        BMP = 0x3804 => "BMP",
        CIFF = 0x3805 => "CIFF",
        GIF = 0x3807 => "GIF",
        JFIF = 0x3808 => "JFIF",
        PCD = 0x3809 => "PCD",
        PICT = 0x380A => "PICT",
        PNG = 0x380B => "PNG",
        TIFF = 0x380D => "TIFF",
        TIFF_IT = 0x380E => "TIFF/IT",
        JP2 = 0x380F => "JP2",
        JPX = 0x3810 => "JPX",
        DNG = 0x3811 => "DNG",
        HEIF = 0x3812 => "HEIF",
    }
}

datacode_table! {
    /// Standard device property codes (0x5000 range).
    device_prop {
        UNDEFINED = 0x5000 => "Undefined",
        BATTERY_LEVEL = 0x5001 => "BatteryLevel",
        FUNCTIONAL_MODE = 0x5002 => "FunctionalMode",
        IMAGE_SIZE = 0x5003 => "ImageSize",
        COMPRESSION_SETTING = 0x5004 => "CompressionSetting",
        WHITE_BALANCE = 0x5005 => "WhiteBalance",
        RGB_GAIN = 0x5006 => "RGBGain",
        F_NUMBER = 0x5007 => "FNumber",
        FOCAL_LENGTH = 0x5008 => "FocalLength",
        FOCUS_DISTANCE = 0x5009 => "FocusDistance",
        FOCUS_MODE = 0x500A => "FocusMode",
        EXPOSURE_METERING_MODE = 0x500B => "ExposureMeteringMode",
        FLASH_MODE = 0x500C => "FlashMode",
        EXPOSURE_TIME = 0x500D => "ExposureTime",
        EXPOSURE_PROGRAM_MODE = 0x500E => "ExposureProgramMode",
        EXPOSURE_INDEX = 0x500F => "ExposureIndex",
        EXPOSURE_BIAS_COMPENSATION = 0x5010 => "ExposureBiasCompensation",
        DATE_TIME = 0x5011 => "DateTime",
        CAPTURE_DELAY = 0x5012 => "CaptureDelay",
        STILL_CAPTURE_MODE = 0x5013 => "StillCaptureMode",
        CONTRAST = 0x5014 => "Contrast",
        SHARPNESS = 0x5015 => "Sharpness",
        DIGITAL_ZOOM = 0x5016 => "DigitalZoom",
        EFFECT_MODE = 0x5017 => "EffectMode",
        BURST_NUMBER = 0x5018 => "BurstNumber",
        BURST_INTERVAL = 0x5019 => "BurstInterval",
        TIMELAPSE_NUMBER = 0x501A => "TimelapseNumber",
        TIMELAPSE_INTERVAL = 0x501B => "TimelapseInterval",
        FOCUS_METERING_MODE = 0x501C => "FocusMeteringMode",
        UPLOAD_URL = 0x501D => "UploadURL",
        ARTIST = 0x501E => "Artist",
        COPYRIGHT_INFO = 0x501F => "CopyrightInfo",
    }
}

/// Human-readable label for any code, falling back to hex for vendor codes.
pub fn describe(code: u16) -> String {
    let name = match code & 0xF000 {
        0x1000 => operation::name(code),
        0x2000 => response::name(code),
        0x3000 => object_format::name(code),
        0x4000 => event::name(code),
        0x5000 => device_prop::name(code),
        _ => None,
    };
    match name {
        Some(n) => n.to_string(),
        None => format!("0x{:04X}", code),
    }
}

/// Vendor-extension codes have the high bit of the range nibble set
/// (0x9xxx operations, 0xAxxx responses, 0xCxxx events, 0xDxxx properties).
pub fn is_vendor_code(code: u16) -> bool {
    code & 0x8000 != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_both_directions() {
        assert_eq!(operation::name(0x1001), Some("GetDeviceInfo"));
        assert_eq!(operation::code("OpenSession"), Some(operation::OPEN_SESSION));
        assert_eq!(response::name(response::DEVICE_BUSY), Some("DeviceBusy"));
        assert_eq!(event::code("ObjectAdded"), Some(0x4002));
        assert_eq!(object_format::name(0x3801), Some("EXIF/JPEG"));
        assert_eq!(device_prop::code("FNumber"), Some(0x5007));
    }

    #[test]
    fn test_unknown_codes() {
        assert_eq!(operation::name(0x9001), None);
        assert_eq!(response::code("NotAThing"), None);
        assert_eq!(describe(0xC101), "0xC101");
        assert!(is_vendor_code(0xC101));
        assert!(!is_vendor_code(0x4002));
    }

    #[test]
    fn test_describe_dispatches_by_range() {
        assert_eq!(describe(0x2001), "OK");
        assert_eq!(describe(0x400D), "CaptureComplete");
        assert_eq!(describe(0x5011), "DateTime");
    }

    #[test]
    fn test_tables_have_unique_codes() {
        for table in [operation::TABLE, response::TABLE, event::TABLE, object_format::TABLE] {
            for (i, (code, _)) in table.iter().enumerate() {
                assert!(table[i + 1..].iter().all(|(c, _)| c != code));
            }
        }
    }
}
