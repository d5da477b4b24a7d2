//! USB/IP domain type definitions shared by the codec and the engine.

/// Transfer direction, carried in the wire header's `direction` field and
/// folded into the low bit of every allocated sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Out = 0,
    In = 1,
}

impl Direction {
    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            0 => Some(Direction::Out),
            1 => Some(Direction::In),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u32 {
        self as u32
    }
}

/// USB/IP command codes carried in the common 48-byte header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    CmdSubmit = 1,
    CmdUnlink = 2,
    RetSubmit = 3,
    RetUnlink = 4,
}

impl Command {
    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            1 => Some(Command::CmdSubmit),
            2 => Some(Command::CmdUnlink),
            3 => Some(Command::RetSubmit),
            4 => Some(Command::RetUnlink),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u32 {
        self as u32
    }
}

/// USB link speed as reported in the `usb_device` structure of an
/// OP_REP_IMPORT reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSpeed {
    Unknown,
    Low,
    Full,
    High,
    Super,
    SuperPlus,
}

impl DeviceSpeed {
    pub fn from_wire(value: u32) -> Self {
        match value {
            1 => DeviceSpeed::Low,
            2 => DeviceSpeed::Full,
            3 => DeviceSpeed::High,
            4 => DeviceSpeed::Super,
            5 => DeviceSpeed::SuperPlus,
            _ => DeviceSpeed::Unknown,
        }
    }

    pub fn to_wire(self) -> u32 {
        match self {
            DeviceSpeed::Unknown => 0,
            DeviceSpeed::Low => 1,
            DeviceSpeed::Full => 2,
            DeviceSpeed::High => 3,
            DeviceSpeed::Super => 4,
            DeviceSpeed::SuperPlus => 5,
        }
    }
}

/// The fields of the 312-byte `usb_device` structure embedded in a
/// successful OP_REP_IMPORT reply (spec.md §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedDeviceFields {
    pub path: String,
    pub busid: String,
    pub busnum: u32,
    pub devnum: u32,
    pub speed: DeviceSpeed,
    pub vendor_id: u16,
    pub product_id: u16,
    pub bcd_device: u16,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub configuration_value: u8,
    pub num_configurations: u8,
    pub num_interfaces: u8,
}

/// One isochronous packet descriptor, trailing iso transfers in both
/// directions (spec.md §4.1): 16 bytes, offset/length/actual_length/status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsoPacketDescriptor {
    pub offset: u32,
    pub length: u32,
    pub actual_length: u32,
    pub status: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_wire_roundtrip() {
        assert_eq!(Direction::from_wire(0), Some(Direction::Out));
        assert_eq!(Direction::from_wire(1), Some(Direction::In));
        assert_eq!(Direction::from_wire(2), None);
        assert_eq!(Direction::Out.to_wire(), 0);
        assert_eq!(Direction::In.to_wire(), 1);
    }

    #[test]
    fn command_wire_roundtrip() {
        for cmd in [
            Command::CmdSubmit,
            Command::CmdUnlink,
            Command::RetSubmit,
            Command::RetUnlink,
        ] {
            assert_eq!(Command::from_wire(cmd.to_wire()), Some(cmd));
        }
        assert_eq!(Command::from_wire(99), None);
    }

    #[test]
    fn device_speed_wire_roundtrip() {
        for speed in [
            DeviceSpeed::Low,
            DeviceSpeed::Full,
            DeviceSpeed::High,
            DeviceSpeed::Super,
            DeviceSpeed::SuperPlus,
        ] {
            assert_eq!(DeviceSpeed::from_wire(speed.to_wire()), speed);
        }
        assert_eq!(DeviceSpeed::from_wire(42), DeviceSpeed::Unknown);
    }
}
