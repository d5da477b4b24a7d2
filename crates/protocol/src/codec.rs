//! USB/IP wire codec
//!
//! Encodes and decodes the five USB/IP v1.1.1 frame kinds over a byte
//! stream: the OP_REQ_IMPORT / OP_REP_IMPORT handshake, and the
//! CMD_SUBMIT / RET_SUBMIT / CMD_UNLINK / RET_UNLINK transfer frames.
//! All integers are big-endian on the wire.

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{ImportReplyError, ProtocolError, Result};
use crate::types::{Command, Direction, ImportedDeviceFields, IsoPacketDescriptor};
use crate::version::{USBIP_VERSION, is_compatible};

/// `busid` is a fixed 32-byte, NUL-padded field on the wire.
const BUSID_LEN: usize = 32;
/// `path` is a fixed 256-byte, NUL-padded field on the wire.
const PATH_LEN: usize = 256;

const OP_REQ_IMPORT: u16 = 0x8003;
const OP_REP_IMPORT: u16 = 0x0003;

/// Common 48-byte header, fully decoded and demultiplexed by command code
/// (spec §6 / §4.1 `decode_header`). Each variant keeps only the header
/// slots that command actually uses; unused slots are zero on the wire
/// and dropped here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    CmdSubmit(CmdSubmitHeader),
    CmdUnlink(CmdUnlinkHeader),
    RetSubmit(RetSubmitHeader),
    RetUnlink(RetUnlinkHeader),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdSubmitHeader {
    pub seqnum: u32,
    pub devid: u32,
    pub direction: Direction,
    pub ep: u32,
    pub transfer_flags: u32,
    pub transfer_buffer_length: i32,
    pub start_frame: i32,
    pub number_of_packets: i32,
    pub interval: i32,
    pub setup: [u8; 8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdUnlinkHeader {
    pub seqnum: u32,
    pub devid: u32,
    pub direction: Direction,
    pub ep: u32,
    pub unlink_seqnum: u32,
}

/// Reply header for a completed submit. Per the resolved Open Question
/// (DESIGN.md), `status` occupies the first reply slot and
/// `actual_length` the second; `start_frame` / `number_of_packets` keep
/// their literal meaning and `error_count` occupies the fifth slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetSubmitHeader {
    pub seqnum: u32,
    pub devid: u32,
    pub direction: Direction,
    pub ep: u32,
    pub status: i32,
    pub actual_length: u32,
    pub start_frame: i32,
    pub number_of_packets: i32,
    pub error_count: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetUnlinkHeader {
    pub seqnum: u32,
    pub devid: u32,
    pub direction: Direction,
    pub status: i32,
}

fn write_fixed_str<W: Write>(writer: &mut W, s: &str, field_len: usize) -> Result<()> {
    if s.len() >= field_len {
        return Err(ProtocolError::BusidTooLong(s.to_string()));
    }
    let mut buf = vec![0u8; field_len];
    buf[..s.len()].copy_from_slice(s.as_bytes());
    writer.write_all(&buf)?;
    Ok(())
}

fn read_fixed_str<R: Read>(reader: &mut R, field_len: usize) -> Result<String> {
    let mut buf = vec![0u8; field_len];
    reader.read_exact(&mut buf)?;
    let nul = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..nul]).into_owned())
}

/// Encodes an OP_REQ_IMPORT handshake frame: 40 bytes total
/// (`u16 version, u16 code, u32 status=0, char busid[32]`).
pub fn encode_op_import<W: Write>(writer: &mut W, busid: &str) -> Result<()> {
    writer.write_u16::<BigEndian>(USBIP_VERSION)?;
    writer.write_u16::<BigEndian>(OP_REQ_IMPORT)?;
    writer.write_u32::<BigEndian>(0)?;
    write_fixed_str(writer, busid, BUSID_LEN)?;
    Ok(())
}

/// Decodes an OP_REP_IMPORT reply: the 8-byte prefix, then on success the
/// 312-byte `usb_device` structure. A nonzero status yields
/// `ImportReplyError::Refused` with no further bytes consumed.
pub fn decode_op_import_reply<R: Read>(
    reader: &mut R,
) -> std::result::Result<ImportedDeviceFields, ImportReplyError> {
    let version = reader.read_u16::<BigEndian>().map_err(ProtocolError::from)?;
    let code = reader.read_u16::<BigEndian>().map_err(ProtocolError::from)?;
    if code != OP_REP_IMPORT {
        return Err(ProtocolError::UnknownCommand(code as u32).into());
    }
    if !is_compatible(version) {
        return Err(ProtocolError::IncompatibleVersion(version).into());
    }
    let status = reader.read_i32::<BigEndian>().map_err(ProtocolError::from)?;
    if status != 0 {
        return Err(ImportReplyError::Refused(status));
    }

    let path = read_fixed_str(reader, PATH_LEN).map_err(ProtocolError::from)?;
    let busid = read_fixed_str(reader, BUSID_LEN).map_err(ProtocolError::from)?;
    let busnum = reader.read_u32::<BigEndian>().map_err(ProtocolError::from)?;
    let devnum = reader.read_u32::<BigEndian>().map_err(ProtocolError::from)?;
    let speed = reader.read_u32::<BigEndian>().map_err(ProtocolError::from)?;
    let vendor_id = reader.read_u16::<BigEndian>().map_err(ProtocolError::from)?;
    let product_id = reader.read_u16::<BigEndian>().map_err(ProtocolError::from)?;
    let bcd_device = reader.read_u16::<BigEndian>().map_err(ProtocolError::from)?;
    let device_class = reader.read_u8().map_err(ProtocolError::from)?;
    let device_subclass = reader.read_u8().map_err(ProtocolError::from)?;
    let device_protocol = reader.read_u8().map_err(ProtocolError::from)?;
    let configuration_value = reader.read_u8().map_err(ProtocolError::from)?;
    let num_configurations = reader.read_u8().map_err(ProtocolError::from)?;
    let num_interfaces = reader.read_u8().map_err(ProtocolError::from)?;

    Ok(ImportedDeviceFields {
        path,
        busid,
        busnum,
        devnum,
        speed: crate::types::DeviceSpeed::from_wire(speed),
        vendor_id,
        product_id,
        bcd_device,
        device_class,
        device_subclass,
        device_protocol,
        configuration_value,
        num_configurations,
        num_interfaces,
    })
}

/// Encodes a CMD_SUBMIT frame: the 48-byte common header followed by
/// `payload` for OUT transfers (callers pass an empty slice for IN).
#[allow(clippy::too_many_arguments)]
pub fn encode_cmd_submit<W: Write>(
    writer: &mut W,
    seqnum: u32,
    devid: u32,
    direction: Direction,
    ep: u32,
    transfer_flags: u32,
    transfer_buffer_length: i32,
    start_frame: i32,
    number_of_packets: i32,
    interval: i32,
    setup: [u8; 8],
    payload: &[u8],
) -> Result<()> {
    writer.write_u32::<BigEndian>(Command::CmdSubmit.to_wire())?;
    writer.write_u32::<BigEndian>(seqnum)?;
    writer.write_u32::<BigEndian>(devid)?;
    writer.write_u32::<BigEndian>(direction.to_wire())?;
    writer.write_u32::<BigEndian>(ep)?;
    writer.write_u32::<BigEndian>(transfer_flags)?;
    writer.write_i32::<BigEndian>(transfer_buffer_length)?;
    writer.write_i32::<BigEndian>(start_frame)?;
    writer.write_i32::<BigEndian>(number_of_packets)?;
    writer.write_i32::<BigEndian>(interval)?;
    writer.write_all(&setup)?;
    writer.write_all(payload)?;
    Ok(())
}

/// Encodes a CMD_UNLINK frame requesting cancellation of `unlink_seqnum`.
pub fn encode_cmd_unlink<W: Write>(
    writer: &mut W,
    seqnum: u32,
    devid: u32,
    direction: Direction,
    ep: u32,
    unlink_seqnum: u32,
) -> Result<()> {
    writer.write_u32::<BigEndian>(Command::CmdUnlink.to_wire())?;
    writer.write_u32::<BigEndian>(seqnum)?;
    writer.write_u32::<BigEndian>(devid)?;
    writer.write_u32::<BigEndian>(direction.to_wire())?;
    writer.write_u32::<BigEndian>(ep)?;
    writer.write_u32::<BigEndian>(unlink_seqnum)?;
    writer.write_i32::<BigEndian>(0)?;
    writer.write_i32::<BigEndian>(0)?;
    writer.write_i32::<BigEndian>(0)?;
    writer.write_i32::<BigEndian>(0)?;
    writer.write_all(&[0u8; 8])?;
    Ok(())
}

/// Encodes a RET_SUBMIT frame: header, then (for IN transfers) `payload`,
/// then the iso descriptor trailer if `iso_descriptors` is non-empty.
#[allow(clippy::too_many_arguments)]
pub fn encode_ret_submit<W: Write>(
    writer: &mut W,
    seqnum: u32,
    devid: u32,
    direction: Direction,
    status: i32,
    actual_length: u32,
    start_frame: i32,
    number_of_packets: i32,
    error_count: i32,
    payload: &[u8],
    iso_descriptors: &[IsoPacketDescriptor],
) -> Result<()> {
    writer.write_u32::<BigEndian>(Command::RetSubmit.to_wire())?;
    writer.write_u32::<BigEndian>(seqnum)?;
    writer.write_u32::<BigEndian>(devid)?;
    writer.write_u32::<BigEndian>(direction.to_wire())?;
    writer.write_u32::<BigEndian>(0)?; // ep is not echoed on replies
    writer.write_i32::<BigEndian>(status)?;
    writer.write_u32::<BigEndian>(actual_length)?;
    writer.write_i32::<BigEndian>(start_frame)?;
    writer.write_i32::<BigEndian>(number_of_packets)?;
    writer.write_i32::<BigEndian>(error_count)?;
    writer.write_all(&[0u8; 8])?;
    writer.write_all(payload)?;
    write_iso_descriptors(writer, iso_descriptors)?;
    Ok(())
}

/// Encodes a RET_UNLINK frame. Per spec §4.5 the session always treats
/// the cancelled request as `Cancelled` regardless of `status`.
pub fn encode_ret_unlink<W: Write>(
    writer: &mut W,
    seqnum: u32,
    devid: u32,
    direction: Direction,
    status: i32,
) -> Result<()> {
    writer.write_u32::<BigEndian>(Command::RetUnlink.to_wire())?;
    writer.write_u32::<BigEndian>(seqnum)?;
    writer.write_u32::<BigEndian>(devid)?;
    writer.write_u32::<BigEndian>(direction.to_wire())?;
    writer.write_u32::<BigEndian>(0)?;
    writer.write_i32::<BigEndian>(status)?;
    writer.write_i32::<BigEndian>(0)?;
    writer.write_i32::<BigEndian>(0)?;
    writer.write_i32::<BigEndian>(0)?;
    writer.write_i32::<BigEndian>(0)?;
    writer.write_all(&[0u8; 8])?;
    Ok(())
}

/// Reads and demultiplexes the common 48-byte header into a [`Frame`].
/// Used by the device session's reader task (for RET_SUBMIT /
/// RET_UNLINK) and by the in-process test stub (for CMD_SUBMIT /
/// CMD_UNLINK).
pub fn decode_header<R: Read>(reader: &mut R) -> Result<Frame> {
    let command = reader.read_u32::<BigEndian>()?;
    let seqnum = reader.read_u32::<BigEndian>()?;
    let devid = reader.read_u32::<BigEndian>()?;
    let direction_raw = reader.read_u32::<BigEndian>()?;
    let ep = reader.read_u32::<BigEndian>()?;
    let word_a = reader.read_i32::<BigEndian>()?;
    let word_b = reader.read_i32::<BigEndian>()?;
    let word_c = reader.read_i32::<BigEndian>()?;
    let word_d = reader.read_i32::<BigEndian>()?;
    let word_e = reader.read_i32::<BigEndian>()?;
    let mut setup = [0u8; 8];
    reader.read_exact(&mut setup)?;

    let direction =
        Direction::from_wire(direction_raw).ok_or(ProtocolError::UnknownCommand(direction_raw))?;
    let command = Command::from_wire(command).ok_or(ProtocolError::UnknownCommand(command))?;

    match command {
        Command::CmdSubmit => Ok(Frame::CmdSubmit(CmdSubmitHeader {
            seqnum,
            devid,
            direction,
            ep,
            transfer_flags: word_a as u32,
            transfer_buffer_length: word_b,
            start_frame: word_c,
            number_of_packets: word_d,
            interval: word_e,
            setup,
        })),
        Command::CmdUnlink => Ok(Frame::CmdUnlink(CmdUnlinkHeader {
            seqnum,
            devid,
            direction,
            ep,
            unlink_seqnum: word_a as u32,
        })),
        Command::RetSubmit => Ok(Frame::RetSubmit(RetSubmitHeader {
            seqnum,
            devid,
            direction,
            ep,
            status: word_a,
            actual_length: word_b as u32,
            start_frame: word_c,
            number_of_packets: word_d,
            error_count: word_e,
        })),
        Command::RetUnlink => Ok(Frame::RetUnlink(RetUnlinkHeader {
            seqnum,
            devid,
            direction,
            status: word_a,
        })),
    }
}

/// Reads `count` 16-byte iso packet descriptors trailing a submit/reply
/// payload. Per spec §4.1, `0xFFFFFFFF` means "no trailer" and `0` means
/// "no trailer, no payload" for a non-iso endpoint with zero actual length.
pub fn read_iso_descriptors<R: Read>(
    reader: &mut R,
    count: u32,
) -> Result<Vec<IsoPacketDescriptor>> {
    if count == 0 || count == u32::MAX {
        return Ok(Vec::new());
    }
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let offset = reader.read_u32::<BigEndian>()?;
        let length = reader.read_u32::<BigEndian>()?;
        let actual_length = reader.read_u32::<BigEndian>()?;
        let status = reader.read_i32::<BigEndian>()?;
        out.push(IsoPacketDescriptor {
            offset,
            length,
            actual_length,
            status,
        });
    }
    Ok(out)
}

/// Writes the iso packet descriptor trailer. A caller with no iso
/// packets (the common case) passes an empty slice and nothing is
/// written.
pub fn write_iso_descriptors<W: Write>(
    writer: &mut W,
    descriptors: &[IsoPacketDescriptor],
) -> Result<()> {
    for desc in descriptors {
        writer.write_u32::<BigEndian>(desc.offset)?;
        writer.write_u32::<BigEndian>(desc.length)?;
        writer.write_u32::<BigEndian>(desc.actual_length)?;
        writer.write_i32::<BigEndian>(desc.status)?;
    }
    Ok(())
}
