//! In-process loopback test harness.
//!
//! Speaks the server side of the handshake and transfer protocol over a
//! real loopback TCP socket, so integration tests exercise
//! [`crate::session::DeviceSession`] against actual socket I/O instead of
//! a mocked transport. Not used by any production code path.

use std::io::Cursor;
use std::net::SocketAddr;

use byteorder::{BigEndian, WriteBytesExt};
use protocol::{Direction, Frame, ImportedDeviceFields, IsoPacketDescriptor};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// What the stub tells the client its OP_REP_IMPORT handshake was.
pub enum HandshakeReply {
    Accept(ImportedDeviceFields),
    Refuse(i32),
}

/// A set of device fields good enough for a handshake in tests that
/// don't care about the specific values.
pub fn sample_fields(busid: &str) -> ImportedDeviceFields {
    ImportedDeviceFields {
        path: format!("/sys/devices/{busid}"),
        busid: busid.to_string(),
        busnum: 1,
        devnum: 2,
        speed: protocol::DeviceSpeed::High,
        vendor_id: 0x1234,
        product_id: 0x5678,
        bcd_device: 0x0100,
        device_class: 0,
        device_subclass: 0,
        device_protocol: 0,
        configuration_value: 1,
        num_configurations: 1,
        num_interfaces: 1,
    }
}

/// Binds a loopback listener, returns its address immediately, and
/// spawns a task that accepts exactly one connection, answers the
/// handshake, then hands the live socket to `on_connected` for
/// scenario-specific scripted I/O.
pub async fn spawn_fake_remote<F, Fut>(
    handshake: HandshakeReply,
    on_connected: F,
) -> std::io::Result<(SocketAddr, JoinHandle<()>)>
where
    F: FnOnce(TcpStream) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let task = tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };

        let mut request = [0u8; 40];
        if stream.read_exact(&mut request).await.is_err() {
            return;
        }

        let reply = match handshake {
            HandshakeReply::Accept(fields) => encode_accept_reply(&fields),
            HandshakeReply::Refuse(status) => encode_refuse_reply(status),
        };
        if stream.write_all(&reply).await.is_err() {
            return;
        }

        on_connected(stream).await;
    });
    Ok((addr, task))
}

fn encode_accept_reply(fields: &ImportedDeviceFields) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_u16::<BigEndian>(protocol::USBIP_VERSION).unwrap();
    buf.write_u16::<BigEndian>(0x0003).unwrap();
    buf.write_i32::<BigEndian>(0).unwrap();
    write_fixed(&mut buf, &fields.path, 256);
    write_fixed(&mut buf, &fields.busid, 32);
    buf.write_u32::<BigEndian>(fields.busnum).unwrap();
    buf.write_u32::<BigEndian>(fields.devnum).unwrap();
    buf.write_u32::<BigEndian>(fields.speed.to_wire()).unwrap();
    buf.write_u16::<BigEndian>(fields.vendor_id).unwrap();
    buf.write_u16::<BigEndian>(fields.product_id).unwrap();
    buf.write_u16::<BigEndian>(fields.bcd_device).unwrap();
    buf.push(fields.device_class);
    buf.push(fields.device_subclass);
    buf.push(fields.device_protocol);
    buf.push(fields.configuration_value);
    buf.push(fields.num_configurations);
    buf.push(fields.num_interfaces);
    buf
}

fn encode_refuse_reply(status: i32) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_u16::<BigEndian>(protocol::USBIP_VERSION).unwrap();
    buf.write_u16::<BigEndian>(0x0003).unwrap();
    buf.write_i32::<BigEndian>(status).unwrap();
    buf
}

fn write_fixed(buf: &mut Vec<u8>, s: &str, field_len: usize) {
    let mut field = vec![0u8; field_len];
    field[..s.len()].copy_from_slice(s.as_bytes());
    buf.extend_from_slice(&field);
}

/// Reads and decodes one CMD_SUBMIT/CMD_UNLINK frame (plus its OUT
/// payload, if any) off a connected stub socket.
pub async fn read_client_frame(stream: &mut TcpStream) -> std::io::Result<Frame> {
    let mut header = [0u8; 48];
    stream.read_exact(&mut header).await?;
    let frame = protocol::decode_header(&mut Cursor::new(&header[..]))
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(frame)
}

/// Reads `length` bytes of an OUT payload following a CMD_SUBMIT header.
pub async fn read_out_payload(stream: &mut TcpStream, length: usize) -> std::io::Result<Vec<u8>> {
    let mut payload = vec![0u8; length];
    stream.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Sends a RET_SUBMIT frame with an optional IN payload.
#[allow(clippy::too_many_arguments)]
pub async fn send_ret_submit(
    stream: &mut TcpStream,
    seqnum: u32,
    devid: u32,
    direction: Direction,
    status: i32,
    payload: &[u8],
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    protocol::encode_ret_submit(
        &mut buf,
        seqnum,
        devid,
        direction,
        status,
        payload.len() as u32,
        0,
        0,
        0,
        payload,
        &[] as &[IsoPacketDescriptor],
    )
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    stream.write_all(&buf).await
}

/// Sends a RET_UNLINK frame answering a CMD_UNLINK whose own seqnum was
/// `unlink_seqnum`.
pub async fn send_ret_unlink(
    stream: &mut TcpStream,
    unlink_seqnum: u32,
    devid: u32,
    direction: Direction,
    status: i32,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    protocol::encode_ret_unlink(&mut buf, unlink_seqnum, devid, direction, status)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    stream.write_all(&buf).await
}
