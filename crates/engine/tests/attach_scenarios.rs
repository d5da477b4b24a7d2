//! End-to-end scenarios over a real loopback socket, covering the six
//! cases this subsystem's behavior hinges on: a clean attach, a refused
//! attach, a completed transfer, both outcomes of the cancel/RET_SUBMIT
//! race, and detaching with requests in flight.

use std::sync::Arc;
use std::time::Duration;

use engine::test_support::{HandshakeReply, read_client_frame, sample_fields, send_ret_submit, send_ret_unlink, spawn_fake_remote};
use engine::{
    AttachOptions, ChannelCompletionSink, CompletionStatus, DeviceLocation, EndpointDescriptor, EndpointKey, Engine, EngineConfig,
    EngineError, NullCompletionSink, NullHubDelegate, TransferType,
};
use protocol::{Direction, Frame};
use tokio::io::AsyncReadExt;

fn location_for(addr: std::net::SocketAddr, busid: &str) -> DeviceLocation {
    DeviceLocation::new(addr.ip().to_string(), addr.port().to_string(), busid)
}

#[tokio::test]
async fn successful_attach_lists_the_device() {
    let fields = sample_fields("1-1");
    let vendor_id = fields.vendor_id;
    let (addr, _remote) = spawn_fake_remote(HandshakeReply::Accept(fields), |_stream| async {}).await.unwrap();

    let engine = Engine::new(EngineConfig::default(), Arc::new(NullHubDelegate));
    let port = engine
        .attach(location_for(addr, "1-1"), AttachOptions::default(), Arc::new(NullCompletionSink))
        .await
        .unwrap();
    assert_eq!(port, 1);

    let listed = engine.list();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].port, 1);
    assert_eq!(listed[0].vendor_id, vendor_id);
}

#[tokio::test]
async fn attach_refused_leaves_the_port_table_untouched() {
    let (addr, _remote) = spawn_fake_remote(HandshakeReply::Refuse(1), |_stream| async {}).await.unwrap();

    let engine = Engine::new(EngineConfig::default(), Arc::new(NullHubDelegate));
    let err = engine
        .attach(location_for(addr, "1-1"), AttachOptions::default(), Arc::new(NullCompletionSink))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Refused(1)));
    assert!(engine.list().is_empty());
}

#[tokio::test]
async fn bulk_in_transfer_completes_with_payload() {
    let fields = sample_fields("1-1");
    let (addr, _remote) = spawn_fake_remote(HandshakeReply::Accept(fields), |mut stream| async move {
        let Frame::CmdSubmit(header) = read_client_frame(&mut stream).await.unwrap() else {
            panic!("expected CMD_SUBMIT");
        };
        assert_eq!(header.seqnum, 3); // first In-direction seqnum: counter=1, low bit set
        let payload = vec![0xABu8; 64];
        send_ret_submit(&mut stream, header.seqnum, header.devid, header.direction, 0, &payload)
            .await
            .unwrap();
    })
    .await
    .unwrap();

    let engine = Engine::new(EngineConfig::default(), Arc::new(NullHubDelegate));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let port = engine
        .attach(location_for(addr, "1-1"), AttachOptions::default(), Arc::new(ChannelCompletionSink(tx)))
        .await
        .unwrap();
    let session = engine.session(port).unwrap();

    let key = EndpointKey::new(1, Direction::In);
    session.install_endpoint(EndpointDescriptor {
        address: 1,
        direction: Direction::In,
        transfer_type: TransferType::Bulk,
        max_packet: 512,
        interval: 0,
        interface: 0,
    });
    session.submit(42, key, 0, 512, None, Vec::new()).unwrap();

    let completion = rx.recv().await.unwrap();
    assert_eq!(completion.local_handle, 42);
    assert!(matches!(completion.status, CompletionStatus::Ok));
    assert_eq!(completion.actual_length, 64);
    assert_eq!(completion.payload, vec![0xABu8; 64]);
}

#[tokio::test]
async fn cancel_wins_when_the_remote_only_ever_answers_the_unlink() {
    let fields = sample_fields("1-1");
    let (addr, _remote) = spawn_fake_remote(HandshakeReply::Accept(fields), |mut stream| async move {
        let Frame::CmdSubmit(submit) = read_client_frame(&mut stream).await.unwrap() else {
            panic!("expected CMD_SUBMIT");
        };
        let Frame::CmdUnlink(unlink) = read_client_frame(&mut stream).await.unwrap() else {
            panic!("expected CMD_UNLINK");
        };
        assert_eq!(unlink.unlink_seqnum, submit.seqnum);
        send_ret_unlink(&mut stream, unlink.seqnum, submit.devid, submit.direction, -104)
            .await
            .unwrap();
    })
    .await
    .unwrap();

    let engine = Engine::new(EngineConfig::default(), Arc::new(NullHubDelegate));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let port = engine
        .attach(location_for(addr, "1-1"), AttachOptions::default(), Arc::new(ChannelCompletionSink(tx)))
        .await
        .unwrap();
    let session = engine.session(port).unwrap();

    let key = EndpointKey::new(1, Direction::Out);
    session.install_endpoint(EndpointDescriptor {
        address: 1,
        direction: Direction::Out,
        transfer_type: TransferType::Bulk,
        max_packet: 512,
        interval: 0,
        interface: 0,
    });
    session.submit(7, key, 0, 0, None, Vec::new()).unwrap();
    session.cancel(7);

    let completion = rx.recv().await.unwrap();
    assert_eq!(completion.local_handle, 7);
    assert!(matches!(completion.status, CompletionStatus::Cancelled));
    assert_eq!(session.pending_count(), 0);
}

#[tokio::test]
async fn cancel_loses_when_the_remote_answers_the_submit_first() {
    let fields = sample_fields("1-1");
    let (addr, _remote) = spawn_fake_remote(HandshakeReply::Accept(fields), |mut stream| async move {
        let Frame::CmdSubmit(submit) = read_client_frame(&mut stream).await.unwrap() else {
            panic!("expected CMD_SUBMIT");
        };
        let payload = vec![0x11u8; 32];
        send_ret_submit(&mut stream, submit.seqnum, submit.devid, submit.direction, 0, &payload)
            .await
            .unwrap();

        let Frame::CmdUnlink(unlink) = read_client_frame(&mut stream).await.unwrap() else {
            panic!("expected CMD_UNLINK");
        };
        send_ret_unlink(&mut stream, unlink.seqnum, submit.devid, submit.direction, -104)
            .await
            .unwrap();
    })
    .await
    .unwrap();

    let engine = Engine::new(EngineConfig::default(), Arc::new(NullHubDelegate));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let port = engine
        .attach(location_for(addr, "1-1"), AttachOptions::default(), Arc::new(ChannelCompletionSink(tx)))
        .await
        .unwrap();
    let session = engine.session(port).unwrap();

    let key = EndpointKey::new(1, Direction::Out);
    session.install_endpoint(EndpointDescriptor {
        address: 1,
        direction: Direction::Out,
        transfer_type: TransferType::Bulk,
        max_packet: 512,
        interval: 0,
        interface: 0,
    });
    session.submit(9, key, 0, 32, None, Vec::new()).unwrap();
    session.cancel(9);

    let completion = rx.recv().await.unwrap();
    assert_eq!(completion.local_handle, 9);
    assert!(matches!(completion.status, CompletionStatus::Ok));
    assert_eq!(completion.actual_length, 32);

    // The trailing RET_UNLINK has nothing left to match; give the reader
    // a moment to consume and discard it, then confirm no second
    // completion (and no leftover registry entry) resulted from it.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.pending_count(), 0);
    assert!(tokio::time::timeout(Duration::from_millis(50), rx.recv()).await.is_err());
}

#[tokio::test]
async fn detach_completes_in_flight_requests_as_cancelled() {
    let fields = sample_fields("1-1");
    let (addr, _remote) = spawn_fake_remote(HandshakeReply::Accept(fields), |mut stream| async move {
        let mut idle = [0u8; 1];
        let _ = stream.read(&mut idle).await;
    })
    .await
    .unwrap();

    let engine = Engine::new(EngineConfig::default(), Arc::new(NullHubDelegate));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let port = engine
        .attach(location_for(addr, "1-1"), AttachOptions::default(), Arc::new(ChannelCompletionSink(tx)))
        .await
        .unwrap();
    let session = engine.session(port).unwrap();

    for address in [1u8, 2, 3] {
        session.install_endpoint(EndpointDescriptor {
            address,
            direction: Direction::Out,
            transfer_type: TransferType::Bulk,
            max_packet: 512,
            interval: 0,
            interface: 0,
        });
        let key = EndpointKey::new(address, Direction::Out);
        session.submit(address as u64, key, 0, 0, None, Vec::new()).unwrap();
    }

    engine.detach(port as i32).await;

    let mut completed = Vec::new();
    for _ in 0..3 {
        let completion = rx.recv().await.unwrap();
        assert!(matches!(completion.status, CompletionStatus::Cancelled));
        completed.push(completion.local_handle);
    }
    assert_eq!(completed, vec![1, 2, 3]); // submit order, by ascending seqnum

    assert!(engine.list().is_empty());

    let key = EndpointKey::new(1, Direction::Out);
    let err = session.submit(99, key, 0, 0, None, Vec::new()).unwrap_err();
    assert!(matches!(err, EngineError::Gone));
}
