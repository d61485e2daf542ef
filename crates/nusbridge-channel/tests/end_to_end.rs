//! Two channels wired through in-memory transports.

use nusbridge_channel::{
    ChannelError, ChannelSettings, ConnectionId, HandshakeState, Inbound, SecureChannel,
    SendOutcome,
};
use nusbridge_crypto::{strip_trailing_control, CipherContext, CryptoProvider, Curve};
use nusbridge_test::{MemoryConfigurationStore, MemoryTransport, RecordingSink};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

type Endpoint = SecureChannel<MemoryTransport, RecordingSink>;

const CONN: ConnectionId = ConnectionId(0x10);

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn endpoint(seed: u64, settings: ChannelSettings, transport: MemoryTransport) -> Endpoint {
    init_logging();
    let keypair = CryptoProvider::new(settings.curve)
        .generate_keypair_with_rng(&mut ChaCha8Rng::seed_from_u64(seed))
        .expect("should generate");
    let mut channel = SecureChannel::with_keypair(
        &MemoryConfigurationStore::default(),
        settings,
        keypair,
        transport,
        RecordingSink::new(),
    )
    .expect("should create");
    channel.on_connect(CONN).expect("should connect");
    channel
}

/// Deliver everything `from` sent to `to`.
fn pump(from: &mut Endpoint, to: &mut Endpoint) -> Vec<Result<Inbound, ChannelError>> {
    from.transport_mut()
        .take_sent()
        .iter()
        .map(|message| to.on_transport_message(CONN, message))
        .collect()
}

fn handshake(a: &mut Endpoint, b: &mut Endpoint) {
    assert_eq!(a.send_plaintext(b"ping"), Ok(SendOutcome::HandshakeInitiated));
    assert_eq!(a.handshake_state(CONN), Some(HandshakeState::KeySent));
    assert_eq!(pump(a, b), vec![Ok(Inbound::HandshakeResponded)]);
    assert_eq!(pump(b, a), vec![Ok(Inbound::HandshakeCompleted)]);
}

#[test]
fn hello_end_to_end() {
    let mut a = endpoint(1, ChannelSettings::default(), MemoryTransport::new());
    let mut b = endpoint(2, ChannelSettings::default(), MemoryTransport::new());

    assert_eq!(a.send_plaintext(b"HELLO"), Ok(SendOutcome::HandshakeInitiated));
    let request = a.transport().last_sent().expect("request sent").to_vec();
    assert_eq!(request[0], 0x01);
    assert_eq!(request.len(), 1 + 64);

    assert_eq!(pump(&mut a, &mut b), vec![Ok(Inbound::HandshakeResponded)]);
    let response = b.transport().last_sent().expect("response sent").to_vec();
    assert_eq!(response[0], 0x02);
    assert_eq!(&response[1..], b.local_public_key().as_bytes());
    assert_eq!(pump(&mut b, &mut a), vec![Ok(Inbound::HandshakeCompleted)]);

    let secret = |endpoint: &Endpoint| {
        endpoint
            .session(CONN)
            .and_then(|session| session.handshake().shared_secret())
            .expect("established")
            .as_bytes()
            .to_vec()
    };
    assert_eq!(secret(&a), secret(&b));

    // The first write was dropped by the handshake, so it is sent again.
    assert_eq!(a.send_plaintext(b"HELLO"), Ok(SendOutcome::Sent));
    assert_eq!(
        pump(&mut a, &mut b),
        vec![Ok(Inbound::Delivered(b"HELLO".to_vec()))]
    );
    assert_eq!(b.sink().received(), &[b"HELLO".to_vec()]);

    assert_eq!(b.send_plaintext(b"WORLD"), Ok(SendOutcome::Sent));
    assert_eq!(
        pump(&mut b, &mut a),
        vec![Ok(Inbound::Delivered(b"WORLD".to_vec()))]
    );
}

#[test]
fn disconnect_resets_session() {
    let mut a = endpoint(1, ChannelSettings::default(), MemoryTransport::new());
    let mut b = endpoint(2, ChannelSettings::default(), MemoryTransport::new());
    handshake(&mut a, &mut b);

    a.send_plaintext(b"before").expect("should send");
    let stale = a.transport_mut().take_sent();

    assert!(b.on_disconnect(CONN));
    assert_eq!(b.handshake_state(CONN), None);
    assert_eq!(
        b.on_transport_message(CONN, &stale[0]),
        Err(ChannelError::NoSession)
    );

    b.on_connect(CONN).expect("should reconnect");
    assert_eq!(b.handshake_state(CONN), Some(HandshakeState::NotStarted));
    assert_eq!(
        b.on_transport_message(CONN, &stale[0]),
        Err(ChannelError::NotEstablished)
    );
    assert!(b.sink().received().is_empty());
}

#[test]
fn fresh_handshake_after_reconnect() {
    let mut a = endpoint(1, ChannelSettings::default(), MemoryTransport::new());
    let mut b = endpoint(2, ChannelSettings::default(), MemoryTransport::new());
    handshake(&mut a, &mut b);

    a.on_disconnect(CONN);
    b.on_disconnect(CONN);
    a.on_connect(CONN).expect("should reconnect");
    b.on_connect(CONN).expect("should reconnect");

    handshake(&mut a, &mut b);
    a.send_plaintext(b"again").expect("should send");
    assert_eq!(
        pump(&mut a, &mut b),
        vec![Ok(Inbound::Delivered(b"again".to_vec()))]
    );
}

#[test]
fn second_connection_rejected() {
    let mut a = endpoint(1, ChannelSettings::default(), MemoryTransport::new());
    assert_eq!(
        a.on_connect(ConnectionId(0x11)),
        Err(ChannelError::SessionTableFull)
    );
    assert_eq!(a.active_connection(), Some(CONN));
}

#[test]
fn busy_transport_gives_up() {
    let mut a = endpoint(1, ChannelSettings::default(), MemoryTransport::new());
    let mut b = endpoint(2, ChannelSettings::default(), MemoryTransport::new());
    handshake(&mut a, &mut b);

    let attempts = a.transport().attempts();
    a.transport_mut().busy_for(8);
    assert_eq!(a.send_plaintext(b"data"), Err(ChannelError::TransportBusy));
    assert_eq!(a.transport().attempts(), attempts + 8);
    assert_eq!(a.handshake_state(CONN), Some(HandshakeState::Established));

    assert_eq!(a.send_plaintext(b"data"), Ok(SendOutcome::Sent));
}

#[test]
fn fatal_transport_tears_down_session() {
    let mut a = endpoint(1, ChannelSettings::default(), MemoryTransport::new());
    let mut b = endpoint(2, ChannelSettings::default(), MemoryTransport::new());
    handshake(&mut a, &mut b);

    a.transport_mut().busy_for(2);
    a.transport_mut().fail_next("link lost");
    assert_eq!(
        a.send_plaintext(b"data"),
        Err(ChannelError::TransportFatal("link lost".to_string()))
    );
    assert_eq!(a.handshake_state(CONN), None);
    assert_eq!(a.send_plaintext(b"data"), Err(ChannelError::NoSession));
}

#[test]
fn failed_key_response_allows_retry() {
    let mut a = endpoint(1, ChannelSettings::default(), MemoryTransport::new());
    let mut b = endpoint(2, ChannelSettings::default(), MemoryTransport::new());

    assert_eq!(a.send_plaintext(b"x"), Ok(SendOutcome::HandshakeInitiated));

    b.transport_mut().busy_for(8);
    assert_eq!(pump(&mut a, &mut b), vec![Err(ChannelError::TransportBusy)]);
    assert_eq!(b.handshake_state(CONN), Some(HandshakeState::NotStarted));
    assert!(b.transport().sent().is_empty());

    // The initiator's next write sends the KEY_REQUEST again.
    assert_eq!(a.send_plaintext(b"x"), Ok(SendOutcome::HandshakePending));
    let retry = a.transport().last_sent().expect("request sent again").to_vec();
    assert_eq!(retry[0], 0x01);
    assert_eq!(&retry[1..], a.local_public_key().as_bytes());

    assert_eq!(pump(&mut a, &mut b), vec![Ok(Inbound::HandshakeResponded)]);
    assert_eq!(pump(&mut b, &mut a), vec![Ok(Inbound::HandshakeCompleted)]);
    assert_eq!(a.handshake_state(CONN), Some(HandshakeState::Established));

    assert_eq!(a.send_plaintext(b"HELLO"), Ok(SendOutcome::Sent));
    assert_eq!(
        pump(&mut a, &mut b),
        vec![Ok(Inbound::Delivered(b"HELLO".to_vec()))]
    );
    assert_eq!(b.sink().received(), &[b"HELLO".to_vec()]);
}

#[test]
fn stream_framing_both_directions() {
    let mut a = endpoint(1, ChannelSettings::default(), MemoryTransport::new());
    let mut b = endpoint(2, ChannelSettings::default(), MemoryTransport::new());
    handshake(&mut a, &mut b);

    // 20 byte payloads leave room for 15 plaintext bytes per frame.
    let outcomes = a.on_input_bytes(&[b'a'; 40]);
    assert_eq!(outcomes, vec![Ok(SendOutcome::Sent), Ok(SendOutcome::Sent)]);

    let outcomes = a.on_input_bytes(&[b'b', 0xA5, 0xA6, 0xA7]);
    assert_eq!(outcomes, vec![Ok(SendOutcome::Sent)]);

    let frames = a.transport_mut().take_sent();
    assert!(frames.iter().all(|frame| frame.len() <= 20));

    for frame in frames {
        let mut stream = frame;
        stream.extend_from_slice(&nusbridge_channel::SENTINEL);
        for result in b.on_transport_bytes(CONN, &stream) {
            assert!(matches!(result, Ok(Inbound::Delivered(_))));
        }
    }

    let mut expected = vec![b'a'; 40];
    expected.push(b'b');
    assert_eq!(b.sink().concatenated(), expected);
}

#[test]
fn larger_payload_after_mtu_exchange() {
    let mut a = endpoint(1, ChannelSettings::default(), MemoryTransport::new());
    let mut b = endpoint(2, ChannelSettings::default(), MemoryTransport::new());
    handshake(&mut a, &mut b);

    let long = [b'z'; 100];
    assert!(matches!(
        a.send_plaintext(&long),
        Err(ChannelError::PayloadTooLarge { len: 100, max: 15 })
    ));

    a.transport_mut().set_max_payload_size(CONN, 244);
    b.transport_mut().set_max_payload_size(CONN, 244);
    a.refresh_payload_limits();
    b.refresh_payload_limits();

    assert_eq!(a.send_plaintext(&long), Ok(SendOutcome::Sent));
    assert_eq!(
        pump(&mut a, &mut b),
        vec![Ok(Inbound::Delivered(long.to_vec()))]
    );
}

#[test]
fn p384_handshake() {
    let settings = ChannelSettings {
        curve: Curve::P384,
        ..Default::default()
    };
    let transport = || MemoryTransport::new().with_max_payload_size(244);
    let mut a = endpoint(1, settings.clone(), transport());
    let mut b = endpoint(2, settings, transport());

    handshake(&mut a, &mut b);
    assert_eq!(a.local_public_key().len(), 96);

    a.send_plaintext(b"three eighty four").expect("should send");
    assert_eq!(
        pump(&mut a, &mut b),
        vec![Ok(Inbound::Delivered(b"three eighty four".to_vec()))]
    );
}

#[test]
fn legacy_outbound_uses_static_key() {
    let transport = || MemoryTransport::new().with_max_payload_size(244);
    let mut a = endpoint(1, ChannelSettings::legacy(), transport());
    let mut b = endpoint(2, ChannelSettings::legacy(), transport());
    handshake(&mut a, &mut b);

    a.send_plaintext(b"HELLO").expect("should send");
    let frame = a.transport_mut().take_sent().remove(0);
    assert_eq!(frame[0], 0x03);

    // A legacy peer decrypts with the static key and sees base64.
    let static_key = MemoryConfigurationStore::default().static_key;
    let mut peer_cipher = CipherContext::with_zero_iv(static_key);
    let padded = peer_cipher.decrypt(&frame[1..]).expect("should decrypt");
    assert_eq!(strip_trailing_control(&padded), b"SEVMTE8=");

    // Inbound always uses the session key, so the other side cannot read it.
    assert_ne!(
        b.on_transport_message(CONN, &frame),
        Ok(Inbound::Delivered(b"HELLO".to_vec()))
    );
}

#[test]
fn handshake_timeout_allows_new_attempt() {
    let settings = ChannelSettings {
        handshake_timeout_ms: Some(50),
        ..Default::default()
    };
    let mut a = endpoint(1, settings, MemoryTransport::new());
    a.send_plaintext(b"x").expect("should initiate");
    assert_eq!(a.send_plaintext(b"x"), Ok(SendOutcome::HandshakePending));
    assert_eq!(a.transport().sent().len(), 2);

    let later = std::time::Instant::now() + std::time::Duration::from_millis(100);
    assert!(a.poll(later).is_err());
    assert_eq!(a.handshake_state(CONN), Some(HandshakeState::NotStarted));
    assert_eq!(a.send_plaintext(b"x"), Ok(SendOutcome::HandshakeInitiated));
    assert_eq!(a.transport().sent().len(), 3);
}
