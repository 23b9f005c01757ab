//! End-to-end encounters: engines on a shared in-memory medium.

use std::sync::Arc;
use std::time::Duration;

use encounter_engine::{
    Activity, ByteStream, ConnectionState, EncounterEngine, EncounterSink, EngineConfig,
    EngineHandle, PeerAddress, Role,
};
use encounter_radio::{MemoryTransport, RadioConfig, RadioMedium};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Sink that sends one greeting line and records what it hears back.
#[derive(Default)]
struct GreetingRecorder {
    met: Mutex<Vec<(PeerAddress, Role)>>,
    heard: Arc<Mutex<Vec<String>>>,
}

impl EncounterSink for GreetingRecorder {
    fn on_connected(&self, mut channel: ByteStream, address: PeerAddress, role: Role) {
        self.met.lock().push((address.clone(), role));
        let heard = Arc::clone(&self.heard);
        tokio::spawn(async move {
            let greeting = format!("hello {address}\n");
            if channel.write_all(greeting.as_bytes()).await.is_err() {
                return;
            }
            let mut buf = vec![0u8; 64];
            if let Ok(n) = channel.read(&mut buf).await {
                heard.lock().push(String::from_utf8_lossy(&buf[..n]).into_owned());
            }
            // Keep the channel open until the peer goes away.
            let _ = channel.read(&mut buf).await;
        });
    }
}

struct Node {
    engine: EncounterEngine,
    handle: EngineHandle,
    sink: Arc<GreetingRecorder>,
    radio: Arc<MemoryTransport>,
}

fn node(medium: &RadioMedium, address: &str, radio_config: RadioConfig) -> Node {
    let radio = Arc::new(
        MemoryTransport::new(medium, address, Some(format!("node {address}")), radio_config)
            .unwrap(),
    );
    let sink = Arc::new(GreetingRecorder::default());
    let config = EngineConfig::default().with_min_reconnect_interval(Duration::from_secs(5));
    let engine = EncounterEngine::new(config, radio.clone(), sink.clone());
    let handle = engine.handle();
    Node {
        engine,
        handle,
        sink,
        radio,
    }
}

/// Sink that parks every stream so the test can poke at it later.
#[derive(Default)]
struct StreamKeeper {
    streams: Mutex<Vec<ByteStream>>,
}

impl EncounterSink for StreamKeeper {
    fn on_connected(&self, channel: ByteStream, _address: PeerAddress, _role: Role) {
        self.streams.lock().push(channel);
    }
}

impl StreamKeeper {
    fn take(&self) -> ByteStream {
        self.streams.lock().pop().expect("no stream handed over")
    }
}

fn keeping_node(
    medium: &RadioMedium,
    address: &str,
    radio_config: RadioConfig,
) -> (EncounterEngine, Arc<StreamKeeper>) {
    let radio = Arc::new(MemoryTransport::new(medium, address, None, radio_config).unwrap());
    let sink = Arc::new(StreamKeeper::default());
    let config = EngineConfig::default().with_min_reconnect_interval(Duration::from_secs(5));
    (EncounterEngine::new(config, radio, sink.clone()), sink)
}

/// Both ends of a torn-down link read EOF and refuse writes.
async fn assert_link_cut(mut near: ByteStream, mut far: ByteStream) {
    let mut buf = [0u8; 16];
    assert!(far.write_all(b"still here").await.is_err());
    assert_eq!(near.read(&mut buf).await.unwrap(), 0);
    assert!(near.write_all(b"me too").await.is_err());
    assert_eq!(far.read(&mut buf).await.unwrap(), 0);
}

fn scanner() -> RadioConfig {
    RadioConfig {
        scan_interval: Duration::from_millis(500),
        ..Default::default()
    }
}

fn listener() -> RadioConfig {
    RadioConfig {
        scanning: false,
        ..Default::default()
    }
}

async fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    for _ in 0..200 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test(start_paused = true)]
async fn test_two_nodes_meet_with_opposite_roles() {
    let medium = RadioMedium::new();
    let mut a = node(&medium, "AA", scanner());
    let mut b = node(&medium, "BB", listener());
    b.engine.start().unwrap();
    a.engine.start().unwrap();

    wait_until("both sides established", || {
        a.handle.state_of(&PeerAddress::from("BB")) == Some(ConnectionState::Established)
            && b.handle.state_of(&PeerAddress::from("AA")) == Some(ConnectionState::Established)
    })
    .await;

    assert_eq!(
        a.sink.met.lock().as_slice(),
        &[(PeerAddress::from("BB"), Role::Initiator)]
    );
    assert_eq!(
        b.sink.met.lock().as_slice(),
        &[(PeerAddress::from("AA"), Role::Acceptor)]
    );

    wait_until("greetings exchanged", || {
        a.sink.heard.lock().len() == 1 && b.sink.heard.lock().len() == 1
    })
    .await;
    assert_eq!(a.sink.heard.lock()[0], "hello AA\n");
    assert_eq!(b.sink.heard.lock()[0], "hello BB\n");

    // Further scans keep seeing BB but never open a second connection.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(a.handle.connection_count(), 1);
    assert_eq!(a.sink.met.lock().len(), 1);
    assert_eq!(medium.link_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_then_reconnect_after_backoff() {
    let medium = RadioMedium::new();
    let mut a = node(&medium, "AA", scanner());
    let mut b = node(&medium, "BB", listener());
    b.engine.start().unwrap();
    a.engine.start().unwrap();
    let mut activity = a.handle.subscribe();

    wait_until("first encounter", || a.handle.connection_count() == 1).await;

    medium.set_in_range(&PeerAddress::from("BB"), false);
    wait_until("both sides notice", || {
        a.handle.connection_count() == 0 && b.handle.connection_count() == 0
    })
    .await;

    medium.set_in_range(&PeerAddress::from("BB"), true);
    wait_until("second encounter", || a.sink.met.lock().len() == 2).await;
    assert_eq!(b.sink.met.lock().len(), 2);

    let mut rejected_recent = false;
    while let Ok(record) = activity.try_recv() {
        if let Activity::Rejected { reason, .. } = record.activity {
            rejected_recent |= reason == encounter_engine::RejectReason::RecentlyMet;
        }
    }
    assert!(rejected_recent, "expected backoff to hold off the reconnect");
}

#[tokio::test(start_paused = true)]
async fn test_stopping_one_engine_disconnects_the_other() {
    let medium = RadioMedium::new();
    let mut a = node(&medium, "AA", scanner());
    let mut b = node(&medium, "BB", listener());
    b.engine.start().unwrap();
    a.engine.start().unwrap();
    wait_until("encounter", || b.handle.connection_count() == 1).await;

    a.engine.stop();
    assert_eq!(a.handle.connection_count(), 0);
    wait_until("acceptor notices", || b.handle.connection_count() == 0).await;
    assert_eq!(medium.link_count(), 0);
    assert!(!a.radio.is_started());
}

#[tokio::test(start_paused = true)]
async fn test_start_refused_while_radio_off() {
    let medium = RadioMedium::new();
    let mut a = node(&medium, "AA", scanner());
    a.radio.set_enabled(false);
    assert!(a.engine.start().is_err());
    assert!(!a.engine.is_running());

    a.radio.set_enabled(true);
    a.radio.set_permitted(false);
    assert!(a.engine.start().is_err());

    a.radio.set_permitted(true);
    a.engine.start().unwrap();
    assert!(a.engine.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_three_nodes_each_pair_meets_once() {
    let medium = RadioMedium::new();
    let configs = [
        RadioConfig {
            scan_delay: Duration::ZERO,
            ..scanner()
        },
        RadioConfig {
            scan_delay: Duration::from_millis(170),
            ..scanner()
        },
        RadioConfig {
            scan_delay: Duration::from_millis(340),
            ..scanner()
        },
    ];
    let mut nodes: Vec<Node> = ["AA", "BB", "CC"]
        .iter()
        .zip(configs)
        .map(|(address, config)| node(&medium, address, config))
        .collect();
    for n in &mut nodes {
        n.engine.start().unwrap();
    }

    wait_until("full mesh", || {
        nodes.iter().all(|n| n.handle.connection_count() == 2)
    })
    .await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(medium.link_count(), 3);
    for n in &nodes {
        let met = n.sink.met.lock();
        assert_eq!(met.len(), 2, "{} met {:?}", n.radio.address(), *met);
    }
}

#[tokio::test(start_paused = true)]
async fn test_closing_a_connection_cuts_both_streams() {
    let medium = RadioMedium::new();
    let (mut a, a_sink) = keeping_node(&medium, "AA", scanner());
    let (mut b, b_sink) = keeping_node(&medium, "BB", listener());
    b.start().unwrap();
    a.start().unwrap();
    wait_until("encounter", || {
        a_sink.streams.lock().len() == 1 && b_sink.streams.lock().len() == 1
    })
    .await;

    let (initiator, acceptor) = (a_sink.take(), b_sink.take());
    assert!(a.close(&PeerAddress::from("BB")).unwrap());
    assert_link_cut(initiator, acceptor).await;
    wait_until("acceptor notices", || b.handle().connection_count() == 0).await;
}

#[tokio::test(start_paused = true)]
async fn test_stopping_an_engine_cuts_its_streams() {
    let medium = RadioMedium::new();
    let (mut a, a_sink) = keeping_node(&medium, "AA", scanner());
    let (mut b, b_sink) = keeping_node(&medium, "BB", listener());
    b.start().unwrap();
    a.start().unwrap();
    wait_until("encounter", || {
        a_sink.streams.lock().len() == 1 && b_sink.streams.lock().len() == 1
    })
    .await;

    let (initiator, acceptor) = (a_sink.take(), b_sink.take());
    b.stop();
    assert_link_cut(acceptor, initiator).await;
    assert_eq!(medium.link_count(), 0);
}
