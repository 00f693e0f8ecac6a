use std::{
    io,
    sync::{mpsc as std_mpsc, Arc, Mutex},
    time::Duration,
};

use chrono::NaiveDate;
use metrics_loader::{
    buf::RowBinaryReader,
    codec::{read_tagged_rows, TaggedRow},
    consumer::IndexStore,
    driver::{native::NativeEncoder, rowbin::RowBinaryEncoder, TaggedDriver},
    exporter::Transport,
    MetricRecord,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type Inserts = Arc<Mutex<Vec<Vec<u8>>>>;

#[derive(Debug, Clone, Default)]
struct RecordingTransport {
    inserts: Inserts,
}
impl Transport for RecordingTransport {
    fn send(&mut self, _format: &str, body: &[u8]) -> anyhow::Result<()> {
        self.inserts.lock().unwrap().push(body.to_vec());
        Ok(())
    }
}

/// Announces every send, then blocks until the gate is released.
struct GatedTransport {
    entered: mpsc::UnboundedSender<()>,
    gate: std_mpsc::Receiver<()>,
    inserts: Inserts,
}
impl Transport for GatedTransport {
    fn send(&mut self, _format: &str, body: &[u8]) -> anyhow::Result<()> {
        let _ = self.entered.send(());
        // a dropped sender opens the gate for good
        let _ = self.gate.recv();
        self.inserts.lock().unwrap().push(body.to_vec());
        Ok(())
    }
}

struct Gate {
    entered: mpsc::UnboundedReceiver<()>,
    release: std_mpsc::Sender<()>,
    inserts: Inserts,
}

fn gated() -> (GatedTransport, Gate) {
    let (entered_tx, entered_rx) = mpsc::unbounded_channel();
    let (release, gate) = std_mpsc::channel();
    let inserts = Inserts::default();
    let transport = GatedTransport {
        entered: entered_tx,
        gate,
        inserts: inserts.clone(),
    };
    let gate = Gate {
        entered: entered_rx,
        release,
        inserts,
    };
    (transport, gate)
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

fn record(i: usize) -> MetricRecord {
    MetricRecord::new(format!("requests;instance={i}"), date())
}

fn decode_all(inserts: &Inserts) -> Vec<TaggedRow> {
    let inserts = inserts.lock().unwrap();
    inserts
        .iter()
        .flat_map(|body| read_tagged_rows(&mut RowBinaryReader::new(io::Cursor::new(body))).unwrap())
        .collect()
}

#[tokio::test]
async fn stop_drains_every_queued_record() {
    let transport = RecordingTransport::default();
    let driver = TaggedDriver::new(RowBinaryEncoder::default(), transport.clone(), 256);
    let store = IndexStore::new(Some(Box::new(driver)), CancellationToken::new());

    let mut malformed = 0;
    for i in 0..500 {
        if i % 50 == 0 {
            store.push(MetricRecord::new(format!("broken;{i}"), date())).await;
            malformed += 1;
        } else {
            assert!(store.push(record(i)).await);
        }
    }
    let stats = store.stop().await;

    assert_eq!(stats.records + stats.rejected, 500);
    assert_eq!(stats.rejected, malformed);
    assert_eq!(stats.failed_flushes, 0);
    assert!(transport.inserts.lock().unwrap().len() > 1);

    let rows = decode_all(&transport.inserts);
    assert_eq!(rows.len(), stats.rows);
    assert_eq!(rows.len(), (500 - malformed) * 2);
    let mut paths: Vec<_> = rows.iter().map(|row| row.path.clone()).collect();
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), 500 - malformed);
}

#[tokio::test]
async fn full_queue_blocks_producers() {
    const CAPACITY: usize = 2;
    let (transport, mut gate) = gated();
    let driver = TaggedDriver::new(RowBinaryEncoder::default(), transport, 1);
    let store = IndexStore::with_capacity(Some(Box::new(driver)), CancellationToken::new(), CAPACITY);

    // the second record triggers a flush that parks the consumer at the gate
    store.push(record(0)).await;
    store.push(record(1)).await;
    gate.entered.recv().await.unwrap();

    let mut accepted = 2;
    let mut blocked = false;
    for i in 2..20 {
        match tokio::time::timeout(Duration::from_millis(200), store.push(record(i))).await {
            Ok(queued) => {
                assert!(queued);
                accepted += 1;
            }
            Err(_) => {
                blocked = true;
                break;
            }
        }
    }
    assert!(blocked, "producer never blocked");
    assert_eq!(accepted, 2 + CAPACITY);

    drop(gate.release);
    for i in 100..110 {
        assert!(store.push(record(i)).await);
        accepted += 1;
    }
    let stats = store.stop().await;

    assert_eq!(stats.records, accepted);
    assert_eq!(decode_all(&gate.inserts).len(), accepted * 2);
}

#[tokio::test]
async fn cancellation_discards_the_queue_but_flushes_the_batch() {
    let (transport, mut gate) = gated();
    let driver = TaggedDriver::new(RowBinaryEncoder::default(), transport, 1);
    let shutdown = CancellationToken::new();
    let store = IndexStore::new(Some(Box::new(driver)), shutdown.clone());

    store.push(record(0)).await;
    store.push(record(1)).await;
    gate.entered.recv().await.unwrap();

    // still queued when the token is cancelled
    store.push(record(2)).await;
    store.push(record(3)).await;
    shutdown.cancel();
    drop(gate.release);

    let stats = store.interrupt().await;
    assert_eq!(stats.records, 2);
    let rows = decode_all(&gate.inserts);
    let paths: Vec<_> = rows.iter().map(|row| row.path.as_str()).collect();
    assert_eq!(
        paths,
        [
            "requests?instance=0",
            "requests?instance=0",
            "requests?instance=1",
            "requests?instance=1"
        ]
    );
}

#[tokio::test]
async fn native_driver_runs_through_the_pipeline() {
    #[derive(Clone, Default)]
    struct FormatRecorder {
        formats: Arc<Mutex<Vec<String>>>,
    }
    impl Transport for FormatRecorder {
        fn send(&mut self, format: &str, _body: &[u8]) -> anyhow::Result<()> {
            self.formats.lock().unwrap().push(format.to_owned());
            Ok(())
        }
    }

    let transport = FormatRecorder::default();
    let driver = TaggedDriver::new(NativeEncoder::default(), transport.clone(), 1024);
    let store = IndexStore::new(Some(Box::new(driver)), CancellationToken::new());
    for i in 0..10 {
        store.push(record(i)).await;
    }
    store.flush_init().await;
    store.push(record(10)).await;
    let stats = store.stop().await;

    assert_eq!(stats.records, 11);
    assert_eq!(stats.rows, 22);
    assert_eq!(*transport.formats.lock().unwrap(), ["Native", "Native"]);
}
