//! Test utilities for FetchForge
//!
//! This module provides mock implementations and protocol helpers for
//! testing: an in-memory work queue, fetch response frame encoders, and a
//! scripted TCP broker that speaks the framed fetch protocol.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use kafka_protocol::messages::fetch_response::{
    FetchResponse, FetchableTopicResponse, PartitionData,
};
use kafka_protocol::messages::{ApiKey, ResponseHeader, TopicName};
use kafka_protocol::protocol::{Encodable, StrBytes};
use kafka_protocol::records::{
    Compression, Record, RecordBatchEncoder, RecordEncodeOptions, TimestampType,
};
type NoopCompressor =
    fn(&mut BytesMut, &mut BytesMut, kafka_protocol::records::Compression) -> anyhow::Result<()>;

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::kafka::wire::FETCH_API_VERSION;
use crate::models::{BrokerEndpoint, WorkOutcome, WorkUnit};
use crate::queue::{decode_outcome, encode_outcome, encode_unit, ClaimedUnit, UnitQueue};

// ============================================================================
// Mock work queue
// ============================================================================

/// In-memory implementation of the three-list work queue for testing
///
/// List order mirrors Redis: publishes land at the head, claims pop from the
/// tail, settles remove one matching element from the tail side.
pub struct MockUnitQueue {
    work: Mutex<VecDeque<String>>,
    working: Mutex<Vec<String>>,
    complete: Mutex<Vec<String>>,
    fail_next: Mutex<bool>,
    error_message: Mutex<Option<String>>,
}

impl Default for MockUnitQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MockUnitQueue {
    /// Create an empty mock queue
    pub fn new() -> Self {
        Self {
            work: Mutex::new(VecDeque::new()),
            working: Mutex::new(Vec::new()),
            complete: Mutex::new(Vec::new()),
            fail_next: Mutex::new(false),
            error_message: Mutex::new(None),
        }
    }

    /// Configure the mock to fail on the next operation
    pub fn fail_next_operation(&self, error_message: &str) {
        *self.fail_next.lock().unwrap() = true;
        *self.error_message.lock().unwrap() = Some(error_message.to_string());
    }

    /// Number of units waiting on the work list
    pub fn work_len(&self) -> usize {
        self.work.lock().unwrap().len()
    }

    /// Number of claimed but unsettled units
    pub fn working_len(&self) -> usize {
        self.working.lock().unwrap().len()
    }

    /// Decoded outcomes on the complete list, newest first
    pub fn outcomes(&self) -> Vec<WorkOutcome> {
        self.complete
            .lock()
            .unwrap()
            .iter()
            .map(|raw| decode_outcome(raw).expect("complete entry should decode"))
            .collect()
    }

    fn check_failure(&self) -> Result<()> {
        let mut fail = self.fail_next.lock().unwrap();
        if *fail {
            *fail = false;
            let msg = self
                .error_message
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| "Mock failure".to_string());
            return Err(crate::error::Error::queue(msg));
        }
        Ok(())
    }
}

#[async_trait]
impl UnitQueue for MockUnitQueue {
    async fn claim(&self) -> Result<Option<ClaimedUnit>> {
        self.check_failure()?;

        let raw = self.work.lock().unwrap().pop_back();
        match raw {
            None => {
                // Emulate the bounded blocking wait without busy-spinning
                // the dispatcher.
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(None)
            }
            Some(raw) => {
                self.working.lock().unwrap().push(raw.clone());
                let unit = crate::queue::decode_unit(&raw)?;
                Ok(Some(ClaimedUnit { unit, raw }))
            }
        }
    }

    async fn settle(&self, claimed: &ClaimedUnit, outcome: &WorkOutcome) -> Result<()> {
        self.check_failure()?;

        let payload = encode_outcome(outcome)?;
        self.complete.lock().unwrap().insert(0, payload);

        // Remove exactly one occurrence from the tail side; a second settle
        // of the same unit is a no-op here.
        let mut working = self.working.lock().unwrap();
        if let Some(pos) = working.iter().rposition(|raw| raw == &claimed.raw) {
            working.remove(pos);
        }
        Ok(())
    }

    async fn publish(&self, unit: &WorkUnit) -> Result<()> {
        self.check_failure()?;
        unit.validate()?;

        let payload = encode_unit(unit)?;
        self.work.lock().unwrap().push_front(payload);
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        self.check_failure()
    }
}

// ============================================================================
// Fetch response encoding
// ============================================================================

/// Records for one partition of a scripted fetch response
#[derive(Debug, Clone)]
pub struct PartitionRecords {
    /// Topic name
    pub topic: String,
    /// Partition index
    pub partition: i32,
    /// Broker-reported error code (0 means none)
    pub error_code: i16,
    /// `(offset, payload)` pairs encoded as one record batch
    pub records: Vec<(i64, Vec<u8>)>,
}

/// Encode a complete fetch response frame (header + body, no length prefix)
pub fn encode_fetch_response_frame(partitions: &[PartitionRecords]) -> Vec<u8> {
    let mut response = FetchResponse::default();

    for part in partitions {
        let mut partition_data = PartitionData::default();
        partition_data.partition_index = part.partition;
        partition_data.error_code = part.error_code;
        partition_data.high_watermark = part
            .records
            .iter()
            .map(|(offset, _)| offset + 1)
            .max()
            .unwrap_or(0);
        partition_data.log_start_offset = 0;
        partition_data.records = Some(encode_record_batch(&part.records));

        // Append to an existing topic response when the topic repeats
        match response
            .responses
            .iter_mut()
            .find(|r| r.topic.as_str() == part.topic)
        {
            Some(topic_response) => topic_response.partitions.push(partition_data),
            None => {
                let mut topic_response = FetchableTopicResponse::default();
                topic_response.topic = TopicName(StrBytes::from_string(part.topic.clone()));
                topic_response.partitions = vec![partition_data];
                response.responses.push(topic_response);
            }
        }
    }

    let mut buf = BytesMut::new();
    let mut header = ResponseHeader::default();
    header.correlation_id = 1;
    header
        .encode(
            &mut buf,
            ApiKey::FetchKey.response_header_version(FETCH_API_VERSION),
        )
        .expect("response header should encode");
    response
        .encode(&mut buf, FETCH_API_VERSION)
        .expect("fetch response should encode");
    buf.to_vec()
}

/// Encode `(offset, payload)` pairs as a single record batch
fn encode_record_batch(records: &[(i64, Vec<u8>)]) -> Bytes {
    if records.is_empty() {
        return Bytes::new();
    }

    let kafka_records: Vec<Record> = records
        .iter()
        .map(|(offset, payload)| Record {
            transactional: false,
            control: false,
            partition_leader_epoch: 0,
            producer_id: -1,
            producer_epoch: -1,
            timestamp_type: TimestampType::Creation,
            offset: *offset,
            sequence: *offset as i32,
            timestamp: 0,
            key: None,
            value: Some(Bytes::from(payload.clone())),
            headers: Default::default(),
        })
        .collect();

    let mut encoded = BytesMut::new();
    RecordBatchEncoder::encode(
        &mut encoded,
        kafka_records.iter(),
        &RecordEncodeOptions {
            version: 2,
            compression: Compression::None,
        },
        None::<NoopCompressor>,
    )
    .expect("record batch should encode");
    encoded.freeze()
}

// ============================================================================
// Scripted mock broker
// ============================================================================

/// One step of a mock broker's behavior
#[derive(Debug, Clone)]
pub enum BrokerScript {
    /// Read one request, reply with these partitions
    Respond(Vec<PartitionRecords>),

    /// Read one request, reply after a delay
    RespondAfter(Duration, Vec<PartitionRecords>),

    /// Read one request and never answer it
    Ignore,

    /// Read one request, then drop the connection
    Hangup,

    /// Send a frame immediately, without waiting for a request
    Unsolicited(Vec<PartitionRecords>),
}

/// A TCP listener that plays a script of fetch responses
pub struct MockBroker {
    /// Endpoint work units should target
    pub endpoint: BrokerEndpoint,
    handle: JoinHandle<()>,
}

impl MockBroker {
    /// Bind an ephemeral port and start serving the script
    pub async fn start(script: Vec<BrokerScript>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("mock broker should bind");
        let addr = listener.local_addr().expect("listener has an address");
        let endpoint = BrokerEndpoint::new("127.0.0.1", addr.port());

        let handle = tokio::spawn(run_broker(listener, VecDeque::from(script)));

        Self { endpoint, handle }
    }
}

impl Drop for MockBroker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn run_broker(listener: TcpListener, script: VecDeque<BrokerScript>) {
    // Connections are served concurrently (each worker opens its own), all
    // drawing steps from one shared script.
    let script = std::sync::Arc::new(tokio::sync::Mutex::new(script));

    loop {
        let Ok((socket, _)) = listener.accept().await else {
            return;
        };
        tokio::spawn(serve_connection(socket, std::sync::Arc::clone(&script)));
    }
}

async fn serve_connection(
    mut socket: TcpStream,
    script: std::sync::Arc<tokio::sync::Mutex<VecDeque<BrokerScript>>>,
) {
    loop {
        let step = script.lock().await.pop_front();
        match step {
            None => {
                // Script exhausted: keep the connection open and swallow
                // whatever else arrives.
                let mut buf = vec![0u8; 4096];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(_) => {}
                    }
                }
            }
            Some(BrokerScript::Unsolicited(partitions)) => {
                if write_response(&mut socket, &partitions).await.is_err() {
                    return;
                }
            }
            Some(step) => {
                if read_request(&mut socket).await.is_err() {
                    return;
                }
                match step {
                    BrokerScript::Respond(partitions) => {
                        if write_response(&mut socket, &partitions).await.is_err() {
                            return;
                        }
                    }
                    BrokerScript::RespondAfter(delay, partitions) => {
                        tokio::time::sleep(delay).await;
                        if write_response(&mut socket, &partitions).await.is_err() {
                            return;
                        }
                    }
                    BrokerScript::Ignore => {}
                    BrokerScript::Hangup => return,
                    BrokerScript::Unsolicited(_) => unreachable!("handled above"),
                }
            }
        }
    }
}

async fn read_request(socket: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let len = socket.read_i32().await?;
    let mut buf = vec![0u8; len as usize];
    socket.read_exact(&mut buf).await?;
    Ok(buf)
}

async fn write_response(
    socket: &mut TcpStream,
    partitions: &[PartitionRecords],
) -> std::io::Result<()> {
    let frame = encode_fetch_response_frame(partitions);
    socket.write_i32(frame.len() as i32).await?;
    socket.write_all(&frame).await?;
    socket.flush().await
}

/// Build a work unit pointing at a broker endpoint
pub fn unit_for(endpoint: &BrokerEndpoint, topic: &str, offset: i64, len: i64) -> WorkUnit {
    WorkUnit {
        producer: endpoint.clone(),
        topic: topic.to_string(),
        partition: 0,
        offset,
        len,
    }
}
