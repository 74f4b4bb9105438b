//! Framed Kafka wire codec for fetch traffic
//!
//! Every request and response on a broker connection is a 4-byte big-endian
//! length followed by the message. Requests carry a `RequestHeader`, replies
//! a `ResponseHeader`, both at the pinned fetch API version.

use bytes::{Bytes, BytesMut};
use kafka_protocol::messages::fetch_request::{FetchPartition, FetchRequest, FetchTopic};
use kafka_protocol::messages::fetch_response::FetchResponse;
use kafka_protocol::messages::{ApiKey, RequestHeader, ResponseHeader, TopicName};
use kafka_protocol::protocol::{Decodable, Encodable, StrBytes};

use crate::error::{Error, Result};

/// Fetch API version this client speaks
pub const FETCH_API_VERSION: i16 = 4;

/// How long the broker may hold a fetch open waiting for data, in ms
const FETCH_MAX_WAIT_MS: i32 = 500;

/// Per-partition fetch size cap
const PARTITION_MAX_BYTES: i32 = 1024 * 1024;

/// Whole-response fetch size cap
const FETCH_MAX_BYTES: i32 = 50 * 1024 * 1024;

/// Encode a single-partition fetch request frame (without length prefix)
pub fn encode_fetch_request(
    correlation_id: i32,
    client_id: &str,
    topic: &str,
    partition: i32,
    offset: i64,
) -> Result<Bytes> {
    let mut header = RequestHeader::default();
    header.request_api_key = ApiKey::FetchKey as i16;
    header.request_api_version = FETCH_API_VERSION;
    header.correlation_id = correlation_id;
    header.client_id = Some(StrBytes::from_string(client_id.to_string()));

    let mut fetch_partition = FetchPartition::default();
    fetch_partition.partition = partition;
    fetch_partition.current_leader_epoch = -1;
    fetch_partition.fetch_offset = offset;
    fetch_partition.log_start_offset = -1;
    fetch_partition.partition_max_bytes = PARTITION_MAX_BYTES;

    let mut fetch_topic = FetchTopic::default();
    fetch_topic.topic = TopicName(StrBytes::from_string(topic.to_string()));
    fetch_topic.partitions = vec![fetch_partition];

    let mut request = FetchRequest::default();
    request.max_wait_ms = FETCH_MAX_WAIT_MS;
    request.min_bytes = 1;
    request.max_bytes = FETCH_MAX_BYTES;
    request.isolation_level = 0;
    request.session_id = 0;
    request.session_epoch = -1;
    request.topics.push(fetch_topic);
    request.rack_id = StrBytes::from_static_str("");

    let mut buf = BytesMut::new();
    header
        .encode(
            &mut buf,
            ApiKey::FetchKey.request_header_version(FETCH_API_VERSION),
        )
        .map_err(|e| Error::protocol(format!("Failed to encode request header: {}", e)))?;
    request
        .encode(&mut buf, FETCH_API_VERSION)
        .map_err(|e| Error::protocol(format!("Failed to encode fetch request: {}", e)))?;

    Ok(buf.freeze())
}

/// Decode a fetch response frame (length prefix already stripped)
///
/// The response header is consumed and discarded; correlation is not needed
/// because a connection has at most one request in flight.
pub fn decode_fetch_response(frame: &[u8]) -> Result<FetchResponse> {
    let mut cursor = std::io::Cursor::new(frame);

    let header_version = ApiKey::FetchKey.response_header_version(FETCH_API_VERSION);
    ResponseHeader::decode(&mut cursor, header_version)
        .map_err(|e| Error::protocol(format!("Failed to decode response header: {}", e)))?;

    FetchResponse::decode(&mut cursor, FETCH_API_VERSION)
        .map_err(|e| Error::protocol(format!("Failed to decode fetch response: {}", e)))
}
