//! Fetch response reader
//!
//! Parses one fetch response frame against the work unit that requested it.
//! Records are accepted only when they match the unit's topic and partition
//! and their offset lies inside `[offset, offset + len)`; Kafka may return
//! adjacent records because of protocol framing, and those are discarded
//! silently. Broker error codes and undecodable batches accumulate as fetch
//! errors without aborting the unit.

use indexmap::IndexMap;
use kafka_protocol::records::{Compression, RecordBatchDecoder};
use tracing::debug;

type NoopDecompressor =
    fn(&mut bytes::Bytes, Compression) -> anyhow::Result<std::io::Cursor<&'static [u8]>>;

use super::wire;
use crate::error::Result;
use crate::models::{ConsumedMessage, FetchError, WorkUnit};

/// Result of parsing one fetch response for one work unit
#[derive(Debug, Default)]
pub struct FetchParse {
    /// Accepted records, in arrival order, deduplicated by offset
    pub messages: Vec<ConsumedMessage>,

    /// Fetch-level errors observed while reading the response
    pub errors: Vec<FetchError>,
}

/// Parse a fetch response frame and filter it to the unit's window
///
/// An empty frame parses to no messages; that signals "no progress" to the
/// worker without being an error. A frame whose envelope cannot be decoded
/// at all is a hard error and fails the unit.
///
/// Duplicate offsets within one response overwrite earlier arrivals. The
/// upstream planner relies on each fetch carrying one logically-latest
/// record per offset it covers, so the last record wins.
pub fn read_fetch(unit: &WorkUnit, frame: &[u8]) -> Result<FetchParse> {
    if frame.is_empty() {
        return Ok(FetchParse::default());
    }

    let response = wire::decode_fetch_response(frame)?;

    let mut accepted: IndexMap<i64, ConsumedMessage> = IndexMap::new();
    let mut errors = Vec::new();

    for topic_response in &response.responses {
        let topic_name = topic_response.topic.as_str();

        for partition in &topic_response.partitions {
            let partition_index = partition.partition_index;

            if partition.error_code != 0 {
                errors.push(FetchError::Broker {
                    topic: topic_name.to_string(),
                    partition: partition_index,
                    code: partition.error_code,
                });
            }

            // Records for another topic or partition are discarded without
            // decoding; nothing in them can fall inside the unit's window.
            if topic_name != unit.topic || partition_index != unit.partition {
                continue;
            }

            let Some(records) = &partition.records else {
                continue;
            };
            if records.is_empty() {
                continue;
            }

            let mut cursor = std::io::Cursor::new(records.as_ref());
            while (cursor.position() as usize) < records.len() {
                match RecordBatchDecoder::decode(&mut cursor, None::<NoopDecompressor>) {
                    Ok(batch) => {
                        for record in batch {
                            if !unit.contains_offset(record.offset) {
                                continue;
                            }
                            accepted.insert(
                                record.offset,
                                ConsumedMessage {
                                    topic: topic_name.to_string(),
                                    partition: partition_index,
                                    offset: record.offset,
                                    payload: record
                                        .value
                                        .map(|v| v.to_vec())
                                        .unwrap_or_default(),
                                },
                            );
                        }
                    }
                    Err(e) => {
                        errors.push(FetchError::Decode {
                            topic: topic_name.to_string(),
                            partition: partition_index,
                            detail: e.to_string(),
                        });
                        // The rest of this partition's buffer cannot be
                        // trusted after a failed batch decode.
                        break;
                    }
                }
            }
        }
    }

    debug!(
        topic = %unit.topic,
        partition = unit.partition,
        offset = unit.offset,
        accepted = accepted.len(),
        errors = errors.len(),
        "Parsed fetch response"
    );

    Ok(FetchParse {
        messages: accepted.into_values().collect(),
        errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BrokerEndpoint;
    use crate::test_utils::{encode_fetch_response_frame, PartitionRecords};

    fn unit(topic: &str, partition: i32, offset: i64, len: i64) -> WorkUnit {
        WorkUnit {
            producer: BrokerEndpoint::new("broker1", 9092),
            topic: topic.to_string(),
            partition,
            offset,
            len,
        }
    }

    fn records(offsets: &[i64]) -> Vec<(i64, Vec<u8>)> {
        offsets
            .iter()
            .map(|o| (*o, format!("payload-{}", o).into_bytes()))
            .collect()
    }

    #[test]
    fn test_accepts_in_window_records() {
        let unit = unit("t", 0, 0, 10);
        let frame = encode_fetch_response_frame(&[PartitionRecords {
            topic: "t".to_string(),
            partition: 0,
            error_code: 0,
            records: records(&[0, 1, 2]),
        }]);

        let parse = read_fetch(&unit, &frame).unwrap();
        assert_eq!(parse.messages.len(), 3);
        assert!(parse.errors.is_empty());
        assert_eq!(parse.messages[0].offset, 0);
        assert_eq!(parse.messages[2].offset, 2);
        assert_eq!(parse.messages[1].payload, b"payload-1");
    }

    #[test]
    fn test_filters_records_beyond_window() {
        // Window [0, 10); broker returned 8..=11
        let unit = unit("t", 0, 0, 10);
        let frame = encode_fetch_response_frame(&[PartitionRecords {
            topic: "t".to_string(),
            partition: 0,
            error_code: 0,
            records: records(&[8, 9, 10, 11]),
        }]);

        let parse = read_fetch(&unit, &frame).unwrap();
        let offsets: Vec<i64> = parse.messages.iter().map(|m| m.offset).collect();
        assert_eq!(offsets, vec![8, 9]);
    }

    #[test]
    fn test_filters_records_below_window() {
        let unit = unit("t", 0, 100, 10);
        let frame = encode_fetch_response_frame(&[PartitionRecords {
            topic: "t".to_string(),
            partition: 0,
            error_code: 0,
            records: records(&[98, 99, 100, 101]),
        }]);

        let parse = read_fetch(&unit, &frame).unwrap();
        let offsets: Vec<i64> = parse.messages.iter().map(|m| m.offset).collect();
        assert_eq!(offsets, vec![100, 101]);
    }

    #[test]
    fn test_discards_foreign_topic_and_partition() {
        let unit = unit("t", 0, 0, 10);
        let frame = encode_fetch_response_frame(&[
            PartitionRecords {
                topic: "other".to_string(),
                partition: 0,
                error_code: 0,
                records: records(&[1]),
            },
            PartitionRecords {
                topic: "t".to_string(),
                partition: 5,
                error_code: 0,
                records: records(&[2]),
            },
        ]);

        let parse = read_fetch(&unit, &frame).unwrap();
        assert!(parse.messages.is_empty());
        assert!(parse.errors.is_empty());
    }

    #[test]
    fn test_duplicate_offsets_collapse_to_last_arrival() {
        // Pin the dedup behavior: within one fetch, a repeated offset
        // overwrites the earlier record.
        let unit = unit("t", 0, 0, 10);
        let frame = encode_fetch_response_frame(&[PartitionRecords {
            topic: "t".to_string(),
            partition: 0,
            error_code: 0,
            records: vec![
                (3, b"first".to_vec()),
                (4, b"other".to_vec()),
                (3, b"second".to_vec()),
            ],
        }]);

        let parse = read_fetch(&unit, &frame).unwrap();
        assert_eq!(parse.messages.len(), 2);
        // Arrival order is preserved: offset 3 was seen first
        assert_eq!(parse.messages[0].offset, 3);
        assert_eq!(parse.messages[0].payload, b"second");
        assert_eq!(parse.messages[1].offset, 4);
    }

    #[test]
    fn test_broker_error_codes_accumulate_without_aborting() {
        let unit = unit("t", 0, 0, 10);
        let frame = encode_fetch_response_frame(&[
            PartitionRecords {
                topic: "t".to_string(),
                partition: 1,
                error_code: 6,
                records: vec![],
            },
            PartitionRecords {
                topic: "t".to_string(),
                partition: 0,
                error_code: 0,
                records: records(&[0]),
            },
        ]);

        let parse = read_fetch(&unit, &frame).unwrap();
        assert_eq!(parse.messages.len(), 1);
        assert_eq!(
            parse.errors,
            vec![FetchError::Broker {
                topic: "t".to_string(),
                partition: 1,
                code: 6,
            }]
        );
    }

    #[test]
    fn test_empty_frame_is_no_progress() {
        let unit = unit("t", 0, 0, 10);
        let parse = read_fetch(&unit, &[]).unwrap();
        assert!(parse.messages.is_empty());
        assert!(parse.errors.is_empty());
    }

    #[test]
    fn test_undecodable_frame_is_an_error() {
        let unit = unit("t", 0, 0, 10);
        assert!(read_fetch(&unit, b"garbage").is_err());
    }
}
