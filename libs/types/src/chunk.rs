//! Chunk envelopes for bulk historical responses
//!
//! A historical response is split into consecutively numbered chunks
//! (1-indexed). Every chunk carries the total chunk count so consumers can
//! detect gaps; consumers order by the embedded index, never by arrival.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::ChunkError;
use crate::sample::{DataType, MarketSample};

/// Default number of samples per chunk
pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Metadata attached to every chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub ticker: String,
    pub timeframe: String,
    pub days: u32,
    /// 1-indexed chunk number
    pub chunk: u32,
    pub total_chunks: u32,
    pub data_type: DataType,
}

/// One chunk of a historical response: `{data, metadata}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalChunk {
    pub data: Vec<MarketSample>,
    pub metadata: ChunkMetadata,
}

impl HistoricalChunk {
    /// Grouping key shared by every chunk of one response
    pub fn series_key(&self) -> (String, String, u32) {
        (
            self.metadata.ticker.clone(),
            self.metadata.timeframe.clone(),
            self.metadata.days,
        )
    }
}

/// Split an ordered sample sequence into chunks of at most `chunk_size`.
///
/// A sequence at or under the chunk size yields a single chunk (1 of 1).
pub fn split_into_chunks(
    samples: &[MarketSample],
    chunk_size: usize,
    ticker: &str,
    timeframe: &str,
    days: u32,
) -> Result<Vec<HistoricalChunk>, ChunkError> {
    if chunk_size == 0 {
        return Err(ChunkError::ZeroChunkSize);
    }

    let slices: Vec<&[MarketSample]> = if samples.is_empty() {
        vec![samples]
    } else {
        samples.chunks(chunk_size).collect()
    };
    let total = slices.len() as u32;

    Ok(slices
        .into_iter()
        .enumerate()
        .map(|(i, slice)| HistoricalChunk {
            data: slice.to_vec(),
            metadata: ChunkMetadata {
                ticker: ticker.to_string(),
                timeframe: timeframe.to_string(),
                days,
                chunk: i as u32 + 1,
                total_chunks: total,
                data_type: DataType::Historical,
            },
        })
        .collect())
}

/// Reassemble a complete set of chunks, in any arrival order.
pub fn reassemble(chunks: Vec<HistoricalChunk>) -> Result<Vec<MarketSample>, ChunkError> {
    let mut assembler = ChunkAssembler::default();
    for chunk in chunks {
        assembler.accept(chunk)?;
    }
    assembler.finish()
}

/// Incremental reassembly for consumers receiving chunks one at a time
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    total: Option<u32>,
    received: BTreeMap<u32, Vec<MarketSample>>,
}

impl ChunkAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chunk. Returns `true` once every chunk has arrived.
    pub fn accept(&mut self, chunk: HistoricalChunk) -> Result<bool, ChunkError> {
        let index = chunk.metadata.chunk;
        let declared = chunk.metadata.total_chunks;

        let expected = *self.total.get_or_insert(declared);
        if declared != expected {
            return Err(ChunkError::InconsistentTotal {
                index,
                declared,
                expected,
            });
        }
        if index == 0 || index > expected {
            return Err(ChunkError::OutOfRange {
                index,
                total: expected,
            });
        }
        if self.received.contains_key(&index) {
            return Err(ChunkError::Duplicate { index });
        }

        self.received.insert(index, chunk.data);
        Ok(self.is_complete())
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.total, Some(total) if self.received.len() as u32 == total)
    }

    /// Chunk indices not yet received
    pub fn missing(&self) -> Vec<u32> {
        match self.total {
            Some(total) => (1..=total)
                .filter(|i| !self.received.contains_key(i))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Concatenate all chunks ordered by index.
    pub fn finish(self) -> Result<Vec<MarketSample>, ChunkError> {
        let total = self.total.ok_or(ChunkError::Empty)?;
        if let Some(index) = (1..=total).find(|i| !self.received.contains_key(i)) {
            return Err(ChunkError::Missing { index, total });
        }
        Ok(self.received.into_values().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;
    use rust_decimal::Decimal;

    fn samples(n: usize) -> Vec<MarketSample> {
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| MarketSample {
                ticker: "SPY".to_string(),
                timestamp: start + Duration::days(i as i64),
                price: Decimal::from(100 + i as i64),
                open: Decimal::from(100),
                high: Decimal::from(101),
                low: Decimal::from(99),
                close: Decimal::from(100 + i as i64),
                volume: i as i64,
                vwap: None,
                trade_count: None,
                interval: "1day".to_string(),
                source: "Alpaca".to_string(),
                data_type: DataType::Historical,
            })
            .collect()
    }

    #[test]
    fn test_900_samples_make_9_chunks() {
        let chunks = split_into_chunks(&samples(900), 100, "SPY", "1day", 900).unwrap();
        assert_eq!(chunks.len(), 9);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.metadata.total_chunks, 9);
            assert_eq!(chunk.metadata.chunk, i as u32 + 1);
            assert_eq!(chunk.data.len(), 100);
        }
    }

    #[test]
    fn test_small_sequence_single_chunk() {
        let chunks = split_into_chunks(&samples(100), 100, "SPY", "1day", 100).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata.chunk, 1);
        assert_eq!(chunks[0].metadata.total_chunks, 1);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert_eq!(
            split_into_chunks(&samples(3), 0, "SPY", "1day", 3).unwrap_err(),
            ChunkError::ZeroChunkSize
        );
    }

    #[test]
    fn test_missing_chunk_detected() {
        let mut chunks = split_into_chunks(&samples(250), 100, "SPY", "1day", 250).unwrap();
        chunks.remove(1);

        let mut assembler = ChunkAssembler::new();
        for c in chunks {
            assert!(!assembler.accept(c).unwrap());
        }
        assert_eq!(assembler.missing(), vec![2]);
        assert_eq!(
            assembler.finish().unwrap_err(),
            ChunkError::Missing { index: 2, total: 3 }
        );
    }

    #[test]
    fn test_duplicate_chunk_rejected() {
        let chunks = split_into_chunks(&samples(150), 100, "SPY", "1day", 150).unwrap();
        let mut assembler = ChunkAssembler::new();
        assembler.accept(chunks[0].clone()).unwrap();
        assert_eq!(
            assembler.accept(chunks[0].clone()).unwrap_err(),
            ChunkError::Duplicate { index: 1 }
        );
    }

    #[test]
    fn test_reassemble_empty_input() {
        assert_eq!(reassemble(Vec::new()).unwrap_err(), ChunkError::Empty);
    }

    #[test]
    fn test_envelope_wire_shape() {
        let chunks = split_into_chunks(&samples(1), 100, "SPY", "1day", 1).unwrap();
        let json = serde_json::to_value(&chunks[0]).unwrap();
        assert_eq!(json["metadata"]["chunk"], 1);
        assert_eq!(json["metadata"]["total_chunks"], 1);
        assert_eq!(json["metadata"]["data_type"], "historical");
        assert_eq!(json["data"].as_array().unwrap().len(), 1);
    }

    proptest! {
        #[test]
        fn prop_round_trip_in_any_order(
            len in 1usize..700,
            chunk_size in 1usize..150,
            seed in any::<u64>(),
        ) {
            let original = samples(len);
            let mut chunks = split_into_chunks(&original, chunk_size, "SPY", "1day", len as u32).unwrap();
            let expected_total = (len + chunk_size - 1) / chunk_size;
            prop_assert_eq!(chunks.len(), expected_total);

            // deterministic shuffle to simulate redelivery reordering
            let n = chunks.len();
            for i in (1..n).rev() {
                let j = (seed as usize).wrapping_mul(i + 7) % (i + 1);
                chunks.swap(i, j);
            }

            prop_assert_eq!(reassemble(chunks).unwrap(), original);
        }
    }
}
