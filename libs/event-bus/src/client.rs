//! Event bus client
//!
//! Typed publish/subscribe over a `Broker`. Construction provisions every
//! stream in the topology table with bounded, linearly backed-off retries;
//! a stream that cannot be provisioned makes construction fail.

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info, warn};

use types::chunk::HistoricalChunk;
use types::sample::MarketSample;
use types::signal::{HistoricalRequest, Recommendation, Signal};

use crate::broker::{Broker, PublishReceipt, StreamOutcome, SubscribeOptions, Subscription};
use crate::config::BusConfig;
use crate::error::BusError;
use crate::memory::MemoryBroker;
use crate::nats::NatsBroker;
use crate::streams::{stream_table, StreamDescriptor, REQUESTS};
use crate::subjects;

#[derive(Clone)]
pub struct EventBus {
    broker: Arc<dyn Broker>,
    streams: Arc<Vec<StreamDescriptor>>,
}

impl EventBus {
    /// Connect to the configured broker and provision streams.
    pub async fn connect(config: &BusConfig) -> Result<Self, BusError> {
        let broker: Arc<dyn Broker> = if config.is_memory() {
            info!("Using in-process broker");
            Arc::new(MemoryBroker::new())
        } else {
            Arc::new(NatsBroker::connect(&config.nats_options()).await?)
        };
        Self::with_broker(broker, config).await
    }

    /// Wrap an existing broker and provision streams.
    pub async fn with_broker(broker: Arc<dyn Broker>, config: &BusConfig) -> Result<Self, BusError> {
        let streams = stream_table();
        for descriptor in &streams {
            provision(broker.as_ref(), descriptor, config).await?;
        }
        info!(streams = streams.len(), "Stream topology provisioned");

        Ok(Self {
            broker,
            streams: Arc::new(streams),
        })
    }

    pub fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Serialize and publish to `subject`.
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        subject: &str,
        payload: &T,
    ) -> Result<PublishReceipt, BusError> {
        let bytes = Bytes::from(serde_json::to_vec(payload)?);
        let receipt = self.broker.publish(subject, bytes).await?;
        debug!(subject, stream = %receipt.stream, seq = receipt.sequence, "Published");
        Ok(receipt)
    }

    /// Publish and fail if the broker stored the message anywhere but `stream`.
    pub async fn publish_to_stream<T: Serialize + ?Sized>(
        &self,
        subject: &str,
        stream: &str,
        payload: &T,
    ) -> Result<PublishReceipt, BusError> {
        let receipt = self.publish(subject, payload).await?;
        if receipt.stream != stream {
            return Err(BusError::StreamMismatch {
                subject: subject.to_string(),
                expected: stream.to_string(),
                actual: receipt.stream,
            });
        }
        Ok(receipt)
    }

    pub async fn publish_live(&self, sample: &MarketSample) -> Result<PublishReceipt, BusError> {
        self.publish(&subjects::live(&sample.ticker), sample).await
    }

    pub async fn publish_daily(&self, sample: &MarketSample) -> Result<PublishReceipt, BusError> {
        self.publish(&subjects::daily(&sample.ticker), sample).await
    }

    pub async fn publish_historical_chunk(
        &self,
        chunk: &HistoricalChunk,
    ) -> Result<PublishReceipt, BusError> {
        let m = &chunk.metadata;
        let subject = subjects::historical_data(&m.ticker, &m.timeframe, m.days);
        self.publish(&subject, chunk).await
    }

    pub async fn publish_signal(&self, signal: &Signal) -> Result<PublishReceipt, BusError> {
        self.publish(&subjects::signals(&signal.ticker), signal).await
    }

    pub async fn publish_recommendation(
        &self,
        recommendation: &Recommendation,
    ) -> Result<PublishReceipt, BusError> {
        self.publish(&subjects::recommendations(&recommendation.ticker), recommendation)
            .await
    }

    /// Publish a historical request into the work-queue request stream.
    pub async fn request_historical(
        &self,
        request: &HistoricalRequest,
    ) -> Result<PublishReceipt, BusError> {
        let subject =
            subjects::historical_request(&request.ticker, &request.timeframe, request.days);
        self.publish_to_stream(&subject, REQUESTS, request).await
    }

    pub async fn subscribe(
        &self,
        subject: &str,
        options: SubscribeOptions,
    ) -> Result<Subscription, BusError> {
        if !subjects::is_valid(subject) {
            return Err(BusError::Subscribe {
                subject: subject.to_string(),
                message: "malformed subject".to_string(),
            });
        }
        let sub = self.broker.subscribe(subject, options.clone()).await?;
        info!(subject, durable = ?options.durable, ack = ?options.ack_mode, "Subscribed");
        Ok(sub)
    }

    pub fn is_connected(&self) -> bool {
        self.broker.is_connected()
    }

    pub async fn close(&self) -> Result<(), BusError> {
        self.broker.close().await
    }
}

async fn provision(
    broker: &dyn Broker,
    descriptor: &StreamDescriptor,
    config: &BusConfig,
) -> Result<StreamOutcome, BusError> {
    let attempts = config.stream_setup_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match broker.ensure_stream(descriptor).await {
            Ok(outcome) => {
                info!(stream = %descriptor.name, ?outcome, attempt, "Stream ready");
                return Ok(outcome);
            }
            Err(e) => {
                warn!(stream = %descriptor.name, attempt, error = %e, "Stream setup failed");
                last_error = e.to_string();
                if attempt < attempts {
                    tokio::time::sleep(config.stream_setup_backoff * attempt).await;
                }
            }
        }
    }

    Err(BusError::StreamSetup {
        stream: descriptor.name.clone(),
        attempts,
        message: last_error,
    })
}
