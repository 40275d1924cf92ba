//! NATS JetStream backend

use std::time::Duration;

use async_nats::jetstream::{self, consumer, stream};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::broker::{
    AckMode, Acker, Broker, BusMessage, PublishReceipt, StreamOutcome, SubscribeOptions,
    Subscription, SUBSCRIPTION_BUFFER,
};
use crate::error::BusError;
use crate::streams::{DiscardPolicy, RetentionPolicy, StorageClass, StreamDescriptor};

/// Connection tuning for the NATS client
#[derive(Debug, Clone)]
pub struct NatsOptions {
    pub url: String,
    pub client_name: String,
    pub max_reconnects: usize,
    pub reconnect_delay: Duration,
    /// Redelivery timeout for explicit-ack consumers
    pub ack_wait: Duration,
}

impl Default for NatsOptions {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            client_name: "market-bus".to_string(),
            max_reconnects: 10,
            reconnect_delay: Duration::from_secs(2),
            ack_wait: Duration::from_secs(30),
        }
    }
}

pub struct NatsBroker {
    client: async_nats::Client,
    js: jetstream::Context,
    ack_wait: Duration,
    url: String,
}

impl NatsBroker {
    pub async fn connect(options: &NatsOptions) -> Result<Self, BusError> {
        let delay = options.reconnect_delay;
        let client = async_nats::ConnectOptions::new()
            .name(&options.client_name)
            .retry_on_initial_connect()
            .max_reconnects(options.max_reconnects)
            .reconnect_delay_callback(move |_attempts| delay)
            .event_callback(|event| async move {
                match event {
                    async_nats::Event::Disconnected => warn!("NATS disconnected"),
                    async_nats::Event::Connected => info!("NATS connected"),
                    other => debug!(event = %other, "NATS event"),
                }
            })
            .connect(options.url.as_str())
            .await
            .map_err(|e| BusError::Connect {
                url: options.url.clone(),
                message: e.to_string(),
            })?;

        info!(url = %options.url, "Connected to NATS");
        let js = jetstream::new(client.clone());
        Ok(Self {
            client,
            js,
            ack_wait: options.ack_wait,
            url: options.url.clone(),
        })
    }

    fn stream_config(d: &StreamDescriptor) -> stream::Config {
        stream::Config {
            name: d.name.clone(),
            subjects: d.subjects.clone(),
            max_age: d.max_age,
            storage: match d.storage {
                StorageClass::Memory => stream::StorageType::Memory,
                StorageClass::File => stream::StorageType::File,
            },
            num_replicas: d.replicas,
            discard: match d.discard {
                DiscardPolicy::Old => stream::DiscardPolicy::Old,
                DiscardPolicy::New => stream::DiscardPolicy::New,
            },
            retention: match d.retention {
                RetentionPolicy::Limits => stream::RetentionPolicy::Limits,
                RetentionPolicy::WorkQueue => stream::RetentionPolicy::WorkQueue,
            },
            ..Default::default()
        }
    }

    async fn subscribe_core(&self, subject: &str) -> Result<Subscription, BusError> {
        let mut subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| BusError::Subscribe {
                subject: subject.to_string(),
                message: e.to_string(),
            })?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let pattern = subject.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    next = subscriber.next() => match next {
                        Some(msg) => {
                            let out = BusMessage::new(msg.subject.to_string(), msg.payload, None);
                            if tx.send(out).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            let _ = subscriber.unsubscribe().await;
            debug!(subject = %pattern, "Core subscription released");
        });

        Ok(Subscription::new(subject, rx))
    }

    async fn subscribe_jetstream(
        &self,
        subject: &str,
        durable: Option<String>,
    ) -> Result<Subscription, BusError> {
        let sub_err = |message: String| BusError::Subscribe {
            subject: subject.to_string(),
            message,
        };

        let stream_name = self
            .js
            .stream_by_subject(subject.to_string())
            .await
            .map_err(|e| sub_err(e.to_string()))?;
        let stream = self
            .js
            .get_stream(&stream_name)
            .await
            .map_err(|e| sub_err(e.to_string()))?;

        let config = consumer::pull::Config {
            durable_name: durable.clone(),
            filter_subject: subject.to_string(),
            ack_policy: consumer::AckPolicy::Explicit,
            deliver_policy: consumer::DeliverPolicy::All,
            ack_wait: self.ack_wait,
            ..Default::default()
        };
        let consumer = match &durable {
            Some(name) => stream.get_or_create_consumer(name, config).await,
            None => stream.create_consumer(config).await,
        }
        .map_err(|e| sub_err(e.to_string()))?;

        let mut messages = consumer
            .messages()
            .await
            .map_err(|e| sub_err(e.to_string()))?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let pattern = subject.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    next = messages.next() => match next {
                        Some(Ok(msg)) => {
                            let (msg, acker) = msg.split();
                            let acker: Box<dyn Acker> = Box::new(JetStreamAcker(acker));
                            let out = BusMessage::new(msg.subject.to_string(), msg.payload, Some(acker));
                            if tx.send(out).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => warn!(subject = %pattern, error = %e, "Consumer error"),
                        None => break,
                    },
                }
            }
            debug!(subject = %pattern, "JetStream subscription released");
        });

        Ok(Subscription::new(subject, rx))
    }
}

struct JetStreamAcker(jetstream::message::Acker);

#[async_trait]
impl Acker for JetStreamAcker {
    async fn ack(self: Box<Self>) -> Result<(), BusError> {
        self.0.ack().await.map_err(|e| BusError::Ack(e.to_string()))
    }
}

#[async_trait]
impl Broker for NatsBroker {
    async fn ensure_stream(&self, descriptor: &StreamDescriptor) -> Result<StreamOutcome, BusError> {
        let config = Self::stream_config(descriptor);
        match self.js.create_stream(config.clone()).await {
            Ok(_) => Ok(StreamOutcome::Created),
            Err(create_err) => {
                debug!(stream = %descriptor.name, error = %create_err, "Create failed, updating");
                self.js
                    .update_stream(config)
                    .await
                    .map(|_| StreamOutcome::Updated)
                    .map_err(|e| BusError::StreamSetup {
                        stream: descriptor.name.clone(),
                        attempts: 1,
                        message: e.to_string(),
                    })
            }
        }
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<PublishReceipt, BusError> {
        let pub_err = |message: String| BusError::Publish {
            subject: subject.to_string(),
            message,
        };
        let ack = self
            .js
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| pub_err(e.to_string()))?
            .await
            .map_err(|e| pub_err(e.to_string()))?;

        Ok(PublishReceipt {
            stream: ack.stream,
            sequence: ack.sequence,
        })
    }

    async fn subscribe(
        &self,
        subject: &str,
        options: SubscribeOptions,
    ) -> Result<Subscription, BusError> {
        match options.ack_mode {
            AckMode::None => self.subscribe_core(subject).await,
            AckMode::Explicit => self.subscribe_jetstream(subject, options.durable).await,
        }
    }

    fn is_connected(&self) -> bool {
        self.client.connection_state() == async_nats::connection::State::Connected
    }

    async fn close(&self) -> Result<(), BusError> {
        self.client.flush().await.map_err(|e| BusError::Publish {
            subject: String::new(),
            message: e.to_string(),
        })?;
        // ends every subscription; later commands on this client fail
        self.client.drain().await.map_err(|e| BusError::Connect {
            url: self.url.clone(),
            message: format!("drain failed: {e}"),
        })?;
        info!("NATS connection drained");
        Ok(())
    }
}
