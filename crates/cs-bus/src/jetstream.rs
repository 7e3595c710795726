//! JetStream bus adapter
//!
//! Pull-mode durable consumers give the backpressure primitive: at most
//! `max_ack_pending` unacked messages are outstanding per durable, and
//! fetches pull small batches. Processing failures nak with exponential
//! backoff; the `max_deliver`-th failure moves the frame to the DLQ.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use async_nats::jetstream::consumer::pull::Config as PullConfig;
use async_nats::jetstream::consumer::{AckPolicy, PullConsumer, ReplayPolicy};
use async_nats::jetstream::stream::{Config as StreamConfig, RetentionPolicy};
use async_nats::jetstream::{AckKind, Context};
use async_nats::HeaderMap;
use bytes::Bytes;
use futures_util::StreamExt;
use tracing::{debug, error, info, warn};

use cs_frame::Frame;

use crate::config::{BusConfig, Replay, Retention};
use crate::metrics::BusMetrics;
use crate::{BusError, Result};

/// Durable JetStream bus for incident frames.
pub struct Bus {
    config: BusConfig,
    client: Option<async_nats::Client>,
    jetstream: Option<Context>,
    metrics: Arc<BusMetrics>,
}

impl Bus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            client: None,
            jetstream: None,
            metrics: Arc::new(BusMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<BusMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.jetstream.is_some()
    }

    /// Connect and provision both streams. Idempotent: reconnecting an
    /// already-connected bus is a no-op.
    pub async fn connect(&mut self) -> Result<()> {
        if self.jetstream.is_some() {
            return Ok(());
        }

        let client = async_nats::connect(&self.config.url)
            .await
            .map_err(|e| BusError::Backend(format!("connect to {}: {e}", self.config.url)))?;
        let jetstream = async_nats::jetstream::new(client.clone());
        info!("connected to NATS JetStream at {}", self.config.url);

        self.ensure_main_stream(&jetstream).await?;
        self.ensure_dlq_stream(&jetstream).await?;

        self.client = Some(client);
        self.jetstream = Some(jetstream);
        Ok(())
    }

    /// Drop the connection. Idempotent.
    pub async fn disconnect(&mut self) -> Result<()> {
        if let Some(client) = self.client.take() {
            client
                .drain()
                .await
                .map_err(|e| BusError::Backend(format!("drain: {e}")))?;
        }
        self.jetstream = None;
        Ok(())
    }

    fn retention_policy(&self) -> RetentionPolicy {
        match self.config.retention {
            Retention::Limits => RetentionPolicy::Limits,
            Retention::Interest => RetentionPolicy::Interest,
            Retention::Workqueue => RetentionPolicy::WorkQueue,
        }
    }

    async fn ensure_main_stream(&self, jetstream: &Context) -> Result<()> {
        let cfg = StreamConfig {
            name: self.config.stream_name.clone(),
            subjects: self.config.subjects.clone(),
            retention: self.retention_policy(),
            max_age: self.config.max_age,
            max_bytes: self.config.max_bytes,
            num_replicas: self.config.replicas,
            ..Default::default()
        };
        jetstream
            .get_or_create_stream(cfg)
            .await
            .map_err(|e| BusError::Backend(format!("ensure stream: {e}")))?;
        info!("stream {} ready", self.config.stream_name);
        Ok(())
    }

    async fn ensure_dlq_stream(&self, jetstream: &Context) -> Result<()> {
        let cfg = StreamConfig {
            name: self.config.dlq_stream.clone(),
            subjects: vec![self.config.dlq_subject.clone()],
            retention: RetentionPolicy::Limits,
            max_age: self.config.dlq_max_age,
            ..Default::default()
        };
        jetstream
            .get_or_create_stream(cfg)
            .await
            .map_err(|e| BusError::Backend(format!("ensure DLQ stream: {e}")))?;
        info!("DLQ stream {} ready", self.config.dlq_stream);
        Ok(())
    }

    /// Publish a frame and wait for the server ack.
    pub async fn emit(&self, topic: &str, frame: &Frame) -> Result<u64> {
        let jetstream = self.jetstream.as_ref().ok_or(BusError::NotConnected)?;
        let subject = self.config.subject_for_topic(topic);
        let data = self.config.wire_format.encode(frame)?;

        let ack = jetstream
            .publish(subject.clone(), Bytes::from(data))
            .await
            .map_err(|e| BusError::Backend(format!("publish {subject}: {e}")))?
            .await
            .map_err(|e| BusError::Backend(format!("publish ack {subject}: {e}")))?;

        self.metrics
            .published
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        debug!(
            "published frame to {subject} seq={} incident={}",
            ack.sequence, frame.incident_id
        );
        Ok(ack.sequence)
    }

    /// Create (or reattach to) a durable pull consumer on `topic`.
    pub async fn subscribe(&self, topic: &str, durable: Option<&str>) -> Result<Subscription> {
        let jetstream = self.jetstream.as_ref().ok_or(BusError::NotConnected)?;
        let subject = self.config.subject_for_topic(topic);
        let durable_name = durable
            .map(str::to_string)
            .unwrap_or_else(|| self.config.durable_for_topic(topic));

        let stream = jetstream
            .get_stream(&self.config.stream_name)
            .await
            .map_err(|e| BusError::Backend(format!("get stream: {e}")))?;

        let consumer: PullConsumer = stream
            .create_consumer(PullConfig {
                durable_name: Some(durable_name.clone()),
                ack_policy: AckPolicy::Explicit,
                ack_wait: self.config.ack_wait,
                max_ack_pending: self.config.max_ack_pending,
                max_deliver: self.config.max_deliver,
                filter_subject: subject.clone(),
                replay_policy: match self.config.replay {
                    Replay::Instant => ReplayPolicy::Instant,
                    Replay::Original => ReplayPolicy::Original,
                },
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::Backend(format!("create consumer: {e}")))?;

        info!(
            "subscribed to {subject} (durable={durable_name}, max_ack_pending={}, max_deliver={})",
            self.config.max_ack_pending, self.config.max_deliver
        );

        Ok(Subscription {
            consumer,
            subject,
            config: self.config.clone(),
            jetstream: jetstream.clone(),
            metrics: Arc::clone(&self.metrics),
            buffered: VecDeque::new(),
        })
    }
}

/// Pull subscription over one topic. Dropping it stops fetching;
/// unacked in-flight messages redeliver after the ack wait.
pub struct Subscription {
    consumer: PullConsumer,
    subject: String,
    config: BusConfig,
    jetstream: Context,
    metrics: Arc<BusMetrics>,
    buffered: VecDeque<async_nats::jetstream::Message>,
}

impl Subscription {
    /// Next deliverable frame. Blocks across empty fetch windows; a
    /// frame whose body fails to decode is settled internally through
    /// the nak/DLQ path and never surfaces.
    pub async fn next(&mut self) -> Result<Delivery> {
        loop {
            if let Some(message) = self.buffered.pop_front() {
                let attempt = message.info().map(|i| i.delivered).unwrap_or(1);
                if attempt > 1 {
                    self.metrics
                        .redeliveries
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }

                match self.config.wire_format.decode(&message.payload) {
                    Ok(frame) => {
                        self.metrics
                            .consumed
                            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        return Ok(Delivery {
                            frame,
                            attempt,
                            started: Instant::now(),
                            message,
                            subject: self.subject.clone(),
                            config: self.config.clone(),
                            jetstream: self.jetstream.clone(),
                            metrics: Arc::clone(&self.metrics),
                        });
                    }
                    Err(err) => {
                        // Poison body: route through the same failure
                        // path as a processing error so the stream never
                        // stalls on it.
                        warn!("undecodable frame on {}: {err}", self.subject);
                        let delivery = Delivery {
                            frame: Frame::telemetry(0, "", cs_frame::HostTelemetry::default()),
                            attempt,
                            started: Instant::now(),
                            message,
                            subject: self.subject.clone(),
                            config: self.config.clone(),
                            jetstream: self.jetstream.clone(),
                            metrics: Arc::clone(&self.metrics),
                        };
                        delivery.fail(&format!("decode: {err}")).await?;
                        continue;
                    }
                }
            }

            self.fetch_batch().await?;
        }
    }

    async fn fetch_batch(&mut self) -> Result<()> {
        let mut batch = self
            .consumer
            .fetch()
            .max_messages(self.config.fetch_batch)
            .expires(self.config.fetch_timeout)
            .messages()
            .await
            .map_err(|e| BusError::Backend(format!("fetch: {e}")))?;

        while let Some(message) = batch.next().await {
            match message {
                Ok(msg) => self.buffered.push_back(msg),
                Err(e) => warn!("fetch error on {}: {e}", self.subject),
            }
        }

        // Lag sample after every batch; non-critical if it fails.
        if let Ok(info) = self.consumer.info().await {
            self.metrics.record_lag(info.num_pending);
        }
        Ok(())
    }
}

/// One in-flight message. Must be settled with [`ack`](Self::ack) or
/// [`fail`](Self::fail); dropping it leaves the message to redeliver.
pub struct Delivery {
    pub frame: Frame,
    /// 1-based delivery attempt.
    pub attempt: i64,
    started: Instant,
    message: async_nats::jetstream::Message,
    subject: String,
    config: BusConfig,
    jetstream: Context,
    metrics: Arc<BusMetrics>,
}

impl Delivery {
    /// Acknowledge successful processing.
    pub async fn ack(self) -> Result<()> {
        self.message
            .ack()
            .await
            .map_err(|e| BusError::Backend(format!("ack: {e}")))?;
        self.metrics
            .acked
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.metrics.record_latency(self.started.elapsed());
        Ok(())
    }

    /// Signal processing failure. Naks with backoff until the
    /// `max_deliver`-th attempt, which dead-letters the frame body and
    /// acks the main-stream copy.
    pub async fn fail(self, error_text: &str) -> Result<()> {
        // Every failure signal counts as a nak event, including the
        // final one that dead-letters instead of going back on the wire.
        self.metrics
            .naked
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        if self.attempt >= self.config.max_deliver {
            error!(
                "DLQ: message on {} after {} attempts: {error_text}",
                self.subject, self.attempt
            );
            self.dead_letter(error_text).await?;
            self.message
                .ack()
                .await
                .map_err(|e| BusError::Backend(format!("ack after DLQ: {e}")))?;
            return Ok(());
        }

        let delay = self.config.backoff_delay(self.attempt);
        warn!(
            "nak message on {} (attempt {}/{}, retry in {:.1}s): {error_text}",
            self.subject,
            self.attempt,
            self.config.max_deliver,
            delay.as_secs_f64()
        );
        self.message
            .ack_with(AckKind::Nak(Some(delay)))
            .await
            .map_err(|e| BusError::Backend(format!("nak: {e}")))?;
        Ok(())
    }

    async fn dead_letter(&self, error_text: &str) -> Result<()> {
        let headers = dlq_headers(&self.subject, error_text, self.attempt, now_ms());
        self.jetstream
            .publish_with_headers(
                self.config.dlq_subject.clone(),
                headers,
                self.message.payload.clone(),
            )
            .await
            .map_err(|e| BusError::Backend(format!("DLQ publish: {e}")))?
            .await
            .map_err(|e| BusError::Backend(format!("DLQ publish ack: {e}")))?;
        self.metrics
            .dead_lettered
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        info!("dead-lettered message to {}", self.config.dlq_subject);
        Ok(())
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Build the DLQ header set. The error text is truncated to 256 bytes
/// on a char boundary.
pub(crate) fn dlq_headers(
    original_subject: &str,
    error_text: &str,
    num_delivered: i64,
    at_ms: i64,
) -> HeaderMap {
    let mut truncated = error_text;
    if truncated.len() > 256 {
        let mut cut = 256;
        while !truncated.is_char_boundary(cut) {
            cut -= 1;
        }
        truncated = &truncated[..cut];
    }

    let mut headers = HeaderMap::new();
    headers.insert("CS-Original-Subject", original_subject);
    headers.insert("CS-Error", truncated);
    headers.insert("CS-Dead-Lettered-At", at_ms.to_string().as_str());
    headers.insert("CS-Num-Delivered", num_delivered.to_string().as_str());
    headers
}
