//! # RabbitMQ Broker
//!
//! `MessageBroker` implementation over the `lapin` crate (AMQP 0.9.1).
//! Durable exchanges and queues, persistent deliveries, publisher-confirm
//! awaited per publish, manual acks, one channel per worker process.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};

use crate::config::{BrokerConfig, ExchangeConfig, ExchangeType};
use crate::error::{BrokerError, BrokerResult, ProtocolResult};
use crate::messaging::broker::{Delivery, DeliveryStream, MessageBroker};
use crate::messaging::header::{
    Header, MessageKind, OriginStage, CLIENT_ID_KEY, KIND_KEY, ORIGIN_KEY, SEQUENCE_KEY,
};
use crate::sequence::SequenceSource;

/// RabbitMQ-backed broker
pub struct RabbitBroker {
    connection: Connection,
    channel: Channel,
}

impl RabbitBroker {
    /// Connect and open the worker's channel with the configured prefetch.
    pub async fn connect(config: &BrokerConfig) -> BrokerResult<Self> {
        let connection = Connection::connect(
            &config.url,
            ConnectionProperties::default().with_connection_name("steamline-worker".into()),
        )
        .await
        .map_err(|e| BrokerError::connection(format!("connect failed: {}", e)))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::connection(format!("channel open failed: {}", e)))?;

        channel
            .basic_qos(config.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| BrokerError::connection(format!("qos setup failed: {}", e)))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| BrokerError::connection(format!("confirm select failed: {}", e)))?;

        Ok(Self {
            connection,
            channel,
        })
    }
}

#[async_trait]
impl MessageBroker for RabbitBroker {
    async fn declare_exchange(&self, exchange: &ExchangeConfig) -> BrokerResult<()> {
        let kind = match exchange.kind {
            ExchangeType::Direct => ExchangeKind::Direct,
            ExchangeType::Fanout => ExchangeKind::Fanout,
        };
        self.channel
            .exchange_declare(
                &exchange.name,
                kind,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::topology(&exchange.name, format!("declare failed: {}", e)))
    }

    async fn declare_queue(&self, queue: &str) -> BrokerResult<()> {
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map(|_| ())
            .map_err(|e| BrokerError::topology(queue, format!("declare failed: {}", e)))
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> BrokerResult<()> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                BrokerError::topology(
                    format!("{} -> {}/{}", queue, exchange, routing_key),
                    format!("bind failed: {}", e),
                )
            })
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        header: &Header,
        payload: &[u8],
    ) -> BrokerResult<()> {
        let confirm = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_delivery_mode(2) // persistent
                    .with_headers(header_table(header)),
            )
            .await
            .map_err(|e| BrokerError::publish(exchange, routing_key, e.to_string()))?;

        confirm
            .await
            .map(|_| ())
            .map_err(|e| BrokerError::publish(exchange, routing_key, format!("confirm: {}", e)))
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> BrokerResult<DeliveryStream> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::consume(queue, e.to_string()))?;

        let queue = queue.to_string();
        let stream = consumer.then(move |delivery| {
            let queue = queue.clone();
            async move {
                let delivery = delivery.map_err(|e| BrokerError::consume(&queue, e.to_string()))?;
                match header_from_properties(&delivery.properties) {
                    Ok(header) => Ok(Delivery {
                        delivery_tag: delivery.delivery_tag,
                        header,
                        body: delivery.data,
                    }),
                    Err(e) => {
                        // unreadable header: ack so the broker does not redeliver it
                        let _ = delivery.acker.ack(BasicAckOptions::default()).await;
                        Err(BrokerError::consume(&queue, e.to_string()))
                    }
                }
            }
        });
        Ok(Box::pin(stream))
    }

    async fn ack(&self, delivery_tag: u64) -> BrokerResult<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| BrokerError::ack(delivery_tag, e.to_string()))
    }

    async fn close(&self) -> BrokerResult<()> {
        self.connection
            .close(200, "worker shutdown")
            .await
            .map_err(|e| BrokerError::connection(format!("close failed: {}", e)))
    }
}

/// Encode a header into the AMQP header table.
fn header_table(header: &Header) -> FieldTable {
    let mut table = FieldTable::default();
    table.insert(
        KIND_KEY.into(),
        AMQPValue::ShortShortUInt(header.kind.as_u8()),
    );
    table.insert(
        CLIENT_ID_KEY.into(),
        AMQPValue::LongString(header.client_id.clone().into()),
    );
    table.insert(
        ORIGIN_KEY.into(),
        AMQPValue::ShortShortUInt(header.origin.as_u8()),
    );
    table.insert(
        SEQUENCE_KEY.into(),
        AMQPValue::LongString(header.sequence.to_string().into()),
    );
    table
}

/// Decode a header from delivery properties.
fn header_from_properties(properties: &BasicProperties) -> ProtocolResult<Header> {
    let empty = FieldTable::default();
    let table = properties.headers().as_ref().unwrap_or(&empty);

    let kind = MessageKind::from_u8(get_u8(table, KIND_KEY).unwrap_or(u8::MAX))?;
    let origin = OriginStage::from_u8(get_u8(table, ORIGIN_KEY).unwrap_or(u8::MAX))?;
    let client_id = get_string(table, CLIENT_ID_KEY).unwrap_or_default();
    let sequence = match get_string(table, SEQUENCE_KEY) {
        Some(value) => SequenceSource::parse(&value)?,
        None => SequenceSource::default(),
    };

    Ok(Header {
        kind,
        client_id,
        origin,
        sequence,
    })
}

fn get_u8(table: &FieldTable, key: &str) -> Option<u8> {
    match table.inner().get(&ShortString::from(key)) {
        Some(AMQPValue::ShortShortUInt(v)) => Some(*v),
        Some(AMQPValue::ShortShortInt(v)) => Some(*v as u8),
        Some(AMQPValue::LongInt(v)) => Some(*v as u8),
        _ => None,
    }
}

fn get_string(table: &FieldTable, key: &str) -> Option<String> {
    match table.inner().get(&ShortString::from(key)) {
        Some(AMQPValue::LongString(v)) => Some(String::from_utf8_lossy(v.as_bytes()).into_owned()),
        Some(AMQPValue::ShortString(v)) => Some(v.as_str().to_string()),
        _ => None,
    }
}
