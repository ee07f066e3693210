use crate::api_registry::ApiRegistry;
use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};
use crate::frame::{read_frame, write_frame};
use crate::metrics::MetricsCollector;
use crate::protocol::{
    get_compact_array_len, get_compact_string, peek_api_key, put_compact_array_len,
    put_compact_string, put_response_header_v0, put_response_header_v1, put_tag_buffer,
    put_uuid, skip_tag_buffer, ApiKey, RequestHeader, NULL_CURSOR, UNASSIGNED_TOPIC_ID,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use kafka_protocol::ResponseError;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

pub struct KafkaBroker {
    config: BrokerConfig,
    pub registry: Arc<ApiRegistry>,
    pub metrics: Arc<MetricsCollector>,
}

impl KafkaBroker {
    pub fn new(config: BrokerConfig) -> Self {
        Self::new_with_metrics(config, Arc::new(MetricsCollector::new()))
    }

    pub fn new_with_metrics(config: BrokerConfig, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            config,
            registry: Arc::new(ApiRegistry::default()),
            metrics,
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        info!("Kafka broker listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept loop. Each connection gets its own task, so a client that
    /// never finishes a frame only ever blocks itself.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (socket, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            };
            info!("New connection from: {}", addr);

            let registry = self.registry.clone();
            let metrics = self.metrics.clone();
            let max_frame_size = self.config.max_frame_size;

            tokio::spawn(async move {
                metrics.increment_connections().await;
                match handle_connection(socket, addr, &registry, &metrics, max_frame_size).await {
                    Ok(()) => debug!("Connection from {} finished", addr),
                    Err(BrokerError::MalformedFrame(reason)) => {
                        warn!("Closing connection from {}: malformed frame: {}", addr, reason);
                        metrics.increment_malformed_frames().await;
                    }
                    Err(e) => error!("Connection error from {}: {}", addr, e),
                }
                metrics.decrement_connections().await;
            });
        }
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    addr: SocketAddr,
    registry: &ApiRegistry,
    metrics: &MetricsCollector,
    max_frame_size: usize,
) -> Result<()> {
    loop {
        let frame = match read_frame(&mut socket, max_frame_size).await {
            Ok(frame) => frame,
            Err(BrokerError::ConnectionClosed) => {
                debug!("Client {} disconnected", addr);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        match process_frame(frame, registry)? {
            Some(reply) => {
                metrics
                    .record_request(reply.api.code(), reply.api.name(), reply.error_code)
                    .await;
                write_frame(&mut socket, &reply.payload).await?;
            }
            None => metrics.increment_dropped_requests().await,
        }
    }
}

/// Encoded response to one request, without the length prefix.
#[derive(Debug, Clone)]
pub struct Reply {
    pub api: ApiKey,
    /// First error code carried by the response, 0 if none.
    pub error_code: i16,
    pub payload: Bytes,
}

/// Decodes one request frame and builds its response.
///
/// `Ok(None)` means the api key is not served and nothing must be written
/// back; the connection keeps reading.
pub fn process_frame(frame: Bytes, registry: &ApiRegistry) -> Result<Option<Reply>> {
    let api_key = peek_api_key(&frame)?;
    let api = match ApiKey::try_from(api_key) {
        Ok(api) if registry.range(api).is_some() => api,
        _ => {
            warn!("Unsupported API key: {}, dropping request", api_key);
            return Ok(None);
        }
    };

    let mut body = frame;
    let header = RequestHeader::decode(&mut body)?;
    debug!(
        "Parsed header: api_key={}, version={}, correlation_id={}, client_id={:?}, remaining={}",
        header.api_key,
        header.api_version,
        header.correlation_id,
        header.client_id,
        body.remaining()
    );

    dispatch(api, &header, &mut body, registry).map(Some)
}

pub fn dispatch(
    api: ApiKey,
    header: &RequestHeader,
    body: &mut Bytes,
    registry: &ApiRegistry,
) -> Result<Reply> {
    match api {
        ApiKey::ApiVersions => Ok(handle_api_versions(header, registry)),
        ApiKey::DescribeTopicPartitions => handle_describe_topic_partitions(header, body, registry),
    }
}

pub fn handle_api_versions(header: &RequestHeader, registry: &ApiRegistry) -> Reply {
    debug!("Handling ApiVersions request version {}", header.api_version);

    // The entry list is sent on the error path too.
    let error_code = if registry.supports(ApiKey::ApiVersions, header.api_version) {
        0
    } else {
        ResponseError::UnsupportedVersion.code()
    };

    let mut buf = BytesMut::new();
    // ApiVersionsResponse always uses header version 0
    put_response_header_v0(&mut buf, header.correlation_id);
    buf.put_i16(error_code);
    put_compact_array_len(&mut buf, registry.len());
    for entry in registry.entries() {
        buf.put_i16(entry.api_key);
        buf.put_i16(entry.min_version);
        buf.put_i16(entry.max_version);
        put_tag_buffer(&mut buf);
    }
    buf.put_i32(0); // throttle_time_ms
    put_tag_buffer(&mut buf);

    debug!("ApiVersions response for v{}: {} bytes", header.api_version, buf.len());

    Reply {
        api: ApiKey::ApiVersions,
        error_code,
        payload: buf.freeze(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescribeTopicPartitionsRequest {
    pub topics: Vec<String>,
}

impl DescribeTopicPartitionsRequest {
    /// Reads the requested topic names. The partition limit and cursor that
    /// follow are not used.
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        let topics = match get_compact_array_len(buf)? {
            None => Vec::new(),
            Some(count) => {
                let mut topics = Vec::with_capacity(count);
                for _ in 0..count {
                    let name = get_compact_string(buf)?;
                    skip_tag_buffer(buf)?;
                    topics.push(name);
                }
                topics
            }
        };
        Ok(Self { topics })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionDescriptor {
    pub error_code: i16,
    pub partition_index: i32,
    pub leader_id: i32,
    pub leader_epoch: i32,
    pub replica_nodes: Vec<i32>,
    pub isr_nodes: Vec<i32>,
    pub eligible_leader_replicas: Vec<i32>,
    pub last_known_elr: Vec<i32>,
    pub offline_replicas: Vec<i32>,
}

fn put_compact_i32_array(buf: &mut BytesMut, values: &[i32]) {
    put_compact_array_len(buf, values.len());
    for value in values {
        buf.put_i32(*value);
    }
}

impl PartitionDescriptor {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i16(self.error_code);
        buf.put_i32(self.partition_index);
        buf.put_i32(self.leader_id);
        buf.put_i32(self.leader_epoch);
        put_compact_i32_array(buf, &self.replica_nodes);
        put_compact_i32_array(buf, &self.isr_nodes);
        put_compact_i32_array(buf, &self.eligible_leader_replicas);
        put_compact_i32_array(buf, &self.last_known_elr);
        put_compact_i32_array(buf, &self.offline_replicas);
        put_tag_buffer(buf);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicDescriptor {
    pub error_code: i16,
    pub name: String,
    /// All zeros when the topic has no id.
    pub topic_id: [u8; 16],
    pub is_internal: bool,
    pub partitions: Vec<PartitionDescriptor>,
    pub authorized_operations: i32,
}

impl TopicDescriptor {
    pub fn unknown(name: impl Into<String>) -> Self {
        Self {
            error_code: ResponseError::UnknownTopicOrPartition.code(),
            name: name.into(),
            topic_id: UNASSIGNED_TOPIC_ID,
            is_internal: false,
            partitions: Vec::new(),
            authorized_operations: 0,
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i16(self.error_code);
        put_compact_string(buf, &self.name);
        put_uuid(buf, &self.topic_id);
        buf.put_u8(self.is_internal as u8);
        put_compact_array_len(buf, self.partitions.len());
        for partition in &self.partitions {
            partition.encode(buf);
        }
        buf.put_i32(self.authorized_operations);
        put_tag_buffer(buf);
    }
}

pub fn handle_describe_topic_partitions(
    header: &RequestHeader,
    body: &mut Bytes,
    registry: &ApiRegistry,
) -> Result<Reply> {
    debug!("Handling DescribeTopicPartitions request version {}", header.api_version);
    if !registry.supports(ApiKey::DescribeTopicPartitions, header.api_version) {
        debug!(
            "DescribeTopicPartitions v{} is outside the advertised range, answering with v0 layout",
            header.api_version
        );
    }

    let request = DescribeTopicPartitionsRequest::decode(body)?;
    debug!("Requested topics: {:?}", request.topics);

    // No topic registry: every requested topic is reported unknown.
    let topics: Vec<TopicDescriptor> = request
        .topics
        .into_iter()
        .map(TopicDescriptor::unknown)
        .collect();
    let error_code = topics.first().map_or(0, |t| t.error_code);

    let mut buf = BytesMut::new();
    put_response_header_v1(&mut buf, header.correlation_id);
    buf.put_i32(0); // throttle_time_ms
    put_compact_array_len(&mut buf, topics.len());
    for topic in &topics {
        topic.encode(&mut buf);
    }
    buf.put_u8(NULL_CURSOR); // next_cursor
    put_tag_buffer(&mut buf);

    Ok(Reply {
        api: ApiKey::DescribeTopicPartitions,
        error_code,
        payload: buf.freeze(),
    })
}
