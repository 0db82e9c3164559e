// Console demo: one producer outbox streaming batches to a loopback consumer over QUIC.
use anyhow::{Context, Result};
use async_trait::async_trait;
use flow_columnar::{Batch, BatchCodec, Column, ColumnData, ColumnType, ColumnarCodec};
use flow_common::ids::{FlowId, NodeId, StreamId};
use flow_rpc::quic::{QuicConsumerStream, QuicDialer};
use flow_rpc::{
    BatchSource, Closers, DialParams, MetadataSource, Outbox, OutboxConfig, observability,
};
use flow_transport::{QuicClient, QuicServer, TransportConfig, tls};
use flow_wire::{ConsumerHandshake, ConsumerSignal, ProducerMessage, ProducerMetadata};
use tokio_util::sync::CancellationToken;

const CONSUMER_NODE: NodeId = NodeId(1);
const BATCHES: i64 = 5;
const ROWS_PER_BATCH: i64 = 4;

struct Squares {
    batch: i64,
}

#[async_trait]
impl BatchSource for Squares {
    async fn next(&mut self, _ctx: &CancellationToken) -> Result<Batch> {
        if self.batch == BATCHES {
            return Ok(Batch::empty());
        }
        let start = self.batch * ROWS_PER_BATCH;
        let ids: Vec<i64> = (start..start + ROWS_PER_BATCH).collect();
        let squares = ids.iter().map(|id| (id * id) as f64).collect();
        self.batch += 1;
        Ok(Batch::new(vec![
            Column::new(ColumnData::Int64(ids)),
            Column::new(ColumnData::Float64(squares)),
        ])?)
    }
}

struct Stats;

#[async_trait]
impl MetadataSource for Stats {
    async fn drain_metadata(&mut self, _ctx: &CancellationToken) -> Vec<ProducerMetadata> {
        vec![ProducerMetadata::RowNum {
            sender_id: "outbox-demo".to_string(),
            row_num: (BATCHES * ROWS_PER_BATCH) as u64,
            last_msg: true,
        }]
    }
}

fn schema() -> Vec<ColumnType> {
    vec![ColumnType::Int64, ColumnType::Float64]
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();
    let config = OutboxConfig::from_env_or_yaml().context("load outbox config")?;
    println!("== Flow Outbox Demo ==");

    println!("Step 1/3: booting loopback consumer node.");
    let (server_config, client_config) =
        tls::self_signed_pair(&config.server_name).context("build tls configs")?;
    let transport = TransportConfig::default();
    let server = QuicServer::bind("127.0.0.1:0".parse()?, server_config, &transport)?;
    let addr = server.local_addr()?;
    let max_frame_bytes = config.max_frame_bytes;
    let consumer = tokio::spawn(async move {
        let connection = server.accept().await?;
        let (header, mut stream) =
            QuicConsumerStream::accept(&connection, max_frame_bytes).await?;
        println!(
            "Consumer: stream {} of flow {} connected.",
            header.stream_id, header.flow_id
        );
        stream
            .send_signal(&ConsumerSignal::Handshake(ConsumerHandshake::current(true)))
            .await?;
        let mut codec = ColumnarCodec::new(schema());
        while let Some(message) = stream.next_message().await? {
            let ProducerMessage::Data(data) = message else {
                continue;
            };
            if !data.raw_bytes.is_empty() {
                let batch = codec.decode(data.raw_bytes)?;
                println!("Consumer: received batch of {} rows.", batch.len());
            }
            for metadata in data.metadata {
                println!("Consumer: metadata {metadata:?}");
            }
        }
        stream.finish()?;
        Result::<_>::Ok((stream, connection, server))
    });

    println!("Step 2/3: running producer outbox.");
    let client = QuicClient::bind("0.0.0.0:0".parse()?, client_config, &transport)?;
    let mut dialer = QuicDialer::new(client, &config);
    dialer.register_node(CONSUMER_NODE, addr);
    let outbox = Outbox::new(
        Box::new(Squares { batch: 0 }),
        schema(),
        vec![Box::new(Stats) as Box<dyn MetadataSource>],
        Closers::new(),
    );
    let flow = CancellationToken::new();
    let params = DialParams {
        node_id: CONSUMER_NODE,
        flow_id: FlowId::new(),
        stream_id: StreamId(0),
        connection_timeout: config.connection_timeout(),
    };
    outbox.run(&flow, &dialer, params, Some(flow.clone())).await;

    println!("Step 3/3: waiting for consumer.");
    let _consumer_state = consumer.await.context("consumer join")??;
    if flow.is_cancelled() {
        println!("Flow was cancelled: the stream broke.");
    } else {
        println!("Flow completed.");
    }
    Ok(())
}
