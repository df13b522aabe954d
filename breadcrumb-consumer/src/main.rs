//! Consume vehicle breadcrumbs from Kafka and bulk load them into Postgres.
use breadcrumb_common::memory::MemoryStore;
use breadcrumb_common::pgstore::PgBulkStore;
use breadcrumb_common::store::BulkStore;
use breadcrumb_common::writer::BatchWriter;
use breadcrumb_consumer::config::Config;
use breadcrumb_consumer::error::ConsumerError;
use breadcrumb_consumer::kafka::KafkaSource;
use breadcrumb_consumer::metrics::{serve, setup_metrics_router};
use breadcrumb_consumer::pipeline::{Pipeline, PipelineConfig};
use breadcrumb_consumer::signals::wait_for_shutdown_signal;
use breadcrumb_consumer::supervisor::{RunReport, Supervisor};
use envconfig::Envconfig;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

async fn run<S: BulkStore>(
    config: &Config,
    source: &KafkaSource,
    store: S,
) -> (RunReport, Pipeline<S>) {
    let writer = BatchWriter::new(store, config.writer_config());
    let mut pipeline = Pipeline::new(
        PipelineConfig {
            max_speed: config.max_speed(),
            anchor_policy: config.anchor_on_reject,
            persist_invalid: config.persist_invalid,
        },
        writer,
    );

    let supervisor = Supervisor::new(config.idle_timeout(), config.idle_poll_interval.0);
    let report = supervisor
        .run(source, &mut pipeline, wait_for_shutdown_signal())
        .await;

    (report, pipeline)
}

#[tokio::main]
async fn main() -> Result<(), ConsumerError> {
    setup_tracing();

    let config = Config::init_from_env().expect("Invalid configuration:");

    if config.export_prometheus {
        let bind = config.bind();
        tokio::task::spawn(async move {
            let router = setup_metrics_router();
            serve(router, &bind)
                .await
                .expect("failed to start serving metrics");
        });
    }

    let source = KafkaSource::new(&config.kafka)?;

    let report = if config.dry_run {
        info!("dry run, staging into memory");
        let (report, pipeline) = run(&config, &source, MemoryStore::new()).await;
        let store = pipeline.writer().store();
        info!(
            trips = store.trips().len(),
            breadcrumbs = store.breadcrumbs().len(),
            "dry run stored rows"
        );
        report
    } else {
        let store = PgBulkStore::connect(&config.database.url()).await?;
        run(&config, &source, store).await.0
    };

    println!("\n{}", report.summary);
    info!(reason = ?report.reason, "breadcrumb consumer stopped");

    match report.error {
        Some(e) => {
            error!("breadcrumb consumer failed: {}", e);
            Err(e)
        }
        None => Ok(()),
    }
}
