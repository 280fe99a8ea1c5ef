use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, runtime, trace as sdktrace};
use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};

fn json_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    tracing_subscriber::fmt::layer()
        .with_file(true)
        .with_line_number(true)
        .json()
        .flatten_event(true)
}

/// Install the JSON log layer, plus an OTLP exporter when an endpoint is given.
pub fn init_tracing(service_name: &str, log_level: &str, otlp_endpoint: Option<&str>) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let Some(endpoint) = otlp_endpoint else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer())
            .init();
        return;
    };

    let otlp_exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint);

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(otlp_exporter)
        .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
            KeyValue::new("service.name", service_name.to_string()),
        ])))
        .install_batch(runtime::Tokio);

    match tracer {
        Ok(tracer) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .with(json_layer())
                .init();
        }
        Err(e) => {
            // Logs still matter more than traces; keep running without the exporter.
            tracing_subscriber::registry()
                .with(env_filter)
                .with(json_layer())
                .init();
            tracing::warn!(
                service = service_name,
                otlp_endpoint = endpoint,
                error = %e,
                "OTLP exporter unavailable, continuing with local logs only"
            );
        }
    }
}

/// Plain test subscriber; safe to call from every test.
pub fn init_test_tracing(filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_layer_stacks_above_and_below_the_otel_layer() {
        let plain = tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::new("info"))
            .with(json_layer());
        tracing::subscriber::with_default(plain, || tracing::info!("plain stack"));

        let traced = tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::new("info"))
            .with(tracing_opentelemetry::layer())
            .with(json_layer());
        tracing::subscriber::with_default(traced, || {
            let span = tracing::info_span!("request");
            let _guard = span.enter();
            tracing::info!("traced stack");
        });
    }
}
