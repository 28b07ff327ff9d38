//! spritegen-pipeline — demo harness
//!
//! Boots an in-process pipeline (in-memory dedup/queue, a local sled
//! directory for Tier B) against a configurable provider endpoint, submits one
//! sample request, and polls until it completes or times out. Not a server;
//! real deployments wire `Pipeline` into their own HTTP/gRPC layer.

use spritegen_pipeline::config::PipelineConfig;
use spritegen_pipeline::model::{RequestOptions, Size, StructuredRequest};
use spritegen_pipeline::provider::HttpProviderClient;
use spritegen_pipeline::{Pipeline, SubmissionOutcome};
use std::panic;
use std::sync::Arc;
use std::time::Duration;

fn sample_request() -> StructuredRequest {
    StructuredRequest {
        request_type: "unit".to_string(),
        style: "pixel-art".to_string(),
        action: "idle".to_string(),
        description: "a knight standing at attention".to_string(),
        raw: "a knight standing at attention, four-directional idle animation".to_string(),
        size: Size {
            width: 64,
            height: 64,
        },
        options: Some(RequestOptions {
            text_guidance_scale: Some(7.5),
            no_background: Some(true),
            palette_image: None,
        }),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    panic::set_hook(Box::new(|panic_info| {
        eprintln!("spritegen-pipeline fatal error:");
        eprintln!("{panic_info}");
        if let Some(location) = panic_info.location() {
            eprintln!("Location: {}:{}:{}", location.file(), location.line(), location.column());
        }
    }));

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("═══════════════════════════════════════════════════════════");
    tracing::info!(version = spritegen_pipeline::VERSION, "spritegen-pipeline starting");
    tracing::info!("═══════════════════════════════════════════════════════════");

    let base_url = std::env::var("PROVIDER_BASE_URL").unwrap_or_else(|_| "http://localhost:9090".to_string());
    let provider = Arc::new(HttpProviderClient::new(base_url));

    let config = PipelineConfig::default();
    let tier_b_path = std::env::temp_dir().join("spritegen-pipeline-demo");
    let pipeline = Arc::new(Pipeline::new_in_memory(config, tier_b_path, 10_000, provider)?);

    let workers = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.run_workers().await })
    };

    let outcome = pipeline.submit("demo-user".to_string(), sample_request()).await?;
    let job_id = match outcome {
        SubmissionOutcome::CacheHit(result) => {
            tracing::info!(job_id = %result.job_id, "served from cache on first submission");
            pipeline.stop_workers();
            let _ = workers.await;
            return Ok(());
        }
        SubmissionOutcome::Duplicate { existing_job_id } => existing_job_id,
        SubmissionOutcome::Admitted { job_id } => job_id,
        SubmissionOutcome::Rejected { reason } => {
            tracing::warn!(reason = reason.as_str(), "submission rejected by admission control");
            pipeline.stop_workers();
            let _ = workers.await;
            return Ok(());
        }
    };

    tracing::info!(job_id, "submission admitted, polling for completion");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
    loop {
        let response = pipeline.pull_status(&job_id, None, Some("demo-user")).await?;
        if let Some(job) = &response.snapshot {
            tracing::info!(job_id, status = ?job.status, progress = job.progress, "poll");
            if job.status.is_terminal() {
                break;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!(job_id, "gave up waiting for completion");
            break;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    pipeline.stop_workers();
    let _ = workers.await;

    tracing::info!("═══════════════════════════════════════════════════════════");
    tracing::info!("spritegen-pipeline shutdown complete");
    tracing::info!("═══════════════════════════════════════════════════════════");

    Ok(())
}
