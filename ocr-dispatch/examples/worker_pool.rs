//! Worker pool example with simulated recognition engines.
//!
//! Registers two engine workers, submits a mix of single-page, priority and
//! multi-page jobs, and logs scheduler events as they happen.
//!
//! ```text
//! RUST_LOG=ocr_dispatch=debug,worker_pool=info cargo run --example worker_pool
//! ```

use std::sync::Arc;
use std::time::Duration;

use ocr_dispatch::*;
use serde_json::{Value, json};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Simulated engine: takes a little while, then "reads" the image name.
fn engine(id: &str) -> Arc<dyn Worker> {
    let name = id.to_string();
    Arc::new(
        ActionWorker::builder(id)
            .action("recognize", move |payload, job_id| {
                recognize(name.clone(), payload, job_id)
            })
            .action("recognize_pages", |payload, _job_id| recognize_pages(payload))
            .on_terminate(|| async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(())
            })
            .build(),
    )
}

async fn recognize(
    engine: String,
    payload: Payload,
    job_id: JobId,
) -> Result<WorkOutput, WorkerError> {
    let image = payload
        .get("image")
        .and_then(Value::as_str)
        .ok_or_else(|| WorkerError::InvalidPayload {
            action: "recognize".into(),
            reason: "missing image".into(),
        })?;
    tokio::time::sleep(Duration::from_millis(150)).await;
    Ok(WorkOutput::Single(json!({
        "engine": engine,
        "job": job_id.as_str(),
        "text": format!("text of {image}"),
    })))
}

/// One sub-result per page, each settling on its own schedule.
async fn recognize_pages(payload: Payload) -> Result<WorkOutput, WorkerError> {
    let pages = payload
        .get("pages")
        .and_then(Value::as_u64)
        .ok_or_else(|| WorkerError::InvalidPayload {
            action: "recognize_pages".into(),
            reason: "missing page count".into(),
        })?;
    let parts = (1..=pages)
        .map(|page| {
            SubResult::new(async move {
                tokio::time::sleep(Duration::from_millis(50 * page)).await;
                Ok(json!({ "page": page, "text": format!("page {page}") }))
            })
        })
        .collect();
    Ok(WorkOutput::Batch(parts))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("ocr_dispatch=info,worker_pool=info")),
        )
        .init();

    #[cfg(feature = "metrics")]
    ocr_dispatch::metrics::init_metrics()?;

    let scheduler = SchedulerBuilder::new(SchedulerConfig::new("engines"))
        .with_worker(engine("engine-0"))
        .with_worker(engine("engine-1"))
        .build()?;

    let mut events = scheduler.subscribe();
    let watcher = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!(sequence = event.meta.sequence, payload = ?event.payload, "event");
        }
    });

    let mut handles = Vec::new();
    for idx in 0..4 {
        handles.push(scheduler.submit(
            "recognize",
            json!({ "image": format!("scan-{idx}.png") }),
            false,
        )?);
    }
    handles.push(scheduler.submit("recognize", json!({ "image": "urgent.png" }), true)?);
    handles.push(scheduler.submit("recognize", json!({}), false)?);
    let pages = scheduler.submit("recognize_pages", json!({ "pages": 3 }), false)?;

    info!(queued = scheduler.queue_length(), busy = scheduler.busy_count(), "submitted");

    for handle in handles {
        let job_id = handle.job_id().clone();
        match handle.await {
            Ok(output) => info!(%job_id, output = ?output.into_single(), "job finished"),
            Err(err) => warn!(%job_id, error = %err, "job failed"),
        }
    }

    if let Some(parts) = pages.await?.into_batch() {
        for part in futures::future::join_all(parts).await {
            let page = part?;
            info!(%page, "page finished");
        }
    }

    info!(snapshot = ?scheduler.snapshot(), "before shutdown");
    scheduler.terminate().await?;

    #[cfg(feature = "metrics")]
    println!("{}", ocr_dispatch::metrics::gather_metrics()?);

    drop(scheduler);
    watcher.abort();
    Ok(())
}
