//! Sample competitor-selection trail: fetch, filter, rank, select.

use anyhow::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use xray_core::{CreateStepRequest, Execution, ExecutionStatus, Metadata, Rule};
use xray_store::{MemoryStore, RecordStore};
use xray_tracker::{
    filter_step, rank_step, select_step, shared, HttpStore, Traced, Tracker, TrackerConfig,
    TrackerError,
};

async fn fetch_candidates(category: String) -> Result<Vec<Value>, TrackerError> {
    Ok(vec![
        json!({"id": "p-101", "category": category, "rating": 4.6, "reviews": 1250}),
        json!({"id": "p-102", "category": category, "rating": 3.9, "reviews": 4100}),
        json!({"id": "p-103", "category": category, "rating": 4.2, "reviews": 310}),
        json!({"id": "p-104", "category": category, "rating": 4.8, "reviews": 95}),
    ])
}

fn score(candidate: &Value) -> f64 {
    let rating = candidate["rating"].as_f64().unwrap_or(0.0);
    let reviews = candidate["reviews"].as_f64().unwrap_or(0.0);
    rating * (1.0 + reviews).ln()
}

/// Record the trail and return the finished execution with its steps.
pub async fn run(api_url: Option<String>, min_rating: f64) -> Result<Execution> {
    let store: Arc<dyn RecordStore> = match api_url {
        Some(url) => {
            info!("Recording demo trail at {}", url);
            Arc::new(HttpStore::new(&TrackerConfig::new(url))?)
        }
        None => Arc::new(MemoryStore::new()),
    };

    let tracker = shared(Tracker::new("competitor-selection", store));
    let metadata: Metadata = json!({"product_id": "p-100", "source": "demo"})
        .as_object()
        .cloned()
        .unwrap_or_default();
    tracker.lock().await.start_execution(Some(metadata)).await?;

    let fetch = Traced::new(tracker.clone(), fetch_candidates).step_type("fetch");
    let candidates = fetch.call("water-bottles".to_string()).await?;

    let mut tracker = tracker.lock().await;
    let outcome = record_decisions(&mut tracker, candidates, min_rating).await;

    let status = match &outcome {
        Ok(_) => ExecutionStatus::Completed,
        Err(_) => ExecutionStatus::Failed,
    };
    let execution_id = tracker.end_execution(status).await?.execution_id;
    outcome?;

    Ok(tracker.store().get_execution(&execution_id).await?)
}

async fn record_decisions(
    tracker: &mut Tracker<dyn RecordStore>,
    candidates: Vec<Value>,
    min_rating: f64,
) -> Result<Value> {
    let rule = Rule::new("min_rating", format!("rating >= {}", min_rating), ">=", json!(min_rating));
    let kept = filter_step(
        tracker,
        CreateStepRequest::new("Filter by rating").rules(vec![rule]),
        candidates,
        |c| c["rating"].as_f64().unwrap_or(0.0) >= min_rating,
    )
    .await?;

    let ranked = rank_step(tracker, CreateStepRequest::new("Rank by weighted rating"), kept, score).await?;
    Ok(select_step(tracker, CreateStepRequest::new("Select best match"), ranked).await?)
}
