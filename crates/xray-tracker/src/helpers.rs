//! Step helpers for common decision shapes
//!
//! Each helper opens one scoped step of a fixed type, records an evaluation
//! per item, stages a summary output, and returns the processed items:
//!
//! | helper | type | output |
//! |---|---|---|
//! | `filter_step` | filter | `total_evaluated`, `passed`, `failed` |
//! | `rank_step` | rank | `ranked_count`, `top_3_ids` |
//! | `transform_step` | transform | `transformed_count` |
//! | `select_step` | select | `selected_id`, `selected_item`, `total_candidates` |

use serde::Serialize;
use serde_json::{json, Value};
use xray_core::{CreateStepRequest, Metadata, ValidationError};
use xray_store::RecordStore;

use crate::error::{Result, TrackerError};
use crate::tracker::Tracker;

/// Something a helper can evaluate: serializable, with a stable id.
pub trait Entity: Serialize {
    fn entity_id(&self) -> String;
}

/// JSON objects are identified by their `id` field, or by their JSON text.
impl Entity for Value {
    fn entity_id(&self) -> String {
        match self.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(other) => other.to_string(),
            None => self.to_string(),
        }
    }
}

fn summary(value: Value) -> Metadata {
    match value {
        Value::Object(map) => map,
        _ => Metadata::new(),
    }
}

/// Keep the items matching `predicate`.
pub async fn filter_step<S, T, P>(
    tracker: &mut Tracker<S>,
    request: CreateStepRequest,
    items: Vec<T>,
    predicate: P,
) -> Result<Vec<T>>
where
    S: RecordStore + ?Sized,
    T: Entity,
    P: Fn(&T) -> bool,
{
    filter_step_with(tracker, request, items, predicate, |_, passed| {
        format!("Filter {}", if passed { "passed" } else { "failed" })
    })
    .await
}

/// `filter_step` with a custom reason per item.
pub async fn filter_step_with<S, T, P, R>(
    tracker: &mut Tracker<S>,
    request: CreateStepRequest,
    items: Vec<T>,
    predicate: P,
    reason: R,
) -> Result<Vec<T>>
where
    S: RecordStore + ?Sized,
    T: Entity,
    P: Fn(&T) -> bool,
    R: Fn(&T, bool) -> String,
{
    tracker
        .scoped_step(request.step_type("filter"), |step| async move {
            let total = items.len();
            let mut kept = Vec::with_capacity(total);

            for item in items {
                let passed = predicate(&item);
                step.evaluate(
                    item.entity_id(),
                    serde_json::to_value(&item)?,
                    passed,
                    Some(reason(&item, passed)),
                )
                .await?;
                if passed {
                    kept.push(item);
                }
            }

            step.set_output(summary(json!({
                "total_evaluated": total,
                "passed": kept.len(),
                "failed": total - kept.len(),
            })));
            Ok::<_, TrackerError>(kept)
        })
        .await
}

/// Order items by `score`, highest first.
pub async fn rank_step<S, T, F>(
    tracker: &mut Tracker<S>,
    request: CreateStepRequest,
    items: Vec<T>,
    score: F,
) -> Result<Vec<T>>
where
    S: RecordStore + ?Sized,
    T: Entity,
    F: Fn(&T) -> f64,
{
    rank_step_with(tracker, request, items, score, true, |_, rank, score| {
        format!("Ranked #{} with score {:.2}", rank, score)
    })
    .await
}

/// `rank_step` with a sort direction and a custom reason `(item, rank, score)`.
pub async fn rank_step_with<S, T, F, R>(
    tracker: &mut Tracker<S>,
    request: CreateStepRequest,
    items: Vec<T>,
    score: F,
    descending: bool,
    reason: R,
) -> Result<Vec<T>>
where
    S: RecordStore + ?Sized,
    T: Entity,
    F: Fn(&T) -> f64,
    R: Fn(&T, usize, f64) -> String,
{
    let mut scored: Vec<(f64, T)> = items.into_iter().map(|item| (score(&item), item)).collect();
    scored.sort_by(|a, b| {
        let order = a.0.total_cmp(&b.0);
        if descending {
            order.reverse()
        } else {
            order
        }
    });

    tracker
        .scoped_step(request.step_type("rank"), |step| async move {
            for (index, (score, item)) in scored.iter().enumerate() {
                let rank = index + 1;
                step.log_evaluation(
                    item.entity_id(),
                    json!({"rank": rank, "score": score}),
                    true,
                    reason(item, rank, *score),
                )
                .await?;
            }

            let top: Vec<String> = scored.iter().take(3).map(|(_, item)| item.entity_id()).collect();
            step.set_output(summary(json!({
                "ranked_count": scored.len(),
                "top_3_ids": top,
            })));
            Ok::<_, TrackerError>(scored.into_iter().map(|(_, item)| item).collect())
        })
        .await
}

/// Map every item through `transform`.
pub async fn transform_step<S, T, U, F>(
    tracker: &mut Tracker<S>,
    request: CreateStepRequest,
    items: Vec<T>,
    transform: F,
) -> Result<Vec<U>>
where
    S: RecordStore + ?Sized,
    T: Entity,
    U: Serialize,
    F: Fn(&T) -> U,
{
    transform_step_with(tracker, request, items, transform, |item, _| {
        format!("Transformed item {}", item.entity_id())
    })
    .await
}

/// `transform_step` with a custom reason `(original, transformed)`.
pub async fn transform_step_with<S, T, U, F, R>(
    tracker: &mut Tracker<S>,
    request: CreateStepRequest,
    items: Vec<T>,
    transform: F,
    reason: R,
) -> Result<Vec<U>>
where
    S: RecordStore + ?Sized,
    T: Entity,
    U: Serialize,
    F: Fn(&T) -> U,
    R: Fn(&T, &U) -> String,
{
    tracker
        .scoped_step(request.step_type("transform"), |step| async move {
            let mut transformed = Vec::with_capacity(items.len());
            for item in &items {
                let output = transform(item);
                step.log_evaluation(
                    item.entity_id(),
                    serde_json::to_value(&output)?,
                    true,
                    reason(item, &output),
                )
                .await?;
                transformed.push(output);
            }

            step.set_output(summary(json!({ "transformed_count": transformed.len() })));
            Ok::<_, TrackerError>(transformed)
        })
        .await
}

/// Select the first item.
///
/// Fails with `InvalidArgument` before any step is opened when `items` is empty.
pub async fn select_step<S, T>(
    tracker: &mut Tracker<S>,
    request: CreateStepRequest,
    items: Vec<T>,
) -> Result<T>
where
    S: RecordStore + ?Sized,
    T: Entity,
{
    select_step_with(
        tracker,
        request,
        items,
        |items| if items.is_empty() { None } else { Some(0) },
        |item| format!("Selected item {}", item.entity_id()),
    )
    .await
}

/// Select the item at the index `select` returns.
pub async fn select_step_with<S, T, F, R>(
    tracker: &mut Tracker<S>,
    request: CreateStepRequest,
    mut items: Vec<T>,
    select: F,
    reason: R,
) -> Result<T>
where
    S: RecordStore + ?Sized,
    T: Entity,
    F: FnOnce(&[T]) -> Option<usize>,
    R: Fn(&T) -> String,
{
    let total = items.len();
    let index = select(&items)
        .filter(|&index| index < total)
        .ok_or_else(|| ValidationError::new("items", "no items to select from"))?;
    let selected = items.swap_remove(index);

    tracker
        .scoped_step(request.step_type("select"), |step| async move {
            let entity_id = selected.entity_id();
            let value = serde_json::to_value(&selected)?;
            step.log_evaluation(entity_id.clone(), value.clone(), true, reason(&selected))
                .await?;

            step.set_output(summary(json!({
                "selected_id": entity_id,
                "selected_item": value,
                "total_candidates": total,
            })));
            Ok::<_, TrackerError>(selected)
        })
        .await
}
