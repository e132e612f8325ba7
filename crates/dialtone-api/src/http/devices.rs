//! Device category routes: list, detail, create, merge, delete.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path as AxumPath, State},
};
use dialtone_data::{CreateOutcome, DataError, DeleteOutcome, MergeOutcome};
use tracing::error;

use crate::http::errors::ApiError;
use crate::models::{
    DeviceActionResponse, DeviceActionStatus, DeviceSelector, DeviceSummary, DeviceVariableView,
    DeviceWriteRequest, ProblemInvalidParam,
};
use crate::state::ApiState;

pub(crate) async fn list_devices(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<DeviceSummary>>, ApiError> {
    let rows = state
        .store
        .list_devices()
        .await
        .map_err(|err| storage_error(&state, "list", &err))?;
    Ok(Json(rows.into_iter().map(DeviceSummary::from).collect()))
}

pub(crate) async fn device_by_metric(
    State(state): State<Arc<ApiState>>,
    AxumPath(cat_metric): AxumPath<i32>,
) -> Result<Json<Vec<DeviceVariableView>>, ApiError> {
    let rows = state
        .store
        .device_by_metric(cat_metric)
        .await
        .map_err(|err| storage_error(&state, "detail", &err))?;
    if rows.is_empty() {
        return Err(ApiError::not_found(format!(
            "no category carries cat_metric {cat_metric}"
        )));
    }
    Ok(Json(rows.into_iter().map(DeviceVariableView::from).collect()))
}

pub(crate) async fn create_device(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<DeviceWriteRequest>,
) -> Result<Json<DeviceActionResponse>, ApiError> {
    let command = request.into_create().map_err(validation_error)?;
    let outcome = state
        .store
        .create_device(&command.category, &command.variables)
        .await
        .map_err(|err| storage_error(&state, "create", &err))?;

    let response = match outcome {
        CreateOutcome::Created { cat_metric, .. } => {
            state.telemetry.inc_device_op("create", "created");
            DeviceActionResponse {
                status: DeviceActionStatus::Created,
                category: command.category,
                cat_metric: Some(cat_metric),
            }
        }
        CreateOutcome::AlreadyExists => {
            state.telemetry.inc_device_op("create", "already_exists");
            DeviceActionResponse {
                status: DeviceActionStatus::AlreadyExists,
                category: command.category,
                cat_metric: None,
            }
        }
    };
    Ok(Json(response))
}

pub(crate) async fn merge_device(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<DeviceWriteRequest>,
) -> Result<Json<DeviceActionResponse>, ApiError> {
    let command = request.into_merge().map_err(validation_error)?;
    let outcome = state
        .store
        .merge_device(&command.category, &command.variables)
        .await
        .map_err(|err| storage_error(&state, "merge", &err))?;

    let response = match outcome {
        MergeOutcome::Merged { cat_metric, .. } => {
            state.telemetry.inc_device_op("merge", "merged");
            DeviceActionResponse {
                status: DeviceActionStatus::Merged,
                category: command.category,
                cat_metric: Some(cat_metric),
            }
        }
        MergeOutcome::NotFound => {
            state.telemetry.inc_device_op("merge", "not_found");
            DeviceActionResponse {
                status: DeviceActionStatus::NotFound,
                category: command.category,
                cat_metric: None,
            }
        }
    };
    Ok(Json(response))
}

pub(crate) async fn delete_device(
    State(state): State<Arc<ApiState>>,
    Json(selector): Json<DeviceSelector>,
) -> Result<Json<DeviceActionResponse>, ApiError> {
    let outcome = state
        .store
        .delete_device(&selector.category)
        .await
        .map_err(|err| storage_error(&state, "delete", &err))?;

    let response = match outcome {
        DeleteOutcome::Deleted { .. } => {
            state.telemetry.inc_device_op("delete", "deleted");
            DeviceActionResponse {
                status: DeviceActionStatus::Deleted,
                category: selector.category,
                cat_metric: None,
            }
        }
        DeleteOutcome::NotFound => {
            state.telemetry.inc_device_op("delete", "not_found");
            DeviceActionResponse {
                status: DeviceActionStatus::NotFound,
                category: selector.category,
                cat_metric: None,
            }
        }
    };
    Ok(Json(response))
}

fn validation_error(params: Vec<ProblemInvalidParam>) -> ApiError {
    ApiError::invalid_request("request body failed validation").with_invalid_params(params)
}

fn storage_error(state: &ApiState, operation: &'static str, err: &DataError) -> ApiError {
    state.telemetry.inc_store_failure();
    error!(error = %err, operation, "device store operation failed");
    ApiError::internal("device store operation failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DeviceFacade, SharedStore};
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use dialtone_data::{DataResult, DeviceSummaryRow, DeviceVariableRow};
    use dialtone_telemetry::Metrics;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct MockCategory {
        category: String,
        cat_metric: i32,
        variables: Vec<(String, String)>,
    }

    #[derive(Clone, Default)]
    struct MockStore {
        inner: Arc<Mutex<Vec<MockCategory>>>,
        fail: Arc<AtomicBool>,
    }

    impl MockStore {
        fn with_category(self, category: &str, cat_metric: i32, variables: &[(&str, &str)]) -> Self {
            self.inner.lock().expect("mock lock").push(MockCategory {
                category: category.to_string(),
                cat_metric,
                variables: variables
                    .iter()
                    .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
                    .collect(),
            });
            self
        }

        fn set_fail(&self, flag: bool) {
            self.fail.store(flag, Ordering::SeqCst);
        }

        fn guard(&self) -> DataResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(DataError::QueryFailed {
                    operation: "mock",
                    source: sqlx::Error::PoolTimedOut,
                });
            }
            Ok(())
        }

        fn variables_of(&self, category: &str) -> Vec<(String, String)> {
            self.inner
                .lock()
                .expect("mock lock")
                .iter()
                .find(|entry| entry.category == category)
                .map(|entry| entry.variables.clone())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl DeviceFacade for MockStore {
        async fn list_devices(&self) -> DataResult<Vec<DeviceSummaryRow>> {
            self.guard()?;
            let mut rows: Vec<DeviceSummaryRow> = self
                .inner
                .lock()
                .expect("mock lock")
                .iter()
                .map(|entry| DeviceSummaryRow {
                    category: entry.category.clone(),
                    cat_metric: entry.cat_metric,
                })
                .collect();
            rows.sort_by(|a, b| a.category.cmp(&b.category));
            Ok(rows)
        }

        async fn device_by_metric(&self, cat_metric: i32) -> DataResult<Vec<DeviceVariableRow>> {
            self.guard()?;
            Ok(self
                .inner
                .lock()
                .expect("mock lock")
                .iter()
                .filter(|entry| entry.cat_metric == cat_metric)
                .flat_map(|entry| entry.variables.iter().enumerate())
                .map(|(index, (name, value))| DeviceVariableRow {
                    id: i64::try_from(index).expect("index fits") + 1,
                    var_name: name.clone(),
                    var_val: value.clone(),
                })
                .collect())
        }

        async fn create_device(
            &self,
            category: &str,
            variables: &[(String, String)],
        ) -> DataResult<CreateOutcome> {
            self.guard()?;
            let mut guard = self.inner.lock().expect("mock lock");
            if guard.iter().any(|entry| entry.category == category) {
                return Ok(CreateOutcome::AlreadyExists);
            }
            let cat_metric = guard.iter().map(|entry| entry.cat_metric).max().unwrap_or(0) + 1;
            guard.push(MockCategory {
                category: category.to_string(),
                cat_metric,
                variables: variables.to_vec(),
            });
            Ok(CreateOutcome::Created {
                cat_metric,
                variables: variables.len(),
            })
        }

        async fn merge_device(
            &self,
            category: &str,
            variables: &[(String, String)],
        ) -> DataResult<MergeOutcome> {
            self.guard()?;
            let mut guard = self.inner.lock().expect("mock lock");
            let Some(entry) = guard.iter_mut().find(|entry| entry.category == category) else {
                return Ok(MergeOutcome::NotFound);
            };
            let mut inserted = 0;
            let mut updated = 0;
            for (name, value) in variables {
                match entry.variables.iter_mut().find(|(seen, _)| seen == name) {
                    Some(existing) => {
                        existing.1 = value.clone();
                        updated += 1;
                    }
                    None => {
                        entry.variables.push((name.clone(), value.clone()));
                        inserted += 1;
                    }
                }
            }
            Ok(MergeOutcome::Merged {
                cat_metric: entry.cat_metric,
                inserted,
                updated,
            })
        }

        async fn delete_device(&self, category: &str) -> DataResult<DeleteOutcome> {
            self.guard()?;
            let mut guard = self.inner.lock().expect("mock lock");
            let Some(position) = guard.iter().position(|entry| entry.category == category) else {
                return Ok(DeleteOutcome::NotFound);
            };
            let removed = guard.remove(position);
            Ok(DeleteOutcome::Deleted {
                rows: u64::try_from(removed.variables.len()).expect("row count fits"),
            })
        }

        async fn ping(&self) -> DataResult<()> {
            self.guard()
        }
    }

    fn state_with(store: &MockStore) -> Arc<ApiState> {
        let shared: SharedStore = Arc::new(store.clone());
        Arc::new(ApiState::new(
            shared,
            Metrics::new().expect("metrics registry"),
        ))
    }

    fn body(raw: &str) -> DeviceWriteRequest {
        serde_json::from_str(raw).expect("body parses")
    }

    #[tokio::test]
    async fn listing_returns_summaries_ordered_by_category() {
        let store = MockStore::default()
            .with_category("601", 2, &[("host", "dynamic")])
            .with_category("600", 1, &[("host", "dynamic")]);
        let state = state_with(&store);

        let Json(devices) = list_devices(State(state)).await.expect("list");
        let names: Vec<&str> = devices.iter().map(|d| d.category.as_str()).collect();
        assert_eq!(names, ["600", "601"]);
        assert_eq!(devices[0].cat_metric, 1);
    }

    #[tokio::test]
    async fn create_rejects_missing_required_fields() {
        let store = MockStore::default();
        let state = state_with(&store);

        let error = create_device(State(state), Json(body(r#"{"category":"600","host":"x"}"#)))
            .await
            .expect_err("validation failure");
        assert_eq!(error.status, StatusCode::UNPROCESSABLE_ENTITY);
        let params = error.invalid_params.expect("invalid params");
        let pointers: Vec<&str> = params.iter().map(|p| p.pointer.as_str()).collect();
        assert_eq!(pointers, ["/context", "/type"]);
    }

    #[tokio::test]
    async fn create_allocates_a_metric_for_new_categories() {
        let store = MockStore::default();
        let state = state_with(&store);

        let Json(response) = create_device(
            State(state),
            Json(body(
                r#"{"category":"600","context":"ltiit","host":"dynamic","type":"friend"}"#,
            )),
        )
        .await
        .expect("create");
        assert_eq!(response.status, DeviceActionStatus::Created);
        assert_eq!(response.category, "600");
        assert_eq!(response.cat_metric, Some(1));
        assert_eq!(
            store.variables_of("600"),
            vec![
                ("context".to_string(), "ltiit".to_string()),
                ("host".to_string(), "dynamic".to_string()),
                ("type".to_string(), "friend".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn create_reports_conflicts_softly() {
        let store = MockStore::default().with_category("600", 1, &[("host", "dynamic")]);
        let state = state_with(&store);

        let Json(response) = create_device(
            State(state),
            Json(body(
                r#"{"category":"600","context":"ltiit","host":"dynamic","type":"friend"}"#,
            )),
        )
        .await
        .expect("soft conflict");
        assert_eq!(response.status, DeviceActionStatus::AlreadyExists);
        assert_eq!(response.cat_metric, None);
        assert_eq!(store.variables_of("600").len(), 1, "conflict must not mutate");
    }

    #[tokio::test]
    async fn merge_requires_a_category() {
        let store = MockStore::default();
        let state = state_with(&store);

        let error = merge_device(State(state), Json(body(r#"{"host":"static"}"#)))
            .await
            .expect_err("validation failure");
        assert_eq!(error.status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn merge_updates_and_appends_through_the_store() {
        let store = MockStore::default().with_category("600", 4, &[("host", "dynamic")]);
        let state = state_with(&store);

        let Json(response) = merge_device(
            State(state),
            Json(body(r#"{"category":"600","host":"static","secret":"abc"}"#)),
        )
        .await
        .expect("merge");
        assert_eq!(response.status, DeviceActionStatus::Merged);
        assert_eq!(response.cat_metric, Some(4));
        assert_eq!(
            store.variables_of("600"),
            vec![
                ("host".to_string(), "static".to_string()),
                ("secret".to_string(), "abc".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn merge_of_unknown_category_is_a_soft_not_found() {
        let store = MockStore::default();
        let state = state_with(&store);

        let Json(response) = merge_device(
            State(state),
            Json(body(r#"{"category":"600","host":"static"}"#)),
        )
        .await
        .expect("soft not found");
        assert_eq!(response.status, DeviceActionStatus::NotFound);
    }

    #[tokio::test]
    async fn delete_reports_soft_not_found_and_success() {
        let store = MockStore::default().with_category("600", 1, &[("host", "dynamic")]);
        let state = state_with(&store);

        let Json(response) = delete_device(
            State(state.clone()),
            Json(DeviceSelector {
                category: "600".to_string(),
            }),
        )
        .await
        .expect("delete");
        assert_eq!(response.status, DeviceActionStatus::Deleted);

        let Json(response) = delete_device(
            State(state),
            Json(DeviceSelector {
                category: "600".to_string(),
            }),
        )
        .await
        .expect("repeat delete");
        assert_eq!(response.status, DeviceActionStatus::NotFound);
    }

    #[tokio::test]
    async fn metric_lookup_returns_rows_or_404() {
        let store = MockStore::default().with_category("600", 7, &[("host", "dynamic")]);
        let state = state_with(&store);

        let Json(rows) = device_by_metric(State(state.clone()), AxumPath(7))
            .await
            .expect("detail");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].var_name, "host");

        let error = device_by_metric(State(state), AxumPath(8))
            .await
            .expect_err("unknown metric");
        assert_eq!(error.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn storage_failures_surface_as_internal_errors() {
        let store = MockStore::default();
        store.set_fail(true);
        let state = state_with(&store);

        let error = list_devices(State(state.clone()))
            .await
            .expect_err("storage failure");
        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(state.telemetry.snapshot().store_failures_total, 1);
    }
}
