//! HTTP surface of the control plane
//!
//! Thin translation layer: request bodies are validated, defaults from
//! configuration are applied, and facade outcomes are mapped onto status
//! codes. Validation failures never mutate state.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use corral::{ControlPlane, PodPlacement};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn router(control: Arc<ControlPlane>) -> Router {
    Router::new()
        .route("/add_node", post(add_node))
        .route("/remove_node", post(remove_node))
        .route("/schedule_pod", post(schedule_pod))
        .route("/list_nodes", get(list_nodes))
        .route("/get_rescheduled_pods", get(get_rescheduled_pods))
        .route("/get_pending_pods", get(get_pending_pods))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(control)
}

fn bad_request(message: impl std::fmt::Display) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": message.to_string() })),
    )
        .into_response()
}

#[derive(Deserialize)]
struct AddNodeRequest {
    node_id: Option<String>,
    cpu_capacity: Option<u32>,
}

async fn add_node(
    State(control): State<Arc<ControlPlane>>,
    Json(request): Json<AddNodeRequest>,
) -> Response {
    let Some(node_id) = request.node_id.filter(|id| !id.is_empty()) else {
        return bad_request("node_id is required");
    };
    let cpu_capacity = request
        .cpu_capacity
        .unwrap_or(control.config().default_node_cpu);

    match control.add_node(&node_id, cpu_capacity).await {
        Ok(registration) => {
            let mut message = format!("Node {} added with {} CPU", node_id, cpu_capacity);
            if registration.degraded {
                message.push_str(&format!(
                    " (backing degraded to simulated: {})",
                    registration.handle.id()
                ));
            }
            (StatusCode::CREATED, Json(json!({ "message": message }))).into_response()
        }
        Err(e) => bad_request(e),
    }
}

#[derive(Deserialize)]
struct RemoveNodeRequest {
    node_id: Option<String>,
}

async fn remove_node(
    State(control): State<Arc<ControlPlane>>,
    Json(request): Json<RemoveNodeRequest>,
) -> Response {
    let Some(node_id) = request.node_id.filter(|id| !id.is_empty()) else {
        return bad_request("node_id is required");
    };

    match control.remove_node(&node_id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "message": format!("Node {} removed successfully", node_id) })),
        )
            .into_response(),
        Err(e) => bad_request(e),
    }
}

#[derive(Deserialize)]
struct SchedulePodRequest {
    pod_id: Option<String>,
    cpu_request: Option<u32>,
}

async fn schedule_pod(
    State(control): State<Arc<ControlPlane>>,
    Json(request): Json<SchedulePodRequest>,
) -> Response {
    let Some(pod_id) = request.pod_id.filter(|id| !id.is_empty()) else {
        return bad_request("pod_id is required");
    };
    let cpu_request = request
        .cpu_request
        .unwrap_or(control.config().default_pod_cpu);

    match control.schedule_pod(&pod_id, cpu_request).await {
        Ok(PodPlacement::Scheduled { node }) => (
            StatusCode::CREATED,
            Json(json!({
                "message": format!("Pod {} scheduled on node {}", pod_id, node),
                "node": node,
            })),
        )
            .into_response(),
        Ok(PodPlacement::AlreadyScheduled { node }) => (
            StatusCode::CREATED,
            Json(json!({
                "message": format!("Pod {} already scheduled on node {}", pod_id, node),
                "node": node,
            })),
        )
            .into_response(),
        Ok(PodPlacement::Pending) => bad_request(format!(
            "Could not schedule pod {}: insufficient resources; queued pending",
            pod_id
        )),
        Ok(PodPlacement::RejectedUnhealthy { node }) => bad_request(format!(
            "no healthy node for pod {} (best fit {} is not healthy); queued pending",
            pod_id, node
        )),
        Err(e) => bad_request(e),
    }
}

async fn list_nodes(State(control): State<Arc<ControlPlane>>) -> Response {
    (StatusCode::OK, Json(control.status())).into_response()
}

async fn get_rescheduled_pods(State(control): State<Arc<ControlPlane>>) -> Response {
    (
        StatusCode::OK,
        Json(json!({ "rescheduled_pods": control.take_rescheduled() })),
    )
        .into_response()
}

async fn get_pending_pods(State(control): State<Arc<ControlPlane>>) -> Response {
    let pending: serde_json::Map<String, serde_json::Value> = control
        .pending_pods()
        .into_iter()
        .map(|(pod_id, cpu_request)| (pod_id, json!({ "cpu_request": cpu_request })))
        .collect();

    (StatusCode::OK, Json(json!({ "pending_pods": pending }))).into_response()
}

async fn health() -> Response {
    (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use corral::CorralConfig;
    use tower::ServiceExt;

    fn make_app() -> Router {
        let control = Arc::new(ControlPlane::new(CorralConfig::default()));
        router(control)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_add_node_created() {
        let app = make_app();
        let response = app
            .oneshot(post_json("/add_node", json!({"node_id": "n1"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["message"], "Node n1 added with 100 CPU");
    }

    #[tokio::test]
    async fn test_add_node_requires_id() {
        let app = make_app();
        let response = app
            .oneshot(post_json("/add_node", json!({"cpu_capacity": 50})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "node_id is required");
    }

    #[tokio::test]
    async fn test_duplicate_node_is_rejected() {
        let app = make_app();
        app.clone()
            .oneshot(post_json("/add_node", json!({"node_id": "n1"})))
            .await
            .unwrap();

        let response = app
            .oneshot(post_json("/add_node", json!({"node_id": "n1"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_schedule_pod_and_list() {
        let app = make_app();
        app.clone()
            .oneshot(post_json(
                "/add_node",
                json!({"node_id": "n1", "cpu_capacity": 100}),
            ))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(post_json(
                "/schedule_pod",
                json!({"pod_id": "p1", "cpu_request": 40}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["node"], "n1");

        let response = app.oneshot(get_req("/list_nodes")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["n1"]["cpu_available"], 60);
        assert_eq!(body["n1"]["health"], "Healthy");
        assert_eq!(body["n1"]["pods"][0], "p1");
    }

    #[tokio::test]
    async fn test_unplaceable_pod_is_reported_pending() {
        let app = make_app();

        let response = app
            .clone()
            .oneshot(post_json("/schedule_pod", json!({"pod_id": "p1"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app.oneshot(get_req("/get_pending_pods")).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["pending_pods"]["p1"]["cpu_request"], 10);
    }

    #[tokio::test]
    async fn test_remove_node_and_rescheduled_report() {
        let app = make_app();
        for node in ["n1", "n2"] {
            app.clone()
                .oneshot(post_json("/add_node", json!({"node_id": node})))
                .await
                .unwrap();
        }
        app.clone()
            .oneshot(post_json(
                "/schedule_pod",
                json!({"pod_id": "p1", "cpu_request": 30}),
            ))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(post_json("/remove_node", json!({"node_id": "n1"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // The report is consumed by the first read
        let response = app
            .clone()
            .oneshot(get_req("/get_rescheduled_pods"))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["rescheduled_pods"]["p1"]["new_node"], "n2");
        assert_eq!(body["rescheduled_pods"]["p1"]["status"], "rescheduled");

        let response = app
            .oneshot(get_req("/get_rescheduled_pods"))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert!(body["rescheduled_pods"]
            .as_object()
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_remove_unknown_node() {
        let app = make_app();
        let response = app
            .oneshot(post_json("/remove_node", json!({"node_id": "ghost"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = make_app();
        let response = app.oneshot(get_req("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
