//! HTTP handlers for the `/api/v1` routes and the health check.
//!
//! Handlers only extract and serialize; the work happens in
//! [`crate::service::DeviceService`]. Every failure, body rejections
//! included, is answered with a JSON [`DeviceError`] body.

use axum::{
    extract::{FromRequest, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::DeviceError;
use crate::models::{
    ConfigurePortRequest, ConfigureResponse, ConfigureRouterRequest, ConnectRouterRequest,
    ConnectRouterResponse, ConnectionInfo, CreateConnectionRequest, CreateRouterRequest,
    PacketRequest, PacketResult, Router,
};
use crate::state::AppState;

type ApiResult<T> = Result<Json<T>, DeviceError>;

/// `Json` extractor whose rejections become [`DeviceError`] responses.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(DeviceError))]
pub struct ApiJson<T>(pub T);

/// Query parameters for the connections-by-router endpoint.
#[derive(Debug, Deserialize)]
pub struct IpQuery {
    #[serde(default, deserialize_with = "empty_string_as_none_str")]
    pub ip: Option<String>,
}

fn empty_string_as_none_str<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    match opt {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => Ok(Some(s)),
    }
}

/// GET /health - Liveness check.
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /routers - Create a router with an allocated IP and default ports.
pub async fn create_router(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<CreateRouterRequest>,
) -> Result<(StatusCode, Json<Router>), DeviceError> {
    let router = state.devices.create_router(&req)?;
    Ok((StatusCode::CREATED, Json(router)))
}

/// GET /routers - All routers with their ports.
pub async fn list_routers(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Router>> {
    state.devices.routers().map(Json)
}

/// GET /routers/{id}
pub async fn get_router(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> ApiResult<Router> {
    state.devices.router(id).map(Json)
}

/// GET /routers/ip/{ip}
pub async fn get_router_by_ip(
    State(state): State<Arc<AppState>>,
    Path(ip): Path<String>,
) -> ApiResult<Router> {
    state.devices.router_at(&ip).map(Json)
}

/// POST /routers/connect - Attach this host to a router.
pub async fn connect_router(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<ConnectRouterRequest>,
) -> ApiResult<ConnectRouterResponse> {
    state.devices.connect_router(&req.ip_address).map(Json)
}

/// POST|PATCH /routers/configure - Rename a router or change its status.
pub async fn configure_router(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<ConfigureRouterRequest>,
) -> ApiResult<ConfigureResponse> {
    state.devices.configure_router(&req).map(Json)
}

/// POST|PATCH /ports/configure - Create or update a port.
pub async fn configure_port(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<ConfigurePortRequest>,
) -> ApiResult<ConfigureResponse> {
    state.devices.configure_port(&req)?;
    Ok(Json(ConfigureResponse {
        success: true,
        message: "Port configured successfully".to_string(),
    }))
}

/// POST /routers/connection - Link two routers.
pub async fn create_connection(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<CreateConnectionRequest>,
) -> Result<impl IntoResponse, DeviceError> {
    let created = state
        .devices
        .create_connection(&req.router_from_ip, &req.router_to_ip)?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /routers/connections
pub async fn list_connections(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<ConnectionInfo>> {
    state.devices.connections().map(Json)
}

/// GET /routers/connections/{id}
pub async fn get_connection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> ApiResult<ConnectionInfo> {
    state.devices.connection(id).map(Json)
}

/// GET /routers/connections/by-ip?ip=
pub async fn connections_by_ip(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IpQuery>,
) -> ApiResult<Vec<ConnectionInfo>> {
    let ip = query
        .ip
        .ok_or_else(|| DeviceError::validation("ip", "IP address is required"))?;
    state.devices.connections_of(&ip).map(Json)
}

/// POST /packet - Simulate sending one packet.
pub async fn send_packet(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<PacketRequest>,
) -> ApiResult<PacketResult> {
    state.devices.send_packet(&req).map(Json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeliveryStatus;
    use crate::service::DeviceService;
    use crate::store::MemoryStore;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use serde::de::DeserializeOwned;
    use std::net::Ipv4Addr;
    use tower::ServiceExt;

    fn app() -> axum::Router {
        let devices = DeviceService::new(Arc::new(MemoryStore::new()), Some(42))
            .with_local_addr(|| Some(Ipv4Addr::new(10, 0, 0, 5)));
        crate::app(Arc::new(AppState::new(devices)), None)
    }

    async fn call(
        app: &axum::Router,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn parse<T: DeserializeOwned>(value: serde_json::Value) -> T {
        serde_json::from_value(value).unwrap()
    }

    async fn create(app: &axum::Router, name: &str) -> Router {
        let (status, body) = call(
            app,
            Method::POST,
            "/api/v1/routers",
            Some(serde_json::json!({ "name": name })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        parse(body)
    }

    mod router_endpoint_tests {
        use super::*;

        #[tokio::test]
        async fn test_health() {
            let app = app();
            let (status, body) = call(&app, Method::GET, "/health", None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["status"], "ok");
        }

        #[tokio::test]
        async fn test_create_and_fetch() {
            let app = app();
            let router = create(&app, "edge").await;

            let (status, body) = call(&app, Method::GET, "/api/v1/routers", None).await;
            assert_eq!(status, StatusCode::OK);
            let routers: Vec<Router> = parse(body);
            assert_eq!(routers, vec![router.clone()]);

            let uri = format!("/api/v1/routers/{}", router.id);
            let (status, body) = call(&app, Method::GET, &uri, None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(parse::<Router>(body), router);

            let uri = format!("/api/v1/routers/ip/{}", router.ip_address);
            let (status, _) = call(&app, Method::GET, &uri, None).await;
            assert_eq!(status, StatusCode::OK);

            let (status, body) = call(&app, Method::GET, "/api/v1/routers/99", None).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert!(body["error"].as_str().unwrap().contains("not found"));
        }

        #[tokio::test]
        async fn test_connect_conflict() {
            let app = app();
            let router = create(&app, "edge").await;
            let body = serde_json::json!({ "ip_address": router.ip_address });

            let (status, resp) =
                call(&app, Method::POST, "/api/v1/routers/connect", Some(body.clone())).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(resp["connected"], true);
            assert_eq!(resp["local_ip"], "10.0.0.5");

            let (status, _) =
                call(&app, Method::POST, "/api/v1/routers/connect", Some(body)).await;
            assert_eq!(status, StatusCode::CONFLICT);
        }

        #[tokio::test]
        async fn test_configure_port_validation_names_field() {
            let app = app();
            let router = create(&app, "edge").await;
            let body = serde_json::json!({
                "routerId": router.id.to_string(),
                "portNumber": 8080,
                "protocol": "tcp",
                "status": "up",
                "speed": "7",
                "duplexMode": "full",
            });

            let (status, resp) =
                call(&app, Method::PATCH, "/api/v1/ports/configure", Some(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(resp["field"], "speed");
        }

        #[tokio::test]
        async fn test_mistyped_body_field_is_bad_request() {
            let app = app();
            let router = create(&app, "edge").await;
            let body = serde_json::json!({
                "routerId": router.id.to_string(),
                "portNumber": "eighty",
                "protocol": "tcp",
                "status": "up",
            });

            let (status, resp) =
                call(&app, Method::PATCH, "/api/v1/ports/configure", Some(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(resp["field"], "portNumber");
            assert!(resp["error"].as_str().unwrap().contains("invalid type"));
        }

        #[tokio::test]
        async fn test_malformed_body_is_json_error() {
            let app = app();
            let request = Request::builder()
                .method(Method::POST)
                .uri("/api/v1/routers")
                .header("content-type", "application/json")
                .body(Body::from("{\"name\": "))
                .unwrap();
            let response = app.oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);

            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let resp: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
            assert!(resp["error"].as_str().unwrap().starts_with("invalid request body"));
            assert!(resp.get("field").is_none());
        }

        #[tokio::test]
        async fn test_configure_router() {
            let app = app();
            let router = create(&app, "edge").await;
            let body = serde_json::json!({ "routerId": router.id, "status": "inactive" });

            let (status, resp) =
                call(&app, Method::PATCH, "/api/v1/routers/configure", Some(body)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(resp["success"], true);
        }
    }

    mod connection_endpoint_tests {
        use super::*;

        #[tokio::test]
        async fn test_connection_lifecycle() {
            let app = app();
            let a = create(&app, "a").await;
            let b = create(&app, "b").await;

            let body = serde_json::json!({
                "router_from_ip": a.ip_address,
                "router_to_ip": b.ip_address,
            });
            let (status, _) =
                call(&app, Method::POST, "/api/v1/routers/connection", Some(body)).await;
            assert_eq!(status, StatusCode::CREATED);

            let reverse = serde_json::json!({
                "router_from_ip": b.ip_address,
                "router_to_ip": a.ip_address,
            });
            let (status, _) =
                call(&app, Method::POST, "/api/v1/routers/connection", Some(reverse)).await;
            assert_eq!(status, StatusCode::CONFLICT);

            let (status, body) =
                call(&app, Method::GET, "/api/v1/routers/connections", None).await;
            assert_eq!(status, StatusCode::OK);
            let connections: Vec<ConnectionInfo> = parse(body);
            assert_eq!(connections.len(), 1);
            assert_eq!(connections[0].to_router.id, b.id);

            let uri = format!("/api/v1/routers/connections/by-ip?ip={}", b.ip_address);
            let (status, body) = call(&app, Method::GET, &uri, None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(parse::<Vec<ConnectionInfo>>(body).len(), 1);

            let uri = format!("/api/v1/routers/connections/{}", connections[0].id);
            let (status, body) = call(&app, Method::GET, &uri, None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["router_from_ip"], a.ip_address.as_str());

            let (status, resp) = call(
                &app,
                Method::GET,
                "/api/v1/routers/connections/by-ip?ip=",
                None,
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(resp["field"], "ip");
        }
    }

    mod packet_endpoint_tests {
        use super::*;

        #[tokio::test]
        async fn test_packet_flow() {
            let app = app();
            let r1 = create(&app, "r1").await;
            let r2 = create(&app, "r2").await;
            let packet = serde_json::json!({
                "source_ip": r1.ip_address,
                "destination_ip": r2.ip_address,
                "protocol": "tcp",
                "port": 443,
                "data": "hello",
            });

            let (status, _) = call(&app, Method::POST, "/api/v1/packet", Some(packet.clone())).await;
            assert_eq!(status, StatusCode::CONFLICT);

            let connect = serde_json::json!({ "ip_address": r1.ip_address });
            call(&app, Method::POST, "/api/v1/routers/connect", Some(connect)).await;

            let (status, body) = call(&app, Method::POST, "/api/v1/packet", Some(packet)).await;
            assert_eq!(status, StatusCode::OK);
            let result: PacketResult = parse(body);
            assert_eq!(result.status, DeliveryStatus::Failed);
            assert_eq!(result.error.as_deref(), Some("port 443 is closed"));
        }
    }
}
