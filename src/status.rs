use crate::config::StatusConfig;
use crate::metrics::metrics_handler;
use crate::monitor::View;
use actix_cors::Cors;
use actix_web::dev::Server;
use actix_web::{http::header, web, App, HttpResponse, HttpServer, Responder};
use async_stream::stream;
use serde_json::json;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Shared state of the status surface: the runtime's view channel.
#[derive(Clone)]
pub struct StatusState {
    pub views: watch::Receiver<View>,
}

pub async fn health_check(state: web::Data<StatusState>) -> impl Responder {
    let view = state.views.borrow().clone();
    let mode = match &view {
        View::Lockdown { .. } => "lockdown",
        View::List { .. } => "list",
        View::Detail { .. } => "detail",
    };
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "medhealth-vitals",
        "mode": mode,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Current view as JSON.
pub async fn current_view(state: web::Data<StatusState>) -> impl Responder {
    let view = state.views.borrow().clone();
    HttpResponse::Ok().json(view)
}

/// SSE stream of view changes. The current view is sent first.
pub async fn stream_view(state: web::Data<StatusState>) -> impl Responder {
    let views = WatchStream::new(state.views.clone());

    let event_stream = stream! {
        tokio::pin!(views);
        let mut heartbeat_interval = interval(HEARTBEAT_INTERVAL);
        // The first tick completes immediately; skip it.
        heartbeat_interval.tick().await;

        loop {
            tokio::select! {
                _ = heartbeat_interval.tick() => {
                    let beat = json!({"timestamp": chrono::Utc::now().timestamp()});
                    yield Ok::<_, actix_web::Error>(web::Bytes::from(format!("event: heartbeat\ndata: {}\n\n", beat)));
                }
                next = views.next() => {
                    let Some(view) = next else {
                        break;
                    };
                    if let Ok(data) = serde_json::to_string(&view) {
                        yield Ok::<_, actix_web::Error>(web::Bytes::from(format!("event: view\ndata: {}\n\n", data)));
                    }
                }
            }
        }
    };

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(event_stream)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/metrics", web::get().to(metrics_handler))
        .route("/api/view", web::get().to(current_view))
        .route("/api/stream/view", web::get().to(stream_view));
}

/// Build the operator status server. The caller drives the returned future.
pub fn serve(config: &StatusConfig, views: watch::Receiver<View>) -> std::io::Result<Server> {
    let state = web::Data::new(StatusState { views });
    let origins = config.allowed_origins.clone();

    let server = HttpServer::new(move || {
        let mut cors = Cors::default()
            .allowed_methods(vec!["GET", "OPTIONS"])
            .allowed_headers(vec![header::CONTENT_TYPE, header::ACCEPT])
            .max_age(3600);
        for origin in &origins {
            cors = cors.allowed_origin(origin);
        }

        App::new()
            .wrap(tracing_actix_web::TracingLogger::default())
            .wrap(cors)
            .app_data(state.clone())
            .configure(configure)
    })
    .workers(1)
    .bind(config.bind_addr.as_str())?
    .run();

    Ok(server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{ConnectionState, WardEntry};
    use actix_web::{body::to_bytes, test};

    fn ward_list() -> View {
        View::List {
            viewer: "dr_a".to_string(),
            connection: ConnectionState::Connected,
            patients: vec![WardEntry {
                subject_id: "p1".to_string(),
                heart_rate: 72,
                spo2: 98.0,
            }],
        }
    }

    fn state(view: View) -> (watch::Sender<View>, web::Data<StatusState>) {
        let (tx, rx) = watch::channel(view);
        (tx, web::Data::new(StatusState { views: rx }))
    }

    #[actix_web::test]
    async fn test_health_reports_mode() {
        let (_tx, data) = state(View::Lockdown { reason: None });
        let app = test::init_service(App::new().app_data(data).configure(configure)).await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["mode"], "lockdown");
    }

    #[actix_web::test]
    async fn test_current_view_is_tagged_json() {
        let (_tx, data) = state(ward_list());
        let app = test::init_service(App::new().app_data(data).configure(configure)).await;

        let req = test::TestRequest::get().uri("/api/view").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["mode"], "list");
        assert_eq!(body["viewer"], "dr_a");
        assert_eq!(body["connection"], "connected");
        assert_eq!(body["patients"][0]["subject_id"], "p1");
        assert_eq!(body["patients"][0]["heart_rate"], 72);
    }

    #[actix_web::test]
    async fn test_stream_sends_current_view_first() {
        let (tx, data) = state(ward_list());
        let resp = stream_view(data).await.respond_to(&test::TestRequest::default().to_http_request());
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "text/event-stream"
        );

        // Closing the channel ends the stream after the initial event.
        drop(tx);
        let body = to_bytes(resp.into_body()).await.unwrap_or_default();
        let text = String::from_utf8_lossy(&body);
        assert!(text.starts_with("event: view\n"));
        assert!(text.contains("\"viewer\":\"dr_a\""));
    }
}
