use anyhow::Context;
use medhealth_vitals::api::HttpBackend;
use medhealth_vitals::auth::SessionStore;
use medhealth_vitals::config::Settings;
use medhealth_vitals::monitor::View;
use medhealth_vitals::notify::{Permission, TracingNotifier};
use medhealth_vitals::runtime::{self, RuntimeConfig, RuntimeDeps};
use medhealth_vitals::stream::StompConnector;
use medhealth_vitals::{logging, metrics, status};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    // Load configuration
    let settings = Settings::new().context("Failed to load configuration")?;

    // Initialize logging
    logging::init_logging(&settings.logging).context("Failed to initialize logging")?;
    metrics::init_metrics().map_err(|e| anyhow::anyhow!("Failed to register metrics: {}", e))?;

    info!("🚀 MedHealth vitals monitor starting...");
    info!("Backend: {} | stream: {}", settings.backend.rest_base_url(), settings.backend.stream_url());

    let session = Arc::new(SessionStore::from_config(&settings.session).context("Invalid session configuration")?);
    let identity = session
        .identity()
        .context("No session configured: set MEDHEALTH__SESSION__TOKEN or MEDHEALTH__SESSION__USERNAME")?;
    info!("Signed in as {} ({:?})", identity.username, identity.role);

    // Initialize services
    let api = Arc::new(HttpBackend::new(&settings.backend, session.clone())?);
    let connector = Arc::new(StompConnector::new(
        settings.backend.stream_url(),
        settings.backend.host.clone(),
        session.clone(),
        Duration::from_millis(settings.backend.request_timeout_ms),
    ));
    let notifier = Arc::new(TracingNotifier::new(Permission::parse(&settings.vitals.notifications)));

    let handle = runtime::spawn(
        RuntimeDeps {
            api,
            connector,
            notifier,
            session,
        },
        RuntimeConfig::from_settings(&settings),
    )?;

    if !identity.is_patient() {
        if let Some(subject) = settings.session.subject.clone() {
            if let Err(e) = handle.select(subject.clone()).await {
                warn!("Could not open {}: {}", subject, e);
            }
        }
    }

    let status_server = if settings.status.enabled {
        info!("🌐 Status server on {}", settings.status.bind_addr);
        let server = status::serve(&settings.status, handle.views())?;
        let server_handle = server.handle();
        actix_rt::spawn(server);
        Some(server_handle)
    } else {
        None
    };

    info!("✅ Monitor running");

    let mut views = handle.views();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
            changed = views.changed() => {
                if changed.is_err() {
                    error!("Monitor runtime stopped unexpectedly");
                    break;
                }
                log_view(&views.borrow_and_update());
            }
        }
    }

    handle.shutdown().await;
    if let Some(server) = status_server {
        server.stop(true).await;
    }
    info!("👋 MedHealth vitals monitor stopped");
    Ok(())
}

fn log_view(view: &View) {
    match view {
        View::Lockdown { reason } => {
            warn!("🔒 SYSTEM LOCKDOWN: {}", reason.as_deref().unwrap_or("no reason given"));
        }
        View::List {
            viewer,
            connection,
            patients,
        } => info!("Ward list for {} | {} | {} patients", viewer, connection.label(), patients.len()),
        View::Detail {
            subject,
            connection,
            history,
            critical,
            samples,
            ..
        } => info!(
            subject = %subject,
            history = ?history,
            critical = *critical,
            "{} | {} samples",
            connection.label(),
            samples.len()
        ),
    }
}
