use crate::{
    directory::Directory,
    email::EmailSender,
    mac::vendor::VendorLookup,
    recovery::{EmailCodeStrategy, PinStrategy, RecoveryWizard, SessionStore, TotpStrategy},
    store::{DeviceStore, PgStore, UserStore},
    sync::{SyncService, spawn_sync_worker},
    totp::TotpService,
};
use anyhow::Result;
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use utoipa_axum::router::OpenApiRouter;
use utoipa_swagger_ui::SwaggerUi;

pub mod error;
pub(crate) mod handlers;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;

pub use error::{ApiError, ErrorBody};
pub use openapi::openapi;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

#[derive(Debug, Clone)]
pub struct RecoverySettings {
    pub session_ttl: Duration,
    pub totp_issuer: String,
}

/// Services shared by every handler.
pub struct AppState {
    pub users: Arc<dyn UserStore>,
    pub devices: Arc<dyn DeviceStore>,
    pub sync: SyncService,
    pub wizard: RecoveryWizard,
    pub totp: TotpService,
    pub vendors: VendorLookup,
}

impl AppState {
    /// Wire the sync service and the three recovery channels over `store`.
    pub fn new<S>(
        store: Arc<S>,
        directory: Arc<dyn Directory>,
        email: Arc<dyn EmailSender>,
        vendors: VendorLookup,
        recovery: RecoverySettings,
    ) -> Self
    where
        S: UserStore + DeviceStore + 'static,
    {
        let users: Arc<dyn UserStore> = store.clone();
        let devices: Arc<dyn DeviceStore> = store;
        let sync = SyncService::new(users.clone(), directory);
        let totp = TotpService::new(recovery.totp_issuer);

        let wizard = RecoveryWizard::new(
            users.clone(),
            sync.clone(),
            SessionStore::new(recovery.session_ttl),
        )
        .with_strategy(Arc::new(EmailCodeStrategy::new(email, recovery.session_ttl)))
        .with_strategy(Arc::new(PinStrategy))
        .with_strategy(Arc::new(TotpStrategy::new(totp.clone())));

        Self {
            users,
            devices,
            sync,
            wizard,
            totp,
            vendors,
        }
    }
}

/// Everything the server needs besides the database.
pub struct Dependencies {
    pub directory: Arc<dyn Directory>,
    pub email: Arc<dyn EmailSender>,
    pub vendors: VendorLookup,
    pub recovery: RecoverySettings,
    /// `None` disables the directory resync sweep.
    pub sync_interval: Option<Duration>,
}

/// Router with documentation, request ids and tracing, ready to serve.
pub fn app(state: Arc<AppState>) -> Router {
    let (router, openapi) = router().split_for_parts();

    router
        .merge(SwaggerUi::new("/docs").url("/openapi.json", openapi))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(state)),
        )
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, dsn: &str, deps: Dependencies) -> Result<()> {
    let store = Arc::new(PgStore::connect(dsn).await?);
    let state = Arc::new(AppState::new(
        store,
        deps.directory,
        deps.email,
        deps.vendors,
        deps.recovery,
    ));

    // Best-effort reconciliation of passwords the directory missed.
    if let Some(interval) = deps.sync_interval {
        spawn_sync_worker(state.sync.clone(), interval);
        info!("Directory resync every {}s", interval.as_secs());
    }

    let app = app(state);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
