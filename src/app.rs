use axum::{
    Router,
    extract::Request,
    middleware::{Next, from_fn, from_fn_with_state},
    response::{Html, Response},
    routing::{get, post, put},
};
use log::{info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use uuid::Uuid;

use crate::auth::{self, AuthState};
use crate::catalog;
use crate::chatbot::{self, ChatClient};
use crate::checkout::Checkout;
use crate::config::AppConfig;
use crate::graph;
use crate::inventory;
use crate::mailer::{Mailer, Notifier, Outbox};
use crate::materials;
use crate::payment::{PaymentGateway, SimulatedGateway};
use crate::production;
use crate::store::Database;
use crate::vendor;

/// Everything a request handler can reach.
pub struct AppState {
    pub config: AppConfig,
    pub db: Database,
    pub auth: AuthState,
    pub notifier: Arc<dyn Notifier>,
    pub gateway: Arc<dyn PaymentGateway>,
    /// In-flight checkouts keyed by user id. Not persisted. The map lock
    /// is only held to find a user's entry; each checkout has its own lock.
    pub checkouts: Mutex<HashMap<Uuid, Arc<Mutex<Checkout>>>>,
    pub chat: Option<ChatClient>,
}

pub type SharedState = Arc<AppState>;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

impl AppState {
    pub fn new(
        config: AppConfig,
        db: Database,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let gateway = Arc::new(SimulatedGateway::new(notifier.clone(), config.otp_ttl));
        let chat = match &config.chat {
            Some(chat) => Some(ChatClient::new(chat.clone())?),
            None => {
                warn!("no chat API key configured, assistant disabled");
                None
            }
        };

        Ok(AppState {
            auth: AuthState::new(config.session_ttl),
            config,
            db,
            notifier,
            gateway,
            checkouts: Mutex::new(HashMap::new()),
            chat,
        })
    }

    /// Open the configured tables and pick a mail transport.
    pub fn from_config(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let db = match &config.database_dir {
            Some(dir) => {
                info!("opening tables under {}", dir.display());
                Database::open(dir)?
            }
            None => {
                warn!("no database directory, data will not survive a restart");
                Database::in_memory()
            }
        };

        let notifier: Arc<dyn Notifier> = match &config.smtp {
            Some(smtp) => Arc::new(Mailer::new(smtp)?),
            None => {
                warn!("no SMTP relay configured, codes are only logged");
                Arc::new(Outbox::new())
            }
        };

        Self::new(config, db, notifier)
    }

    /// The checkout for `user_id`, created on first use.
    pub fn checkout_for(&self, user_id: Uuid) -> Arc<Mutex<Checkout>> {
        self.checkouts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(user_id)
            .or_default()
            .clone()
    }

    /// Forget the checkout for `user_id` and void its pending charge.
    pub fn end_checkout(&self, user_id: Uuid) {
        let removed = self
            .checkouts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&user_id);
        if let Some(checkout) = removed {
            checkout
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .abandon(self.gateway.as_ref());
        }
    }

    /// Close expired sessions, drop checkouts whose owner has no live
    /// session and release expired authorizations.
    pub fn sweep(&self) {
        self.auth.sweep_expired(&self.db);

        let owners: Vec<Uuid> = self
            .checkouts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();
        for user_id in owners {
            if !self.auth.has_session(user_id) {
                self.end_checkout(user_id);
            }
        }

        self.gateway.sweep_expired();
    }
}

pub fn build_router(state: SharedState) -> Router {
    let pages = [
        "/",
        "/about",
        "/inventory",
        "/production",
        "/materials-request",
        "/vendor-management",
        "/contact",
        "/login",
        "/signup",
    ]
    .into_iter()
    .fold(Router::new(), |router, path| router.route(path, get(serve_shell)));

    let public = Router::new()
        .route("/api/auth/signup", post(auth::handle_signup))
        .route("/api/auth/confirm", post(auth::handle_confirm))
        .route("/api/auth/resend", post(auth::handle_resend_confirmation))
        .route("/api/auth/login", post(auth::handle_login))
        .route("/api/auth/logout", post(auth::handle_logout))
        .route("/api/auth/session", get(auth::handle_session))
        // writes check the session themselves to report which page needs it
        .route(
            "/api/inventory",
            get(inventory::handle_list).post(inventory::handle_add),
        )
        .route("/api/inventory/summary", get(inventory::handle_summary))
        .route("/api/inventory/export.csv", get(inventory::handle_export_csv))
        .route("/api/inventory/export.xlsx", get(inventory::handle_export_xlsx))
        .route("/api/inventory/:id", put(inventory::handle_update))
        .route(
            "/api/production",
            get(production::handle_list).post(production::handle_add),
        )
        .route("/api/production/overview", get(production::handle_overview))
        .route(
            "/api/production/charts/monthly.png",
            get(graph::handle_monthly_chart),
        )
        .route(
            "/api/production/charts/efficiency.png",
            get(graph::handle_efficiency_chart),
        )
        .route("/api/vendors", get(catalog::handle_vendors))
        .route("/api/products", get(catalog::handle_products))
        .route("/api/payments/webhook", post(vendor::handle_webhook))
        .route("/api/chat", post(chatbot::handle_chat));

    let protected = Router::new()
        .route(
            "/api/materials",
            get(materials::handle_list).post(materials::handle_submit),
        )
        .route("/api/materials/summary", get(materials::handle_summary))
        .route("/api/materials/track/:request_id", get(materials::handle_track))
        .route("/api/materials/:id/status", put(materials::handle_change_status))
        .route("/api/orders", get(vendor::handle_orders))
        .route("/api/checkout", get(vendor::handle_view))
        .route("/api/checkout/cart", post(vendor::handle_add_to_cart))
        .route(
            "/api/checkout/cart/:index",
            put(vendor::handle_update_line).delete(vendor::handle_remove_line),
        )
        .route("/api/checkout/buy-now", post(vendor::handle_buy_now))
        .route("/api/checkout/begin", post(vendor::handle_begin))
        .route("/api/checkout/payment", post(vendor::handle_payment))
        .route(
            "/api/checkout/payment/cancel",
            post(vendor::handle_cancel_payment),
        )
        .route("/api/checkout/otp", post(vendor::handle_verify_otp))
        .route("/api/checkout/otp/cancel", post(vendor::handle_cancel_otp))
        .route("/api/checkout/reset", post(vendor::handle_reset))
        .layer(from_fn_with_state(state.clone(), auth::require_auth));

    pages
        .merge(public)
        .merge(protected)
        .nest_service("/static", ServeDir::new(&state.config.static_dir))
        .with_state(state)
        .layer(from_fn(log_requests))
}

async fn serve_shell() -> Html<&'static str> {
    Html(include_str!("./static/index.html"))
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;
    info!(
        "{} {} {} {}ms",
        method,
        path,
        response.status().as_u16(),
        started.elapsed().as_millis()
    );
    response
}

async fn sweep_periodically(state: SharedState) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        ticker.tick().await;
        let state = state.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || state.sweep()).await {
            warn!("sweep failed: {}", e);
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {}", e);
    }
    info!("shutting down");
}

pub async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::from_config(config)?);
    let app = build_router(state.clone());

    let listener = TcpListener::bind(&bind_addr).await?;
    info!("Listening on http://{}", bind_addr);
    let sweeper = tokio::spawn(sweep_periodically(state.clone()));
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    sweeper.abort();
    served?;

    state.auth.shutdown(&state.db);
    Ok(())
}
