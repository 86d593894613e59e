// src/main.rs

mod analytics;
mod app_state;
mod auth;
mod complaint;
mod complaint_image;
mod config;
mod db;
mod error;
mod live_hub;
mod models;
mod notification;
mod password;
mod user_management;
mod web_socket_server;

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use actix::Actor;
use actix_cors::Cors;
use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http,
    middleware::Logger,
    web, App, Error, HttpMessage, HttpResponse, HttpServer,
};
use env_logger::Env;
use futures::future::{ok, Ready};
use log::{info, warn};

use crate::app_state::AppState;
use crate::auth::{validate_jwt, AuthUser};
use crate::live_hub::LiveHub;

/// Attaches an [`AuthUser`] to requests carrying a valid bearer token.
/// Requests without one pass through; handlers decide whether that is enough.
#[derive(Debug)]
pub struct Authentication;

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = AuthMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddleware { service })
    }
}

pub struct AuthMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if let Some(token) = bearer_token(&req) {
            let secret = req
                .app_data::<web::Data<AppState>>()
                .map(|data| data.config.jwt_secret.clone())
                .unwrap_or_default();
            match validate_jwt(&token, &secret) {
                Ok(claims) => {
                    req.extensions_mut().insert(AuthUser::from(claims));
                }
                Err(e) => {
                    warn!("Rejected token on {}: {}", req.path(), e);
                    let (req_parts, _payload) = req.into_parts();
                    let resp = HttpResponse::Unauthorized()
                        .json(serde_json::json!({ "error": "Invalid or expired token" }))
                        .map_into_boxed_body();
                    let srv_resp = ServiceResponse::new(req_parts, resp);
                    return Box::pin(async move { Ok(srv_resp) });
                }
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            Ok(res.map_into_boxed_body())
        })
    }
}

fn bearer_token(req: &ServiceRequest) -> Option<String> {
    let header = req.headers().get(http::header::AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    use crate::{analytics, auth, complaint, complaint_image, notification, password, user_management};

    cfg.service(
        web::scope("/api")
            // AUTH
            .route("/signup", web::post().to(auth::signup))
            .route("/login", web::post().to(auth::login))
            .route("/maintenance/verify", web::post().to(auth::verify_maintenance_key))
            // PASSWORD
            .route("/change-password", web::post().to(password::change_password))
            .route("/verify-user", web::post().to(password::verify_user))
            .route("/forgot-password", web::post().to(password::forgot_password))
            .route("/update-password", web::post().to(password::update_password))
            .route(
                "/reset-password-with-verification",
                web::post().to(password::reset_password_with_verification),
            )
            .route(
                "/resetPasswordWithVerification",
                web::post().to(password::reset_password_with_verification),
            )
            .route(
                "/update-complaint-status",
                web::post().to(complaint::update_complaint_status_flat),
            )
            // USERS
            .service(
                web::scope("/users")
                    .route("", web::get().to(user_management::list_users))
                    .route("/me", web::get().to(user_management::get_me))
                    .route("/me", web::put().to(user_management::update_me)),
            )
            // COMPLAINTS
            .service(
                web::scope("/complaints")
                    .route("", web::post().to(complaint::create_complaint))
                    .route("", web::get().to(complaint::list_complaints))
                    .route("/{complaint_id}", web::get().to(complaint::get_complaint))
                    .route("/{complaint_id}", web::delete().to(complaint::delete_complaint))
                    .route("/{complaint_id}/status", web::put().to(complaint::update_complaint_status))
                    .route("/{complaint_id}/reopen", web::post().to(complaint::reopen_complaint))
                    .service(
                        web::resource("/{complaint_id}/image")
                            .app_data(web::PayloadConfig::new(complaint_image::MAX_IMAGE_BYTES))
                            .route(web::post().to(complaint_image::upload_image))
                            .route(web::get().to(complaint_image::download_image)),
                    ),
            )
            // NOTIFICATIONS
            .service(
                web::scope("/notifications")
                    .route("", web::get().to(notification::list_notifications))
                    .route("", web::delete().to(notification::clear_all))
                    .route("/unread-count", web::get().to(notification::unread_count))
                    .route("/read-all", web::put().to(notification::mark_all_read))
                    .route("/{notification_id}/read", web::put().to(notification::mark_read)),
            )
            // ANALYTICS
            .service(
                web::scope("/analytics")
                    .route("/summary", web::get().to(analytics::summary))
                    .route("/export", web::get().to(analytics::export))
                    .route("/supervisor-updates", web::get().to(analytics::supervisor_updates)),
            ),
    )
    // WEBSOCKET route for live updates
    .service(web::resource("/ws").route(web::get().to(web_socket_server::ws_index)));
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = config::Config::from_env().map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let mongodb = db::MongoDB::init(&config.mongo_uri, &config.database_name)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    if let Err(e) = mongodb.ensure_indexes().await {
        warn!("Could not create indexes: {}", e);
    }
    if let Err(e) = auth::ensure_admin(&mongodb, &config).await {
        warn!("Could not bootstrap admin account: {}", e);
    }
    let mongodb = Arc::new(mongodb);

    let live_hub = LiveHub::new().start();
    let http_client = reqwest::Client::new();

    let bind_addr = config.bind_addr.clone();
    info!("Server running at http://{}", bind_addr);
    info!("Allowed CORS Origin: {}", config.frontend_origin);

    let state = web::Data::new(AppState {
        live_hub,
        mongodb,
        config,
        http_client,
    });

    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&state.config.frontend_origin)
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                http::header::CONTENT_TYPE,
                http::header::ACCEPT,
                http::header::AUTHORIZATION,
            ])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(Authentication)
            .wrap(cors)
            .wrap(Logger::default())
            .app_data(state.clone())
            .configure(configure_routes)
    })
    .bind(bind_addr)?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::test_state;
    use crate::auth::{create_jwt, current_user};
    use crate::error::ApiError;
    use crate::models::Role;
    use actix_web::{http::StatusCode, test as actix_test, HttpRequest};

    async fn whoami(req: HttpRequest) -> Result<HttpResponse, ApiError> {
        let caller = current_user(&req)?;
        Ok(HttpResponse::Ok().body(caller.user_id))
    }

    #[actix_web::test]
    async fn valid_token_attaches_caller() {
        let state = test_state().await;
        let token = create_jwt("u-42", Role::Student, false, &state.config).unwrap();
        let app = actix_test::init_service(
            App::new()
                .wrap(Authentication)
                .app_data(web::Data::new(state))
                .route("/whoami", web::get().to(whoami)),
        )
        .await;
        let req = actix_test::TestRequest::get()
            .uri("/whoami")
            .insert_header((http::header::AUTHORIZATION, format!("Bearer {}", token)))
            .to_request();
        let body = actix_test::call_and_read_body(&app, req).await;
        assert_eq!(body, web::Bytes::from_static(b"u-42"));
    }

    #[actix_web::test]
    async fn invalid_token_is_rejected_with_json() {
        let app = actix_test::init_service(
            App::new()
                .wrap(Authentication)
                .app_data(web::Data::new(test_state().await))
                .route("/whoami", web::get().to(whoami)),
        )
        .await;
        let req = actix_test::TestRequest::get()
            .uri("/whoami")
            .insert_header((http::header::AUTHORIZATION, "Bearer not-a-jwt"))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["error"], "Invalid or expired token");
    }

    #[actix_web::test]
    async fn missing_token_reaches_handler_unauthenticated() {
        let app = actix_test::init_service(
            App::new()
                .wrap(Authentication)
                .app_data(web::Data::new(test_state().await))
                .route("/whoami", web::get().to(whoami)),
        )
        .await;
        let req = actix_test::TestRequest::get().uri("/whoami").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn complaint_routes_require_login() {
        let app = actix_test::init_service(
            App::new()
                .wrap(Authentication)
                .app_data(web::Data::new(test_state().await))
                .configure(configure_routes),
        )
        .await;
        for uri in ["/api/complaints", "/api/notifications", "/api/analytics/summary", "/api/users/me"] {
            let req = actix_test::TestRequest::get().uri(uri).to_request();
            let resp = actix_test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{}", uri);
        }
    }

    #[actix_web::test]
    async fn flat_status_route_is_served() {
        let state = test_state().await;
        let token = create_jwt("a1", Role::Admin, false, &state.config).unwrap();
        let app = actix_test::init_service(
            App::new()
                .wrap(Authentication)
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        // Rejected on the body rules, before any lookup.
        let req = actix_test::TestRequest::post()
            .uri("/api/update-complaint-status")
            .insert_header((http::header::AUTHORIZATION, format!("Bearer {}", token)))
            .set_json(serde_json::json!({ "complaintId": "c1", "newStatus": "In Progress" }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["error"], "A message is required when marking a complaint in progress");

        let req = actix_test::TestRequest::post()
            .uri("/api/update-complaint-status")
            .insert_header((http::header::AUTHORIZATION, format!("Bearer {}", token)))
            .set_json(serde_json::json!({ "complaintId": " ", "newStatus": "completed" }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn flat_status_route_needs_staff_role() {
        let state = test_state().await;
        let token = create_jwt("s1", Role::Student, false, &state.config).unwrap();
        let app = actix_test::init_service(
            App::new()
                .wrap(Authentication)
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;
        let req = actix_test::TestRequest::post()
            .uri("/api/update-complaint-status")
            .insert_header((http::header::AUTHORIZATION, format!("Bearer {}", token)))
            .set_json(serde_json::json!({ "complaintId": "c1", "newStatus": "completed" }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn both_reset_paths_reach_the_proxy() {
        let app = actix_test::init_service(
            App::new()
                .wrap(Authentication)
                .app_data(web::Data::new(test_state().await))
                .configure(configure_routes),
        )
        .await;
        for uri in ["/api/resetPasswordWithVerification", "/api/reset-password-with-verification"] {
            let req = actix_test::TestRequest::post()
                .uri(uri)
                .set_json(serde_json::json!({ "email": "a@gmail.com" }))
                .to_request();
            let resp = actix_test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_GATEWAY, "{}", uri);
        }
    }

    #[actix_web::test]
    async fn students_cannot_read_analytics() {
        let state = test_state().await;
        let token = create_jwt("s1", Role::Student, false, &state.config).unwrap();
        let app = actix_test::init_service(
            App::new()
                .wrap(Authentication)
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;
        let req = actix_test::TestRequest::get()
            .uri("/api/analytics/summary")
            .insert_header((http::header::AUTHORIZATION, format!("Bearer {}", token)))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
