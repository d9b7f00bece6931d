//! REST API layer (Axum).
//!
//! Public routes: signup, login, health and the billing webhook. Everything
//! else sits behind [`require_session`], which resolves the caller's
//! [`Identity`] from the access token or the refresh cookie.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    routing::{delete, get, patch, post},
    Extension, Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::auth::{hash_password, verify_password, TokenCodec};
use crate::billing::{webhook_handler, CustomerDirectory};
use crate::error::ApiError;
use crate::models::{
    AdminProfile, AdminUser, CurrentAdmin, DashboardMetrics, ExpenseByCategorySummary, Identity,
    Product, User,
};
use crate::session::{clear_refresh_cookie, refresh_cookie, require_session};
use crate::storage::{Storage, StorageError};

/// Shared app state for REST handlers. Every field is a cheap handle.
#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    pub tokens: Arc<TokenCodec>,
    pub billing: Arc<dyn CustomerDirectory>,
    /// `None` makes every webhook fail signature verification.
    pub webhook_secret: Option<String>,
    pub secure_cookies: bool,
    pub bcrypt_cost: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub admin_user_id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateAdminRequest {
    pub name: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tokens {
    pub access_token: String,
}

#[derive(Serialize, Deserialize)]
pub struct AuthResponse {
    pub message: String,
    pub tokens: Tokens,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    pub product_id: Option<String>,
    pub name: Option<String>,
    pub price: f64,
    pub rating: Option<f64>,
    pub stock_quantity: i64,
}

#[derive(Deserialize)]
pub struct ProductQuery {
    pub search: Option<String>,
}

/// Create the Axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/admin/logout", post(logout_handler))
        .route("/admin/me", get(me_handler))
        .route("/admin/update", patch(update_admin_handler))
        .route("/dashboard", get(dashboard_handler))
        .route("/products", get(list_products_handler).post(create_product_handler))
        .route("/products/:product_id", delete(delete_product_handler))
        .route("/users", get(list_users_handler))
        .route("/expenses", get(list_expenses_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_session));

    Router::new()
        .route("/admin/signup", post(signup_handler))
        .route("/admin/login", post(login_handler))
        .route("/health", get(health_handler))
        .route("/api/payments/webhook", post(webhook_handler))
        .merge(auth_routes)
        .with_state(state)
}

/// Wrap the router in CORS and request tracing. Browsers may only read a
/// re-issued access token if `Authorization` is an exposed header.
pub fn with_http_layers(router: Router, origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .expose_headers([header::AUTHORIZATION]);

    router.layer(cors).layer(TraceLayer::new_for_http())
}

fn required(field: Option<String>) -> Option<String> {
    field.filter(|value| !value.trim().is_empty())
}

async fn run_blocking<T, F>(message: &'static str, f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, bcrypt::BcryptError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::internal(message, e))?
        .map_err(|e| ApiError::internal(message, e))
}

async fn signup_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<SignupRequest>, JsonRejection>,
) -> Result<(StatusCode, CookieJar, Json<AuthResponse>), ApiError> {
    const FAILED: &str = "Error signing up user";
    let Json(payload) = payload?;
    let (Some(admin_user_id), Some(name), Some(email), Some(password)) = (
        required(payload.admin_user_id),
        required(payload.name),
        required(payload.email),
        required(payload.password),
    ) else {
        return Err(ApiError::Validation("All fields are required".into()));
    };

    if state
        .storage
        .admin_by_email(&email)
        .map_err(|e| ApiError::internal(FAILED, e))?
        .is_some()
    {
        return Err(ApiError::Conflict("Email already in use".into()));
    }

    let cost = state.bcrypt_cost;
    let password = run_blocking(FAILED, move || hash_password(&password, cost)).await?;
    let admin = state
        .storage
        .create_admin(AdminUser {
            admin_user_id,
            name,
            email,
            password,
            has_access: false,
            price_id: None,
        })
        .map_err(|e| match e {
            StorageError::Duplicate(message) => ApiError::Conflict(message),
            other => ApiError::internal(FAILED, other),
        })?;

    let access_token = state
        .tokens
        .issue_access_token(&admin.admin_user_id)
        .map_err(|e| ApiError::internal(FAILED, e))?;
    let refresh_token = state
        .tokens
        .issue_refresh_token(&admin.admin_user_id)
        .map_err(|e| ApiError::internal(FAILED, e))?;

    info!(admin_user_id = %admin.admin_user_id, "admin signed up");
    Ok((
        StatusCode::CREATED,
        jar.add(refresh_cookie(refresh_token, state.secure_cookies)),
        Json(AuthResponse {
            message: "User created successfully!".into(),
            tokens: Tokens { access_token },
        }),
    ))
}

async fn login_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<AuthResponse>), ApiError> {
    const FAILED: &str = "Error logging in user";
    let Json(payload) = payload?;
    let (Some(email), Some(password)) = (required(payload.email), required(payload.password))
    else {
        return Err(ApiError::Validation(
            "Both email and password are required".into(),
        ));
    };

    let admin = state
        .storage
        .admin_by_email(&email)
        .map_err(|e| ApiError::internal(FAILED, e))?
        .ok_or_else(|| {
            ApiError::Authentication("User does not exist. Please sign up first.".into())
        })?;

    let hash = admin.password.clone();
    if !run_blocking(FAILED, move || verify_password(&password, &hash)).await? {
        return Err(ApiError::Authentication("Invalid credentials".into()));
    }

    let access_token = state
        .tokens
        .issue_access_token(&admin.admin_user_id)
        .map_err(|e| ApiError::internal(FAILED, e))?;
    let refresh_token = state
        .tokens
        .issue_refresh_token(&admin.admin_user_id)
        .map_err(|e| ApiError::internal(FAILED, e))?;

    info!(admin_user_id = %admin.admin_user_id, "admin logged in");
    Ok((
        jar.add(refresh_cookie(refresh_token, state.secure_cookies)),
        Json(AuthResponse {
            message: "Login successful!".into(),
            tokens: Tokens { access_token },
        }),
    ))
}

// Only the cookie is cleared: refresh tokens are stateless and stay valid
// until they expire.
async fn logout_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    jar: CookieJar,
) -> (CookieJar, Json<serde_json::Value>) {
    info!(admin_user_id = %identity.user_id, "admin logged out");
    (
        jar.add(clear_refresh_cookie(state.secure_cookies)),
        Json(json!({ "message": "Logged out successfully" })),
    )
}

async fn me_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<CurrentAdmin>, ApiError> {
    state
        .storage
        .admin_by_id(&identity.user_id)
        .map_err(|e| ApiError::internal("Error fetching user information", e))?
        .map(|admin| Json(CurrentAdmin::from(admin)))
        .ok_or_else(|| ApiError::NotFound("User not found".into()))
}

async fn update_admin_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    payload: Result<Json<UpdateAdminRequest>, JsonRejection>,
) -> Result<Json<AdminProfile>, ApiError> {
    let Json(payload) = payload?;
    let name = required(payload.name)
        .ok_or_else(|| ApiError::Validation("Valid name is required".into()))?;

    state
        .storage
        .rename_admin(&identity.user_id, name.trim())
        .map_err(|e| ApiError::internal("Error updating user information", e))?
        .map(|admin| Json(AdminProfile::from(admin)))
        .ok_or_else(|| ApiError::NotFound("User not found".into()))
}

async fn dashboard_handler(
    State(state): State<AppState>,
) -> Result<Json<DashboardMetrics>, ApiError> {
    state
        .storage
        .dashboard_metrics()
        .map(Json)
        .map_err(|e| ApiError::internal("Error retrieving dashboard metrics", e))
}

async fn list_products_handler(
    State(state): State<AppState>,
    Query(query): Query<ProductQuery>,
) -> Result<Json<Vec<Product>>, ApiError> {
    state
        .storage
        .list_products(query.search.as_deref())
        .map(Json)
        .map_err(|e| ApiError::internal("Error retrieving products", e))
}

async fn create_product_handler(
    State(state): State<AppState>,
    payload: Result<Json<NewProduct>, JsonRejection>,
) -> Result<(StatusCode, Json<Product>), ApiError> {
    let Json(payload) = payload?;
    let name = required(payload.name)
        .ok_or_else(|| ApiError::Validation("Product name is required".into()))?;

    let product = Product {
        product_id: required(payload.product_id).unwrap_or_else(|| Uuid::new_v4().to_string()),
        name,
        price: payload.price,
        rating: payload.rating,
        stock_quantity: payload.stock_quantity,
    };
    state
        .storage
        .insert_product(&product)
        .map_err(|e| ApiError::internal("Error creating product", e))?;
    Ok((StatusCode::CREATED, Json(product)))
}

async fn delete_product_handler(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
) -> Result<Json<Product>, ApiError> {
    state
        .storage
        .delete_product(&product_id)
        .map_err(|e| ApiError::internal("Error deleting product", e))?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Product not found".into()))
}

async fn list_users_handler(State(state): State<AppState>) -> Result<Json<Vec<User>>, ApiError> {
    state
        .storage
        .list_users()
        .map(Json)
        .map_err(|e| ApiError::internal("Error fetching users", e))
}

async fn list_expenses_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<ExpenseByCategorySummary>>, ApiError> {
    state
        .storage
        .list_expenses_by_category()
        .map(Json)
        .map_err(|e| ApiError::internal("Error retrieving expenses by category", e))
}

/// Health check handler
async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
