use std::sync::Arc;

use axum::{routing::get, Router};

use appointment_cell::{appointment_routes, AppointmentState};

pub fn create_router(state: Arc<AppointmentState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic booking API is running!" }))
        .merge(appointment_routes(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use appointment_cell::store::InMemoryStore;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use shared_utils::test_utils::TestConfig;
    use tower::ServiceExt;

    fn app() -> Router {
        let state = AppointmentState::with_store(TestConfig::default().to_arc(), InMemoryStore::new())
            .unwrap();
        create_router(Arc::new(state))
    }

    #[tokio::test]
    async fn health_route_needs_no_token() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn booking_routes_require_a_token() {
        let response = app()
            .oneshot(Request::builder().uri("/appointments/mine").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
