//! Router builders.
//!
//! Each builder returns a stateless `Router` so the binaries can merge the
//! pieces they need.

use axum::{
    Router,
    routing::{get, put},
};
use microservices_core::aggregate::Aggregate;
use microservices_core::environment::Clock;
use microservices_core::health::HealthIndicator;
use microservices_registry::ServiceRegistry;
use microservices_runtime::AggregateQueryService;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::{aggregates, health, registry};

/// `GET /{name}?productId=…` for one-to-many aggregates.
pub fn subject_routes<A: Aggregate>(queries: AggregateQueryService<A>) -> Router {
    Router::new()
        .route(&format!("/{}", A::NAME), get(aggregates::list_by_subject::<A>))
        .with_state(queries)
}

/// `GET /{name}/{id}` for single-record aggregates.
pub fn single_record_routes<A: Aggregate>(queries: AggregateQueryService<A>) -> Router {
    Router::new()
        .route(&format!("/{}/:id", A::NAME), get(aggregates::get_by_subject::<A>))
        .with_state(queries)
}

/// The Eureka-style registry API under `/eureka/apps`.
pub fn registry_routes<C: Clock + 'static>(registry: Arc<ServiceRegistry<C>>) -> Router {
    Router::new()
        .route("/eureka/apps", get(registry::catalog::<C>))
        .route(
            "/eureka/apps/:app",
            get(registry::application::<C>).post(registry::register::<C>),
        )
        .route(
            "/eureka/apps/:app/:id",
            put(registry::heartbeat::<C>).delete(registry::deregister::<C>),
        )
        .route("/eureka/apps/:app/:id/status", put(registry::set_status::<C>))
        .with_state(registry)
}

/// `GET /actuator/health` over the given indicators.
pub fn health_routes(indicators: Vec<Arc<dyn HealthIndicator>>) -> Router {
    Router::new()
        .route("/actuator/health", get(health::health_check))
        .with_state(Arc::new(indicators))
}

/// Request tracing and `x-request-id` propagation for a finished router.
pub fn with_observability(router: Router) -> Router {
    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id()),
    )
}
