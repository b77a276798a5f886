use std::convert::Infallible;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;
use warp::http::StatusCode;
use warp::{Filter, Reply};

use crate::error::{Status, StoreError};
use crate::service::LaptopService;

#[derive(Serialize, Debug, PartialEq)]
pub struct Stats {
    pub laptops: usize,
    pub images: usize,
}

/// Read-only admin routes over the service's stores.
pub fn routes(
    service: Arc<LaptopService>,
) -> impl Filter<Extract = (warp::reply::Response,), Error = warp::Rejection> + Clone {
    // 1. GET /health
    let health = warp::get()
    .and(warp::path!("health"))
    .map(|| warp::reply::json(&"ok").into_response());

    // 2. GET /stats
    let stats = warp::get()
    .and(warp::path!("stats"))
    .and(with_service(service.clone()))
    .and_then(|service: Arc<LaptopService>| async move {
        let stats = Stats {
            laptops: service.laptop_store().count().await,
            images: service.image_store().count().await,
        };
        Ok::<_, warp::Rejection>(warp::reply::json(&stats).into_response())
    });

    // 3. GET /laptops/{id}
    let laptop = warp::get()
    .and(warp::path!("laptops" / String))
    .and(with_service(service.clone()))
    .and_then(|id: String, service: Arc<LaptopService>| async move {
        let reply = match service.laptop_store().find_by_id(&id).await {
            Ok(laptop) => warp::reply::json(&laptop).into_response(),
            Err(StoreError::NotFound(_)) => error_reply(StatusCode::NOT_FOUND, Status::not_found(format!("no laptop with id {}", id))),
            Err(e) => error_reply(StatusCode::INTERNAL_SERVER_ERROR, Status::internal(e.to_string())),
        };
        Ok::<_, warp::Rejection>(reply)
    });

    // 4. GET /images/{id}
    let image = warp::get()
    .and(warp::path!("images" / String))
    .and(with_service(service))
    .and_then(|id: String, service: Arc<LaptopService>| async move {
        let reply = match service.image_store().find(&id).await {
            Some(image) => warp::reply::json(&image).into_response(),
            None => error_reply(StatusCode::NOT_FOUND, Status::not_found(format!("no image with id {}", id))),
        };
        Ok::<_, warp::Rejection>(reply)
    });

    health.or(stats).unify().or(laptop).unify().or(image).unify()
}

pub async fn start_admin_api(service: Arc<LaptopService>, port: u16) {
    info!("admin API listening on port {}", port);
    warp::serve(routes(service)).run(([0, 0, 0, 0], port)).await;
}

fn error_reply(code: StatusCode, status: Status) -> warp::reply::Response {
    warp::reply::with_status(warp::reply::json(&status), code).into_response()
}

fn with_service(service: Arc<LaptopService>) -> impl Filter<Extract = (Arc<LaptopService>,), Error = Infallible> + Clone {
    warp::any().map(move || service.clone())
}
