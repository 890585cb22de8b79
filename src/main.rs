#![allow(dead_code)]

use axum::{
    http::Method,
    Router
};
use model::ModelController;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{CorsLayer, Any};
use crate::tools::log::{log_error, LogServiceType};

pub use self::error::{Result, Error};

mod domain;
mod model;
mod routes;
mod error;
mod tools;
mod server;



#[tokio::main]
async fn main() -> Result<()> {

    println!("Starting facebridge server");
    println!("Initializing config");
    if let Err(error) = server::initialize_config().await {
        log_error(LogServiceType::Config, format!("Fatal configuration error: {}", error));
        std::process::exit(2);
    }

    let app = app();
    let port = server::get_server_port().await;
    let listener = TcpListener::bind(format!("127.0.0.1:{}", port)).await.unwrap();
    println!("->> LISTENING on {:?}\n", listener.local_addr());
    axum::serve(listener, app)
        .await
        .unwrap();

    Ok(())
}

fn app() -> Router {
    let mc = ModelController::new();

    let cors: CorsLayer = CorsLayer::new()
    // allow `GET` and `POST` when accessing the resource
    .allow_methods(vec![Method::GET, Method::PATCH, Method::DELETE, Method::POST])
    // allow requests from any origin
    .allow_origin(Any);


    Router::new()
        .nest("/health", routes::ping::routes())
        .merge(routes::infos::routes(mc.clone()))
        .merge(routes::algorithm::routes(mc.clone()))
        .merge(routes::apply::routes(mc))
        .layer(
        ServiceBuilder::new()
            .layer(cors)

        )
}
