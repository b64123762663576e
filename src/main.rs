use actix_web::{App, HttpServer, web};
use dotenvy::dotenv;
use log::info;
use std::{env, io};

use tau_chain::api::{self, AppState};
use tau_chain::repository::RepositoryImpl;

#[actix_web::main]
async fn main() -> io::Result<()> {
    let _ = dotenv();
    env_logger::init();

    let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8080);
    let data_dir = env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());

    let repository = RepositoryImpl::open(&data_dir).map_err(io::Error::other)?;
    info!("starting chain-state API at http://{host}:{port}");

    let state = web::Data::new(AppState::new(repository));

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(api::init_routes)
    })
    .bind((host.as_str(), port))?
    .run()
    .await
}
