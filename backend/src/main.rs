use actix_cors::Cors;
use actix_web::{App, HttpServer, web};

use backend::config::Settings;
use backend::model::{ModelService, ModelStatus};
use backend::preprocess::ImageProcessor;
use backend::routes::configure_routes;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    dotenv::dotenv().ok();

    let settings = Settings::load();

    let mut model = ModelService::new(&settings);
    model.load();
    match model.status() {
        ModelStatus::Loaded => log::info!("Model loaded from {}", settings.model_path),
        ModelStatus::Stubbed => log::warn!(
            "No usable model at {}; serving stub predictions until an artifact is deployed",
            settings.model_path
        ),
        ModelStatus::NotLoaded => log::error!("Model service failed to initialize"),
    }

    let processor = ImageProcessor::new(&settings);
    let model = web::Data::new(model);
    let processor = web::Data::new(processor);
    let settings_data = web::Data::new(settings.clone());

    let bind_address = settings.bind_address();
    log::info!("Starting server on {}", bind_address);

    let allowed_origins = settings.allowed_origins.clone();
    HttpServer::new(move || {
        let mut cors = Cors::default()
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec![
                actix_web::http::header::AUTHORIZATION,
                actix_web::http::header::ACCEPT,
                actix_web::http::header::CONTENT_TYPE,
            ])
            .max_age(3600);
        for origin in &allowed_origins {
            cors = cors.allowed_origin(origin);
        }

        App::new()
            .wrap(cors)
            .app_data(model.clone())
            .app_data(processor.clone())
            .app_data(settings_data.clone())
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
