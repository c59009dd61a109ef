use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpServer};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use commune::config::Settings;
use commune::openapi::ApiDoc;
use commune::repo::Repo;
use commune::{config, AppState, PresenceRegistry, PresenceTracker};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let settings = Settings::from_env()?;
    info!(
        page_size = settings.page_size.get(),
        presence_window_secs = settings.presence_window.as_secs(),
        "Bootstrapping commune server"
    );

    let repo = build_repo().await?;
    let presence = Arc::new(PresenceRegistry::new(settings.presence_window));
    let pruner = presence.clone().spawn_pruner(settings.presence_window);
    let state = AppState::new(repo, presence.clone(), settings.page_size);
    let openapi = ApiDoc::openapi();
    let frontend_url = settings.frontend_url.clone();

    let server = HttpServer::new(move || {
        let mut cors = Cors::default()
            .allowed_origin("http://localhost:5173")
            .allowed_origin("http://127.0.0.1:5173")
            .allow_any_header()
            .allowed_methods(["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .supports_credentials()
            .max_age(3600);
        if let Some(front) = &frontend_url {
            cors = cors.allowed_origin(front);
        }

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(PresenceTracker::new(presence.clone()))
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind(settings.bind.as_str())?;

    info!("Listening on http://{}", settings.bind);
    server.run().await?;
    pruner.abort();
    Ok(())
}

#[cfg(not(any(feature = "inmem-store", feature = "postgres-store")))]
compile_error!("enable either the `inmem-store` or the `postgres-store` feature");

#[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
async fn build_repo() -> anyhow::Result<Arc<dyn Repo>> {
    info!("Using in-memory repository backend");
    Ok(Arc::new(commune::repo::inmem::InMemRepo::new()))
}

#[cfg(feature = "postgres-store")]
async fn build_repo() -> anyhow::Result<Arc<dyn Repo>> {
    use anyhow::Context;
    use sqlx::postgres::PgPoolOptions;

    let db_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set for postgres-store")?;
    let pool = PgPoolOptions::new().max_connections(5).connect(&db_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Using Postgres repository backend");
    Ok(Arc::new(commune::repo::pg::PgRepo::new(pool)))
}
