use std::{path::Path, process, sync::Arc, time::Duration};

use bimvision::{
    application::{
        analysis::AnalysisService,
        error::AppError,
        ports::{AnalysisStore, BuildingAnalyst, BuildingParser},
    },
    cache::{CacheConfig, CacheSweeper, ResultCache, hash_bytes},
    config,
    infra::{
        error::InfraError,
        http::{self, AdminState, HttpState},
        ifc::IfcStepParser,
        keep_alive::KeepAlive,
        llm::{LlmConfig, OpenAiAnalyst},
        supabase::SupabaseStore,
        telemetry,
        uploads::UploadStorage,
    },
};
use serde_json::json;
use tokio::{sync::watch, try_join};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_writer(std::io::stderr)
        .with_max_level(Level::ERROR)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Fingerprint(args) => run_fingerprint(&args.file).await,
        config::Command::Inspect(args) => run_inspect(args).await,
    }
}

struct ApplicationContext {
    cache: Arc<ResultCache>,
    http_state: HttpState,
    admin_state: AdminState,
}

fn build_application_context(settings: &config::Settings) -> Result<ApplicationContext, AppError> {
    let cache = Arc::new(ResultCache::new(CacheConfig::from(&settings.cache)));

    let uploads = Arc::new(
        UploadStorage::new(
            settings.uploads.directory.clone(),
            settings.uploads.retain_files,
        )
        .map_err(|err| AppError::from(InfraError::from(err)))?,
    );

    let parser: Arc<dyn BuildingParser> = Arc::new(IfcStepParser::new());
    let analyst = OpenAiAnalyst::new(LlmConfig::from(&settings.llm))?;
    if !analyst.is_configured() {
        warn!(
            target = "bimvision::startup",
            "LLM API key is not configured; uploads will fail until OPENAI_API_KEY is set"
        );
    }
    let llm_configured = analyst.is_configured();
    let analyst: Arc<dyn BuildingAnalyst> = Arc::new(analyst);

    let max_file_bytes = settings.uploads.max_file_bytes.get();
    let mut service = AnalysisService::new(
        cache.clone(),
        parser,
        analyst,
        uploads,
        max_file_bytes,
    );

    let persistence_enabled = match settings.persistence.as_ref() {
        Some(persistence) => {
            let store: Arc<dyn AnalysisStore> = Arc::new(SupabaseStore::new(
                &persistence.supabase_url,
                persistence.supabase_key.clone(),
            )?);
            service = service.with_store(store);
            true
        }
        None => {
            info!(
                target = "bimvision::startup",
                "Supabase credentials not set; analysis history is disabled"
            );
            false
        }
    };

    let max_file_bytes = usize::try_from(max_file_bytes)
        .map_err(|_| AppError::validation("uploads.max_file_bytes exceeds usize"))?;

    let http_state = HttpState {
        analysis: Arc::new(service),
        slow_request: settings.server.slow_request,
        max_file_bytes,
    };
    let admin_state = AdminState {
        cache: cache.clone(),
        persistence_enabled,
        llm_configured,
    };

    Ok(ApplicationContext {
        cache,
        http_state,
        admin_state,
    })
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let app = build_application_context(&settings)?;

    let sweeper = CacheSweeper::spawn(app.cache.clone(), settings.cache.sweep_interval);
    let keep_alive = settings
        .keep_alive
        .as_ref()
        .map(KeepAlive::spawn)
        .transpose()?;

    let result = serve_http(&settings, app.http_state, app.admin_state).await;

    if let Some(keep_alive) = keep_alive {
        keep_alive.abort();
    }
    sweeper.stop().await;
    info!(target = "bimvision::startup", "shutdown complete");

    result
}

async fn serve_http(
    settings: &config::Settings,
    http_state: HttpState,
    admin_state: AdminState,
) -> Result<(), AppError> {
    let public_router = http::build_router(http_state);
    let admin_router = http::build_admin_router(admin_state);

    let public_listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let admin_listener = tokio::net::TcpListener::bind(settings.server.admin_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "bimvision::startup",
        public = %settings.server.public_addr,
        admin = %settings.server.admin_addr,
        ttl_hours = settings.cache.ttl.as_secs_f64() / 3600.0,
        "listeners bound"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let public_server = axum::serve(public_listener, public_router.into_make_service())
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()));
    let admin_server = axum::serve(admin_listener, admin_router.into_make_service())
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()));

    let servers = async move { try_join!(public_server, admin_server) };
    let deadline = drain_deadline(shutdown_rx, settings.server.graceful_shutdown);

    tokio::select! {
        result = servers => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        () = deadline => {
            warn!(
                target = "bimvision::startup",
                timeout_secs = settings.server.graceful_shutdown.as_secs(),
                "graceful shutdown timed out; dropping open connections"
            );
        }
    }

    Ok(())
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn drain_deadline(rx: watch::Receiver<bool>, grace: Duration) {
    wait_for_shutdown(rx).await;
    tokio::time::sleep(grace).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!(target = "bimvision::startup", "shutdown signal received");
}

async fn run_fingerprint(path: &Path) -> Result<(), AppError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    println!("{}  {}", hash_bytes(&bytes), path.display());
    Ok(())
}

async fn run_inspect(args: config::InspectArgs) -> Result<(), AppError> {
    let parser = IfcStepParser::new();
    let record = parser
        .parse(&args.file)
        .await
        .map_err(|err| {
            AppError::validation(format!("failed to parse {}: {err}", args.file.display()))
        })?
        .with_source_file(args.file.display().to_string());
    let record = if args.fast {
        record.fast_summary()
    } else {
        record
    };

    let output = json!({
        "analysis_signature": record.analysis_signature().to_hex(),
        "record": record,
    });
    let rendered = if args.pretty {
        serde_json::to_string_pretty(&output)
    } else {
        serde_json::to_string(&output)
    }
    .map_err(|err| AppError::unexpected(format!("failed to encode record: {err}")))?;

    println!("{rendered}");
    Ok(())
}
