use std::{process, time::Duration};

use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use xrechnung_viewer::{
    application::{context::ApplicationContext, error::AppError},
    config,
    infra::{
        error::InfraError,
        http::{self, AppState},
        telemetry,
    },
};

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

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    let app = ApplicationContext::from_settings(&settings)?;

    match command {
        config::Command::Serve(_) => serve(&settings, app).await,
        config::Command::Check => {
            run_check(&app);
            Ok(())
        }
    }
}

fn run_check(app: &ApplicationContext) {
    let capabilities = &app.capabilities;
    println!("html preview: {}", availability(capabilities.html_preview));
    println!("pdf export:   {}", availability(capabilities.pdf_export));
    for problem in &capabilities.problems {
        println!("  - {problem}");
    }
}

fn availability(enabled: bool) -> &'static str {
    if enabled { "available" } else { "unavailable" }
}

async fn serve(settings: &config::Settings, app: ApplicationContext) -> Result<(), AppError> {
    if !app.capabilities.html_preview {
        warn!(
            target = "xrechnung::serve",
            "HTML preview prerequisites are missing; transform requests will fail"
        );
    }

    let router = http::build_router(AppState::new(app.pipeline));
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "xrechnung::serve",
        addr = %settings.server.addr,
        pdf_export = app.capabilities.pdf_export,
        "Listening"
    );

    let grace = settings.server.graceful_shutdown;
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal());

    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        _ = drain_deadline(grace) => {
            warn!(
                target = "xrechnung::serve",
                grace_ms = grace.as_millis() as u64,
                "Graceful shutdown window elapsed; dropping open connections"
            );
        }
    }

    info!(target = "xrechnung::serve", "Server stopped");
    Ok(())
}

/// Resolves once a shutdown signal arrived and `grace` has passed since.
async fn drain_deadline(grace: Duration) {
    shutdown_signal().await;
    tokio::time::sleep(grace).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(target = "xrechnung::serve", error = %err, "failed to listen for Ctrl-C");
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
                error!(target = "xrechnung::serve", error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!(target = "xrechnung::serve", "Shutdown signal received");
}
