//! Service manager server
//!
//! Wires storage, interceptors, scheduler and maintainer together and
//! serves the REST surface until a termination signal arrives.

mod config;

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sm_application::instances::OsbActions;
use sm_application::operations::{OperationMaintainer, OperationScheduler};
use sm_domain::errors::DomainError;
use sm_domain::query::{Criterion, Operator};
use sm_domain::repository::Repository;
use sm_domain::types::{Object, ObjectType, Platform, SM_PLATFORM};
use sm_infrastructure::interceptors::default_registry;
use sm_infrastructure::osb::ReqwestOsbClient;
use sm_infrastructure::persistence::{InterceptableRepository, PostgresRepository};
use sm_interface::{router, ApiState};

use config::ServerConfig;

#[tokio::main]
async fn main() {
    let config = match ServerConfig::new() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("could not load configuration: {}", error);
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    if let Err(error) = run(config).await {
        error!("service manager terminated: {}", error);
        std::process::exit(1);
    }
}

async fn run(config: ServerConfig) -> Result<(), DomainError> {
    let operation_settings = config.operation_settings();
    operation_settings.validate()?;

    let postgres = Arc::new(PostgresRepository::connect(&config.database()).await?);
    postgres.run_migrations().await?;
    info!("database schema is up to date");

    let osb_client = Arc::new(ReqwestOsbClient::new(config.http_client())?);
    let registry = Arc::new(default_registry(osb_client.clone())?);
    let repository = Arc::new(InterceptableRepository::new(postgres.clone(), registry));

    ensure_sm_platform(repository.as_ref()).await?;

    let scheduler = Arc::new(OperationScheduler::new(
        repository.clone(),
        postgres.clone(),
        operation_settings.clone(),
    ));
    let osb_actions = Arc::new(OsbActions::new(osb_client));

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    let mut maintainer = OperationMaintainer::new(
        repository.clone(),
        postgres.clone(),
        scheduler.clone(),
        operation_settings,
        shutdown_tx.subscribe(),
    );
    {
        let osb_actions = Arc::clone(&osb_actions);
        maintainer.register_reschedule_handler(
            ObjectType::ServiceInstance,
            Arc::new(move |operation| osb_actions.resume_instance_operation(operation)),
        );
    }
    let maintainer_handle = tokio::spawn(async move { maintainer.run().await });

    let app = router(ApiState {
        repository,
        scheduler,
        osb_actions,
    });

    let address = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .map_err(|e| DomainError::internal(format!("could not bind {}: {}", address, e)))?;
    info!(address = %address, "service manager listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| DomainError::internal(format!("server error: {}", e)))?;

    info!("shutting down");
    let _ = shutdown_tx.send(());
    let _ = maintainer_handle.await;
    Ok(())
}

/// The reserved platform the service manager provisions its own instances
/// under. Present from first boot onwards.
async fn ensure_sm_platform(repository: &dyn Repository) -> Result<(), DomainError> {
    let by_id = [Criterion::by_field(Operator::Equals, "id", SM_PLATFORM)];
    match repository.get(ObjectType::Platform, &by_id).await {
        Ok(_) => Ok(()),
        Err(DomainError::NotFound { .. }) => {
            repository
                .create(Object::Platform(Platform::service_manager()))
                .await?;
            info!("created the reserved {} platform", SM_PLATFORM);
            Ok(())
        }
        Err(error) => Err(error),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
