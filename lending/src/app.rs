//! Wiring: turns a [`Config`] into running components.

use crate::audit::{PostgresAuditLog, TracingAuditLog};
use crate::authz::{Authorizer, StaticAuthorizer};
use crate::config::{Config, NotifyConfig};
use crate::dispatch::{DispatchEnvironment, Dispatcher, MessageTemplates};
use crate::escalation::EscalationEngine;
use crate::lifecycle::LifecycleController;
use crate::notify::{ChannelRouter, ConsoleNotifier, SmtpNotifier, WhatsAppWebhookNotifier};
use crate::scheduler::Scheduler;
use crate::server::{AppState, build_router};
use crate::store::{InMemoryLendingStore, LendingStore, PostgresLendingStore};
use anyhow::Context;
use axum::Router;
use lending_core::audit::AuditLog;
use lending_core::environment::{Clock, SystemClock};
use lending_core::notification::Notifier;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Backing services the application runs on.
pub struct Services {
    /// Request, stock and tracking storage
    pub store: Arc<dyn LendingStore>,
    /// Outbound messages
    pub notifier: Arc<dyn Notifier>,
    /// Activity log
    pub audit: Arc<dyn AuditLog>,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

/// The assembled application.
pub struct LendingApp {
    config: Arc<Config>,
    dispatcher: Dispatcher,
    lifecycle: Arc<LifecycleController>,
    engine: Arc<EscalationEngine>,
    authorizer: Arc<dyn Authorizer>,
}

impl LendingApp {
    /// Connect to the configured services and assemble the application.
    ///
    /// With `DATABASE_URL` set, requests and the activity log live in
    /// `PostgreSQL` (migrations run on startup). Otherwise an empty in-memory
    /// store and a log-only activity log are used.
    ///
    /// # Errors
    ///
    /// Returns error if the database is unreachable, a migration fails, the
    /// manager roster does not parse or an SMTP setting is invalid.
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let notifier = build_notifier(&config.notify)?;

        let (store, audit): (Arc<dyn LendingStore>, Arc<dyn AuditLog>) = match &config.postgres {
            Some(pg) => {
                tracing::info!("Connecting to database...");
                let pool = PgPoolOptions::new()
                    .max_connections(pg.max_connections)
                    .min_connections(pg.min_connections)
                    .acquire_timeout(Duration::from_secs(pg.connect_timeout))
                    .connect(&pg.url)
                    .await
                    .context("failed to connect to database")?;
                let pool = Arc::new(pool);

                let store = PostgresLendingStore::new(Arc::clone(&pool));
                tracing::info!("Running migrations...");
                store.migrate().await?;
                tracing::info!("Database ready");

                (Arc::new(store), Arc::new(PostgresAuditLog::new(pool)))
            },
            None => {
                tracing::warn!("DATABASE_URL not set, using the in-memory store");
                (
                    Arc::new(InMemoryLendingStore::new()),
                    Arc::new(TracingAuditLog::new()),
                )
            },
        };

        Self::assemble(
            config,
            Services {
                store,
                notifier,
                audit,
                clock: Arc::new(SystemClock),
            },
        )
    }

    /// Assemble the application on explicit services.
    ///
    /// # Errors
    ///
    /// Returns error if the manager roster does not parse.
    pub fn assemble(config: Config, services: Services) -> anyhow::Result<Self> {
        let authorizer: Arc<dyn Authorizer> = Arc::new(
            StaticAuthorizer::parse(&config.lending.station_managers)
                .context("invalid STATION_MANAGERS roster")?,
        );

        let dispatcher = Dispatcher::new(DispatchEnvironment {
            notifier: services.notifier,
            audit: services.audit,
            templates: MessageTemplates::new(&config.lending.public_base_url),
        });

        let engine = Arc::new(EscalationEngine::new(
            Arc::clone(&services.store),
            Arc::clone(&services.clock),
            dispatcher.clone(),
            config.escalation.policy(),
        ));

        let lifecycle = Arc::new(
            LifecycleController::new(
                services.store,
                Arc::clone(&authorizer),
                services.clock,
                dispatcher.clone(),
            )
            .with_token_issuer(config.lending.token_issuer())
            .with_low_stock_scan(Arc::clone(&engine)),
        );

        Ok(Self {
            config: Arc::new(config),
            dispatcher,
            lifecycle,
            engine,
            authorizer,
        })
    }

    /// Loaded configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Lifecycle operations.
    #[must_use]
    pub fn lifecycle(&self) -> Arc<LifecycleController> {
        Arc::clone(&self.lifecycle)
    }

    /// Escalation engine.
    #[must_use]
    pub fn engine(&self) -> Arc<EscalationEngine> {
        Arc::clone(&self.engine)
    }

    /// Side-effect dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// HTTP router over this application.
    #[must_use]
    pub fn router(&self) -> Router {
        build_router(AppState::new(
            self.lifecycle(),
            self.engine(),
            Arc::clone(&self.authorizer),
        ))
    }

    /// Background scheduler and its shutdown sender.
    #[must_use]
    pub fn scheduler(&self) -> (Scheduler, watch::Sender<bool>) {
        Scheduler::new(
            self.lifecycle(),
            self.engine(),
            self.config.escalation.interval(),
            self.config.escalation.parallelism,
        )
    }

    /// Drain queued notifications and audit writes.
    ///
    /// # Errors
    ///
    /// Returns error if deliveries are still running after the configured
    /// shutdown timeout.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        let timeout = Duration::from_secs(self.config.server.shutdown_timeout);
        self.dispatcher
            .shutdown(timeout)
            .await
            .context("dispatcher did not drain in time")
    }
}

/// Channel router for the configured transports; console for the rest.
fn build_notifier(config: &NotifyConfig) -> anyhow::Result<Arc<dyn Notifier>> {
    let console: Arc<dyn Notifier> = Arc::new(ConsoleNotifier::new());

    let email: Arc<dyn Notifier> = match &config.smtp {
        Some(smtp) => {
            tracing::info!(host = %smtp.host, "Email via SMTP");
            Arc::new(SmtpNotifier::new(smtp).context("invalid SMTP configuration")?)
        },
        None => Arc::clone(&console),
    };
    let whatsapp: Arc<dyn Notifier> = match &config.whatsapp {
        Some(gateway) => {
            tracing::info!(url = %gateway.webhook_url, "WhatsApp via webhook");
            Arc::new(WhatsAppWebhookNotifier::new(
                gateway.webhook_url.clone(),
                gateway.token.clone(),
            ))
        },
        None => console,
    };

    Ok(Arc::new(
        ChannelRouter::new().with_email(email).with_whatsapp(whatsapp),
    ))
}
