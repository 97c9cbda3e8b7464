use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use super::ServerContext;
use super::connector::Connector;
use crate::config::{Config, ConnectorConfig, SessionConfig};
use crate::error::ServerError;
use crate::handler::{self, DefaultHandler, HandlerRegistry, RequestHandler};
use crate::session::{SessionManager, SessionRecords};
use crate::site::{SiteManager, SiteResolver};
use crate::users::{MemoryUserStore, UserStore};

/// Composition root: one connector, one session store, the registered
/// handlers and the default handler, started and stopped together.
pub struct HttpServer {
    ctx: Arc<ServerContext>,
    connector: Connector,
}

impl HttpServer {
    pub fn builder(settings: ConnectorConfig) -> HttpServerBuilder {
        HttpServerBuilder::new(settings)
    }

    /// Builds a server from a full configuration, with in-memory sites and
    /// users. Unknown handler names are skipped with a warning.
    pub fn from_config(config: &Config) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::Config(format!("{:#}", e)))?;

        let mut builder = HttpServerBuilder::new(config.server.clone())
            .sessions(config.sessions.clone())
            .sites(Arc::new(SiteManager::from_config(&config.sites)))
            .users(Arc::new(MemoryUserStore::from_config(
                &config.users,
                &config.groups,
            )));

        for registration in &config.handlers {
            match handler::built_in(&registration.handler) {
                Some(h) => builder = builder.handler(&registration.url_pattern, h)?,
                None => warn!(handler = %registration.handler, "unknown request handler, skipping"),
            }
        }

        Ok(builder.build())
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.ctx.sessions
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.connector.local_addr()
    }

    pub fn is_running(&self) -> bool {
        self.connector.is_running()
    }

    /// Starts the session store, initializes handlers, then starts the
    /// connector. On failure everything already started is stopped again.
    pub async fn start(&mut self) -> Result<SocketAddr, ServerError> {
        if self.connector.is_running() {
            return Err(ServerError::AlreadyStarted);
        }

        self.ctx.sessions.start()?;

        if let Err(e) = self.init_handlers().await {
            self.ctx.sessions.stop().await;
            return Err(e);
        }

        match self.connector.start().await {
            Ok(addr) => {
                info!(addr = %addr, handlers = self.ctx.handlers.len(), "server started");
                Ok(addr)
            }
            Err(e) => {
                self.ctx.sessions.stop().await;
                self.cleanup_handlers();
                Err(e)
            }
        }
    }

    /// Stops the connector, then the session store, then cleans up handlers.
    pub async fn stop(&mut self) {
        if !self.connector.is_running() {
            return;
        }

        self.connector.stop().await;
        self.ctx.sessions.stop().await;
        self.cleanup_handlers();
        info!("server stopped");
    }

    pub async fn restart(&mut self) -> Result<SocketAddr, ServerError> {
        self.stop().await;
        self.start().await
    }

    async fn init_handlers(&self) -> Result<(), ServerError> {
        self.ctx
            .default_handler
            .init()
            .await
            .map_err(|e| ServerError::Handler(format!("{:#}", e)))?;

        for handler in self.ctx.handlers.handlers() {
            handler
                .init()
                .await
                .map_err(|e| ServerError::Handler(format!("{:#}", e)))?;
        }
        Ok(())
    }

    fn cleanup_handlers(&self) {
        for handler in self.ctx.handlers.handlers() {
            handler.cleanup();
        }
        self.ctx.default_handler.cleanup();
    }
}

/// Assembles an [`HttpServer`] from its collaborators.
pub struct HttpServerBuilder {
    settings: ConnectorConfig,
    session_config: SessionConfig,
    records: Option<Arc<dyn SessionRecords>>,
    sites: Option<Arc<dyn SiteResolver>>,
    users: Option<Arc<dyn UserStore>>,
    handlers: HandlerRegistry,
    default_handler: Option<Arc<dyn RequestHandler>>,
}

impl HttpServerBuilder {
    pub fn new(settings: ConnectorConfig) -> Self {
        Self {
            settings,
            session_config: SessionConfig::default(),
            records: None,
            sites: None,
            users: None,
            handlers: HandlerRegistry::new(),
            default_handler: None,
        }
    }

    pub fn sessions(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    pub fn session_records(mut self, records: Arc<dyn SessionRecords>) -> Self {
        self.records = Some(records);
        self
    }

    pub fn sites(mut self, sites: Arc<dyn SiteResolver>) -> Self {
        self.sites = Some(sites);
        self
    }

    pub fn users(mut self, users: Arc<dyn UserStore>) -> Self {
        self.users = Some(users);
        self
    }

    /// Registers `handler` for paths matching `url_pattern`.
    pub fn handler(
        mut self,
        url_pattern: &str,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<Self, ServerError> {
        self.handlers.register(url_pattern, handler).map_err(|e| {
            ServerError::Config(format!("invalid url pattern {:?}: {}", url_pattern, e))
        })?;
        Ok(self)
    }

    pub fn default_handler(mut self, handler: Arc<dyn RequestHandler>) -> Self {
        self.default_handler = Some(handler);
        self
    }

    pub fn build(self) -> HttpServer {
        let sessions = match self.records {
            Some(records) => SessionManager::with_records(&self.session_config, records),
            None => SessionManager::new(&self.session_config),
        };

        let ctx = Arc::new(ServerContext {
            settings: self.settings,
            sessions,
            sites: self
                .sites
                .unwrap_or_else(|| Arc::new(SiteManager::default()) as Arc<dyn SiteResolver>),
            users: self
                .users
                .unwrap_or_else(|| Arc::new(MemoryUserStore::new()) as Arc<dyn UserStore>),
            handlers: self.handlers,
            default_handler: self
                .default_handler
                .unwrap_or_else(|| Arc::new(DefaultHandler::new()) as Arc<dyn RequestHandler>),
        });

        HttpServer {
            connector: Connector::new(ctx.clone()),
            ctx,
        }
    }
}
