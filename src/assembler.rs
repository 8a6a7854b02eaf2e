//! Tool set assembly
//!
//! Builds the flat tool name space of one request: direct adapters first,
//! then every remote registry in configuration order. Remote sources load
//! concurrently but merge in order, and a source that fails contributes no
//! tools instead of failing the request.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::{Instant, timeout_at};

use crate::config::{Config, Credentials, RegistryAuthConfig, RegistryPolicy};
use crate::error::{ChatError, Result};
use crate::identity::Session;
use crate::registry::{
    CachedLease, CachedRegistry, HttpConnector, RegistryAuth, RegistryConnector, RegistryError, RegistrySession,
    remote_tool_set,
};
use crate::tools::{OneInchClient, SwapTool, ToolSet};

/// Extra time a connector gets past its own timeout before it is abandoned
const CONNECT_GRACE: Duration = Duration::from_millis(500);

/// Per-request inputs to assembly
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub session: Option<Session>,
    pub wallet_address: Option<String>,
}

impl RequestContext {
    fn access_token(&self) -> Option<&str> {
        self.session.as_ref()?.access_token.as_deref().filter(|t| !t.is_empty())
    }
}

/// Where a source gets its credential
#[derive(Debug, Clone)]
pub enum Credential {
    /// The caller's access token
    PerSession,
    Static(RegistryAuth),
    /// Configured but not available at start
    Missing(String),
}

enum SourceKind {
    Transient(Arc<dyn RegistryConnector>),
    Cached(Arc<CachedRegistry>),
}

/// One remote registry as seen by the assembler
pub struct RemoteSource {
    name: String,
    credential: Credential,
    kind: SourceKind,
    timeout: Duration,
}

impl RemoteSource {
    /// A source connected per request and closed when the request ends
    pub fn transient(
        name: impl Into<String>,
        connector: Arc<dyn RegistryConnector>,
        credential: Credential,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            credential,
            kind: SourceKind::Transient(connector),
            timeout,
        }
    }

    /// A source backed by a process-wide cached session
    pub fn cached(registry: Arc<CachedRegistry>, credential: Credential, timeout: Duration) -> Self {
        Self {
            name: registry.name().to_string(),
            credential,
            kind: SourceKind::Cached(registry),
            timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn unavailable(&self, reason: impl Into<String>) -> ChatError {
        ChatError::RegistryUnavailable {
            source_name: self.name.clone(),
            reason: reason.into(),
        }
    }

    fn resolve_auth(&self, ctx: &RequestContext) -> Result<RegistryAuth> {
        match &self.credential {
            Credential::PerSession => ctx
                .access_token()
                .map(|t| RegistryAuth::Bearer(t.to_string()))
                .ok_or_else(|| self.unavailable("no access token in session")),
            Credential::Static(auth) => Ok(auth.clone()),
            Credential::Missing(reason) => Err(self.unavailable(reason.clone())),
        }
    }

    /// Connect (or lease) and list tools within this source's timeout
    pub async fn load(&self, ctx: &RequestContext) -> Result<(ToolSet, Lease)> {
        let auth = self.resolve_auth(ctx)?;
        let timed_out = || self.unavailable(RegistryError::Timeout(self.timeout).to_string());

        // Connectors bound their own handshake and clean up after it; the
        // outer deadline only catches one that never returns
        let backstop = Instant::now() + self.timeout + CONNECT_GRACE;

        match &self.kind {
            SourceKind::Transient(connector) => {
                let session = timeout_at(backstop, connector.connect(&auth))
                    .await
                    .map_err(|_| timed_out())?
                    .map_err(|e| self.unavailable(e.to_string()))?;

                let deadline = Instant::now() + self.timeout;
                let listed = timeout_at(deadline, session.list_tools()).await;
                match listed {
                    Ok(Ok(infos)) => {
                        let tools = remote_tool_set(&self.name, &session, infos);
                        Ok((tools, Lease::Transient {
                            source_name: self.name.clone(),
                            session,
                        }))
                    }
                    Ok(Err(e)) => {
                        session.close().await;
                        Err(self.unavailable(e.to_string()))
                    }
                    Err(_) => {
                        session.close().await;
                        Err(timed_out())
                    }
                }
            }
            SourceKind::Cached(registry) => {
                let lease = timeout_at(backstop, registry.acquire())
                    .await
                    .map_err(|_| timed_out())?
                    .map_err(|e| self.unavailable(e.to_string()))?;

                let deadline = Instant::now() + self.timeout;
                let listed = timeout_at(deadline, lease.session().list_tools()).await;
                match listed {
                    Ok(Ok(infos)) => {
                        let tools = remote_tool_set(&self.name, lease.session(), infos);
                        Ok((tools, Lease::Cached {
                            registry: Arc::clone(registry),
                            lease,
                        }))
                    }
                    Ok(Err(e)) => {
                        registry.invalidate(lease).await;
                        Err(self.unavailable(e.to_string()))
                    }
                    Err(_) => {
                        registry.invalidate(lease).await;
                        Err(timed_out())
                    }
                }
            }
        }
    }
}

/// A remote connection held for the duration of one request
pub enum Lease {
    Transient {
        source_name: String,
        session: Arc<dyn RegistrySession>,
    },
    Cached {
        registry: Arc<CachedRegistry>,
        lease: CachedLease,
    },
}

impl Lease {
    /// Close a transient session or return a cached lease
    pub async fn release(self) {
        match self {
            Lease::Transient { source_name, session } => {
                log::debug!("Closing transient session for {}", source_name);
                session.close().await;
            }
            Lease::Cached { registry, lease } => registry.release(lease).await,
        }
    }
}

/// The merged tool set of one request plus the connections backing it
pub struct AssembledTools {
    pub tools: ToolSet,
    pub leases: Vec<Lease>,
}

impl AssembledTools {
    pub fn new(tools: ToolSet) -> Self {
        Self {
            tools,
            leases: Vec::new(),
        }
    }

    /// Split into the tool set and a guard that releases the leases
    pub fn into_parts(self) -> (ToolSet, LeaseGuard) {
        (self.tools, LeaseGuard { leases: self.leases })
    }
}

/// Releases request-scoped connections; must be awaited on every exit path
pub struct LeaseGuard {
    leases: Vec<Lease>,
}

impl LeaseGuard {
    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    pub async fn release(self) {
        join_all(self.leases.into_iter().map(Lease::release)).await;
    }
}

/// Assembles per-request tool sets from direct tools and remote sources
pub struct ToolSetAssembler {
    direct: ToolSet,
    sources: Vec<RemoteSource>,
}

impl ToolSetAssembler {
    pub fn new(direct: ToolSet, sources: Vec<RemoteSource>) -> Self {
        Self { direct, sources }
    }

    /// Build the direct adapters and remote sources described by `config`
    pub fn from_config(config: &Config, credentials: &Credentials) -> Result<Self> {
        let mut direct = ToolSet::new();
        if config.swap.enabled {
            if credentials.swap_api_key.is_none() {
                log::warn!("{} is not set; swap tools will fail upstream", config.swap.api_key_env);
            }
            let client = OneInchClient::new(
                &config.swap.base_url,
                config.swap.chain_id,
                credentials.swap_api_key.clone().unwrap_or_default(),
                Duration::from_millis(config.swap.timeout_ms),
            )
            .map_err(|e| ChatError::Config(format!("Cannot build swap client: {}", e)))?;
            for tool in SwapTool::all(Arc::new(client)) {
                direct.insert(tool);
            }
        }

        let mut sources = Vec::with_capacity(config.registries.len());
        for registry in &config.registries {
            let timeout = Duration::from_millis(registry.timeout_ms);
            let connector: Arc<dyn RegistryConnector> = Arc::new(
                HttpConnector::new(&registry.url, timeout)
                    .map_err(|e| ChatError::Config(format!("Cannot build registry {}: {}", registry.name, e)))?,
            );

            let credential = match &registry.auth {
                RegistryAuthConfig::Session => Credential::PerSession,
                RegistryAuthConfig::None => Credential::Static(RegistryAuth::None),
                RegistryAuthConfig::ApiKey { header, env } => match credentials.registry_key(&registry.name) {
                    Some(key) => Credential::Static(RegistryAuth::Header {
                        name: header.clone(),
                        value: key.to_string(),
                    }),
                    None => {
                        log::warn!("{} is not set; registry {} will contribute no tools", env, registry.name);
                        Credential::Missing(format!("{} is not set", env))
                    }
                },
            };

            let source = match registry.policy {
                RegistryPolicy::Transient => RemoteSource::transient(&registry.name, connector, credential, timeout),
                RegistryPolicy::Cached => {
                    let auth = match &credential {
                        Credential::Static(auth) => auth.clone(),
                        Credential::Missing(_) => RegistryAuth::None,
                        Credential::PerSession => {
                            return Err(ChatError::Config(format!(
                                "Registry {} cannot be cached with session auth",
                                registry.name
                            )));
                        }
                    };
                    let cached = CachedRegistry::new(&registry.name, connector, auth, registry.close_when_idle);
                    RemoteSource::cached(Arc::new(cached), credential, timeout)
                }
            };
            sources.push(source);
        }

        Ok(Self::new(direct, sources))
    }

    /// Tools that need no remote connection
    pub fn direct_tools(&self) -> &ToolSet {
        &self.direct
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Assemble the tool set of one request; never fails
    pub async fn assemble(&self, ctx: &RequestContext) -> AssembledTools {
        let loads = join_all(self.sources.iter().map(|source| source.load(ctx))).await;

        let mut assembled = AssembledTools::new(self.direct.clone());
        for (source, loaded) in self.sources.iter().zip(loads) {
            match loaded {
                Ok((tools, lease)) => {
                    log::debug!("Registry {} contributed {} tools", source.name(), tools.len());
                    assembled.tools.merge(tools, source.name());
                    assembled.leases.push(lease);
                }
                Err(ChatError::RegistryUnavailable { source_name, reason }) if reason.starts_with("no access token") => {
                    log::debug!("Skipping registry {}: {}", source_name, reason);
                }
                Err(e) => log::warn!("{}; continuing without its tools", e),
            }
        }
        assembled
    }

    /// Close every cached session
    pub async fn shutdown(&self) {
        let resets = self.sources.iter().filter_map(|source| match &source.kind {
            SourceKind::Cached(registry) => Some(registry.reset()),
            SourceKind::Transient(_) => None,
        });
        join_all(resets).await;
    }
}
