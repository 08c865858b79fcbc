//! Interpreter instances and the fork tree.
//!
//! One root [`Interpreter`] is created per loaded program. Every procedure
//! call, event dispatch and command execution runs in a fork: a child
//! instance with its own locals that shares the root state and the host
//! services by reference. Forks are never pooled; they deregister from the
//! root's fork registry when dropped.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::config::{ConfigError, EngineConfig};
use crate::error::{ErrorCode, RuntimeError, RuntimeResult};
use crate::event::EventManager;
use crate::host::HostContext;
use crate::parser::{JsonScriptParser, ScriptParser};
use crate::policy::{AllowAll, PolicyGate};
use crate::provider::ProviderRegistry;
use crate::store::{AccountStore, AgentModelStore, InMemoryAccountStore, InMemoryAgentModelStore};
use crate::symbols::SymbolProvider;
use crate::tool::ToolRegistry;

use super::procedure::{Block, Commands, Procedure};
use super::value::Value;

/// Debug record of a live fork.
#[derive(Debug, Clone, PartialEq)]
pub struct ForkInfo {
    pub id: Uuid,
    pub parent: Uuid,
    pub depth: usize,
    pub frame: String,
    pub created_at: DateTime<Utc>,
}

/// State owned by the root instance. Forks only read it; every mutation goes
/// through a root-only accessor on [`Interpreter`].
#[derive(Debug, Default)]
pub struct RootState {
    globals: RwLock<HashMap<String, Value>>,
    constants: RwLock<HashMap<String, Value>>,
    procedures: RwLock<HashMap<String, Arc<Procedure>>>,
    commands: RwLock<Vec<Arc<Commands>>>,
    forks: DashMap<Uuid, ForkInfo>,
}

impl RootState {
    pub fn live_forks(&self) -> Vec<ForkInfo> {
        let mut forks: Vec<ForkInfo> = self.forks.iter().map(|e| e.value().clone()).collect();
        forks.sort_by_key(|f| (f.depth, f.created_at));
        forks
    }

    pub fn fork_count(&self) -> usize {
        self.forks.len()
    }

    pub async fn procedure(&self, name: &str) -> Option<Arc<Procedure>> {
        self.procedures.read().await.get(name).cloned()
    }

    pub async fn procedure_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.procedures.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) async fn replace_procedures(&self, procedures: HashMap<String, Arc<Procedure>>) {
        *self.procedures.write().await = procedures;
    }

    /// Adds `procedures` to the table. Unless `redefine` is set, a name that
    /// is already defined rejects the whole batch before anything is added.
    pub(crate) async fn insert_procedures(
        &self,
        procedures: Vec<Arc<Procedure>>,
        redefine: bool,
    ) -> RuntimeResult<()> {
        let mut table = self.procedures.write().await;
        if !redefine {
            if let Some(existing) = procedures.iter().find(|p| table.contains_key(&p.name)) {
                return Err(RuntimeError::new(
                    ErrorCode::Duplicate,
                    format!("procedure '{}' is already defined", existing.name),
                )
                .with_position(existing.position));
            }
        }
        for procedure in procedures {
            table.insert(procedure.name.clone(), procedure);
        }
        Ok(())
    }

    pub(crate) async fn commands(&self) -> Vec<Arc<Commands>> {
        self.commands.read().await.clone()
    }

    pub(crate) async fn replace_commands(&self, commands: Vec<Arc<Commands>>) {
        *self.commands.write().await = commands;
    }

    pub(crate) async fn extend_commands(&self, commands: Vec<Arc<Commands>>) {
        self.commands.write().await.extend(commands);
    }
}

/// Collaborators shared by reference between an instance and all its forks.
#[derive(Clone)]
pub struct Services {
    pub host: Arc<HostContext>,
    pub events: Arc<EventManager>,
    pub providers: Arc<ProviderRegistry>,
    pub tools: Arc<ToolRegistry>,
    pub policy: Arc<dyn PolicyGate>,
    pub agent_models: Arc<dyn AgentModelStore>,
    pub accounts: Arc<dyn AccountStore>,
    pub symbols: Option<Arc<dyn SymbolProvider>>,
    pub parser: Arc<dyn ScriptParser>,
    pub config: Arc<EngineConfig>,
}

pub struct Interpreter {
    id: Uuid,
    parent: Option<Uuid>,
    depth: usize,
    root: Arc<RootState>,
    services: Services,
    locals: DashMap<String, Value>,
    call_stack: Vec<String>,
    error_handler: Option<Block>,
    sandbox_dir: Option<PathBuf>,
    // roots read the live table; forks see the globals as of fork time
    global_snapshot: Option<Arc<HashMap<String, Value>>>,
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("depth", &self.depth)
            .field("call_stack", &self.call_stack)
            .finish()
    }
}

impl Interpreter {
    pub fn builder() -> InterpreterBuilder {
        InterpreterBuilder::default()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn parent_id(&self) -> Option<Uuid> {
        self.parent
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn call_stack(&self) -> &[String] {
        &self.call_stack
    }

    pub fn sandbox_dir(&self) -> Option<&PathBuf> {
        self.sandbox_dir.as_ref()
    }

    pub fn root(&self) -> &Arc<RootState> {
        &self.root
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn host(&self) -> &HostContext {
        &self.services.host
    }

    pub fn config(&self) -> &EngineConfig {
        &self.services.config
    }

    pub(crate) fn error_handler(&self) -> Option<Block> {
        self.error_handler.clone()
    }

    pub fn live_forks(&self) -> Vec<ForkInfo> {
        self.root.live_forks()
    }

    /// Creates a child instance for `frame`.
    ///
    /// The child starts with empty locals, inherits the sandbox directory and
    /// sees root globals as they are right now. `error_handler` becomes the
    /// child's frame handler.
    #[tracing::instrument(skip(self, error_handler), level = "debug")]
    pub async fn fork(&self, frame: &str, error_handler: Option<Block>) -> RuntimeResult<Interpreter> {
        self.fork_with(frame, error_handler, None).await
    }

    /// Like [`fork`](Self::fork) but with a replacement host context, used
    /// to capture the output of agent actions.
    pub(crate) async fn fork_with(
        &self,
        frame: &str,
        error_handler: Option<Block>,
        host: Option<Arc<HostContext>>,
    ) -> RuntimeResult<Interpreter> {
        let depth = self.depth + 1;
        if depth > self.services.config.max_call_depth {
            return Err(RuntimeError::new(
                ErrorCode::ResourceExhaustion,
                format!(
                    "call depth {} exceeds limit of {} (in '{}')",
                    depth, self.services.config.max_call_depth, frame
                ),
            ));
        }

        let snapshot = Arc::new(self.root.globals.read().await.clone());
        let mut services = self.services.clone();
        if let Some(host) = host {
            services.host = host;
        }
        let mut call_stack = self.call_stack.clone();
        call_stack.push(frame.to_string());

        let id = Uuid::new_v4();
        self.root.forks.insert(
            id,
            ForkInfo {
                id,
                parent: self.id,
                depth,
                frame: frame.to_string(),
                created_at: Utc::now(),
            },
        );
        debug!(%id, parent = %self.id, depth, frame, "fork created");

        Ok(Interpreter {
            id,
            parent: Some(self.id),
            depth,
            root: self.root.clone(),
            services,
            locals: DashMap::new(),
            call_stack,
            error_handler,
            sandbox_dir: self.sandbox_dir.clone(),
            global_snapshot: Some(snapshot),
        })
    }

    /// Lookup order: locals, root globals, root constants, host constants.
    pub async fn get_variable(&self, name: &str) -> RuntimeResult<Value> {
        if let Some(value) = self.locals.get(name) {
            return Ok(value.clone());
        }
        match &self.global_snapshot {
            Some(snapshot) => {
                if let Some(value) = snapshot.get(name) {
                    return Ok(value.clone());
                }
            }
            None => {
                if let Some(value) = self.root.globals.read().await.get(name) {
                    return Ok(value.clone());
                }
            }
        }
        if let Some(value) = self.root.constants.read().await.get(name) {
            return Ok(value.clone());
        }
        if let Some(value) = self
            .services
            .symbols
            .as_ref()
            .and_then(|symbols| symbols.constant(name))
        {
            return Ok(value);
        }
        Err(RuntimeError::key_not_found(format!(
            "variable '{}' is not defined",
            name
        )))
    }

    /// Script assignment. Globals are writable from the root only and
    /// constants never; everything else binds a local of this instance.
    pub async fn set_variable(&self, name: &str, value: Value) -> RuntimeResult<()> {
        if self.is_constant(name).await {
            return Err(write_violation(format!("'{}' is a constant", name)));
        }
        if self.is_global(name).await {
            if !self.is_root() {
                return Err(write_violation(format!(
                    "global '{}' can only be modified by the root instance",
                    name
                )));
            }
            self.root.globals.write().await.insert(name.to_string(), value);
            return Ok(());
        }
        self.locals.insert(name.to_string(), value);
        Ok(())
    }

    pub async fn set_global_variable(&self, name: &str, value: Value) -> RuntimeResult<()> {
        self.ensure_root("set global variable")?;
        if self.is_constant(name).await {
            return Err(write_violation(format!("'{}' is a constant", name)));
        }
        self.locals.remove(name);
        self.root.globals.write().await.insert(name.to_string(), value);
        Ok(())
    }

    pub async fn set_global_constant(&self, name: &str, value: Value) -> RuntimeResult<()> {
        self.ensure_root("set global constant")?;
        let mut constants = self.root.constants.write().await;
        if constants.contains_key(name) {
            return Err(write_violation(format!("constant '{}' is already defined", name)));
        }
        constants.insert(name.to_string(), value);
        Ok(())
    }

    /// Binds a local without the global checks. Used for parameters, the
    /// error variable and event payloads, which always shadow.
    pub(crate) fn bind_local(&self, name: &str, value: Value) {
        self.locals.insert(name.to_string(), value);
    }

    pub(crate) fn ensure_root(&self, operation: &str) -> RuntimeResult<()> {
        if self.is_root() {
            Ok(())
        } else {
            Err(write_violation(format!(
                "{} is only allowed on the root instance",
                operation
            )))
        }
    }

    async fn is_global(&self, name: &str) -> bool {
        if let Some(snapshot) = &self.global_snapshot {
            if snapshot.contains_key(name) {
                return true;
            }
        }
        self.root.globals.read().await.contains_key(name)
    }

    async fn is_constant(&self, name: &str) -> bool {
        self.root.constants.read().await.contains_key(name)
            || self
                .services
                .symbols
                .as_ref()
                .is_some_and(|symbols| symbols.constant(name).is_some())
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        if self.parent.is_some() {
            self.root.forks.remove(&self.id);
        }
    }
}

fn write_violation(message: String) -> RuntimeError {
    RuntimeError::new(ErrorCode::WriteViolation, message)
}

/// Assembles a root instance. Anything not supplied gets a permissive,
/// in-memory default.
#[derive(Default)]
pub struct InterpreterBuilder {
    host: HostContext,
    config: EngineConfig,
    policy: Option<Arc<dyn PolicyGate>>,
    providers: Option<Arc<ProviderRegistry>>,
    tools: Option<Arc<ToolRegistry>>,
    agent_models: Option<Arc<dyn AgentModelStore>>,
    accounts: Option<Arc<dyn AccountStore>>,
    symbols: Option<Arc<dyn SymbolProvider>>,
    parser: Option<Arc<dyn ScriptParser>>,
    sandbox_dir: Option<PathBuf>,
}

impl InterpreterBuilder {
    pub fn host(mut self, host: HostContext) -> Self {
        self.host = host;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn policy(mut self, policy: Arc<dyn PolicyGate>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn providers(mut self, providers: Arc<ProviderRegistry>) -> Self {
        self.providers = Some(providers);
        self
    }

    pub fn tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn agent_models(mut self, store: Arc<dyn AgentModelStore>) -> Self {
        self.agent_models = Some(store);
        self
    }

    pub fn accounts(mut self, store: Arc<dyn AccountStore>) -> Self {
        self.accounts = Some(store);
        self
    }

    pub fn symbols(mut self, symbols: Arc<dyn SymbolProvider>) -> Self {
        self.symbols = Some(symbols);
        self
    }

    pub fn parser(mut self, parser: Arc<dyn ScriptParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn sandbox_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sandbox_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> Result<Interpreter, ConfigError> {
        self.config.validate()?;
        let services = Services {
            host: Arc::new(self.host),
            events: Arc::new(EventManager::new()),
            providers: self
                .providers
                .unwrap_or_else(|| Arc::new(ProviderRegistry::new())),
            tools: self
                .tools
                .unwrap_or_else(|| Arc::new(ToolRegistry::with_builtins())),
            policy: self.policy.unwrap_or_else(|| Arc::new(AllowAll)),
            agent_models: self
                .agent_models
                .unwrap_or_else(|| Arc::new(InMemoryAgentModelStore::new())),
            accounts: self
                .accounts
                .unwrap_or_else(|| Arc::new(InMemoryAccountStore::new())),
            symbols: self.symbols,
            parser: self.parser.unwrap_or_else(|| Arc::new(JsonScriptParser)),
            config: Arc::new(self.config),
        };
        Ok(Interpreter {
            id: Uuid::new_v4(),
            parent: None,
            depth: 0,
            root: Arc::new(RootState::default()),
            services,
            locals: DashMap::new(),
            call_stack: vec![],
            error_handler: None,
            sandbox_dir: self.sandbox_dir,
            global_snapshot: None,
        })
    }
}
