//! Runtime: per-session state and the module import pipeline.
//!
//! A [`Runtime`] owns one session: the package graph, the virtual
//! filesystem, and every cache (resolution, manifests, fetched sources,
//! module records). Clones share the session.

use crate::builtins::{builtin_key, builtin_name};
use crate::config::RuntimeConfig;
use crate::convert::{convert, ModuleKind, ModuleReference};
use crate::error::{Error, Result};
use crate::eval::{Binding, EvalError, Evaluator, JsEngine, ModuleCode, ModuleJob};
use crate::fetch::{cdn_url, FetchError, Fetcher, HttpFetcher, SourceCache};
use crate::loader::{extract_dependencies, load_source, module_path, remote_url, TranspilerHook};
use crate::pkg::manifest::MANIFEST_NAME;
use crate::pkg::{Manifest, ManifestCache, NodeId, PackageGraph};
use crate::registry::{Claim, ModuleRegistry, TaskId};
use crate::resolver::{PathResolver, ResolveOptions};
use crate::vfs::{mkdir_p, read_text, VirtualFs};
use futures::future::{BoxFuture, FutureExt};
use sandnode_util::vpath;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// State shared by every import in one session.
pub struct Session {
    pub(crate) config: RuntimeConfig,
    pub(crate) fs: Arc<dyn VirtualFs>,
    pub(crate) graph: PackageGraph,
    pub(crate) root_manifest: Arc<Manifest>,
    pub(crate) resolver: PathResolver,
    pub(crate) manifests: ManifestCache,
    pub(crate) sources: SourceCache,
    pub(crate) registry: ModuleRegistry,
    pub(crate) evaluator: Arc<dyn Evaluator>,
    pub(crate) transpilers: Vec<TranspilerHook>,
}

impl Session {
    /// Installed directory of `id` under the work dir.
    pub(crate) fn package_dir(&self, id: NodeId) -> String {
        self.graph.package_dir(id, &self.config.work_dir)
    }

    /// Manifest of `id`: virtual filesystem first, then the CDN. Unreadable
    /// manifests become empty.
    pub(crate) async fn manifest(&self, id: NodeId) -> Arc<Manifest> {
        if self.graph.is_root(id) {
            return Arc::clone(&self.root_manifest);
        }
        let node = self.graph.node(id);
        let key = node.id();
        if let Some(cached) = self.manifests.get(&key) {
            return cached;
        }

        let path = vpath::join(&self.package_dir(id), MANIFEST_NAME);
        let manifest = if let Some(text) = read_text(self.fs.as_ref(), &path) {
            Manifest::parse_lenient(&text, &path)
        } else if let Some(version) = node.version.as_deref() {
            let url = cdn_url(&self.config.cdn_origin, &node.name, version, MANIFEST_NAME);
            match self.sources.get(&url).await {
                Ok(text) => {
                    self.persist(&path, &text);
                    Manifest::parse_lenient(&text, &path)
                }
                Err(e) => {
                    warn!(package = %key, error = %e, "manifest unavailable, using empty manifest");
                    Manifest::default()
                }
            }
        } else {
            warn!(package = %key, "unversioned package without manifest");
            Manifest::default()
        };
        self.manifests.insert(key, manifest)
    }

    /// `main` of the manifest in directory `dir` of package `id`, read from
    /// the virtual filesystem only.
    pub(crate) fn local_manifest_main(&self, id: NodeId, dir: &str) -> Option<String> {
        let path = vpath::join_all([self.package_dir(id).as_str(), dir, MANIFEST_NAME]);
        let text = read_text(self.fs.as_ref(), &path)?;
        main_of(&Manifest::parse_lenient(&text, &path))
    }

    /// Like [`Self::local_manifest_main`], falling back to the CDN for
    /// installed packages. Failures are tolerated.
    pub(crate) async fn directory_main(&self, id: NodeId, dir: &str) -> Option<String> {
        if let Some(main) = self.local_manifest_main(id, dir) {
            return Some(main);
        }
        if self.graph.is_root(id) {
            return None;
        }
        let node = self.graph.node(id);
        let version = node.version.as_deref()?;
        let url = cdn_url(
            &self.config.cdn_origin,
            &node.name,
            version,
            &vpath::join(dir, MANIFEST_NAME),
        );
        match self.sources.get(&url).await {
            Ok(text) => main_of(&Manifest::parse_lenient(&text, &url)),
            Err(e) => {
                trace!(url, error = %e, "no directory manifest");
                None
            }
        }
    }

    /// For a file of installed package `id` that is missing locally and
    /// written without a source extension: `<rel>/index.js` when the CDN
    /// has no `<rel>.js` but does have that index. Both answers stay in the
    /// source cache for the load that follows.
    pub(crate) async fn remote_directory_index(&self, id: NodeId, rel: &str) -> Option<String> {
        if rel.is_empty()
            || self.graph.is_root(id)
            || self.config.is_source_extension(vpath::extname(rel))
        {
            return None;
        }
        let node = self.graph.node(id);
        let version = node.version.as_deref()?;
        let origin = &self.config.cdn_origin;

        let file = cdn_url(origin, &node.name, version, &format!("{rel}.js"));
        match self.sources.get(&file).await {
            Err(FetchError::Status { status: 404, .. }) => {}
            _ => return None,
        }
        let index = vpath::join(rel, "index.js");
        let url = cdn_url(origin, &node.name, version, &index);
        match self.sources.get(&url).await {
            Ok(_) => {
                debug!(package = %node.id(), path = %index, "using directory index from CDN");
                Some(index)
            }
            Err(e) => {
                trace!(url, error = %e, "no directory index on CDN");
                None
            }
        }
    }

    /// Write fetched text to the virtual filesystem. Failures are logged.
    pub(crate) fn persist(&self, path: &str, text: &str) {
        let result = mkdir_p(self.fs.as_ref(), &vpath::dirname(path))
            .and_then(|()| self.fs.write(path, text.as_bytes()));
        if let Err(e) = result {
            warn!(path, error = %e, "failed to persist fetched file");
        }
    }

    /// Registry key: `name@version/file`.
    pub(crate) fn module_key(&self, reference: &ModuleReference) -> String {
        format!(
            "{}/{}",
            self.graph.node(reference.owning_package).id(),
            reference.file_path()
        )
    }
}

fn main_of(manifest: &Manifest) -> Option<String> {
    manifest
        .main
        .as_deref()
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}

/// Builder for [`Runtime`].
pub struct RuntimeBuilder {
    fs: Arc<dyn VirtualFs>,
    config: RuntimeConfig,
    fetcher: Option<Arc<dyn Fetcher>>,
    evaluator: Option<Arc<dyn Evaluator>>,
    transpilers: Vec<TranspilerHook>,
}

impl RuntimeBuilder {
    #[must_use]
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    #[must_use]
    pub fn evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Register a transpiler; earlier registrations win.
    #[must_use]
    pub fn transpiler(mut self, hook: TranspilerHook) -> Self {
        self.transpilers.push(hook);
        self
    }

    /// Build over an existing graph.
    ///
    /// # Errors
    /// Returns an error if the default HTTP fetcher or JavaScript engine
    /// cannot be created.
    pub fn build(self, graph: PackageGraph, manifest: Manifest) -> Result<Runtime> {
        let fetcher: Arc<dyn Fetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpFetcher::new()?),
        };
        let evaluator: Arc<dyn Evaluator> = match self.evaluator {
            Some(evaluator) => evaluator,
            None => Arc::new(JsEngine::start(&self.config)?),
        };
        let resolver = PathResolver::new(ResolveOptions::from(&self.config));

        debug!(
            work_dir = %self.config.work_dir,
            cdn = %self.config.cdn_origin,
            packages = graph.len(),
            "runtime session created"
        );
        Ok(Runtime(Arc::new(Session {
            config: self.config,
            fs: self.fs,
            graph,
            root_manifest: Arc::new(manifest),
            resolver,
            manifests: ManifestCache::new(),
            sources: SourceCache::new(fetcher),
            registry: ModuleRegistry::new(),
            evaluator,
            transpilers: self.transpilers,
        })))
    }

    /// Read `package.json` and `package-lock.json` from the work dir and
    /// build.
    ///
    /// # Errors
    /// Returns manifest, lockfile and graph errors.
    pub fn load(self) -> Result<Runtime> {
        let (graph, manifest) = PackageGraph::load(self.fs.as_ref(), &self.config.work_dir)?;
        self.build(graph, manifest)
    }
}

/// Handle to a module runtime session.
#[derive(Clone)]
pub struct Runtime(Arc<Session>);

impl Runtime {
    #[must_use]
    pub fn builder(fs: Arc<dyn VirtualFs>) -> RuntimeBuilder {
        RuntimeBuilder {
            fs,
            config: RuntimeConfig::default(),
            fetcher: None,
            evaluator: None,
            transpilers: Vec::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.0.config
    }

    #[must_use]
    pub fn graph(&self) -> &PackageGraph {
        &self.0.graph
    }

    #[must_use]
    pub fn fs(&self) -> &Arc<dyn VirtualFs> {
        &self.0.fs
    }

    /// Number of module records (evaluated or in progress).
    #[must_use]
    pub fn module_count(&self) -> usize {
        self.0.registry.len()
    }

    /// Resolve `specifier` from the root package without loading it.
    ///
    /// # Errors
    /// Returns [`Error::UnresolvedDependency`] for unknown packages.
    pub async fn resolve(&self, specifier: &str) -> Result<ModuleReference> {
        convert(&self.0, specifier, self.0.graph.root(), None).await
    }

    /// Absolute virtual path of the file `reference` loads.
    #[must_use]
    pub fn module_path(&self, reference: &ModuleReference) -> String {
        module_path(&self.0, reference)
    }

    /// Import `specifier` from the root package.
    ///
    /// Repeated imports share one evaluation and one export record.
    ///
    /// # Errors
    /// Returns resolution, fetch and evaluation errors.
    pub async fn import_module(&self, specifier: &str) -> Result<ModuleExports> {
        let task = self.0.registry.next_task();
        debug!(specifier, task = task.get(), "import");
        let reference = self.resolve(specifier).await?;
        let binding = import_reference(Arc::clone(&self.0), Arc::new(reference), task).await?;
        Ok(ModuleExports {
            binding,
            evaluator: Arc::clone(&self.0.evaluator),
        })
    }
}

/// Export record of an imported module, held by the evaluator.
#[derive(Clone)]
pub struct ModuleExports {
    binding: Binding,
    evaluator: Arc<dyn Evaluator>,
}

impl ModuleExports {
    /// Registry key of the module, or `node:<name>` for a builtin.
    #[must_use]
    pub fn key(&self) -> String {
        match &self.binding {
            Binding::Module(key) => key.clone(),
            Binding::Builtin(name) => builtin_key(name),
            Binding::Disabled => String::new(),
        }
    }

    /// JSON snapshot of the current export value.
    ///
    /// # Errors
    /// Returns [`Error::Evaluator`] if the engine has stopped.
    pub async fn to_json(&self) -> Result<serde_json::Value> {
        if self.binding == Binding::Disabled {
            return Ok(serde_json::json!({}));
        }
        Ok(self.evaluator.exports(&self.key()).await?)
    }
}

impl fmt::Debug for ModuleExports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleExports")
            .field("binding", &self.binding)
            .finish_non_exhaustive()
    }
}

fn import_reference(
    session: Arc<Session>,
    reference: Arc<ModuleReference>,
    task: TaskId,
) -> BoxFuture<'static, Result<Binding>> {
    async move {
        if reference.kind == ModuleKind::Builtin {
            let name = builtin_name(&reference.resolved_path).unwrap_or_default();
            return Ok(Binding::Builtin(name.to_string()));
        }

        let key = session.module_key(&reference);
        let record = match session.registry.claim(&key, task) {
            Claim::Ready | Claim::InProgress => return Ok(Binding::Module(key)),
            Claim::Wait(record) => {
                session.registry.wait(&record, task).await?;
                return Ok(Binding::Module(key));
            }
            Claim::Owner(record) => record,
        };

        match run_module(&session, &reference, &key, task).await {
            Ok(()) => {
                session.registry.finish(&record);
                Ok(Binding::Module(key))
            }
            Err(e) => {
                session.evaluator.forget(&key);
                session.registry.fail(&record, e.to_string());
                Err(e)
            }
        }
    }
    .boxed()
}

async fn run_module(
    session: &Arc<Session>,
    reference: &Arc<ModuleReference>,
    key: &str,
    task: TaskId,
) -> Result<()> {
    let source = load_source(session, reference).await?;
    let path = module_path(session, reference);

    if vpath::extname(reference.file_path()) == ".json" {
        if let Err(e) = serde_json::from_str::<serde::de::IgnoredAny>(&source) {
            let err = EvalError::Json {
                message: e.to_string(),
                line: u32::try_from(e.line()).unwrap_or(u32::MAX),
            };
            return Err(evaluation_error(&path, reference, err));
        }
        let job = ModuleJob {
            key: key.to_string(),
            path: path.clone(),
            code: ModuleCode::Json(source),
            requires: BTreeMap::new(),
        };
        return session
            .evaluator
            .evaluate(job)
            .await
            .map_err(|e| evaluation_error(&path, reference, e));
    }

    let manifest = session.manifest(reference.owning_package).await;
    let dependencies = extract_dependencies(&source, &manifest);

    // Conversion may consult the CDN, so siblings convert concurrently.
    let children = futures::future::try_join_all(dependencies.into_iter().map(
        move |dependency| async move {
            let child = match &dependency.request {
                Some(request) => Some(Arc::new(
                    convert(
                        session,
                        request,
                        reference.owning_package,
                        Some(Arc::clone(reference)),
                    )
                    .await?,
                )),
                None => None,
            };
            Ok::<_, Error>((dependency, child))
        },
    ))
    .await?;

    // Fetch remote children concurrently; failures surface on import.
    let urls: Vec<String> = children
        .iter()
        .filter_map(|(_, child)| child.as_deref())
        .filter_map(|child| remote_url(session, child))
        .collect();
    if !urls.is_empty() {
        trace!(module = %path, count = urls.len(), "prefetching dependencies");
        futures::future::join_all(urls.iter().map(|url| session.sources.get(url))).await;
    }

    let mut requires = BTreeMap::new();
    for (dependency, child) in children {
        let binding = match child {
            Some(child) => import_reference(Arc::clone(session), child, task).await?,
            None => Binding::Disabled,
        };
        if let Some(request) = dependency.request {
            requires.insert(request, binding.clone());
        }
        requires.insert(dependency.literal, binding);
    }

    debug!(module = %path, "evaluating");
    let job = ModuleJob {
        key: key.to_string(),
        path: path.clone(),
        code: ModuleCode::CommonJs(source),
        requires,
    };
    session
        .evaluator
        .evaluate(job)
        .await
        .map_err(|e| evaluation_error(&path, reference, e))
}

fn evaluation_error(path: &str, reference: &ModuleReference, source: EvalError) -> Error {
    Error::ModuleEvaluation {
        path: path.to_string(),
        chain: reference.chain(),
        source,
    }
}
